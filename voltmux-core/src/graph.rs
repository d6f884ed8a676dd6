//! Dependency Resolution for Expression-Linked Sensors
//!
//! ## Overview
//!
//! Virtual sensors (and physical sensors with a conversion expression)
//! reference other sensors by id. Before a polling cycle can run, those
//! references must be arranged into a processing order where every
//! sensor comes after everything it reads. This module produces that
//! order, or a typed failure when the configuration cannot be ordered.
//!
//! Two guarantees, in priority order:
//!
//! 1. Topological: a sensor appears after every id its expression
//!    references.
//! 2. Physical-first: all physical sensors come before all virtual
//!    sensors, so hardware reads populate the cycle buffer before any
//!    derived evaluation needs them. The partition is stable, so the
//!    topological order within each kind is preserved.
//!
//! The traversal is a three-color depth-first search: `Unvisited`,
//! `InProgress`, `Done`. Meeting an `InProgress` node again means the
//! configuration contains a reference cycle; referencing an id that is
//! not in the set at all is its own failure. Both are ordinary `Result`
//! values, not panics: a bad configuration must only cost the cycle
//! that observed it.
//!
//! The order is recomputed from the registry snapshot at every polling
//! cycle. It is deliberately not cached: configuration can change
//! between cycles, and the sets are small enough that the walk is
//! cheaper than invalidation bookkeeping.

use std::collections::HashMap;

use thiserror::Error;

use crate::sensor::SensorDefinition;

/// Why a sensor set cannot be ordered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The reference graph contains a cycle through this sensor
    #[error("cyclic dependency detected at sensor '{0}'")]
    CyclicDependency(String),

    /// An expression references an id absent from the sensor set
    #[error("sensor '{sensor}' references unknown sensor '{missing}'")]
    UnknownDependency {
        sensor: String,
        missing: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Compute the processing order for one cycle
///
/// Returns sensor ids such that every sensor follows all ids its
/// expression references, with physical sensors stably ordered before
/// virtual ones. Input order is the insertion order of the registry
/// snapshot, which makes the result deterministic for a given
/// configuration.
pub fn resolve_order(definitions: &[SensorDefinition]) -> Result<Vec<String>, ResolveError> {
    let by_id: HashMap<&str, &SensorDefinition> = definitions
        .iter()
        .map(|def| (def.id.as_str(), def))
        .collect();

    let mut marks: HashMap<&str, Mark> = definitions
        .iter()
        .map(|def| (def.id.as_str(), Mark::Unvisited))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(definitions.len());
    for def in definitions {
        visit(def, &by_id, &mut marks, &mut order)?;
    }

    // Stable partition: physical first, topological order kept within
    // each kind.
    order.sort_by_key(|id| !by_id[id.as_str()].is_physical());

    Ok(order)
}

fn visit<'a>(
    def: &'a SensorDefinition,
    by_id: &HashMap<&'a str, &'a SensorDefinition>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), ResolveError> {
    match marks[def.id.as_str()] {
        Mark::Done => return Ok(()),
        Mark::InProgress => return Err(ResolveError::CyclicDependency(def.id.clone())),
        Mark::Unvisited => {}
    }
    marks.insert(def.id.as_str(), Mark::InProgress);

    // BTreeSet iteration keeps the recursion order deterministic
    for reference in def.references() {
        let dep = *by_id
            .get(reference.as_str())
            .ok_or_else(|| ResolveError::UnknownDependency {
                sensor: def.id.clone(),
                missing: reference.clone(),
            })?;
        visit(dep, by_id, marks, order)?;
    }

    marks.insert(def.id.as_str(), Mark::Done);
    order.push(def.id.clone());
    Ok(())
}
