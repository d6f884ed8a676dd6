//! End-to-end acquisition tests
//!
//! Drives the full service against a scripted bus: configuration comes
//! from an in-memory store, the codec talks to a `ReplayBus`, and the
//! assertions read through the public `EngineHandle` exactly like a
//! presentation layer would.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use voltmux_core::reading::{Reading, ReadingStatus};
use voltmux_core::sensor::{SensorDefinition, SensorKind};
use voltmux_service::bus::ReplayBus;
use voltmux_service::config::{AdcConfig, MemoryConfigStore};
use voltmux_service::scheduler::{EngineHandle, PollService, PollSettings, ReadError, UpdateError};

fn physical(id: &str, channel: u8) -> SensorDefinition {
    SensorDefinition {
        id: id.into(),
        name: id.into(),
        unit: "%".into(),
        sampling_rate_ms: 100,
        kind: SensorKind::Physical {
            channel,
            min_voltage: 0.0,
            max_voltage: 3.3,
            min_value: 0.0,
            max_value: 100.0,
            conversion: None,
        },
    }
}

fn virtual_sensor(id: &str, expression: &str) -> SensorDefinition {
    SensorDefinition {
        id: id.into(),
        name: id.into(),
        unit: String::new(),
        sampling_rate_ms: 100,
        kind: SensorKind::Virtual {
            expression: expression.into(),
        },
    }
}

fn fast_settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_millis(10),
        init_retry_delay: Duration::from_millis(10),
    }
}

/// Poll the handle until the snapshot satisfies `cond` or a deadline passes
async fn wait_until(
    handle: &EngineHandle,
    cond: impl Fn(&[Reading]) -> bool,
) -> Vec<Reading> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let readings = handle.readings().await;
        if cond(&readings) {
            return readings;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time; last snapshot: {readings:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn physical_and_virtual_flow_through_one_cycle() {
    let bus = ReplayBus::new();
    bus.push_response(vec![0x00, 0x02, 0x00]); // raw 512 on every read

    let store = MemoryConfigStore::new()
        .with_adc(AdcConfig::default())
        .with_sensors(vec![
            physical("level", 0),
            virtual_sensor("scaled", "{level} * 0.8"),
        ]);

    let service = PollService::new(Arc::new(store), bus.factory(), fast_settings());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = service.spawn(shutdown_rx);

    let readings = wait_until(&handle, |r| r.len() == 2).await;

    let level = &readings[0];
    assert_eq!(level.sensor_id, "level");
    assert_eq!(level.status, ReadingStatus::Processed);
    assert_eq!(level.raw_code, Some(512));
    // 512/1023 of 0..100
    assert!((level.value - 50.048).abs() < 0.01);

    let scaled = &readings[1];
    assert_eq!(scaled.status, ReadingStatus::Processed);
    assert_eq!(scaled.value, level.value * 0.8);

    // Per-id lookup matches the snapshot
    let by_id = handle.reading("scaled").await.unwrap();
    assert_eq!(by_id.value, scaled.value);

    // Removing the whole set empties the next snapshot
    handle.update_sensors(vec![]).await.unwrap();
    wait_until(&handle, |r| r.is_empty()).await;
    assert!(matches!(
        handle.reading("level").await,
        Err(ReadError::NotFound(_))
    ));

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn one_failing_sensor_does_not_block_the_rest() {
    let bus = ReplayBus::new();
    bus.push_response(vec![0x00, 0x02, 0x00]); // channel 0 succeeds
    bus.push_timeout(); // channel 1 times out, every cycle

    let store = MemoryConfigStore::new()
        .with_adc(AdcConfig::default())
        .with_sensors(vec![
            physical("ok_sensor", 0),
            physical("dead_sensor", 1),
            virtual_sensor("derived", "{dead_sensor} * 2"),
        ]);

    let service = PollService::new(Arc::new(store), bus.factory(), fast_settings());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, _task) = service.spawn(shutdown_rx);

    let readings = wait_until(&handle, |r| r.len() == 3).await;

    let ok = handle.reading("ok_sensor").await.unwrap();
    assert_eq!(ok.status, ReadingStatus::Processed);

    // The dead channel reports its failure instead of vanishing
    let dead = handle.reading("dead_sensor").await.unwrap();
    assert_eq!(dead.status, ReadingStatus::Error);
    assert!(dead.error.unwrap().contains("timed out"));

    // And its dependent fails by propagation, not by reading zero
    let derived = handle.reading("derived").await.unwrap();
    assert_eq!(derived.status, ReadingStatus::Error);
    assert!(derived.error.unwrap().contains("dead_sensor"));

    assert_eq!(readings.len(), 3);
}

#[tokio::test]
async fn unorderable_configuration_skips_cycles_until_fixed() {
    let bus = ReplayBus::new();
    bus.push_response(vec![0x00, 0x02, 0x00]);

    // Structurally valid, but references a sensor that does not exist;
    // dependency resolution fails every cycle
    let store = MemoryConfigStore::new()
        .with_adc(AdcConfig::default())
        .with_sensors(vec![virtual_sensor("orphan", "{ghost} + 1")]);

    let service = PollService::new(Arc::new(store), bus.factory(), fast_settings());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, _task) = service.spawn(shutdown_rx);

    // Give the scheduler a few intervals: nothing must be published
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.readings().await.is_empty());

    // A corrected set recovers without restarting the service
    handle
        .update_sensors(vec![virtual_sensor("fine", "1 + 1")])
        .await
        .unwrap();
    let readings = wait_until(&handle, |r| r.len() == 1).await;
    assert_eq!(readings[0].sensor_id, "fine");
    assert_eq!(readings[0].value, 2.0);
}

#[tokio::test]
async fn rejected_update_changes_nothing() {
    let bus = ReplayBus::new();
    bus.push_response(vec![0x00, 0x02, 0x00]);

    let store = MemoryConfigStore::new()
        .with_adc(AdcConfig::default())
        .with_sensors(vec![physical("keep", 0)]);

    let service = PollService::new(Arc::new(store), bus.factory(), fast_settings());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, _task) = service.spawn(shutdown_rx);

    wait_until(&handle, |r| r.len() == 1).await;

    // Duplicate channel: itemized rejection, no partial apply
    let err = handle
        .update_sensors(vec![physical("a", 4), physical("b", 4)])
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Rejected(_)));

    let sensors = handle.sensors().await;
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].id, "keep");

    // The old set keeps producing readings
    let reading = handle.reading("keep").await.unwrap();
    assert_eq!(reading.status, ReadingStatus::Processed);
}

#[tokio::test]
async fn malformed_ids_are_rejected_without_touching_the_registry() {
    let bus = ReplayBus::new();
    let store = MemoryConfigStore::new();

    let service = PollService::new(Arc::new(store), bus.factory(), fast_settings());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, _task) = service.spawn(shutdown_rx);

    assert!(matches!(
        handle.reading("not a valid id!").await,
        Err(ReadError::InvalidId(_))
    ));
    assert!(matches!(
        handle.reading("absent_but_wellformed").await,
        Err(ReadError::NotFound(_))
    ));
}
