//! Arithmetic Expression Evaluator for Sensor Conversions
//!
//! ## Overview
//!
//! Conversion expressions give sensors their engineering meaning beyond a
//! linear calibration: a physical sensor can map its measured voltage
//! through an arbitrary curve, and a virtual sensor computes its value
//! from other sensors entirely. The language is deliberately small:
//!
//! - arithmetic `+ - * / ^` with parentheses
//! - numeric literals with optional decimal/exponent
//! - the constants `PI` and `E`
//! - a fixed builtin function set (`sin`, `cos`, `tan`, `sqrt`, `abs`,
//!   `exp`, `ln`, `log10`, `min`, `max`)
//! - named variables, either bare (`x`, the canonical voltage binding)
//!   or braced sensor references (`{cooling_water}`)
//!
//! ## Design
//!
//! Expressions compile to a typed AST ([`Expr`]) and evaluation is a pure
//! recursive walk over a bindings map. There is no embedded scripting
//! engine and no mutable interpreter state: the same `Expr` can be
//! evaluated concurrently against different bindings.
//!
//! Braced references exist for the dependency resolver's benefit:
//! [`extract_references`] scans them out of the source text without a
//! full parse, and the resolver orders sensors so every reference is
//! already computed when an expression runs. At evaluation time a braced
//! reference behaves exactly like a bare variable of the same name.
//!
//! ```
//! use voltmux_core::expr::{self, Bindings};
//!
//! let mut bindings = Bindings::new();
//! bindings.insert("x".into(), 3.0);
//! assert_eq!(expr::evaluate_str("2 * x + 1", &bindings).unwrap(), 7.0);
//! ```
//!
//! All arithmetic is `f64`; a result that is not a finite real number
//! (division by zero, `ln` of a negative) is an error, never a silent
//! NaN.

mod parser;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;

/// Variable bindings an expression is evaluated against
pub type Bindings = HashMap<String, f64>;

/// Expression compilation and evaluation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Source text is not a valid expression
    #[error("parse error at offset {position}: {message}")]
    Parse {
        position: usize,
        message: String,
    },

    /// A referenced name has no binding
    #[error("unbound variable '{0}'")]
    UnboundVariable(String),

    /// Evaluation did not produce a finite real number
    #[error("expression did not evaluate to a finite number")]
    NonNumeric,
}

/// Binary operators, conventional precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Builtin function set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Sqrt,
    Abs,
    Exp,
    Ln,
    Log10,
    Min,
    Max,
}

impl Function {
    /// Look up a function by its source-text name
    pub fn from_name(name: &str) -> Option<Function> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "exp" => Function::Exp,
            "ln" => Function::Ln,
            "log10" => Function::Log10,
            "min" => Function::Min,
            "max" => Function::Max,
            _ => return None,
        })
    }

    /// Number of arguments the function takes
    pub fn arity(&self) -> usize {
        match self {
            Function::Min | Function::Max => 2,
            _ => 1,
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Function::Sin => args[0].sin(),
            Function::Cos => args[0].cos(),
            Function::Tan => args[0].tan(),
            Function::Sqrt => args[0].sqrt(),
            Function::Abs => args[0].abs(),
            Function::Exp => args[0].exp(),
            Function::Ln => args[0].ln(),
            Function::Log10 => args[0].log10(),
            Function::Min => args[0].min(args[1]),
            Function::Max => args[0].max(args[1]),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Sqrt => "sqrt",
            Function::Abs => "abs",
            Function::Exp => "exp",
            Function::Ln => "ln",
            Function::Log10 => "log10",
            Function::Min => "min",
            Function::Max => "max",
        };
        f.write_str(name)
    }
}

/// Compiled expression
///
/// The constants `PI` and `E` are folded to [`Expr::Number`] during
/// parsing; braced sensor references and bare identifiers both become
/// [`Expr::Variable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal or folded constant
    Number(f64),
    /// Named variable resolved from the bindings at evaluation time
    Variable(String),
    /// Negation
    Neg(Box<Expr>),
    /// Binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Builtin function call
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Evaluate against the given bindings
    ///
    /// Fails with [`ExprError::UnboundVariable`] for names missing from
    /// `bindings` and [`ExprError::NonNumeric`] when the result is not a
    /// finite real number.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<f64, ExprError> {
        let value = self.eval_node(bindings)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExprError::NonNumeric)
        }
    }

    fn eval_node(&self, bindings: &Bindings) -> Result<f64, ExprError> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::Variable(name) => bindings
                .get(name)
                .copied()
                .ok_or_else(|| ExprError::UnboundVariable(name.clone()))?,
            Expr::Neg(inner) => -inner.eval_node(bindings)?,
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval_node(bindings)?;
                let r = rhs.eval_node(bindings)?;
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Pow => l.powf(r),
                }
            }
            Expr::Call(func, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval_node(bindings)?);
                }
                func.apply(&values)
            }
        })
    }

    /// Names of all variables the expression reads
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(inner) => inner.collect_variables(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }
}

/// Compile source text to an [`Expr`]
pub fn compile(src: &str) -> Result<Expr, ExprError> {
    parser::parse(src)
}

/// Compile and evaluate in one step
pub fn evaluate_str(src: &str, bindings: &Bindings) -> Result<f64, ExprError> {
    compile(src)?.evaluate(bindings)
}

/// Scan out every `{identifier}` sensor reference in the source text
///
/// This is a lexical scan, not a parse: it works on expressions that
/// would fail to compile, so the dependency resolver sees the same
/// references the evaluator would. Malformed brace pairs are skipped;
/// they surface as parse errors when the expression is compiled.
pub fn extract_references(src: &str) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    let mut rest = src;
    while let Some(open) = rest.find('{') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find('}') else { break };
        let name = &rest[..close];
        if crate::sensor::is_valid_id(name) {
            refs.insert(name.to_string());
        }
        rest = &rest[close + 1..];
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, f64)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn linear_in_x() {
        let b = bind(&[("x", 3.0)]);
        assert_eq!(evaluate_str("2 * x + 1", &b).unwrap(), 7.0);
    }

    #[test]
    fn braced_references_evaluate_like_variables() {
        let b = bind(&[("a", 4.0), ("b", 4.0)]);
        assert_eq!(evaluate_str("{a} * {b}", &b).unwrap(), 16.0);
    }

    #[test]
    fn precedence_and_associativity() {
        let b = Bindings::new();
        assert_eq!(evaluate_str("2 + 3 * 4", &b).unwrap(), 14.0);
        assert_eq!(evaluate_str("(2 + 3) * 4", &b).unwrap(), 20.0);
        assert_eq!(evaluate_str("2 ^ 3 ^ 2", &b).unwrap(), 512.0);
        assert_eq!(evaluate_str("-2 ^ 2", &b).unwrap(), -4.0);
        assert_eq!(evaluate_str("2 ^ -1", &b).unwrap(), 0.5);
        assert_eq!(evaluate_str("10 - 4 - 3", &b).unwrap(), 3.0);
    }

    #[test]
    fn constants_are_folded() {
        let b = Bindings::new();
        let pi = evaluate_str("PI", &b).unwrap();
        assert!((pi - std::f64::consts::PI).abs() < 1e-15);
        assert_eq!(compile("E").unwrap(), Expr::Number(std::f64::consts::E));
    }

    #[test]
    fn function_calls() {
        let b = bind(&[("x", 9.0)]);
        assert_eq!(evaluate_str("sqrt(x)", &b).unwrap(), 3.0);
        assert_eq!(evaluate_str("min(3, 8)", &b).unwrap(), 3.0);
        assert_eq!(evaluate_str("abs(0 - 2.5)", &b).unwrap(), 2.5);
        let cos0 = evaluate_str("cos(0)", &b).unwrap();
        assert_eq!(cos0, 1.0);
    }

    #[test]
    fn unbound_variable_is_reported_by_name() {
        let b = Bindings::new();
        assert_eq!(
            evaluate_str("{flow_rate} * 2", &b),
            Err(ExprError::UnboundVariable("flow_rate".into()))
        );
    }

    #[test]
    fn non_finite_results_are_errors() {
        let b = bind(&[("x", 0.0)]);
        assert_eq!(evaluate_str("1 / x", &b), Err(ExprError::NonNumeric));
        assert_eq!(evaluate_str("ln(0 - 1)", &b), Err(ExprError::NonNumeric));
    }

    #[test]
    fn parse_errors_carry_position() {
        match compile("2 +") {
            Err(ExprError::Parse { position, .. }) => assert!(position >= 2),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(compile("").is_err());
        assert!(compile("2 ** 3").is_err());
        assert!(compile("foo(1)").is_err());
        assert!(compile("min(1)").is_err());
        assert!(compile("(1 + 2").is_err());
    }

    #[test]
    fn reference_extraction() {
        let refs = extract_references("{physical_temp_1} * 0.8");
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("physical_temp_1"));

        let refs = extract_references("({a} + {b}) / max({a}, 1)");
        assert_eq!(refs.len(), 2);

        // Lexical scan tolerates malformed text
        assert!(extract_references("{unterminated").is_empty());
        assert!(extract_references("{bad id}").is_empty());
        assert!(extract_references("no refs at all").is_empty());
    }

    #[test]
    fn variables_walks_the_tree() {
        let expr = compile("{a} * x + sin({b})").unwrap();
        let vars = expr.variables();
        assert_eq!(vars.len(), 3);
        assert!(vars.contains("a") && vars.contains("b") && vars.contains("x"));
    }
}
