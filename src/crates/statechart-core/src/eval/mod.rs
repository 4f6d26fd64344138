//! The expression-evaluator capability.
//!
//! Guard conditions and value expressions are opaque strings to the
//! interpreter core: it hands them to an [`ExpressionEvaluator`] together
//! with the current [`DataStore`] and only traps failures into platform
//! error events. The core never interprets expression syntax itself.
//!
//! Two implementations ship with the crate:
//!
//! - [`NullEvaluator`] — for the `null` datamodel: every expression is an
//!   error, and absent guards are the only truthy conditions.
//! - [`BasicEvaluator`](basic::BasicEvaluator) — an ecmascript-like subset
//!   (literals, data-store paths, arithmetic/comparison/boolean operators,
//!   `Date.now()`) sufficient for typical charts and for tests.
//!
//! Hosts embedding a real script engine implement the trait themselves and
//! pass it through the run options.

pub mod basic;

use crate::datamodel::DataStore;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure produced by an evaluator.
///
/// Never surfaces to the host as a run failure: the executing layer traps
/// it into a platform error event and continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The expression does not parse.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// A bare identifier does not resolve against the data store.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    /// An operation was applied to values of the wrong shape.
    #[error("type error: {0}")]
    Type(String),
    /// The active datamodel does not support expressions.
    #[error("expression evaluation is disabled by the null datamodel")]
    Disabled,
    /// Any other evaluator-specific failure.
    #[error("{0}")]
    Other(String),
}

/// The evaluation capability consumed by the interpreter core.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expr` against the data store, producing a value.
    async fn evaluate(&self, expr: &str, store: &DataStore) -> Result<Value, EvalError>;

    /// Evaluate `expr` as a guard condition.
    async fn evaluate_condition(&self, expr: &str, store: &DataStore) -> Result<bool, EvalError> {
        Ok(is_truthy(&self.evaluate(expr, store).await?))
    }
}

/// Ecmascript-like truthiness over JSON values.
///
/// `false`, `null`, `0`, `NaN`, and the empty string are falsy; every
/// other value, including empty arrays and objects, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluator for the `null` datamodel: expressions are unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvaluator;

#[async_trait]
impl ExpressionEvaluator for NullEvaluator {
    async fn evaluate(&self, _expr: &str, _store: &DataStore) -> Result<Value, EvalError> {
        Err(EvalError::Disabled)
    }
}
