//! Error types for chart construction and interpretation.
//!
//! All fallible operations in this crate return [`Result`], an alias over
//! [`ChartError`]. The enum splits along the three classes a statechart
//! system distinguishes:
//!
//! ```text
//! ChartError
//! ├── Xml              - Malformed chart source
//! ├── UnknownElement   - Schema violation: element not in the dialect
//! ├── MissingAttribute - Schema violation: required attribute absent
//! ├── UnknownTarget    - Transition target does not resolve
//! ├── Validation       - Other construction-time violations
//! ├── Invariant        - Active-configuration invariant broken (fatal)
//! ├── Execution        - Run-level failure
//! ├── QueueClosed      - Event posted to a finished run
//! └── Serialization    - JSON conversion errors
//! ```
//!
//! Construction errors abort parsing; no chart is produced. Evaluation
//! errors during a run never surface here — they are trapped into platform
//! error events on the internal queue (see the executable-content module).
//! Only fatal conditions (invariant violations, runaway loops) end a run
//! with an `Err`.

use thiserror::Error;

/// Convenience result type using [`ChartError`].
pub type Result<T> = std::result::Result<T, ChartError>;

/// Error type for chart construction and interpretation.
#[derive(Error, Debug)]
pub enum ChartError {
    /// The chart source is not well-formed XML.
    #[error("invalid chart source: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The chart source contains an element outside the dialect.
    #[error("unknown element <{element}> inside <{parent}>")]
    UnknownElement {
        /// Offending element name.
        element: String,
        /// Name of the enclosing element.
        parent: String,
    },

    /// A required attribute is missing from a chart element.
    #[error("missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        /// Element the attribute belongs on.
        element: String,
        /// Name of the missing attribute.
        attribute: String,
    },

    /// A transition target does not resolve to a state.
    #[error("transition target '{target}' from state '{source_state}' does not resolve")]
    UnknownTarget {
        /// Path of the transition's source state.
        source_state: String,
        /// The unresolved target token.
        target: String,
    },

    /// Any other construction-time violation of the chart schema.
    #[error("chart validation failed: {0}")]
    Validation(String),

    /// An active-configuration invariant was broken mid-run. Fatal.
    #[error("configuration invariant violated: {0}")]
    Invariant(String),

    /// A run-level failure (runaway macrostep, poisoned loop state).
    #[error("execution failed: {0}")]
    Execution(String),

    /// An event was posted to a run whose loop has already returned.
    #[error("event queue closed: the run has terminated")]
    QueueClosed,

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChartError {
    /// Create a construction-time validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a missing-attribute error.
    pub fn missing_attribute(element: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingAttribute {
            element: element.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a fatal invariant-violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a run-level execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_carry_context() {
        let err = ChartError::missing_attribute("scxml", "initial");
        assert_eq!(err.to_string(), "missing required attribute 'initial' on <scxml>");

        let err = ChartError::UnknownTarget {
            source_state: "main".to_string(),
            target: "nowhere".to_string(),
        };
        assert!(err.to_string().contains("nowhere"));
        assert!(err.to_string().contains("main"));
    }
}
