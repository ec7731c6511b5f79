//! Error types for pipeline definition and step invocation.
//!
//! These are the fatal failures: they abort the calling code path. Failures a
//! step reports about its own work are data on the
//! [`PipelineInstance`](crate::PipelineInstance), not values of this type.

use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A step requires a step that was never declared on the pipeline.
    #[error("Step '{step}' requires undeclared step '{dependency}'")]
    UnknownDependency {
        /// The step carrying the bad requirement.
        step: String,
        /// The missing step id.
        dependency: String,
    },

    /// A step was called before all of its required steps completed.
    #[error("Step '{step}' called before required step(s) completed: {}", .missing.join(", "))]
    RequiredStepsNotCompleted {
        /// The step that was called.
        step: String,
        /// Required ids absent from the instance's completed steps.
        missing: Vec<String>,
    },

    /// A step was called with the wrong number of extra arguments.
    #[error("Step '{step}' expects {expected} argument(s), got {got}")]
    Arity {
        /// The step that was called.
        step: String,
        /// Number of extra arguments the implementation takes.
        expected: usize,
        /// Number of extra arguments supplied.
        got: usize,
    },

    /// No step with this id is declared on the pipeline.
    #[error("Unknown step '{0}'")]
    UnknownStep(String),

    /// `exec` was called on a pipeline that has steps taking extra arguments.
    #[error("Pipeline '{0}' cannot be executed automatically: not all steps accept a single argument")]
    AutoExecUnavailable(String),

    /// A step returned an opaque value during automatic execution.
    #[error("Step '{step}' returned a non-pipeline value during execution")]
    OpaqueOutcome {
        /// The step that produced the value.
        step: String,
        /// The value it returned.
        value: serde_json::Value,
    },

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_steps() {
        let err = Error::UnknownDependency {
            step: "load".to_string(),
            dependency: "fetch".to_string(),
        };
        assert_eq!(err.to_string(), "Step 'load' requires undeclared step 'fetch'");

        let err = Error::RequiredStepsNotCompleted {
            step: "c".to_string(),
            missing: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Step 'c' called before required step(s) completed: a, b"
        );
    }
}
