//! Diagnostic export for pipeline instances.
//!
//! Reads the warnings and the recorded error off an instance and turns them
//! into structured, serializable records. [`log`] emits those records through
//! `tracing` and hands the instance back untouched.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

use crate::PipelineInstance;

/// Something worth reporting about a pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Diagnostic {
    /// A warning added by a step or by the caller.
    Warning {
        /// The step that raised it, if known.
        step: Option<String>,
        /// The warning payload.
        warning: serde_json::Value,
    },
    /// The error recorded on the instance.
    Error {
        /// The last step at the time of reporting.
        step: Option<String>,
        /// The error payload.
        error: serde_json::Value,
    },
}

/// A timestamped diagnostic for a named pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    /// Unix epoch timestamp in milliseconds.
    pub timestamp: u128,
    /// The pipeline type name.
    pub pipeline: String,
    /// The diagnostic itself.
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

impl DiagnosticEntry {
    /// Stamp `diagnostic` with the current time.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, diagnostic: Diagnostic) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self {
            timestamp,
            pipeline: pipeline.into(),
            diagnostic,
        }
    }
}

/// Collect the diagnostics of `instance`: warnings oldest first, then the error.
#[must_use]
pub fn diagnostics(instance: &PipelineInstance) -> Vec<DiagnosticEntry> {
    let pipeline = instance.schema().name();
    let mut entries: Vec<DiagnosticEntry> = instance
        .warnings()
        .iter()
        .rev()
        .map(|w| {
            DiagnosticEntry::new(
                pipeline,
                Diagnostic::Warning {
                    step: w.step.clone(),
                    warning: w.warning.clone(),
                },
            )
        })
        .collect();

    if let Some(err) = instance.error() {
        entries.push(DiagnosticEntry::new(
            pipeline,
            Diagnostic::Error {
                step: instance.last_step().map(str::to_string),
                error: err.clone(),
            },
        ));
    }
    entries
}

/// Emit the diagnostics of `instance` and return it unchanged.
///
/// # Example
///
/// ```rust
/// use pipeline_steps::{diagnostics, Pipeline};
///
/// let pipeline = Pipeline::builder("Report").build().unwrap();
/// let p = pipeline.new_instance().add_warning(None, "retrying").set_error("gave up");
/// let same = diagnostics::log(p.clone());
/// assert_eq!(same, p);
/// ```
pub fn log(instance: PipelineInstance) -> PipelineInstance {
    for entry in diagnostics(&instance) {
        match &entry.diagnostic {
            Diagnostic::Warning { step, warning } => {
                warn!(pipeline = %entry.pipeline, step = ?step, %warning, "Pipeline warning");
            }
            Diagnostic::Error { step, error } => {
                error!(pipeline = %entry.pipeline, step = ?step, %error, "Pipeline error");
            }
        }
    }
    instance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pipeline, StepOutcome};
    use serde_json::json;

    fn instance() -> PipelineInstance {
        Pipeline::builder("Diag")
            .step("load", &[], |_p| StepOutcome::Ok)
            .build()
            .unwrap()
            .new_instance()
    }

    #[test]
    fn test_warnings_then_error() {
        let p = instance()
            .add_warning(Some("load"), "first")
            .add_warning(None, "second")
            .set_last_step("load")
            .set_error(json!({"code": 500}));

        let entries = diagnostics(&p);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].diagnostic,
            Diagnostic::Warning {
                step: Some("load".to_string()),
                warning: json!("first"),
            }
        );
        assert_eq!(
            entries[2].diagnostic,
            Diagnostic::Error {
                step: Some("load".to_string()),
                error: json!({"code": 500}),
            }
        );
    }

    #[test]
    fn test_entry_serialization() {
        let p = instance().add_warning(None, "slow");
        let entries = diagnostics(&p);
        let json = serde_json::to_string(&entries[0]).unwrap();
        assert!(json.contains("\"type\":\"Warning\""));
        assert!(json.contains("\"pipeline\":\"Diag\""));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_log_leaves_instance_untouched() {
        let p = instance().add_warning(None, "w");
        assert_eq!(log(p.clone()), p);
        assert!(diagnostics(&instance()).is_empty());
    }
}
