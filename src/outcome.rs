//! Step outcomes and their normalization into state transitions.
//!
//! A step body returns a [`StepOutcome`]. [`normalize`] maps each shape onto
//! the instance and yields a [`StepOutput`]: either the updated instance or,
//! for [`StepOutcome::Opaque`], the raw value the step produced.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::{PipelineInstance, Status};

/// The status tag carried by a tuple-shaped outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The step succeeded.
    Ok,
    /// The step failed.
    Error,
}

/// Everything a step body may return.
///
/// # Example
///
/// ```rust
/// use pipeline_steps::{Pipeline, StepOutcome};
/// use serde_json::json;
///
/// let pipeline = Pipeline::builder("Fetch")
///     .field("body", json!(null))
///     .step("fetch", &[], |_p| StepOutcome::attributes(json!({"body": "hi"})))
///     .step("parse", &["fetch"], |_p| StepOutcome::halt_error("bad body"))
///     .build()
///     .unwrap();
///
/// let p = pipeline.new_instance();
/// let p = pipeline.call("fetch", p).unwrap().into_pipeline().unwrap();
/// assert_eq!(p.attribute("body"), Some(&json!("hi")));
///
/// let p = pipeline.call("parse", p).unwrap().into_pipeline().unwrap();
/// assert!(p.is_halted());
/// assert_eq!(p.error(), Some(&json!("bad body")));
/// ```
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Mark the step completed without touching attributes.
    Ok,
    /// Mark the step as the last step without attaching an error value.
    Error,
    /// Apply the verdict's transition to another instance.
    Instance(Verdict, PipelineInstance),
    /// Like [`Instance`](Self::Instance), then halt.
    HaltInstance(Verdict, PipelineInstance),
    /// Apply the verdict's transition to the current instance with a payload.
    ///
    /// For `Ok` an object payload is merged into the attributes; for `Error`
    /// a non-null payload becomes the error.
    Value(Verdict, Value),
    /// Like [`Value`](Self::Value), then halt.
    HaltValue(Verdict, Value),
    /// Take over another instance and apply the transition for its own status.
    Pipeline(PipelineInstance),
    /// Shorthand for `Value(Ok, Value::Object(map))`.
    Attributes(Map<String, Value>),
    /// Not a state transition: the value is handed back to the caller as is.
    Opaque(Value),
}

impl StepOutcome {
    /// `Value(Ok, payload)`.
    pub fn ok_with(payload: impl Into<Value>) -> Self {
        StepOutcome::Value(Verdict::Ok, payload.into())
    }

    /// `Value(Error, error)`.
    pub fn error_with(error: impl Into<Value>) -> Self {
        StepOutcome::Value(Verdict::Error, error.into())
    }

    /// `HaltValue(Error, error)`.
    pub fn halt_error(error: impl Into<Value>) -> Self {
        StepOutcome::HaltValue(Verdict::Error, error.into())
    }

    /// `HaltValue(Ok, payload)`.
    pub fn halt_ok(payload: impl Into<Value>) -> Self {
        StepOutcome::HaltValue(Verdict::Ok, payload.into())
    }

    /// An attribute update from a JSON value.
    ///
    /// Objects become [`Attributes`](Self::Attributes); any other value is
    /// treated as an opaque return.
    pub fn attributes(attrs: Value) -> Self {
        match attrs {
            Value::Object(map) => StepOutcome::Attributes(map),
            other => StepOutcome::Opaque(other),
        }
    }
}

impl From<PipelineInstance> for StepOutcome {
    fn from(instance: PipelineInstance) -> Self {
        StepOutcome::Pipeline(instance)
    }
}

impl From<Map<String, Value>> for StepOutcome {
    fn from(attrs: Map<String, Value>) -> Self {
        StepOutcome::Attributes(attrs)
    }
}

/// What a step call hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// The updated instance.
    Pipeline(PipelineInstance),
    /// A value the step returned instead of a state transition.
    Opaque(Value),
}

impl StepOutput {
    /// The instance, or `None` for an opaque value.
    pub fn into_pipeline(self) -> Option<PipelineInstance> {
        match self {
            StepOutput::Pipeline(p) => Some(p),
            StepOutput::Opaque(_) => None,
        }
    }

    /// Borrow the instance, or `None` for an opaque value.
    pub fn as_pipeline(&self) -> Option<&PipelineInstance> {
        match self {
            StepOutput::Pipeline(p) => Some(p),
            StepOutput::Opaque(_) => None,
        }
    }

    /// Whether the step returned a raw value.
    pub fn is_opaque(&self) -> bool {
        matches!(self, StepOutput::Opaque(_))
    }
}

/// Apply a step's outcome to the pre-call `instance`.
pub fn normalize(instance: PipelineInstance, step: &str, outcome: StepOutcome) -> StepOutput {
    let next = match outcome {
        StepOutcome::Ok => mark_ok(instance, step, None),
        StepOutcome::Error => instance.set_last_step(step),
        StepOutcome::Instance(verdict, other) => apply(other, step, verdict, None),
        StepOutcome::HaltInstance(verdict, other) => apply(other, step, verdict, None).halt(),
        StepOutcome::Value(verdict, value) => apply(instance, step, verdict, Some(value)),
        StepOutcome::HaltValue(verdict, value) => {
            apply(instance, step, verdict, Some(value)).halt()
        }
        StepOutcome::Pipeline(other) => match other.status() {
            Status::Ok => mark_ok(other, step, None),
            Status::Error => mark_error(other, step, None),
            Status::Halt => other.halt(),
        },
        StepOutcome::Attributes(map) => {
            apply(instance, step, Verdict::Ok, Some(Value::Object(map)))
        }
        StepOutcome::Opaque(value) => return StepOutput::Opaque(value),
    };
    StepOutput::Pipeline(next)
}

fn apply(
    target: PipelineInstance,
    step: &str,
    verdict: Verdict,
    payload: Option<Value>,
) -> PipelineInstance {
    match verdict {
        Verdict::Ok => mark_ok(target, step, payload),
        Verdict::Error => mark_error(target, step, payload),
    }
}

fn mark_ok(target: PipelineInstance, step: &str, payload: Option<Value>) -> PipelineInstance {
    let target = target.set_completed_step(step).set_last_step(step);
    match payload {
        Some(Value::Object(attrs)) => target.set_attributes(attrs),
        _ => target,
    }
}

// A missing or null payload keeps whatever error was already recorded.
fn mark_error(target: PipelineInstance, step: &str, payload: Option<Value>) -> PipelineInstance {
    let target = target.set_last_step(step);
    match payload {
        Some(error) => target.set_error(error),
        None => target,
    }
}
