//! The guarded call of a single step.

use serde_json::Value;
use tracing::{debug, warn};

use crate::outcome::{normalize, StepOutput};
use crate::schema::StepSpec;
use crate::{Error, PipelineInstance, Result};

/// Run `step` against `instance`.
///
/// A halted instance comes back untouched and the step body is not called.
/// Otherwise every required step must already be in the instance's completed
/// steps, and `args` must match the implementation's arity; either failure is
/// returned as an error without calling the body.
pub fn invoke(instance: PipelineInstance, step: &StepSpec, args: &[Value]) -> Result<StepOutput> {
    if instance.is_halted() {
        debug!(step = step.id(), "Pipeline halted, skipping step");
        return Ok(StepOutput::Pipeline(instance));
    }

    let missing: Vec<String> = step
        .required_steps()
        .iter()
        .filter(|id| !instance.is_completed(id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        warn!(step = step.id(), ?missing, "Required steps not completed");
        return Err(Error::RequiredStepsNotCompleted {
            step: step.id().to_string(),
            missing,
        });
    }

    let expected = step.implementation().arity();
    if args.len() != expected {
        return Err(Error::Arity {
            step: step.id().to_string(),
            expected,
            got: args.len(),
        });
    }

    debug!(step = step.id(), "Invoking step");
    let outcome = step.implementation().call(instance.clone(), args);
    let output = normalize(instance, step.id(), outcome);

    match &output {
        StepOutput::Pipeline(p) => debug!(step = step.id(), status = %p.status(), "Step finished"),
        StepOutput::Opaque(_) => debug!(step = step.id(), "Step returned an opaque value"),
    }
    Ok(output)
}
