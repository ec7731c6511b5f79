//! The pipeline handle: step calls, automatic execution and result extraction.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::invoke::invoke;
use crate::outcome::StepOutput;
use crate::schema::{PipelineSchema, SchemaBuilder, StepSpec};
use crate::{Error, PipelineInstance, Result};

/// The terminal outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    /// An error was recorded; `step` is the last step at that point.
    Failed {
        /// The last step recorded on the instance.
        step: Option<String>,
        /// The recorded error value.
        error: Value,
    },
    /// The custom extractor's output, or the explicitly set override value.
    Value(Value),
    /// Neither an extractor nor an override value: the instance itself.
    Instance(PipelineInstance),
}

impl PipelineResult {
    /// Whether the run ended with an error.
    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineResult::Failed { .. })
    }

    /// The reported value, if the run produced one.
    pub fn into_value(self) -> Option<Value> {
        match self {
            PipelineResult::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A pipeline type: its schema plus the operations run against its instances.
///
/// Cloning is cheap; clones share the same schema.
///
/// # Example
///
/// ```rust
/// use pipeline_steps::{Pipeline, PipelineResult, StepOutcome};
/// use serde_json::json;
///
/// let pipeline = Pipeline::builder("Checkout")
///     .field("total", 0)
///     .step("price", &[], |_p| StepOutcome::attributes(json!({"total": 40})))
///     .step("tax", &["price"], |p| {
///         let total = p.attribute("total").and_then(|v| v.as_i64()).unwrap_or(0);
///         StepOutcome::Pipeline(p.set_value(total + 2))
///     })
///     .build()
///     .unwrap();
///
/// let result = pipeline.exec(pipeline.new_instance()).unwrap();
/// assert_eq!(result, PipelineResult::Value(json!(42)));
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    schema: Arc<PipelineSchema>,
}

impl Pipeline {
    /// Start declaring a pipeline type.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Wrap an already built schema.
    pub fn from_schema(schema: PipelineSchema) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    /// Returns the pipeline type name.
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Access the schema.
    pub fn schema(&self) -> &Arc<PipelineSchema> {
        &self.schema
    }

    /// Declared step ids, in declaration order.
    pub fn steps(&self) -> Vec<&str> {
        self.schema.steps().iter().map(StepSpec::id).collect()
    }

    /// The precomputed automatic execution order.
    pub fn steps_order(&self) -> &[String] {
        self.schema.execution_order()
    }

    /// Look up a declared step.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.schema.step(id)
    }

    /// A fresh instance with every field at its declared default.
    pub fn new_instance(&self) -> PipelineInstance {
        PipelineInstance::new(Arc::clone(&self.schema))
    }

    /// A fresh instance with `attrs` merged over the defaults.
    pub fn new_instance_with(&self, attrs: Map<String, Value>) -> PipelineInstance {
        self.new_instance().set_attributes(attrs)
    }

    /// Call a step that takes only the instance.
    pub fn call(&self, id: &str, instance: PipelineInstance) -> Result<StepOutput> {
        self.call_with(id, instance, &[])
    }

    /// Call a step with extra arguments.
    pub fn call_with(
        &self,
        id: &str,
        instance: PipelineInstance,
        args: &[Value],
    ) -> Result<StepOutput> {
        let step = self
            .schema
            .step(id)
            .ok_or_else(|| Error::UnknownStep(id.to_string()))?;
        invoke(instance, step, args)
    }

    /// True iff every step accepts exactly the instance argument.
    pub fn allows_auto_exec(&self) -> bool {
        self.schema.allows_auto_exec()
    }

    /// Run every step in the precomputed order, then extract the result.
    ///
    /// Fails without running anything if some step takes extra arguments,
    /// and stops with [`Error::OpaqueOutcome`] if a step returns a raw value.
    pub fn exec(&self, instance: PipelineInstance) -> Result<PipelineResult> {
        if !self.allows_auto_exec() {
            return Err(Error::AutoExecUnavailable(self.name().to_string()));
        }

        info!(
            pipeline = self.name(),
            steps = self.steps_order().len(),
            "Starting pipeline execution"
        );

        let mut current = instance;
        for id in self.steps_order() {
            current = match self.call(id, current)? {
                StepOutput::Pipeline(next) => next,
                StepOutput::Opaque(value) => {
                    return Err(Error::OpaqueOutcome {
                        step: id.clone(),
                        value,
                    })
                }
            };
        }

        info!(
            pipeline = self.name(),
            status = %current.status(),
            last_step = ?current.last_step(),
            "Pipeline execution finished"
        );
        Ok(self.result(current))
    }

    /// Run a fresh instance end to end.
    pub fn run(&self) -> Result<PipelineResult> {
        self.exec(self.new_instance())
    }

    /// The terminal outcome of `instance`.
    ///
    /// A recorded error wins, then the custom extractor, then an explicitly
    /// set value, and otherwise the instance itself.
    pub fn result(&self, instance: PipelineInstance) -> PipelineResult {
        if let Some(error) = instance.error() {
            return PipelineResult::Failed {
                step: instance.last_step().map(str::to_string),
                error: error.clone(),
            };
        }
        if let Some(extract) = self.schema.value_fn() {
            return PipelineResult::Value(extract(&instance));
        }
        match instance.value() {
            Some(value) => PipelineResult::Value(value.clone()),
            None => PipelineResult::Instance(instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StepOutcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain() -> Pipeline {
        Pipeline::builder("Chain")
            .field("x", 0)
            .step("A", &[], |_p| StepOutcome::Ok)
            .step("B", &["A"], |_p| StepOutcome::attributes(json!({"x": 1})))
            .step("C", &["B"], |_p| StepOutcome::halt_error("boom"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_chain_halts_with_error() {
        let pipeline = chain();
        assert_eq!(pipeline.steps_order(), ["A", "B", "C"]);

        let result = pipeline.exec(pipeline.new_instance()).unwrap();
        assert_eq!(
            result,
            PipelineResult::Failed {
                step: Some("C".to_string()),
                error: json!("boom"),
            }
        );

        let mut p = pipeline.new_instance();
        for id in pipeline.steps_order() {
            p = pipeline.call(id, p).unwrap().into_pipeline().unwrap();
        }
        assert_eq!(p.completed_steps(), ["B", "A"]);
        assert_eq!(p.attribute("x"), Some(&json!(1)));
        assert!(p.is_halted());
    }

    #[test]
    fn test_exec_rejects_steps_with_args() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::builder("Args")
            .step("a", &[], move |_p| {
                counter.fetch_add(1, Ordering::SeqCst);
                StepOutcome::Ok
            })
            .step_with_args("b", &["a"], 1, |_p, _args| StepOutcome::Ok)
            .build()
            .unwrap();

        assert!(!pipeline.allows_auto_exec());
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, Error::AutoExecUnavailable(name) if name == "Args"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_halt_stops_later_steps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pipeline = Pipeline::builder("Stop")
            .step("a", &[], |p| StepOutcome::Pipeline(p.halt()))
            .step("b", &["a"], move |_p| {
                counter.fetch_add(1, Ordering::SeqCst);
                StepOutcome::Ok
            })
            .build()
            .unwrap();

        let result = pipeline.run().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match result {
            PipelineResult::Instance(p) => {
                assert!(p.is_halted());
                assert!(p.completed_steps().is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_result_precedence() {
        let plain = Pipeline::builder("Plain")
            .step("a", &[], |_p| StepOutcome::Ok)
            .build()
            .unwrap();
        let p = plain.new_instance();
        assert_eq!(plain.result(p.clone()), PipelineResult::Instance(p.clone()));
        assert_eq!(
            plain.result(p.clone().set_value(Value::Null)),
            PipelineResult::Value(Value::Null)
        );
        assert!(plain.result(p.set_value(1).set_error("e")).is_failed());

        let custom = Pipeline::builder("Custom")
            .field("n", 5)
            .value_with(|p| p.attribute("n").cloned().unwrap_or(Value::Null))
            .build()
            .unwrap();
        let p = custom.new_instance().set_value("ignored");
        assert_eq!(custom.result(p).into_value(), Some(json!(5)));
    }

    #[test]
    fn test_opaque_outcome_stops_exec() {
        let pipeline = Pipeline::builder("Raw")
            .step("a", &[], |_p| StepOutcome::Opaque(json!(7)))
            .build()
            .unwrap();

        let out = pipeline.call("a", pipeline.new_instance()).unwrap();
        assert_eq!(out, StepOutput::Opaque(json!(7)));

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, Error::OpaqueOutcome { ref step, .. } if step == "a"));
    }

    #[test]
    fn test_unknown_step_call() {
        let pipeline = chain();
        let err = pipeline.call("Z", pipeline.new_instance()).unwrap_err();
        assert!(matches!(err, Error::UnknownStep(id) if id == "Z"));
    }

    #[test]
    fn test_new_instance_with_filters_attrs() {
        let pipeline = chain();
        let mut attrs = Map::new();
        attrs.insert("x".to_string(), json!(3));
        attrs.insert("nope".to_string(), json!(3));
        let p = pipeline.new_instance_with(attrs);
        assert_eq!(p.attributes().len(), 1);
        assert_eq!(p.attribute("x"), Some(&json!(3)));
    }
}
