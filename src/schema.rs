//! Pipeline type definitions: declared fields, steps and their ordering.
//!
//! A [`PipelineSchema`] is built once through [`SchemaBuilder`] and is
//! immutable afterwards. Building validates every step's required steps
//! against the declared step set and precomputes the order used by
//! [`Pipeline::exec`](crate::Pipeline::exec).

use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::outcome::StepOutcome;
use crate::{Error, Pipeline, PipelineInstance, Result};

/// A step body taking only the pipeline instance.
pub type UnaryFn = dyn Fn(PipelineInstance) -> StepOutcome + Send + Sync;

/// A step body taking the pipeline instance plus call-site arguments.
pub type ArgsFn = dyn Fn(PipelineInstance, &[Value]) -> StepOutcome + Send + Sync;

/// Custom extraction of the final value reported by [`Pipeline::result`](crate::Pipeline::result).
pub type ValueFn = dyn Fn(&PipelineInstance) -> Value + Send + Sync;

/// The implementation attached to a step, tagged with its arity.
#[derive(Clone)]
pub enum StepFn {
    /// Accepts exactly the instance; eligible for automatic execution.
    Unary(Arc<UnaryFn>),
    /// Accepts the instance plus `arity` extra arguments.
    WithArgs {
        /// Number of extra arguments expected at the call site.
        arity: usize,
        /// The step body.
        f: Arc<ArgsFn>,
    },
}

impl StepFn {
    /// Wrap a closure that takes only the instance.
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(PipelineInstance) -> StepOutcome + Send + Sync + 'static,
    {
        StepFn::Unary(Arc::new(f))
    }

    /// Wrap a closure taking `arity` extra arguments.
    pub fn with_args<F>(arity: usize, f: F) -> Self
    where
        F: Fn(PipelineInstance, &[Value]) -> StepOutcome + Send + Sync + 'static,
    {
        StepFn::WithArgs {
            arity,
            f: Arc::new(f),
        }
    }

    /// Number of extra arguments, not counting the instance.
    pub fn arity(&self) -> usize {
        match self {
            StepFn::Unary(_) => 0,
            StepFn::WithArgs { arity, .. } => *arity,
        }
    }

    /// Whether the implementation accepts exactly the instance argument.
    pub fn is_unary(&self) -> bool {
        matches!(self, StepFn::Unary(_))
    }

    pub(crate) fn call(&self, instance: PipelineInstance, args: &[Value]) -> StepOutcome {
        match self {
            StepFn::Unary(f) => f(instance),
            StepFn::WithArgs { f, .. } => f(instance, args),
        }
    }
}

impl std::fmt::Debug for StepFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFn::Unary(_) => f.write_str("StepFn::Unary"),
            StepFn::WithArgs { arity, .. } => write!(f, "StepFn::WithArgs({arity})"),
        }
    }
}

/// One declared step of a pipeline type.
#[derive(Debug, Clone)]
pub struct StepSpec {
    id: String,
    required_steps: BTreeSet<String>,
    implementation: StepFn,
}

impl StepSpec {
    /// Declare a step with its required steps and implementation.
    pub fn new(id: impl Into<String>, required_steps: &[&str], implementation: StepFn) -> Self {
        Self {
            id: id.into(),
            required_steps: required_steps.iter().map(|s| (*s).to_string()).collect(),
            implementation,
        }
    }

    /// The step identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Steps that must appear in the instance's completed steps before this one runs.
    pub fn required_steps(&self) -> &BTreeSet<String> {
        &self.required_steps
    }

    /// The step body.
    pub fn implementation(&self) -> &StepFn {
        &self.implementation
    }
}

/// A declared attribute field and its initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// The field name.
    pub name: String,
    /// Value the field holds on a freshly created instance.
    pub default: Value,
}

/// The validated, immutable definition of a pipeline type.
pub struct PipelineSchema {
    name: String,
    fields: Vec<FieldSpec>,
    steps: Vec<StepSpec>,
    execution_order: Vec<String>,
    value_fn: Option<Arc<ValueFn>>,
}

impl PipelineSchema {
    /// Returns the pipeline type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared attribute fields, in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Whether `name` is a declared attribute field.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Declared steps, in declaration order.
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Look up a declared step by id.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether `id` is a declared step.
    pub fn has_step(&self, id: &str) -> bool {
        self.step(id).is_some()
    }

    /// The precomputed order used by automatic execution.
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// True iff every declared step accepts exactly the instance argument.
    pub fn allows_auto_exec(&self) -> bool {
        self.steps.iter().all(|s| s.implementation.is_unary())
    }

    /// The custom value extractor, if one was declared.
    pub fn value_fn(&self) -> Option<&Arc<ValueFn>> {
        self.value_fn.as_ref()
    }
}

impl std::fmt::Debug for PipelineSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("steps", &self.steps)
            .field("execution_order", &self.execution_order)
            .field("value_fn_present", &self.value_fn.is_some())
            .finish()
    }
}

/// Declarative registration of a pipeline type.
///
/// # Example
///
/// ```rust
/// use pipeline_steps::{Pipeline, StepOutcome};
/// use serde_json::json;
///
/// let pipeline = Pipeline::builder("Signup")
///     .field("email", json!(null))
///     .step("validate", &[], |_p| StepOutcome::Ok)
///     .step("store", &["validate"], |_p| StepOutcome::Ok)
///     .build()
///     .unwrap();
///
/// assert_eq!(pipeline.steps(), vec!["validate", "store"]);
/// assert_eq!(pipeline.steps_order(), ["validate", "store"]);
/// ```
pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    steps: Vec<StepSpec>,
    value_fn: Option<Arc<ValueFn>>,
}

impl SchemaBuilder {
    /// Start declaring a pipeline type called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            steps: Vec::new(),
            value_fn: None,
        }
    }

    /// Declare an attribute field with its initial value.
    ///
    /// Redeclaring a field replaces its default in place.
    pub fn field(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let field = FieldSpec {
            name: name.into(),
            default: default.into(),
        };
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Declare a step taking only the instance.
    pub fn step<F>(self, id: impl Into<String>, required_steps: &[&str], f: F) -> Self
    where
        F: Fn(PipelineInstance) -> StepOutcome + Send + Sync + 'static,
    {
        self.declare(StepSpec::new(id, required_steps, StepFn::unary(f)))
    }

    /// Declare a step taking `arity` extra call-site arguments.
    ///
    /// Such a pipeline can no longer be run with [`Pipeline::exec`].
    pub fn step_with_args<F>(
        self,
        id: impl Into<String>,
        required_steps: &[&str],
        arity: usize,
        f: F,
    ) -> Self
    where
        F: Fn(PipelineInstance, &[Value]) -> StepOutcome + Send + Sync + 'static,
    {
        self.declare(StepSpec::new(id, required_steps, StepFn::with_args(arity, f)))
    }

    /// Declare a fully constructed step.
    ///
    /// A step with an id that is already declared replaces the earlier
    /// declaration but keeps its position.
    pub fn declare(mut self, spec: StepSpec) -> Self {
        match self.steps.iter_mut().find(|s| s.id == spec.id) {
            Some(existing) => *existing = spec,
            None => self.steps.push(spec),
        }
        self
    }

    /// Supply a custom extractor for the value reported by a successful run.
    pub fn value_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&PipelineInstance) -> Value + Send + Sync + 'static,
    {
        self.value_fn = Some(Arc::new(f));
        self
    }

    /// Validate the declarations and compute the execution order.
    pub fn build_schema(self) -> Result<PipelineSchema> {
        let declared: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &self.steps {
            if let Some(missing) = step
                .required_steps
                .iter()
                .find(|dep| !declared.contains(dep.as_str()))
            {
                return Err(Error::UnknownDependency {
                    step: step.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let execution_order = compute_execution_order(&self.steps);
        tracing::debug!(
            pipeline = %self.name,
            order = ?execution_order,
            "Computed execution order"
        );

        Ok(PipelineSchema {
            name: self.name,
            fields: self.fields,
            steps: self.steps,
            execution_order,
            value_fn: self.value_fn,
        })
    }

    /// Validate the declarations and return the pipeline handle.
    pub fn build(self) -> Result<Pipeline> {
        Ok(Pipeline::from_schema(self.build_schema()?))
    }
}

/// Compute the automatic execution order for a set of declared steps.
///
/// Starts from the steps with no requirements (sorted by id), then expands
/// breadth-first along "is required by" edges, one frontier per round, for
/// at most `steps.len()` rounds. Each frontier is sorted, and ids are appended
/// the first time they are reached.
///
/// A step is placed as soon as any one of its required steps has been
/// reached, not after all of them. For chains and simple fan-out/fan-in this
/// is a valid topological order; for deeper multi-predecessor graphs a step
/// can land before one of its requirements. When no step is free of
/// requirements the order is empty.
pub fn compute_execution_order(steps: &[StepSpec]) -> Vec<String> {
    let mut frontier: Vec<&str> = steps
        .iter()
        .filter(|s| s.required_steps.is_empty())
        .map(|s| s.id.as_str())
        .collect();
    frontier.sort_unstable();
    frontier.dedup();

    let mut seen: HashSet<&str> = frontier.iter().copied().collect();
    let mut order: Vec<String> = frontier.iter().map(|id| (*id).to_string()).collect();

    for _ in 0..steps.len() {
        if frontier.is_empty() {
            break;
        }

        let mut next: Vec<&str> = frontier
            .iter()
            .flat_map(move |member| {
                steps
                    .iter()
                    .filter(move |s| s.id != *member && s.required_steps.contains(*member))
                    .map(|s| s.id.as_str())
            })
            .collect();
        next.sort_unstable();
        next.dedup();

        for id in &next {
            if seen.insert(*id) {
                order.push((*id).to_string());
            }
        }
        frontier = next;
    }

    order
}
