//! The pipeline instance and its accessors.
//!
//! A [`PipelineInstance`] is a value: every mutator consumes the instance and
//! returns the updated one, so a workflow threads it from step to step. Status
//! is never stored; it is derived from the `halted` flag and the error field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};

use crate::schema::PipelineSchema;
use crate::Result;

/// Derived status of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No error recorded and not halted.
    Ok,
    /// An error value is recorded.
    Error,
    /// No further steps will run. Takes priority over `Error`.
    Halt,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::Halt => "halt",
        })
    }
}

/// A warning recorded against a pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    /// The step that raised the warning, if any.
    pub step: Option<String>,
    /// The warning payload.
    pub warning: Value,
}

/// The state threaded through a workflow run.
///
/// # Example
///
/// ```rust
/// use pipeline_steps::{Pipeline, Status};
/// use serde_json::json;
///
/// let pipeline = Pipeline::builder("Counter")
///     .field("count", 0)
///     .build()
///     .unwrap();
///
/// let p = pipeline
///     .new_instance()
///     .set_attribute("count", 3)
///     .set_attribute("unknown", 1)
///     .add_warning(None, "slow");
///
/// assert_eq!(p.attribute("count"), Some(&json!(3)));
/// assert_eq!(p.attribute("unknown"), None);
/// assert_eq!(p.status(), Status::Ok);
/// assert_eq!(p.clone().halt().status(), Status::Halt);
/// ```
#[derive(Clone)]
pub struct PipelineInstance {
    schema: Arc<PipelineSchema>,
    attributes: Map<String, Value>,
    last_step: Option<String>,
    completed_steps: Vec<String>,
    error: Option<Value>,
    halted: bool,
    value: Option<Value>,
    warnings: Vec<Warning>,
    parent: Option<Weak<PipelineInstance>>,
}

impl PipelineInstance {
    /// Create a fresh instance with every declared field at its default.
    pub fn new(schema: Arc<PipelineSchema>) -> Self {
        let attributes = schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect();
        Self {
            schema,
            attributes,
            last_step: None,
            completed_steps: Vec::new(),
            error: None,
            halted: false,
            value: None,
            warnings: Vec::new(),
            parent: None,
        }
    }

    /// The schema of the pipeline type this instance belongs to.
    pub fn schema(&self) -> &Arc<PipelineSchema> {
        &self.schema
    }

    // --- queries ---

    /// `Halt` if halted, else `Error` if an error is recorded, else `Ok`.
    pub fn status(&self) -> Status {
        if self.halted {
            Status::Halt
        } else if self.error.is_some() {
            Status::Error
        } else {
            Status::Ok
        }
    }

    /// True when no error is recorded.
    ///
    /// Independent of `halted`: a halted instance without an error is still ok.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Exactly `!self.is_ok()`.
    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// Whether further steps are blocked.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Whether `id` appears in the completed steps.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == id)
    }

    /// Whether every id in `ids` appears in the completed steps.
    pub fn is_completed_all<I, S>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter().all(|id| self.is_completed(id.as_ref()))
    }

    /// The most recently completed or failed step.
    pub fn last_step(&self) -> Option<&str> {
        self.last_step.as_deref()
    }

    /// Completed step ids, most recent first.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// The recorded error value.
    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    /// The override result value. `None` means never set.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Recorded warnings, most recent first.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// The parent instance, if it is still alive.
    pub fn parent(&self) -> Option<Arc<PipelineInstance>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// A single attribute value.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Deserialize a single attribute. `Ok(None)` when the field is absent.
    pub fn attribute_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.attributes
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Into::into)
    }

    /// The attributes restricted to the declared fields.
    pub fn attributes(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .filter(|(k, _)| self.schema.has_field(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // --- mutators ---

    /// Merge `attrs` into the attributes, dropping undeclared keys.
    pub fn set_attributes(mut self, attrs: Map<String, Value>) -> Self {
        for (key, value) in attrs {
            if self.schema.has_field(&key) {
                self.attributes.insert(key, value);
            }
        }
        self
    }

    /// Serialize `attrs` and merge it like [`set_attributes`](Self::set_attributes).
    ///
    /// Values that do not serialize to a JSON object leave the attributes untouched.
    pub fn set_attributes_from<T: Serialize>(self, attrs: &T) -> Result<Self> {
        match serde_json::to_value(attrs)? {
            Value::Object(map) => Ok(self.set_attributes(map)),
            _ => Ok(self),
        }
    }

    /// Replace `key` if the instance already has that field.
    pub fn set_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(slot) = self.attributes.get_mut(key) {
            *slot = value.into();
        }
        self
    }

    /// Set the last step. Ignored for undeclared step ids.
    pub fn set_last_step(mut self, id: &str) -> Self {
        if self.schema.has_step(id) {
            self.last_step = Some(id.to_string());
        }
        self
    }

    /// Record `id` as the most recently completed step. Ignored for undeclared ids.
    pub fn set_completed_step(mut self, id: &str) -> Self {
        if self.schema.has_step(id) {
            self.completed_steps.insert(0, id.to_string());
        }
        self
    }

    /// Record an error. A null value leaves the current error in place.
    pub fn set_error(mut self, error: impl Into<Value>) -> Self {
        let error = error.into();
        if !error.is_null() {
            self.error = Some(error);
        }
        self
    }

    /// Set the override value reported by a successful run.
    pub fn set_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Prepend a warning.
    pub fn add_warning(mut self, step: Option<&str>, warning: impl Into<Value>) -> Self {
        self.warnings.insert(
            0,
            Warning {
                step: step.map(str::to_string),
                warning: warning.into(),
            },
        );
        self
    }

    /// Block every further step on this instance.
    pub fn halt(mut self) -> Self {
        self.halted = true;
        self
    }

    /// Point at (or detach from) a parent instance without owning it.
    pub fn set_parent(mut self, parent: Option<&Arc<PipelineInstance>>) -> Self {
        self.parent = parent.map(Arc::downgrade);
        self
    }
}

impl PartialEq for PipelineInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
            && self.attributes == other.attributes
            && self.last_step == other.last_step
            && self.completed_steps == other.completed_steps
            && self.error == other.error
            && self.halted == other.halted
            && self.value == other.value
            && self.warnings == other.warnings
            && match (&self.parent, &other.parent) {
                (Some(a), Some(b)) => a.ptr_eq(b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl std::fmt::Debug for PipelineInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineInstance")
            .field("pipeline", &self.schema.name())
            .field("attributes", &self.attributes)
            .field("last_step", &self.last_step)
            .field("completed_steps", &self.completed_steps)
            .field("error", &self.error)
            .field("halted", &self.halted)
            .field("value", &self.value)
            .field("warnings", &self.warnings)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pipeline, StepOutcome};
    use serde_json::json;

    fn pipeline() -> Pipeline {
        Pipeline::builder("Accessors")
            .field("name", json!(null))
            .field("count", 0)
            .step("a", &[], |_p| StepOutcome::Ok)
            .step("b", &["a"], |_p| StepOutcome::Ok)
            .build()
            .unwrap()
    }

    #[test]
    fn test_halt_wins_over_error() {
        let p = pipeline().new_instance().set_error("bad");
        assert_eq!(p.status(), Status::Error);
        let p = p.halt();
        assert_eq!(p.status(), Status::Halt);
        assert!(p.is_halted());
        assert!(p.is_error());
    }

    #[test]
    fn test_ok_and_error_are_complements() {
        let p = pipeline().new_instance();
        assert!(p.is_ok());
        assert!(!p.is_error());
        let p = p.set_error(json!({"code": 1}));
        assert!(!p.is_ok());
        assert!(p.is_error());
        assert_eq!(p.is_error(), p.error().is_some());
    }

    #[test]
    fn test_null_error_is_ignored() {
        let p = pipeline().new_instance().set_error("first").set_error(Value::Null);
        assert_eq!(p.error(), Some(&json!("first")));
    }

    #[test]
    fn test_completed_membership() {
        let p = pipeline()
            .new_instance()
            .set_completed_step("a")
            .set_completed_step("b")
            .set_completed_step("a");
        assert_eq!(p.completed_steps(), ["a", "b", "a"]);
        assert!(p.is_completed("a"));
        assert!(p.is_completed_all(["a", "b"]));
        assert_eq!(
            p.is_completed_all(["a", "c"]),
            p.is_completed("a") && p.is_completed("c")
        );
    }

    #[test]
    fn test_undeclared_step_ids_ignored() {
        let p = pipeline()
            .new_instance()
            .set_completed_step("nope")
            .set_last_step("nope");
        assert!(p.completed_steps().is_empty());
        assert_eq!(p.last_step(), None);
    }

    #[test]
    fn test_set_attributes_filters_undeclared() {
        let mut attrs = Map::new();
        attrs.insert("name".to_string(), json!("ada"));
        attrs.insert("extra".to_string(), json!(true));
        let p = pipeline().new_instance().set_attributes(attrs);

        let exported = p.attributes();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported["name"], json!("ada"));
        assert_eq!(exported["count"], json!(0));
        assert!(!exported.contains_key("extra"));
    }

    #[test]
    fn test_typed_attributes() {
        #[derive(Serialize)]
        struct Update {
            count: u32,
            ignored: bool,
        }

        let p = pipeline()
            .new_instance()
            .set_attributes_from(&Update {
                count: 7,
                ignored: true,
            })
            .unwrap();
        assert_eq!(p.attribute_as::<u32>("count").unwrap(), Some(7));
        assert_eq!(p.attribute_as::<u32>("missing").unwrap(), None);
        assert!(p.attribute_as::<u32>("name").is_err());
    }

    #[test]
    fn test_warnings_prepend() {
        let p = pipeline()
            .new_instance()
            .add_warning(Some("a"), "first")
            .add_warning(None, "second");
        assert_eq!(p.warnings()[0].warning, json!("second"));
        assert_eq!(p.warnings()[1].step.as_deref(), Some("a"));
    }

    #[test]
    fn test_value_distinguishes_unset_from_null() {
        let p = pipeline().new_instance();
        assert_eq!(p.value(), None);
        let p = p.set_value(Value::Null);
        assert_eq!(p.value(), Some(&Value::Null));
    }

    #[test]
    fn test_parent_is_weak() {
        let pipeline = pipeline();
        let parent = Arc::new(pipeline.new_instance().set_attribute("count", 9));
        let child = pipeline.new_instance().set_parent(Some(&parent));
        assert_eq!(
            child.parent().unwrap().attribute("count"),
            Some(&json!(9))
        );

        drop(parent);
        assert!(child.parent().is_none());
        assert!(child.set_parent(None).parent().is_none());
    }
}
