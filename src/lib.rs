//! # pipeline-steps
//!
//! Declarative step sequencing for workflows that thread a state value
//! through a named, ordered set of steps.
//!
//! A pipeline type declares its attribute fields and its steps, each with
//! the steps it requires. Every step call takes a [`PipelineInstance`] and
//! returns a new one: a step can complete, fail, add warnings, halt the rest
//! of the workflow or set the value reported at the end.
//!
//! ## Core Concepts
//!
//! - **Pipeline**: A validated pipeline type, built with [`Pipeline::builder`]
//! - **PipelineInstance**: The value-semantic state threaded through steps
//! - **StepOutcome**: The closed set of shapes a step body may return
//! - **StepOutput**: What a step call yields: an instance or an opaque value
//! - **PipelineResult**: The terminal outcome reported by [`Pipeline::result`]
//!
//! ## Example
//!
//! ```rust
//! use pipeline_steps::{Pipeline, PipelineResult, StepOutcome};
//! use serde_json::json;
//!
//! let pipeline = Pipeline::builder("Import")
//!     .field("rows", 0)
//!     .step("read", &[], |_p| StepOutcome::attributes(json!({"rows": 3})))
//!     .step("check", &["read"], |p| {
//!         if p.attribute("rows") == Some(&json!(0)) {
//!             StepOutcome::halt_error("empty file")
//!         } else {
//!             StepOutcome::Ok
//!         }
//!     })
//!     .step("store", &["check"], |p| StepOutcome::Pipeline(p.set_value("stored")))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(pipeline.steps_order(), ["read", "check", "store"]);
//! let result = pipeline.run().unwrap();
//! assert_eq!(result, PipelineResult::Value(json!("stored")));
//! ```

pub mod error;
pub mod state;
pub mod schema;
pub mod outcome;
pub mod invoke;
pub mod pipeline;
pub mod diagnostics;

pub use error::{Error, Result};
pub use state::{PipelineInstance, Status, Warning};
pub use schema::{compute_execution_order, FieldSpec, PipelineSchema, SchemaBuilder, StepFn, StepSpec};
pub use outcome::{normalize, StepOutcome, StepOutput, Verdict};
pub use invoke::invoke;
pub use pipeline::{Pipeline, PipelineResult};
pub use diagnostics::{Diagnostic, DiagnosticEntry};
