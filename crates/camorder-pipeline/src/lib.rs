//! # CamOrder Pipeline
//!
//! Turns a manufacturing order into G-code programs by driving a CAD/CAM
//! host through a fixed sequence of stages for each component.
//!
//! ## Modules
//!
//! ### Parameters
//! Applies an order's parameter values to the model's user parameters,
//! recording one outcome per parameter.
//!
//! ### Regeneration
//! Regenerates every toolpath, waits for the host to finish, and classifies
//! each setup by how many of its operations produced a toolpath.
//!
//! ### Post
//! Draws program numbers from the counter store, posts each regenerated
//! setup, and verifies the generated file.
//!
//! ### Orchestrator
//! Sequences the stages per component, isolates component failures, and
//! aggregates the order result.

pub mod error;
pub mod orchestrator;
pub mod parameters;
pub mod post;
pub mod regeneration;
pub mod report;

pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{PipelineOptions, PipelineOrchestrator};
pub use parameters::ParameterApplier;
pub use post::{PostProcessor, PostTarget};
pub use regeneration::{
    classify_operations, wait_for_completion, RegenerationReport, ToolpathRegenerator,
};
