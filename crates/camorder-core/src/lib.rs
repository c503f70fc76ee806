//! # CamOrder Core
//!
//! Order model, host abstraction, and result types for the CamOrder
//! pipeline. Provides the fundamental data the pipeline consumes (orders,
//! components, parameter values), the [`HostSession`] seam through which it
//! drives a CAD/CAM host, and the per-stage outcome records it produces.

pub mod error;
pub mod host;
pub mod order;
pub mod result;
pub mod simulated;
pub mod units;

pub use error::{Error, HostError, OrderError, Result};

pub use host::{
    CompletionToken, DocumentHandle, HostSession, OperationInfo, PostRequest, UserParameter,
};

pub use order::{Component, Order, OutputConfig, ParameterMap, ParameterValue, PostProcessorConfig};

pub use result::{
    parameter_stage_status, ComponentResult, ComponentStage, OrderResult, OrderSummary,
    ParameterChange, ParameterFailure, ParameterOutcome, PostFailure, PostResult, PostedProgram,
    RunStatus, SetupClassification, SetupRegenerationOutcome, StructuralFailure,
};

// Re-export the simulated host for tests and dry runs
pub use simulated::{
    DocumentFixture, HostFixture, OperationFixture, PostBehavior, SetupFixture, SimulatedHost,
};
