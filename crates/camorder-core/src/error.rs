//! Error handling for CamOrder
//!
//! Provides error types for the layers the pipeline talks to:
//! - Host errors (document, parameter, CAM and post-processing failures
//!   reported by the CAD/CAM host)
//! - Order errors (loading and structural checks of order documents)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Host error type
///
/// Represents failures reported by the CAD/CAM host while the pipeline
/// mutates a document, regenerates toolpaths, or posts G-code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The model could not be located or opened
    #[error("Failed to open document {path}: {message}")]
    DocumentOpen {
        /// The model path or URI that was requested.
        path: String,
        /// The host-provided reason.
        message: String,
    },

    /// The handle does not refer to a document known to the host
    #[error("Unknown document: {name}")]
    UnknownDocument {
        /// The document name carried by the stale handle.
        name: String,
    },

    /// No user parameter with this exact name exists
    #[error("Parameter '{name}' not found in model")]
    ParameterNotFound {
        /// The requested parameter name.
        name: String,
    },

    /// The host rejected an expression (syntax, units, dependency cycle)
    #[error("Invalid expression '{expression}' for '{name}': {message}")]
    InvalidExpression {
        /// The parameter being assigned.
        name: String,
        /// The rejected expression.
        expression: String,
        /// The host-provided reason.
        message: String,
    },

    /// The document carries no CAM subsystem
    #[error("No CAM data found in document: {message}")]
    NoCamData {
        /// The host-provided reason.
        message: String,
    },

    /// A setup name did not resolve to a setup of the document
    #[error("Setup not found: {name}")]
    SetupNotFound {
        /// The requested setup name.
        name: String,
    },

    /// The configured post-processor profile is not installed
    #[error("Post processor not found: {profile}")]
    PostProcessorNotFound {
        /// The profile that was requested.
        profile: String,
    },

    /// The setup has no toolpath the post processor could consume
    #[error("Setup '{setup}' has no valid toolpath: {message}")]
    NoValidToolpath {
        /// The setup that was posted.
        setup: String,
        /// The host-provided reason.
        message: String,
    },

    /// Generic host error
    #[error("Host error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

impl HostError {
    /// Check if this error is structural for a component
    ///
    /// Structural errors stop the remaining stages of the current component.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HostError::DocumentOpen { .. }
                | HostError::UnknownDocument { .. }
                | HostError::NoCamData { .. }
        )
    }
}

/// Order error type
///
/// Represents failures while reading an order document or checking the
/// invariants the pipeline relies on.
#[derive(Error, Debug)]
pub enum OrderError {
    /// The order file could not be read
    #[error("Failed to read order file {path}: {source}")]
    Read {
        /// The order file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The order file is not valid JSON or does not match the order model
    #[error("Invalid order document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The order parsed but violates structural invariants
    #[error("Order validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Main error type for CamOrder
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Host error
    #[error(transparent)]
    Host(#[from] HostError),

    /// Order error
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a host error
    pub fn is_host_error(&self) -> bool {
        matches!(self, Error::Host(_))
    }

    /// Check if this is an order error
    pub fn is_order_error(&self) -> bool {
        matches!(self, Error::Order(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
