//! Error types for the pipeline crate.
//!
//! Only failures that stop a whole order surface here. Everything scoped to
//! a component, parameter, setup, or post is recorded in the result types
//! instead.

use camorder_core::OrderError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Order-level pipeline failures
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The order could not be read or failed its structural checks
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The output directory could not be created
    #[error("Cannot create output directory {}: {source}", .path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::OutputDirectory {
            path: PathBuf::from("/readonly/nc"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        assert_eq!(
            err.to_string(),
            "Cannot create output directory /readonly/nc: permission denied"
        );

        let err: PipelineError = OrderError::Invalid(vec!["orderId cannot be empty".into()]).into();
        assert_eq!(
            err.to_string(),
            "Order validation failed: orderId cannot be empty"
        );
    }
}
