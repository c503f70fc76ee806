//! CAD/CAM host abstraction
//!
//! The pipeline never reaches for an ambient application object. Everything it
//! needs from the host goes through an injected [`HostSession`], which keeps
//! the pipeline host-agnostic and lets tests drive it with a fake.
//!
//! Documents are addressed by [`DocumentHandle`]s handed out by the session.
//! The host has a single mutable active-document context, so sessions are
//! used from one thread of control.

use crate::error::HostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Opaque reference to a document open in the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle {
    /// Host-assigned identifier
    pub id: u64,
    /// Display name of the document (usually the model file stem)
    pub name: String,
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

/// A user parameter as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserParameter {
    pub name: String,
    /// Current expression, including its unit (e.g. `"2000 mm"`)
    pub expression: String,
    /// Unit the host stores the parameter in; empty for unitless parameters
    #[serde(default)]
    pub unit: String,
}

/// State of one machining operation after regeneration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    pub has_toolpath: bool,
    pub is_suppressed: bool,
    /// Error text the host attached to the operation, if any
    #[serde(default)]
    pub error_message: Option<String>,
    /// Warning text the host attached to the operation, if any
    #[serde(default)]
    pub warning_message: Option<String>,
}

impl OperationInfo {
    /// Regenerated means a toolpath exists and the operation is active
    pub fn is_regenerated(&self) -> bool {
        self.has_toolpath && !self.is_suppressed
    }

    /// Non-blank error text, if present
    pub fn error_text(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Non-blank warning text, if present
    pub fn warning_text(&self) -> Option<&str> {
        self.warning_message
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Token identifying a regeneration request in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken(pub u64);

/// Everything the host needs to post one setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    /// Program name/number written into the G-code header
    pub program_name: String,
    /// Post-processor profile (e.g. `"richauto"`)
    pub profile: String,
    /// Directory the host writes into
    pub output_dir: PathBuf,
    /// File name without extension
    pub file_stem: String,
    /// File extension without the dot
    pub extension: String,
}

impl PostRequest {
    /// Full path of the file the host is expected to produce
    pub fn output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.file_stem, self.extension))
    }
}

/// Capabilities the pipeline consumes from a CAD/CAM host
pub trait HostSession {
    /// Open a model by filesystem path or host URI
    ///
    /// Fails with [`HostError::DocumentOpen`].
    fn open(&mut self, model_path: &str) -> Result<DocumentHandle, HostError>;

    /// Documents currently open in the host
    fn open_documents(&self) -> Vec<DocumentHandle>;

    /// The active document, if any
    fn current_document(&self) -> Option<DocumentHandle>;

    /// Make a document the active one
    fn activate(&mut self, doc: &DocumentHandle) -> Result<(), HostError>;

    /// Close a document without saving
    fn close(&mut self, doc: &DocumentHandle) -> Result<(), HostError>;

    /// All user parameters of the document's design
    fn list_user_parameters(&self, doc: &DocumentHandle) -> Result<Vec<UserParameter>, HostError>;

    /// Assign an expression to a user parameter
    ///
    /// Fails with [`HostError::ParameterNotFound`] or
    /// [`HostError::InvalidExpression`]. Dependent geometry is recomputed by
    /// the host.
    fn set_parameter(
        &mut self,
        doc: &DocumentHandle,
        name: &str,
        expression: &str,
    ) -> Result<(), HostError>;

    /// Names of the document's CAM setups, in host order
    ///
    /// Fails with [`HostError::NoCamData`] when the CAM subsystem is absent.
    fn list_cam_setups(&self, doc: &DocumentHandle) -> Result<Vec<String>, HostError>;

    /// Request regeneration of every toolpath of every setup
    ///
    /// Never skips toolpaths the host believes are valid.
    fn regenerate_all_toolpaths(
        &mut self,
        doc: &DocumentHandle,
    ) -> Result<CompletionToken, HostError>;

    /// Whether the regeneration behind `token` has finished
    fn poll_completion(&mut self, token: &CompletionToken) -> bool;

    /// Yield to the host's event loop
    fn process_events(&mut self);

    /// Operations of one setup, with their post-regeneration state
    fn list_operations(
        &self,
        doc: &DocumentHandle,
        setup: &str,
    ) -> Result<Vec<OperationInfo>, HostError>;

    /// Generate G-code for one setup
    ///
    /// Fails with [`HostError::PostProcessorNotFound`] or
    /// [`HostError::NoValidToolpath`].
    fn post_process(
        &mut self,
        doc: &DocumentHandle,
        setup: &str,
        request: &PostRequest,
    ) -> Result<(), HostError>;
}
