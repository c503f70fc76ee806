//! Simulated CAD/CAM host
//!
//! An in-memory [`HostSession`] described by a JSON fixture: documents with
//! user parameters, CAM setups with operations, installed post-processor
//! profiles, and how many polls a regeneration takes. Posting writes a small
//! G-code file so artifact checks behave as they would against a real host.
//!
//! Used by the test suites and by the CLI for dry runs of an order.

use crate::error::{Error, HostError, Result};
use crate::host::{
    CompletionToken, DocumentHandle, HostSession, OperationInfo, PostRequest, UserParameter,
};
use crate::units;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Unit tokens the simulated expression checker accepts
const KNOWN_UNITS: &[&str] = &[
    "mm", "cm", "m", "in", "ft", "deg", "rad", "mm/min", "in/min", "rpm",
];

fn default_post_processors() -> Vec<String> {
    vec!["richauto".to_string()]
}

/// Fixture for one operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationFixture {
    pub name: String,
    pub suppressed: bool,
    /// Error the operation carries regardless of parameter changes
    pub error: Option<String>,
    pub warning: Option<String>,
    /// Regeneration silently yields no toolpath
    pub fails_regeneration: bool,
}

impl OperationFixture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn suppressed(mut self) -> Self {
        self.suppressed = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fails_regeneration = true;
        self
    }
}

/// How posting a setup should misbehave, if at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostBehavior {
    #[default]
    Normal,
    /// The host reports success but writes a zero-byte file
    EmptyOutput,
    /// The host reports success but writes nothing
    NoOutput,
}

/// Fixture for one CAM setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupFixture {
    pub name: String,
    pub operations: Vec<OperationFixture>,
    pub post_behavior: PostBehavior,
}

impl SetupFixture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: OperationFixture) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_post_behavior(mut self, behavior: PostBehavior) -> Self {
        self.post_behavior = behavior;
        self
    }
}

/// Fixture for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentFixture {
    /// Document name as shown by the host (usually the file stem)
    pub name: String,
    /// Path or URI that opens this document; defaults to `<name>.f3d`
    pub path: Option<String>,
    /// Already open when the session starts
    pub open: bool,
    pub parameters: Vec<UserParameter>,
    /// `None` means the document has no CAM subsystem
    pub setups: Option<Vec<SetupFixture>>,
    /// Error the host raises whenever the document is activated
    pub activation_error: Option<String>,
}

impl DocumentFixture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            setups: Some(Vec::new()),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn already_open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        self.parameters.push(UserParameter {
            name: name.into(),
            expression: expression.into(),
            unit: unit.into(),
        });
        self
    }

    pub fn with_setup(mut self, setup: SetupFixture) -> Self {
        self.setups.get_or_insert_with(Vec::new).push(setup);
        self
    }

    pub fn without_cam(mut self) -> Self {
        self.setups = None;
        self
    }

    pub fn failing_activation(mut self, message: impl Into<String>) -> Self {
        self.activation_error = Some(message.into());
        self
    }

    fn open_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("{}.f3d", self.name))
    }
}

/// Complete description of a simulated host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFixture {
    #[serde(default)]
    pub documents: Vec<DocumentFixture>,
    /// Installed post-processor profiles
    #[serde(default = "default_post_processors")]
    pub post_processors: Vec<String>,
    /// Polls that report "not finished" before a regeneration completes
    #[serde(default)]
    pub poll_cycles: u32,
}

impl Default for HostFixture {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            post_processors: default_post_processors(),
            poll_cycles: 0,
        }
    }
}

impl HostFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, document: DocumentFixture) -> Self {
        self.documents.push(document);
        self
    }

    pub fn with_poll_cycles(mut self, cycles: u32) -> Self {
        self.poll_cycles = cycles;
        self
    }

    pub fn with_post_processors(mut self, profiles: &[&str]) -> Self {
        self.post_processors = profiles.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Load a fixture from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixture: Self = serde_json::from_str(&content)
            .map_err(|e| Error::other(format!("Invalid host fixture {}: {}", path.display(), e)))?;
        tracing::debug!(
            "Loaded host fixture {} ({} document(s), profiles: {})",
            path.display(),
            fixture.documents.len(),
            fixture.post_processors.join(", ")
        );
        Ok(fixture)
    }
}

#[derive(Debug)]
struct SimDocument {
    fixture: DocumentFixture,
    handle: DocumentHandle,
    open: bool,
    regenerated: bool,
}

#[derive(Debug)]
struct PendingRegeneration {
    doc_id: u64,
    remaining_polls: u32,
}

/// In-memory host driven by a [`HostFixture`]
#[derive(Debug)]
pub struct SimulatedHost {
    documents: Vec<SimDocument>,
    post_processors: Vec<String>,
    poll_cycles: u32,
    active: Option<u64>,
    next_token: u64,
    pending: HashMap<u64, PendingRegeneration>,
    events_processed: u64,
    regenerations: u64,
    assignments: Vec<(String, String, String)>,
    posted: Vec<(String, PostRequest)>,
}

impl SimulatedHost {
    pub fn new(fixture: HostFixture) -> Self {
        let documents: Vec<SimDocument> = fixture
            .documents
            .into_iter()
            .enumerate()
            .map(|(i, doc)| SimDocument {
                handle: DocumentHandle {
                    id: i as u64 + 1,
                    name: doc.name.clone(),
                },
                open: doc.open,
                regenerated: false,
                fixture: doc,
            })
            .collect();
        let active = documents.iter().find(|d| d.open).map(|d| d.handle.id);

        Self {
            documents,
            post_processors: fixture.post_processors,
            poll_cycles: fixture.poll_cycles,
            active,
            next_token: 1,
            pending: HashMap::new(),
            events_processed: 0,
            regenerations: 0,
            assignments: Vec::new(),
            posted: Vec::new(),
        }
    }

    /// Build a host from a fixture file
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(HostFixture::load(path)?))
    }

    /// Current expression of a parameter, by document and parameter name
    pub fn parameter(&self, document: &str, name: &str) -> Option<&UserParameter> {
        self.documents
            .iter()
            .find(|d| d.fixture.name == document)
            .and_then(|d| d.fixture.parameters.iter().find(|p| p.name == name))
    }

    /// Every accepted assignment as `(document, parameter, expression)`
    pub fn assignments(&self) -> &[(String, String, String)] {
        &self.assignments
    }

    /// Every post request the host accepted, with its setup name
    pub fn posted(&self) -> &[(String, PostRequest)] {
        &self.posted
    }

    /// How often the pipeline yielded to the event loop
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// How many full regenerations were requested
    pub fn regenerations(&self) -> u64 {
        self.regenerations
    }

    /// Whether a document with this name is open
    pub fn is_open(&self, document: &str) -> bool {
        self.documents
            .iter()
            .any(|d| d.fixture.name == document && d.open)
    }

    fn document(&self, handle: &DocumentHandle) -> std::result::Result<&SimDocument, HostError> {
        self.documents
            .iter()
            .find(|d| d.handle.id == handle.id && d.open)
            .ok_or_else(|| HostError::UnknownDocument {
                name: handle.name.clone(),
            })
    }

    fn document_mut(
        &mut self,
        handle: &DocumentHandle,
    ) -> std::result::Result<&mut SimDocument, HostError> {
        self.documents
            .iter_mut()
            .find(|d| d.handle.id == handle.id && d.open)
            .ok_or_else(|| HostError::UnknownDocument {
                name: handle.name.clone(),
            })
    }

    fn operation_state(op: &OperationFixture, regenerated: bool) -> OperationInfo {
        OperationInfo {
            name: op.name.clone(),
            has_toolpath: regenerated && op.error.is_none() && !op.fails_regeneration,
            is_suppressed: op.suppressed,
            error_message: op.error.clone(),
            warning_message: op.warning.clone(),
        }
    }
}

/// Check an expression the way a parametric solver would, roughly
fn check_expression(
    name: &str,
    expression: &str,
    parameters: &[UserParameter],
) -> std::result::Result<(), String> {
    if expression.trim().is_empty() {
        return Err("expression is empty".to_string());
    }

    if let Some(simple) = units::split_expression(expression) {
        return match simple.unit {
            Some(unit) if !KNOWN_UNITS.contains(&unit) => Err(format!("unknown unit '{}'", unit)),
            _ => Ok(()),
        };
    }

    let identifiers = expression
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_'));
    for identifier in identifiers {
        if identifier == name {
            return Err(format!("circular reference to '{}'", name));
        }
        if KNOWN_UNITS.contains(&identifier) {
            continue;
        }
        if !parameters.iter().any(|p| p.name == identifier) {
            return Err(format!("unknown identifier '{}'", identifier));
        }
    }
    Ok(())
}

fn render_program(request: &PostRequest, setup: &SetupFixture) -> String {
    let mut gcode = String::new();
    gcode.push_str("%\n");
    gcode.push_str(&format!("O{}\n", request.program_name));
    gcode.push_str(&format!("(SETUP: {})\n", setup.name));
    gcode.push_str(&format!("(POST: {})\n", request.profile));
    gcode.push_str("G21 G90 G17\n");
    for op in setup
        .operations
        .iter()
        .filter(|op| !op.suppressed && op.error.is_none() && !op.fails_regeneration)
    {
        gcode.push_str(&format!("(OPERATION: {})\n", op.name));
        gcode.push_str("G0 Z5.000\n");
        gcode.push_str("G1 Z-1.000 F300.0\n");
    }
    gcode.push_str("M5\nM30\n%\n");
    gcode
}

impl HostSession for SimulatedHost {
    fn open(&mut self, model_path: &str) -> std::result::Result<DocumentHandle, HostError> {
        let file_name = model_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(model_path);
        let doc = self
            .documents
            .iter_mut()
            .find(|d| d.fixture.open_path() == model_path || d.fixture.open_path() == file_name)
            .ok_or_else(|| HostError::DocumentOpen {
                path: model_path.to_string(),
                message: "File not found".to_string(),
            })?;

        if !doc.open {
            tracing::debug!("Simulated host opened {}", model_path);
        }
        doc.open = true;
        let handle = doc.handle.clone();
        self.active = Some(handle.id);
        Ok(handle)
    }

    fn open_documents(&self) -> Vec<DocumentHandle> {
        self.documents
            .iter()
            .filter(|d| d.open)
            .map(|d| d.handle.clone())
            .collect()
    }

    fn current_document(&self) -> Option<DocumentHandle> {
        let id = self.active?;
        self.documents
            .iter()
            .find(|d| d.handle.id == id && d.open)
            .map(|d| d.handle.clone())
    }

    fn activate(&mut self, doc: &DocumentHandle) -> std::result::Result<(), HostError> {
        let sim = self.document(doc)?;
        if let Some(message) = &sim.fixture.activation_error {
            return Err(HostError::Other {
                message: message.clone(),
            });
        }
        self.active = Some(sim.handle.id);
        Ok(())
    }

    fn close(&mut self, doc: &DocumentHandle) -> std::result::Result<(), HostError> {
        let sim = self.document_mut(doc)?;
        sim.open = false;
        sim.regenerated = false;
        tracing::debug!("Simulated host closed {}", doc);
        if self.active == Some(doc.id) {
            self.active = None;
        }
        Ok(())
    }

    fn list_user_parameters(
        &self,
        doc: &DocumentHandle,
    ) -> std::result::Result<Vec<UserParameter>, HostError> {
        Ok(self.document(doc)?.fixture.parameters.clone())
    }

    fn set_parameter(
        &mut self,
        doc: &DocumentHandle,
        name: &str,
        expression: &str,
    ) -> std::result::Result<(), HostError> {
        let sim = self.document_mut(doc)?;
        if !sim.fixture.parameters.iter().any(|p| p.name == name) {
            return Err(HostError::ParameterNotFound {
                name: name.to_string(),
            });
        }

        check_expression(name, expression, &sim.fixture.parameters).map_err(|message| {
            HostError::InvalidExpression {
                name: name.to_string(),
                expression: expression.to_string(),
                message,
            }
        })?;

        if let Some(param) = sim.fixture.parameters.iter_mut().find(|p| p.name == name) {
            param.expression = expression.to_string();
        }
        // Toolpaths are stale until the next regeneration.
        sim.regenerated = false;
        let document = sim.fixture.name.clone();
        self.assignments
            .push((document, name.to_string(), expression.to_string()));
        Ok(())
    }

    fn list_cam_setups(&self, doc: &DocumentHandle) -> std::result::Result<Vec<String>, HostError> {
        let sim = self.document(doc)?;
        match &sim.fixture.setups {
            Some(setups) => Ok(setups.iter().map(|s| s.name.clone()).collect()),
            None => Err(HostError::NoCamData {
                message: format!(
                    "Document '{}' has no manufacturing data; create CAM setups first",
                    sim.fixture.name
                ),
            }),
        }
    }

    fn regenerate_all_toolpaths(
        &mut self,
        doc: &DocumentHandle,
    ) -> std::result::Result<CompletionToken, HostError> {
        let sim = self.document(doc)?;
        if sim.fixture.setups.is_none() {
            return Err(HostError::NoCamData {
                message: format!("Document '{}' has no manufacturing data", sim.fixture.name),
            });
        }
        let doc_id = sim.handle.id;

        let token = CompletionToken(self.next_token);
        self.next_token += 1;
        self.regenerations += 1;
        self.pending.insert(
            token.0,
            PendingRegeneration {
                doc_id,
                remaining_polls: self.poll_cycles,
            },
        );
        Ok(token)
    }

    fn poll_completion(&mut self, token: &CompletionToken) -> bool {
        let Some(pending) = self.pending.get_mut(&token.0) else {
            // Unknown or already collected tokens count as finished.
            return true;
        };
        if pending.remaining_polls > 0 {
            pending.remaining_polls -= 1;
            return false;
        }

        let doc_id = pending.doc_id;
        self.pending.remove(&token.0);
        if let Some(doc) = self.documents.iter_mut().find(|d| d.handle.id == doc_id) {
            doc.regenerated = true;
        }
        true
    }

    fn process_events(&mut self) {
        self.events_processed += 1;
    }

    fn list_operations(
        &self,
        doc: &DocumentHandle,
        setup: &str,
    ) -> std::result::Result<Vec<OperationInfo>, HostError> {
        let sim = self.document(doc)?;
        let setups = sim.fixture.setups.as_ref().ok_or_else(|| HostError::NoCamData {
            message: format!("Document '{}' has no manufacturing data", sim.fixture.name),
        })?;
        let setup = setups
            .iter()
            .find(|s| s.name == setup)
            .ok_or_else(|| HostError::SetupNotFound {
                name: setup.to_string(),
            })?;

        Ok(setup
            .operations
            .iter()
            .map(|op| Self::operation_state(op, sim.regenerated))
            .collect())
    }

    fn post_process(
        &mut self,
        doc: &DocumentHandle,
        setup: &str,
        request: &PostRequest,
    ) -> std::result::Result<(), HostError> {
        if !self.post_processors.iter().any(|p| p == &request.profile) {
            return Err(HostError::PostProcessorNotFound {
                profile: request.profile.clone(),
            });
        }

        let sim = self.document(doc)?;
        let setups = sim.fixture.setups.as_ref().ok_or_else(|| HostError::NoCamData {
            message: format!("Document '{}' has no manufacturing data", sim.fixture.name),
        })?;
        let fixture = setups
            .iter()
            .find(|s| s.name == setup)
            .ok_or_else(|| HostError::SetupNotFound {
                name: setup.to_string(),
            })?;

        let has_toolpath = fixture
            .operations
            .iter()
            .any(|op| Self::operation_state(op, sim.regenerated).is_regenerated());
        if !has_toolpath {
            return Err(HostError::NoValidToolpath {
                setup: setup.to_string(),
                message: "no operation has a valid toolpath".to_string(),
            });
        }

        let content = match fixture.post_behavior {
            PostBehavior::Normal => Some(render_program(request, fixture)),
            PostBehavior::EmptyOutput => Some(String::new()),
            PostBehavior::NoOutput => None,
        };

        if let Some(content) = content {
            let write = || -> std::io::Result<()> {
                std::fs::create_dir_all(&request.output_dir)?;
                std::fs::write(request.output_path(), content)
            };
            write().map_err(|e| HostError::Other {
                message: format!("Failed to write {}: {}", request.output_path().display(), e),
            })?;
        }

        tracing::debug!(
            "Simulated host posted '{}' with '{}' ({:?})",
            setup,
            request.profile,
            fixture.post_behavior
        );
        self.posted.push((setup.to_string(), request.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> HostFixture {
        HostFixture::new().with_document(
            DocumentFixture::new("door")
                .with_parameter("height", "2000 mm", "mm")
                .with_parameter("width", "900 mm", "mm")
                .with_setup(
                    SetupFixture::new("Front")
                        .with_operation(OperationFixture::new("Adaptive1"))
                        .with_operation(OperationFixture::new("Contour1").with_error("Tool too large")),
                ),
        )
    }

    #[test]
    fn test_open_by_path_or_file_name() {
        let mut host = SimulatedHost::new(fixture());
        assert!(host.current_document().is_none());

        let handle = host.open("/models/door.f3d").unwrap();
        assert_eq!(handle.name, "door");
        assert_eq!(host.current_document(), Some(handle));

        let err = host.open("/models/window.f3d").unwrap_err();
        assert!(matches!(err, HostError::DocumentOpen { .. }));
    }

    #[test]
    fn test_expression_checks() {
        let mut host = SimulatedHost::new(fixture());
        let doc = host.open("door.f3d").unwrap();

        host.set_parameter(&doc, "height", "2100 mm").unwrap();
        assert_eq!(host.parameter("door", "height").unwrap().expression, "2100 mm");

        host.set_parameter(&doc, "height", "width * 2").unwrap();

        let err = host.set_parameter(&doc, "width", "width + 1 mm").unwrap_err();
        assert!(matches!(err, HostError::InvalidExpression { ref message, .. } if message.contains("circular")));

        let err = host.set_parameter(&doc, "width", "12 furlongs").unwrap_err();
        assert!(matches!(err, HostError::InvalidExpression { .. }));

        let err = host.set_parameter(&doc, "Height", "1 mm").unwrap_err();
        assert!(matches!(err, HostError::ParameterNotFound { .. }));
    }

    #[test]
    fn test_regeneration_completes_after_poll_cycles() {
        let mut host = SimulatedHost::new(fixture().with_poll_cycles(2));
        let doc = host.open("door.f3d").unwrap();

        let before = host.list_operations(&doc, "Front").unwrap();
        assert!(before.iter().all(|op| !op.has_toolpath));

        let token = host.regenerate_all_toolpaths(&doc).unwrap();
        assert!(!host.poll_completion(&token));
        assert!(!host.poll_completion(&token));
        assert!(host.poll_completion(&token));

        let after = host.list_operations(&doc, "Front").unwrap();
        assert!(after[0].has_toolpath);
        assert!(!after[1].has_toolpath);
        assert_eq!(after[1].error_text(), Some("Tool too large"));
    }

    #[test]
    fn test_no_cam_data() {
        let fixture = HostFixture::new().with_document(DocumentFixture::new("bracket").without_cam());
        let mut host = SimulatedHost::new(fixture);
        let doc = host.open("bracket.f3d").unwrap();
        assert!(matches!(
            host.list_cam_setups(&doc),
            Err(HostError::NoCamData { .. })
        ));
    }

    #[test]
    fn test_post_writes_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = SimulatedHost::new(fixture());
        let doc = host.open("door.f3d").unwrap();
        let token = host.regenerate_all_toolpaths(&doc).unwrap();
        assert!(host.poll_completion(&token));

        let request = PostRequest {
            program_name: "1001".to_string(),
            profile: "richauto".to_string(),
            output_dir: dir.path().to_path_buf(),
            file_stem: "1001".to_string(),
            extension: "nc".to_string(),
        };
        host.post_process(&doc, "Front", &request).unwrap();

        let content = std::fs::read_to_string(dir.path().join("1001.nc")).unwrap();
        assert!(content.contains("O1001"));
        assert!(content.contains("(OPERATION: Adaptive1)"));
        assert!(!content.contains("Contour1"));

        let missing_profile = PostRequest {
            profile: "fanuc".to_string(),
            ..request
        };
        assert!(matches!(
            host.post_process(&doc, "Front", &missing_profile),
            Err(HostError::PostProcessorNotFound { .. })
        ));
    }

    #[test]
    fn test_fixture_from_json() {
        let fixture: HostFixture = serde_json::from_str(
            r#"{
                "documents": [{
                    "name": "shelf",
                    "path": "cloud://shelves/shelf",
                    "parameters": [{ "name": "depth", "expression": "300 mm", "unit": "mm" }],
                    "setups": [{ "name": "Top", "operations": [{ "name": "Pocket1" }] }]
                }],
                "pollCycles": 3
            }"#,
        )
        .unwrap();
        assert_eq!(fixture.post_processors, vec!["richauto".to_string()]);
        assert_eq!(fixture.poll_cycles, 3);

        let mut host = SimulatedHost::new(fixture);
        let doc = host.open("cloud://shelves/shelf").unwrap();
        assert_eq!(host.list_cam_setups(&doc).unwrap(), vec!["Top".to_string()]);
    }
}
