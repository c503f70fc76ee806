//! Pipeline orchestration
//!
//! Drives each component of an order through its stages:
//!
//! ```text
//! NotStarted -> ParametersApplied -> ToolpathsRegenerated -> PostProcessed -> Done
//!      \________________\___________________\__________________________-> Failed
//! ```
//!
//! Partial failures inside a stage never block the next stage. Only a
//! document that cannot be opened or a document without CAM data moves a
//! component to `Failed`. Components are processed strictly one after the
//! other, and a failed component never stops the ones after it.

use crate::error::{PipelineError, PipelineResult};
use crate::parameters::ParameterApplier;
use crate::post::{PostProcessor, PostTarget};
use crate::regeneration::ToolpathRegenerator;
use crate::report;
use camorder_core::{
    Component, ComponentResult, ComponentStage, DocumentHandle, HostError, HostSession, Order,
    OrderResult, StructuralFailure,
};
use camorder_settings::{PipelineConfig, ProgramCounterStore};
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run-wide pipeline options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Output directory when an order names none
    pub output_directory: PathBuf,
    /// Program file extension, without the dot
    pub extension: String,
    /// Post-processor profile when a component names none
    pub default_profile: String,
    /// Delay between completion polls
    pub poll_interval: Duration,
    /// Close documents the pipeline opened once their component is done
    pub close_after_processing: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            output_directory: config.output.directory.clone(),
            extension: config.output.extension.clone(),
            default_profile: config.post.default_profile.clone(),
            poll_interval: config.host.poll_interval(),
            close_after_processing: config.documents.close_after_processing,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Sequences the pipeline stages over the components of an order
pub struct PipelineOrchestrator<H, C> {
    host: H,
    applier: ParameterApplier,
    regenerator: ToolpathRegenerator,
    post: PostProcessor<C>,
    options: PipelineOptions,
}

impl<H: HostSession, C: ProgramCounterStore> PipelineOrchestrator<H, C> {
    pub fn new(host: H, counter: C, options: PipelineOptions) -> Self {
        Self {
            host,
            applier: ParameterApplier::new(),
            regenerator: ToolpathRegenerator::new(options.poll_interval),
            post: PostProcessor::new(counter),
            options,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn counter(&self) -> &C {
        self.post.counter()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Give back the host session and counter store
    pub fn into_parts(self) -> (H, C) {
        (self.host, self.post.into_counter())
    }

    /// Load an order file and run it
    pub fn process_order_file(&mut self, path: &Path) -> PipelineResult<OrderResult> {
        let order = Order::load(path).map_err(|e| {
            tracing::error!("Cannot load order {}: {}", path.display(), e);
            e
        })?;
        self.run_order(&order)
    }

    /// Run every component of an order, in order
    ///
    /// Fails only when the output directory cannot be created; every other
    /// problem is recorded in the returned result.
    pub fn run_order(&mut self, order: &Order) -> PipelineResult<OrderResult> {
        let started_at = Utc::now();
        let output_dir = self.resolve_output_dir(order, started_at);
        std::fs::create_dir_all(&output_dir).map_err(|source| {
            tracing::error!(
                "Cannot create output directory {}: {}",
                output_dir.display(),
                source
            );
            PipelineError::OutputDirectory {
                path: output_dir.clone(),
                source,
            }
        })?;

        report::log_order_start(order, &output_dir);

        let mut components = Vec::with_capacity(order.components.len());
        for (index, component) in order.components.iter().enumerate() {
            tracing::info!(
                "Component {}/{}: {} ({})",
                index + 1,
                order.components.len(),
                component.component_id,
                component.model_path
            );
            let result = self.process_component(component, &output_dir);
            report::log_component_end(&result);
            components.push(result);
        }

        let result = OrderResult::aggregate(&order.order_id, output_dir, started_at, components);
        report::log_order_end(&result);
        Ok(result)
    }

    /// Output directory for a run, honouring the order's overrides
    pub fn resolve_output_dir(&self, order: &Order, started_at: DateTime<Utc>) -> PathBuf {
        let config = order.output_config.as_ref();
        let base = config
            .and_then(|c| c.base_directory.clone())
            .unwrap_or_else(|| self.options.output_directory.clone());

        if config.is_some_and(|c| c.include_timestamp) {
            let stamp = started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
            base.join(stamp.to_string())
        } else {
            base
        }
    }

    /// Drive one component to `Done` or `Failed`
    ///
    /// Everything logged while the component runs carries its id.
    pub fn process_component(&mut self, component: &Component, output_dir: &Path) -> ComponentResult {
        let span = tracing::info_span!("component", id = %component.component_id);
        let _entered = span.enter();

        let mut result = ComponentResult::new(&component.component_id, &component.model_path);

        let (doc, opened) = match self.locate_document(component) {
            Ok(located) => located,
            Err(e) => {
                tracing::error!(
                    "[{}] Cannot open {}: {}",
                    component.component_id,
                    component.model_path,
                    e
                );
                fail(&mut result, structural_failure(e, &component.model_path));
                return result;
            }
        };
        result.document = Some(doc.name.clone());

        result.parameters = self
            .applier
            .apply(&mut self.host, &doc, &component.parameters);
        advance(&mut result);

        match self
            .regenerator
            .regenerate_all(&mut self.host, &doc, &component.setup_names)
        {
            Ok(regenerated) => {
                result.setups = regenerated.setups;
                result.missing_setups = regenerated.missing_setups;
                advance(&mut result);
            }
            Err(e) => {
                tracing::error!("[{}] {}", component.component_id, e);
                fail(&mut result, structural_failure(e, &component.model_path));
                self.release_document(&doc, opened);
                return result;
            }
        }

        let target = PostTarget {
            profile: component
                .post_processor_name()
                .unwrap_or(self.options.default_profile.as_str())
                .to_string(),
            output_dir: output_dir.to_path_buf(),
            extension: self.options.extension.clone(),
            output_file_name: component.output_file_name().map(str::to_string),
        };
        result.posts = self
            .post
            .post_all(&mut self.host, &doc, &result.setups, &target);
        advance(&mut result);
        advance(&mut result);

        self.release_document(&doc, opened);
        result.finished_at = Utc::now();
        result
    }

    /// Find an open document for the model, or open it
    ///
    /// Returns the handle and whether this call opened it. A URI leaf is an
    /// identifier, so only file paths also match on their stem.
    fn locate_document(&mut self, component: &Component) -> Result<(DocumentHandle, bool), HostError> {
        let file_name = component.model_file_name();
        let stem = if component.is_uri() {
            file_name
        } else {
            file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .filter(|stem| !stem.is_empty())
                .unwrap_or(file_name)
        };

        if let Some(doc) = self
            .host
            .open_documents()
            .into_iter()
            .find(|d| d.name == file_name || d.name == stem)
        {
            tracing::info!("Using already open document {}", doc);
            self.host.activate(&doc)?;
            return Ok((doc, false));
        }

        let doc = self.host.open(&component.model_path)?;
        tracing::info!("Opened {} as {}", component.model_path, doc);
        if let Err(e) = self.host.activate(&doc) {
            self.release_document(&doc, true);
            return Err(e);
        }
        Ok((doc, true))
    }

    fn release_document(&mut self, doc: &DocumentHandle, opened: bool) {
        if !(opened && self.options.close_after_processing) {
            return;
        }
        match self.host.close(doc) {
            Ok(()) => tracing::debug!("Closed {}", doc),
            Err(e) => tracing::warn!("Failed to close {}: {}", doc, e),
        }
    }
}

fn advance(result: &mut ComponentResult) {
    if let Some(next) = result.stage.next() {
        report::log_stage(result, result.stage, next);
        result.stage = next;
    }
}

fn fail(result: &mut ComponentResult, failure: StructuralFailure) {
    report::log_stage(result, result.stage, ComponentStage::Failed);
    result.stage = ComponentStage::Failed;
    result.failure = Some(failure);
    result.finished_at = Utc::now();
}

fn structural_failure(error: HostError, model_path: &str) -> StructuralFailure {
    match error {
        HostError::NoCamData { message } => StructuralFailure::NoCamData { message },
        HostError::DocumentOpen { path, message } => StructuralFailure::DocumentOpen { path, message },
        other => StructuralFailure::DocumentOpen {
            path: model_path.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camorder_core::{
        DocumentFixture, HostFixture, OperationFixture, OutputConfig, RunStatus, SetupFixture,
        SimulatedHost,
    };
    use camorder_settings::MemoryCounterStore;

    fn options(dir: &Path) -> PipelineOptions {
        PipelineOptions {
            output_directory: dir.to_path_buf(),
            poll_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn order(json: &str) -> Order {
        Order::from_json_str(json).unwrap()
    }

    #[test]
    fn test_resolve_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PipelineOrchestrator::new(
            SimulatedHost::new(HostFixture::new()),
            MemoryCounterStore::new(),
            options(dir.path()),
        );

        let mut o = order(
            r#"{ "version": "1.0.0", "orderId": "o", "components": [{ "componentId": "a", "modelPath": "a.f3d" }] }"#,
        );
        let started = Utc::now();
        assert_eq!(pipeline.resolve_output_dir(&o, started), dir.path());

        o.output_config = Some(OutputConfig {
            base_directory: Some(PathBuf::from("/srv/nc")),
            include_timestamp: true,
        });
        let resolved = pipeline.resolve_output_dir(&o, started);
        assert!(resolved.starts_with("/srv/nc"));
        let stamp = resolved.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
    }

    #[test]
    fn test_reuses_open_document() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = HostFixture::new().with_document(
            DocumentFixture::new("bracket")
                .with_path("/nowhere/bracket.f3d")
                .already_open()
                .with_setup(SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket"))),
        );
        let mut options = options(dir.path());
        options.close_after_processing = true;
        let mut pipeline =
            PipelineOrchestrator::new(SimulatedHost::new(fixture), MemoryCounterStore::new(), options);

        let o = order(
            r#"{ "version": "1.0.0", "orderId": "o",
                 "components": [{ "componentId": "b", "modelPath": "/elsewhere/bracket.f3d" }] }"#,
        );
        let result = pipeline.run_order(&o).unwrap();
        assert_eq!(result.components[0].document.as_deref(), Some("bracket"));
        // Not opened by the pipeline, so left open
        assert!(pipeline.host().is_open("bracket"));
    }

    #[test]
    fn test_closes_documents_it_opened() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = HostFixture::new().with_document(
            DocumentFixture::new("bracket")
                .with_setup(SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket"))),
        );
        let mut options = options(dir.path());
        options.close_after_processing = true;
        let mut pipeline =
            PipelineOrchestrator::new(SimulatedHost::new(fixture), MemoryCounterStore::new(), options);

        let o = order(
            r#"{ "version": "1.0.0", "orderId": "o",
                 "components": [{ "componentId": "b", "modelPath": "bracket.f3d" }] }"#,
        );
        let result = pipeline.run_order(&o).unwrap();
        assert_eq!(result.components[0].stage, ComponentStage::Done);
        assert!(!pipeline.host().is_open("bracket"));
    }

    #[test]
    fn test_no_cam_data_fails_after_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = HostFixture::new().with_document(
            DocumentFixture::new("panel")
                .with_parameter("width", "600 mm", "mm")
                .without_cam(),
        );
        let mut pipeline = PipelineOrchestrator::new(
            SimulatedHost::new(fixture),
            MemoryCounterStore::new(),
            options(dir.path()),
        );

        let o = order(
            r#"{ "version": "1.0.0", "orderId": "o",
                 "components": [{ "componentId": "p", "modelPath": "panel.f3d", "parameters": { "width": 650 } }] }"#,
        );
        let result = pipeline.run_order(&o).unwrap();
        let component = &result.components[0];
        assert_eq!(component.stage, ComponentStage::Failed);
        assert!(matches!(component.failure, Some(StructuralFailure::NoCamData { .. })));
        assert_eq!(component.parameters.len(), 1);
        assert!(component.parameters[0].is_success());
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(pipeline.counter().peek().unwrap(), 1001);
    }

    #[test]
    fn test_activation_failure_closes_opened_document() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = HostFixture::new().with_document(
            DocumentFixture::new("bracket")
                .failing_activation("Document is read-only")
                .with_setup(SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket"))),
        );
        let mut options = options(dir.path());
        options.close_after_processing = true;
        let mut pipeline =
            PipelineOrchestrator::new(SimulatedHost::new(fixture), MemoryCounterStore::new(), options);

        let o = order(
            r#"{ "version": "1.0.0", "orderId": "o",
                 "components": [{ "componentId": "b", "modelPath": "bracket.f3d" }] }"#,
        );
        let result = pipeline.run_order(&o).unwrap();
        let component = &result.components[0];
        assert_eq!(component.stage, ComponentStage::Failed);
        assert!(matches!(
            &component.failure,
            Some(StructuralFailure::DocumentOpen { message, .. }) if message.contains("read-only")
        ));
        assert!(!pipeline.host().is_open("bracket"));
    }

    #[test]
    fn test_uri_leaf_is_not_matched_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = HostFixture::new()
            .with_document(
                DocumentFixture::new("door")
                    .already_open()
                    .with_setup(SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket"))),
            )
            .with_document(
                DocumentFixture::new("door.v2")
                    .with_path("fusion://hub/cabinets/door.v2")
                    .with_setup(SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket"))),
            );
        let mut pipeline = PipelineOrchestrator::new(
            SimulatedHost::new(fixture),
            MemoryCounterStore::new(),
            options(dir.path()),
        );

        let o = order(
            r#"{ "version": "1.0.0", "orderId": "o",
                 "components": [
                     { "componentId": "uri", "modelPath": "fusion://hub/cabinets/door.v2" },
                     { "componentId": "file", "modelPath": "/models/door.f3d" }
                 ] }"#,
        );
        let result = pipeline.run_order(&o).unwrap();
        assert_eq!(result.components[0].document.as_deref(), Some("door.v2"));
        assert_eq!(result.components[1].document.as_deref(), Some("door"));
    }
}
