//! Pipeline result types
//!
//! Each stage records one outcome per item (parameter, setup, post) as a
//! `Result`, and the final status of a component and of the order is decided
//! in a single aggregation step over those collections. Results are produced
//! fresh on every run and serialised for whoever renders them.

use crate::order::ParameterValue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Outcome of a stage, a component, or an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialSuccess => write!(f, "partial success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where a component is in its processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComponentStage {
    NotStarted,
    ParametersApplied,
    ToolpathsRegenerated,
    PostProcessed,
    Done,
    /// Absorbing state after a structural failure
    Failed,
}

impl ComponentStage {
    /// The stage that follows this one on the happy path
    pub fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::ParametersApplied),
            Self::ParametersApplied => Some(Self::ToolpathsRegenerated),
            Self::ToolpathsRegenerated => Some(Self::PostProcessed),
            Self::PostProcessed => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Whether processing of the component has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ComponentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NotStarted"),
            Self::ParametersApplied => write!(f, "ParametersApplied"),
            Self::ToolpathsRegenerated => write!(f, "ToolpathsRegenerated"),
            Self::PostProcessed => write!(f, "PostProcessed"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A successful parameter assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterChange {
    pub old_expression: String,
    pub new_expression: String,
}

impl ParameterChange {
    /// Whether the assignment left the expression as it was
    pub fn is_unchanged(&self) -> bool {
        self.old_expression == self.new_expression
    }
}

/// Why one parameter could not be applied
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ParameterFailure {
    #[error("Parameter '{name}' not found in model")]
    ParameterNotFound { name: String },

    #[error("Failed to assign '{expression}' to '{name}': {message}")]
    ParameterAssignmentFailed {
        name: String,
        expression: String,
        message: String,
    },
}

/// Outcome of applying one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterOutcome {
    pub name: String,
    pub requested: ParameterValue,
    pub result: Result<ParameterChange, ParameterFailure>,
}

impl ParameterOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Status of the parameter stage over all its outcomes
///
/// Successful only if at least one update was attempted and none failed.
pub fn parameter_stage_status(outcomes: &[ParameterOutcome]) -> RunStatus {
    if !outcomes.is_empty() && outcomes.iter().all(ParameterOutcome::is_success) {
        RunStatus::Success
    } else {
        RunStatus::PartialSuccess
    }
}

/// Classification of a setup after regeneration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SetupClassification {
    /// Every operation regenerated
    FullSuccess,
    /// At least one operation regenerated
    PartialSuccess,
    /// Nothing to post
    NoValidOperations,
}

impl fmt::Display for SetupClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullSuccess => write!(f, "full success"),
            Self::PartialSuccess => write!(f, "partial success"),
            Self::NoValidOperations => write!(f, "no valid operations"),
        }
    }
}

/// Per-setup regeneration counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupRegenerationOutcome {
    pub setup_name: String,
    pub operations_total: usize,
    pub operations_regenerated: usize,
    /// Operations without a toolpath that carry a host error
    pub preexisting_error_count: usize,
    pub suppressed_count: usize,
    /// Per-operation notes (suppressed, errors, warnings)
    pub notes: Vec<String>,
}

impl SetupRegenerationOutcome {
    pub fn classification(&self) -> SetupClassification {
        if self.operations_regenerated == 0 {
            SetupClassification::NoValidOperations
        } else if self.operations_regenerated == self.operations_total {
            SetupClassification::FullSuccess
        } else {
            SetupClassification::PartialSuccess
        }
    }

    /// Whether the setup may be handed to the post processor
    pub fn is_postable(&self) -> bool {
        self.classification() != SetupClassification::NoValidOperations
    }

    /// No operation regenerated and none of them explains why
    pub fn is_unexplained_failure(&self) -> bool {
        !self.is_postable() && self.preexisting_error_count == 0
    }

    /// One-line description for logs and summaries
    pub fn describe(&self) -> String {
        match self.classification() {
            SetupClassification::FullSuccess => format!(
                "Regenerated {}/{} toolpaths",
                self.operations_regenerated, self.operations_total
            ),
            SetupClassification::PartialSuccess => format!(
                "Regenerated {}/{} toolpaths ({} operation(s) not regenerated)",
                self.operations_regenerated,
                self.operations_total,
                self.operations_total - self.operations_regenerated
            ),
            SetupClassification::NoValidOperations if self.preexisting_error_count > 0 => {
                format!(
                    "All {} operation(s) have errors - none regenerated",
                    self.operations_total
                )
            }
            SetupClassification::NoValidOperations => format!(
                "No operations regenerated ({} total)",
                self.operations_total
            ),
        }
    }
}

/// A generated G-code program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedProgram {
    pub output_file: PathBuf,
    pub size_bytes: u64,
}

/// Why one setup produced no program
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum PostFailure {
    #[error("Skipped: setup has no valid operations")]
    NoValidOperations,

    #[error("Program counter unavailable: {message}")]
    CounterUnavailable { message: String },

    #[error("Post processor not found: {profile}")]
    PostProcessorNotFound { profile: String },

    #[error("No valid toolpath: {message}")]
    NoValidToolpath { message: String },

    #[error("Post process completed but file not found: {}", .path.display())]
    OutputMissing { path: PathBuf },

    #[error("Post process produced an empty file: {}", .path.display())]
    OutputEmpty { path: PathBuf },

    #[error("Cannot replace existing file {}: {message}", .path.display())]
    OutputNotReplaceable { path: PathBuf, message: String },

    #[error("Post processing failed: {message}")]
    Host { message: String },
}

/// Outcome of posting one setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostResult {
    pub setup_name: String,
    /// Number drawn from the counter; `None` when the setup was skipped
    pub program_number: Option<u64>,
    pub result: Result<PostedProgram, PostFailure>,
}

impl PostResult {
    /// Result for a setup that was never attempted
    pub fn skipped(setup_name: impl Into<String>) -> Self {
        Self {
            setup_name: setup_name.into(),
            program_number: None,
            result: Err(PostFailure::NoValidOperations),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.result, Err(PostFailure::NoValidOperations))
    }

    pub fn output_file(&self) -> Option<&PathBuf> {
        self.result.as_ref().ok().map(|p| &p.output_file)
    }
}

/// A failure that stops the remaining stages of a component
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum StructuralFailure {
    #[error("Failed to open document {path}: {message}")]
    DocumentOpen { path: String, message: String },

    #[error("No CAM data: {message}")]
    NoCamData { message: String },
}

/// Everything recorded for one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentResult {
    pub component_id: String,
    pub model_path: String,
    /// Name of the host document that was processed
    pub document: Option<String>,
    pub stage: ComponentStage,
    pub failure: Option<StructuralFailure>,
    pub parameters: Vec<ParameterOutcome>,
    pub setups: Vec<SetupRegenerationOutcome>,
    /// Names from the setup filter that the document does not have
    pub missing_setups: Vec<String>,
    pub posts: Vec<PostResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ComponentResult {
    /// Empty result for a component about to be processed
    pub fn new(component_id: impl Into<String>, model_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            component_id: component_id.into(),
            model_path: model_path.into(),
            document: None,
            stage: ComponentStage::NotStarted,
            failure: None,
            parameters: Vec::new(),
            setups: Vec::new(),
            missing_setups: Vec::new(),
            posts: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Status of the parameter stage
    pub fn parameter_status(&self) -> RunStatus {
        parameter_stage_status(&self.parameters)
    }

    /// Files produced for this component
    pub fn artifacts(&self) -> Vec<&PathBuf> {
        self.posts.iter().filter_map(PostResult::output_file).collect()
    }

    /// Count of recoverable problems recorded across all stages
    pub fn partial_failure_count(&self) -> usize {
        let parameters = self.parameters.iter().filter(|p| !p.is_success()).count();
        let no_updates = usize::from(self.parameters.is_empty());
        let setups = self
            .setups
            .iter()
            .filter(|s| s.classification() != SetupClassification::FullSuccess)
            .count();
        // A skipped post is already counted through its setup
        let posts = self
            .posts
            .iter()
            .filter(|p| !p.is_success() && !p.is_skipped())
            .count();
        parameters + no_updates + setups + self.missing_setups.len() + posts
    }

    /// Terminal status of the component
    ///
    /// `Failed` after a structural failure or when nothing was produced;
    /// `Success` only when done with no recoverable problems.
    pub fn status(&self) -> RunStatus {
        if self.stage != ComponentStage::Done || self.failure.is_some() {
            return RunStatus::Failed;
        }
        if self.artifacts().is_empty() {
            return RunStatus::Failed;
        }
        if self.partial_failure_count() == 0 {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        }
    }

    /// One-line description for summaries
    pub fn describe(&self) -> String {
        if let Some(failure) = &self.failure {
            return format!("{}: {}", self.component_id, failure);
        }
        let artifacts = self.artifacts().len();
        format!(
            "{}: {} - {}/{} parameter(s) applied, {} setup(s) regenerated, {} NC file(s) generated",
            self.component_id,
            self.status(),
            self.parameters.iter().filter(|p| p.is_success()).count(),
            self.parameters.len(),
            self.setups.iter().filter(|s| s.is_postable()).count(),
            artifacts
        )
    }
}

/// Counts surfaced to the user instead of a single pass/fail flag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub components_total: usize,
    pub components_succeeded: usize,
    pub components_partial: usize,
    pub components_failed: usize,
    pub parameters_updated: usize,
    pub parameters_failed: usize,
    pub setups_regenerated: usize,
    pub setups_skipped: usize,
    pub setups_missing: usize,
    pub programs_generated: usize,
    pub posts_failed: usize,
}

impl OrderSummary {
    pub fn from_components(components: &[ComponentResult]) -> Self {
        let mut summary = Self {
            components_total: components.len(),
            ..Default::default()
        };

        for component in components {
            match component.status() {
                RunStatus::Success => summary.components_succeeded += 1,
                RunStatus::PartialSuccess => summary.components_partial += 1,
                RunStatus::Failed => summary.components_failed += 1,
            }
            for p in &component.parameters {
                if p.is_success() {
                    summary.parameters_updated += 1;
                } else {
                    summary.parameters_failed += 1;
                }
            }
            for s in &component.setups {
                if s.is_postable() {
                    summary.setups_regenerated += 1;
                } else {
                    summary.setups_skipped += 1;
                }
            }
            summary.setups_missing += component.missing_setups.len();
            for p in &component.posts {
                if p.is_success() {
                    summary.programs_generated += 1;
                } else if !p.is_skipped() {
                    summary.posts_failed += 1;
                }
            }
        }

        summary
    }
}

/// Everything recorded for one order run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    pub order_id: String,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub components: Vec<ComponentResult>,
    pub status: RunStatus,
    pub summary: OrderSummary,
}

impl OrderResult {
    /// Aggregate component results into the order outcome
    ///
    /// `Success` only if every component succeeded; `PartialSuccess` if any
    /// component produced at least one program; `Failed` otherwise.
    pub fn aggregate(
        order_id: impl Into<String>,
        output_dir: PathBuf,
        started_at: DateTime<Utc>,
        components: Vec<ComponentResult>,
    ) -> Self {
        let status = if !components.is_empty()
            && components.iter().all(|c| c.status() == RunStatus::Success)
        {
            RunStatus::Success
        } else if components.iter().any(|c| !c.artifacts().is_empty()) {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Failed
        };
        let summary = OrderSummary::from_components(&components);

        Self {
            order_id: order_id.into(),
            output_dir,
            started_at,
            finished_at: Utc::now(),
            components,
            status,
            summary,
        }
    }

    /// All generated files, in processing order
    pub fn artifacts(&self) -> Vec<&PathBuf> {
        self.components.iter().flat_map(|c| c.artifacts()).collect()
    }

    /// Human-readable summary of the run
    pub fn summary_message(&self) -> String {
        let s = &self.summary;
        let mut message = match self.status {
            RunStatus::Success => format!("Order {} completed successfully!\n", self.order_id),
            RunStatus::PartialSuccess => format!("Order {} partially completed.\n", self.order_id),
            RunStatus::Failed => format!("Order {} failed.\n", self.order_id),
        };

        message.push_str(&format!(
            "Components: {}/{} successful ({} partial, {} failed)\n",
            s.components_succeeded, s.components_total, s.components_partial, s.components_failed
        ));
        message.push_str(&format!(
            "Parameters: {} updated, {} failed\n",
            s.parameters_updated, s.parameters_failed
        ));
        message.push_str(&format!(
            "Setups: {} regenerated, {} skipped, {} missing\n",
            s.setups_regenerated, s.setups_skipped, s.setups_missing
        ));
        message.push_str(&format!(
            "Programs: {} generated, {} failed\n",
            s.programs_generated, s.posts_failed
        ));
        message.push_str(&format!("Output: {}\n", self.output_dir.display()));

        let troubled: Vec<&ComponentResult> = self
            .components
            .iter()
            .filter(|c| c.status() != RunStatus::Success)
            .collect();
        if !troubled.is_empty() {
            message.push_str("\nComponents needing attention:\n");
            for component in troubled {
                message.push_str(&format!("  {}\n", component.describe()));
            }
        }

        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(name: &str, total: usize, regenerated: usize, errors: usize) -> SetupRegenerationOutcome {
        SetupRegenerationOutcome {
            setup_name: name.to_string(),
            operations_total: total,
            operations_regenerated: regenerated,
            preexisting_error_count: errors,
            ..Default::default()
        }
    }

    fn updated(name: &str) -> ParameterOutcome {
        ParameterOutcome {
            name: name.to_string(),
            requested: ParameterValue::StringWithUnits("10 mm".to_string()),
            result: Ok(ParameterChange {
                old_expression: "5 mm".to_string(),
                new_expression: "10 mm".to_string(),
            }),
        }
    }

    fn posted(setup: &str, number: u64) -> PostResult {
        PostResult {
            setup_name: setup.to_string(),
            program_number: Some(number),
            result: Ok(PostedProgram {
                output_file: PathBuf::from(format!("/nc/{}.nc", number)),
                size_bytes: 42,
            }),
        }
    }

    fn done(id: &str) -> ComponentResult {
        let mut c = ComponentResult::new(id, format!("{}.f3d", id));
        c.stage = ComponentStage::Done;
        c
    }

    #[test]
    fn test_setup_classification() {
        assert_eq!(setup("A", 3, 3, 0).classification(), SetupClassification::FullSuccess);
        assert_eq!(setup("B", 3, 2, 1).classification(), SetupClassification::PartialSuccess);
        assert_eq!(setup("C", 2, 0, 2).classification(), SetupClassification::NoValidOperations);
        assert_eq!(setup("D", 0, 0, 0).classification(), SetupClassification::NoValidOperations);
        assert!(setup("D", 0, 0, 0).is_unexplained_failure());
        assert!(!setup("C", 2, 0, 2).is_unexplained_failure());
    }

    #[test]
    fn test_parameter_stage_requires_an_update() {
        assert_eq!(parameter_stage_status(&[]), RunStatus::PartialSuccess);
        assert_eq!(parameter_stage_status(&[updated("h")]), RunStatus::Success);

        let failed = ParameterOutcome {
            name: "missing".to_string(),
            requested: ParameterValue::IntegerFlag(1),
            result: Err(ParameterFailure::ParameterNotFound {
                name: "missing".to_string(),
            }),
        };
        assert_eq!(
            parameter_stage_status(&[updated("h"), failed]),
            RunStatus::PartialSuccess
        );
    }

    #[test]
    fn test_component_status() {
        let mut c = done("clean");
        c.parameters.push(updated("h"));
        c.setups.push(setup("A", 2, 2, 0));
        c.posts.push(posted("A", 1001));
        assert_eq!(c.status(), RunStatus::Success);

        c.setups.push(setup("B", 1, 0, 1));
        c.posts.push(PostResult::skipped("B"));
        assert_eq!(c.status(), RunStatus::PartialSuccess);
        assert_eq!(c.partial_failure_count(), 1);

        c.setups.push(setup("C", 1, 1, 0));
        c.posts.push(PostResult {
            setup_name: "C".to_string(),
            program_number: Some(1002),
            result: Err(PostFailure::OutputMissing {
                path: PathBuf::from("1002.nc"),
            }),
        });
        assert_eq!(c.partial_failure_count(), 2);

        let mut failed = ComponentResult::new("broken", "missing.f3d");
        failed.stage = ComponentStage::Failed;
        failed.failure = Some(StructuralFailure::DocumentOpen {
            path: "missing.f3d".to_string(),
            message: "File not found".to_string(),
        });
        assert_eq!(failed.status(), RunStatus::Failed);
        assert!(failed.describe().contains("Failed to open document missing.f3d"));
    }

    #[test]
    fn test_done_without_programs_is_failed() {
        let mut c = done("empty");
        c.parameters.push(updated("h"));
        c.setups.push(setup("A", 1, 0, 1));
        c.posts.push(PostResult::skipped("A"));
        assert_eq!(c.status(), RunStatus::Failed);
    }

    #[test]
    fn test_order_aggregation() {
        let mut good = done("good");
        good.parameters.push(updated("h"));
        good.setups.push(setup("A", 1, 1, 0));
        good.posts.push(posted("A", 1001));

        let mut bad = ComponentResult::new("bad", "bad.f3d");
        bad.stage = ComponentStage::Failed;

        let result = OrderResult::aggregate(
            "ORD",
            PathBuf::from("/nc"),
            Utc::now(),
            vec![good.clone(), bad.clone()],
        );
        assert_eq!(result.status, RunStatus::PartialSuccess);
        assert_eq!(result.summary.components_total, 2);
        assert_eq!(result.summary.components_failed, 1);
        assert_eq!(result.summary.programs_generated, 1);
        assert!(result.summary_message().contains("Components needing attention"));

        let result = OrderResult::aggregate("ORD", PathBuf::from("/nc"), Utc::now(), vec![good]);
        assert_eq!(result.status, RunStatus::Success);

        let result = OrderResult::aggregate("ORD", PathBuf::from("/nc"), Utc::now(), vec![bad]);
        assert_eq!(result.status, RunStatus::Failed);
    }

    #[test]
    fn test_stage_progression() {
        let mut stage = ComponentStage::NotStarted;
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            visited.push(stage);
        }
        assert_eq!(visited.len(), 5);
        assert_eq!(stage, ComponentStage::Done);
        assert!(stage.is_terminal());
        assert_eq!(ComponentStage::Failed.next(), None);
    }
}
