//! Toolpath regeneration
//!
//! Requests a full regeneration of every toolpath in a document, waits for
//! the host to finish, then classifies each considered setup by how many of
//! its operations ended up with a toolpath.
//!
//! [`wait_for_completion`] is the only place the pipeline suspends: it
//! yields to the host event loop between completion polls.

use camorder_core::{
    CompletionToken, DocumentHandle, HostError, HostSession, OperationInfo,
    SetupClassification, SetupRegenerationOutcome,
};
use std::time::Duration;

/// Polls between progress messages while waiting on the host
const PROGRESS_LOG_EVERY: u64 = 50;

/// Setup outcomes of one regeneration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    /// Considered setups, in host order
    pub setups: Vec<SetupRegenerationOutcome>,
    /// Names from the setup filter the document does not have
    pub missing_setups: Vec<String>,
}

/// Block until the host reports the regeneration behind `token` finished
///
/// Returns the number of polls that reported "not finished". There is no
/// timeout; a host that never completes hangs the caller.
pub fn wait_for_completion<H: HostSession + ?Sized>(
    host: &mut H,
    token: &CompletionToken,
    poll_interval: Duration,
) -> u64 {
    let mut polls = 0u64;
    while !host.poll_completion(token) {
        host.process_events();
        polls += 1;
        if polls % PROGRESS_LOG_EVERY == 0 {
            tracing::debug!("Still waiting for toolpath generation ({} polls)", polls);
        }
        if !poll_interval.is_zero() {
            std::thread::sleep(poll_interval);
        }
    }
    polls
}

/// Count and describe the operations of one setup
pub fn classify_operations(setup_name: &str, operations: &[OperationInfo]) -> SetupRegenerationOutcome {
    let mut outcome = SetupRegenerationOutcome {
        setup_name: setup_name.to_string(),
        operations_total: operations.len(),
        ..Default::default()
    };

    for op in operations {
        if op.is_suppressed {
            outcome.suppressed_count += 1;
            outcome.notes.push(format!("'{}' is suppressed (skipped)", op.name));
        } else if op.has_toolpath {
            outcome.operations_regenerated += 1;
        } else if let Some(error) = op.error_text() {
            outcome.preexisting_error_count += 1;
            outcome
                .notes
                .push(format!("'{}' (pre-existing error: {})", op.name, error));
        } else {
            outcome
                .notes
                .push(format!("'{}' (no toolpath generated)", op.name));
        }

        if let Some(warning) = op.warning_text() {
            outcome.notes.push(format!("'{}': {}", op.name, warning));
        }
    }

    outcome
}

/// Regenerates and classifies CAM setups
#[derive(Debug, Clone)]
pub struct ToolpathRegenerator {
    poll_interval: Duration,
}

impl Default for ToolpathRegenerator {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl ToolpathRegenerator {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Regenerate every toolpath and classify the considered setups
    ///
    /// * `setup_filter` - when non-empty, only these setups are considered;
    ///   names the document lacks are reported in
    ///   [`RegenerationReport::missing_setups`]
    ///
    /// Fails only for structural problems: no CAM data, no setups at all, or
    /// a document the host no longer knows.
    pub fn regenerate_all<H: HostSession + ?Sized>(
        &self,
        host: &mut H,
        doc: &DocumentHandle,
        setup_filter: &[String],
    ) -> Result<RegenerationReport, HostError> {
        let all_setups = host.list_cam_setups(doc)?;
        if all_setups.is_empty() {
            return Err(HostError::NoCamData {
                message: format!("No CAM setups found in {}", doc.name),
            });
        }

        let considered: Vec<&String> = all_setups
            .iter()
            .filter(|s| setup_filter.is_empty() || setup_filter.contains(*s))
            .collect();
        let missing_setups: Vec<String> = setup_filter
            .iter()
            .filter(|name| !all_setups.contains(*name))
            .cloned()
            .collect();
        for name in &missing_setups {
            tracing::warn!("Setup '{}' not found in {}", name, doc.name);
        }

        if considered.is_empty() {
            tracing::warn!("No setups of {} match the setup filter", doc.name);
            return Ok(RegenerationReport {
                setups: Vec::new(),
                missing_setups,
            });
        }

        let considered_names: Vec<&str> = considered.iter().map(|s| s.as_str()).collect();
        if considered.len() < all_setups.len() {
            tracing::info!(
                "Regenerating toolpaths for {} of {} setup(s): {}",
                considered.len(),
                all_setups.len(),
                considered_names.join(", ")
            );
        } else {
            tracing::info!(
                "Regenerating toolpaths for {} setup(s): {}",
                considered.len(),
                considered_names.join(", ")
            );
        }

        match host.regenerate_all_toolpaths(doc) {
            Ok(token) => {
                let polls = wait_for_completion(host, &token, self.poll_interval);
                tracing::debug!("Toolpath generation finished after {} poll(s)", polls);
            }
            Err(e) if e.is_structural() => return Err(e),
            Err(e) => {
                // Operations keep whatever state they had; classification reports it.
                tracing::error!("Toolpath regeneration request failed for {}: {}", doc.name, e);
            }
        }

        let mut setups = Vec::with_capacity(considered.len());
        for name in considered {
            let outcome = match host.list_operations(doc, name) {
                Ok(operations) => classify_operations(name, &operations),
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => SetupRegenerationOutcome {
                    setup_name: name.clone(),
                    notes: vec![format!("Failed to list operations: {}", e)],
                    ..Default::default()
                },
            };
            log_outcome(&outcome);
            setups.push(outcome);
        }

        Ok(RegenerationReport {
            setups,
            missing_setups,
        })
    }
}

fn log_outcome(outcome: &SetupRegenerationOutcome) {
    match outcome.classification() {
        SetupClassification::FullSuccess => {
            tracing::info!("Setup '{}': {}", outcome.setup_name, outcome.describe());
        }
        SetupClassification::PartialSuccess => {
            tracing::warn!("Setup '{}': {}", outcome.setup_name, outcome.describe());
        }
        SetupClassification::NoValidOperations if outcome.is_unexplained_failure() => {
            tracing::error!("Setup '{}': {}", outcome.setup_name, outcome.describe());
        }
        SetupClassification::NoValidOperations => {
            tracing::warn!(
                "Setup '{}': {} - skipping post",
                outcome.setup_name,
                outcome.describe()
            );
        }
    }
    for note in &outcome.notes {
        tracing::debug!("    {}", note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camorder_core::{
        DocumentFixture, HostFixture, OperationFixture, SetupFixture, SimulatedHost,
    };

    fn op(name: &str, has_toolpath: bool) -> OperationInfo {
        OperationInfo {
            name: name.to_string(),
            has_toolpath,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_counts() {
        let mut errored = op("Contour", false);
        errored.error_message = Some("Tool does not fit".to_string());
        let mut suppressed = op("Drill", true);
        suppressed.is_suppressed = true;

        let outcome = classify_operations(
            "Front",
            &[op("Adaptive", true), errored, suppressed, op("Face", false)],
        );
        assert_eq!(outcome.operations_total, 4);
        assert_eq!(outcome.operations_regenerated, 1);
        assert_eq!(outcome.preexisting_error_count, 1);
        assert_eq!(outcome.suppressed_count, 1);
        assert_eq!(outcome.notes.len(), 3);
        assert_eq!(outcome.classification(), SetupClassification::PartialSuccess);
    }

    #[test]
    fn test_empty_setup_has_no_valid_operations() {
        let outcome = classify_operations("Empty", &[]);
        assert_eq!(outcome.classification(), SetupClassification::NoValidOperations);
        assert!(outcome.is_unexplained_failure());
    }

    #[test]
    fn test_wait_yields_to_event_loop() {
        let fixture = HostFixture::new()
            .with_poll_cycles(4)
            .with_document(DocumentFixture::new("part").with_setup(
                SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket")),
            ));
        let mut host = SimulatedHost::new(fixture);
        let doc = host.open("part.f3d").unwrap();

        let token = host.regenerate_all_toolpaths(&doc).unwrap();
        let polls = wait_for_completion(&mut host, &token, Duration::ZERO);
        assert_eq!(polls, 4);
        assert_eq!(host.events_processed(), 4);
    }

    #[test]
    fn test_setup_filter() {
        let fixture = HostFixture::new().with_document(
            DocumentFixture::new("part")
                .with_setup(SetupFixture::new("Top").with_operation(OperationFixture::new("Pocket")))
                .with_setup(SetupFixture::new("Bottom").with_operation(OperationFixture::new("Face"))),
        );
        let mut host = SimulatedHost::new(fixture);
        let doc = host.open("part.f3d").unwrap();

        let filter = vec!["Bottom".to_string(), "Side".to_string()];
        let report = ToolpathRegenerator::new(Duration::ZERO)
            .regenerate_all(&mut host, &doc, &filter)
            .unwrap();
        assert_eq!(report.setups.len(), 1);
        assert_eq!(report.setups[0].setup_name, "Bottom");
        assert_eq!(report.missing_setups, vec!["Side".to_string()]);
    }

    #[test]
    fn test_document_without_setups_is_structural() {
        let fixture = HostFixture::new().with_document(DocumentFixture::new("blank"));
        let mut host = SimulatedHost::new(fixture);
        let doc = host.open("blank.f3d").unwrap();

        let err = ToolpathRegenerator::new(Duration::ZERO)
            .regenerate_all(&mut host, &doc, &[])
            .unwrap_err();
        assert!(matches!(err, HostError::NoCamData { .. }));
    }
}
