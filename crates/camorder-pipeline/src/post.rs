//! Post processing
//!
//! Turns regenerated setups into numbered G-code programs. The post
//! processor owns the program counter: every attempted setup draws a number
//! first, and a number drawn for a post that then fails stays consumed.

use camorder_core::{
    DocumentHandle, HostError, HostSession, PostFailure, PostRequest, PostResult, PostedProgram,
    SetupRegenerationOutcome,
};
use camorder_settings::ProgramCounterStore;
use std::path::{Path, PathBuf};

/// Where and how one component's setups are posted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTarget {
    /// Post-processor profile
    pub profile: String,
    /// Directory programs are written to
    pub output_dir: PathBuf,
    /// Program file extension, without the dot
    pub extension: String,
    /// Caller-supplied file name replacing the program number
    pub output_file_name: Option<String>,
}

impl PostTarget {
    /// File stem for a program
    ///
    /// The program number by default. An override is used as the stem with
    /// any trailing extension removed; when several setups share it the
    /// program number is appended so files never collide.
    pub fn file_stem(&self, program_number: u64, shared: bool) -> String {
        let Some(name) = self.output_file_name.as_deref().map(str::trim) else {
            return program_number.to_string();
        };

        let suffix = format!(".{}", self.extension);
        let stem = match name.len().checked_sub(suffix.len()) {
            Some(cut)
                if cut > 0
                    && name
                        .get(cut..)
                        .is_some_and(|tail| tail.eq_ignore_ascii_case(&suffix)) =>
            {
                &name[..cut]
            }
            _ => name,
        };

        if shared {
            format!("{}_{}", stem, program_number)
        } else {
            stem.to_string()
        }
    }
}

/// Posts setups through the host and verifies the generated files
#[derive(Debug)]
pub struct PostProcessor<C> {
    counter: C,
}

impl<C: ProgramCounterStore> PostProcessor<C> {
    pub fn new(counter: C) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    pub fn into_counter(self) -> C {
        self.counter
    }

    /// Post every postable setup, skipping the rest
    ///
    /// Returns one result per outcome, in the same order.
    pub fn post_all<H: HostSession + ?Sized>(
        &mut self,
        host: &mut H,
        doc: &DocumentHandle,
        outcomes: &[SetupRegenerationOutcome],
        target: &PostTarget,
    ) -> Vec<PostResult> {
        let shared = outcomes.iter().filter(|o| o.is_postable()).count() > 1;
        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            results.push(self.post(&mut *host, doc, outcome, target, shared));
        }
        results
    }

    /// Post one setup
    ///
    /// Setups with no valid operations are reported as skipped without
    /// touching the counter.
    pub fn post<H: HostSession + ?Sized>(
        &mut self,
        host: &mut H,
        doc: &DocumentHandle,
        outcome: &SetupRegenerationOutcome,
        target: &PostTarget,
        shared: bool,
    ) -> PostResult {
        let setup = &outcome.setup_name;
        if !outcome.is_postable() {
            tracing::info!("Skipping post for '{}': no valid operations", setup);
            return PostResult::skipped(setup.clone());
        }

        let program_number = match self.counter.next() {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("No program number for '{}': {}", setup, e);
                return PostResult {
                    setup_name: setup.clone(),
                    program_number: None,
                    result: Err(PostFailure::CounterUnavailable {
                        message: e.to_string(),
                    }),
                };
            }
        };

        let request = PostRequest {
            program_name: program_number.to_string(),
            profile: target.profile.clone(),
            output_dir: target.output_dir.clone(),
            file_stem: target.file_stem(program_number, shared),
            extension: target.extension.clone(),
        };
        let output_path = request.output_path();
        tracing::debug!(
            "Posting '{}' as program {} with '{}' to {}",
            setup,
            program_number,
            request.profile,
            output_path.display()
        );

        let result = clear_previous_output(&output_path).and_then(|()| {
            host.post_process(doc, setup, &request)
                .map_err(post_failure)
                .and_then(|()| verify_output(output_path))
        });

        match &result {
            Ok(program) => tracing::info!(
                "Posted '{}' as program {}: {} ({} bytes)",
                setup,
                program_number,
                program.output_file.display(),
                program.size_bytes
            ),
            Err(e) => tracing::warn!(
                "Post failed for '{}' (program {} consumed): {}",
                setup,
                program_number,
                e
            ),
        }

        PostResult {
            setup_name: setup.clone(),
            program_number: Some(program_number),
            result,
        }
    }
}

fn post_failure(error: HostError) -> PostFailure {
    match error {
        HostError::PostProcessorNotFound { profile } => PostFailure::PostProcessorNotFound { profile },
        HostError::NoValidToolpath { message, .. } => PostFailure::NoValidToolpath { message },
        other => PostFailure::Host {
            message: other.to_string(),
        },
    }
}

/// Remove a file left at `path` by an earlier run
///
/// Only a file written by this post may pass verification.
fn clear_previous_output(path: &Path) -> Result<(), PostFailure> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed previous output {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PostFailure::OutputNotReplaceable {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

fn verify_output(path: PathBuf) -> Result<PostedProgram, PostFailure> {
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(PostedProgram {
            output_file: path,
            size_bytes: meta.len(),
        }),
        Ok(meta) if meta.is_file() => Err(PostFailure::OutputEmpty { path }),
        _ => Err(PostFailure::OutputMissing { path }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(output_file_name: Option<&str>) -> PostTarget {
        PostTarget {
            profile: "richauto".to_string(),
            output_dir: PathBuf::from("/tmp/nc"),
            extension: "nc".to_string(),
            output_file_name: output_file_name.map(str::to_string),
        }
    }

    #[test]
    fn test_file_stem_defaults_to_program_number() {
        assert_eq!(target(None).file_stem(1001, false), "1001");
        assert_eq!(target(None).file_stem(1001, true), "1001");
    }

    #[test]
    fn test_file_stem_override() {
        assert_eq!(target(Some("door_left.nc")).file_stem(1001, false), "door_left");
        assert_eq!(target(Some("door_left.NC")).file_stem(1001, false), "door_left");
        assert_eq!(target(Some("door_left")).file_stem(1002, true), "door_left_1002");
        assert_eq!(target(Some(".nc")).file_stem(7, false), ".nc");
    }

    #[test]
    fn test_verify_output() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.nc");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            verify_output(empty),
            Err(PostFailure::OutputEmpty { .. })
        ));
        assert!(matches!(
            verify_output(dir.path().join("absent.nc")),
            Err(PostFailure::OutputMissing { .. })
        ));

        let full = dir.path().join("1001.nc");
        std::fs::write(&full, "%\nM30\n%\n").unwrap();
        assert_eq!(verify_output(full).unwrap().size_bytes, 8);
    }

    #[test]
    fn test_clear_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("1001.nc");
        std::fs::write(&stale, "%\nO1001\n%\n").unwrap();
        clear_previous_output(&stale).unwrap();
        assert!(!stale.exists());

        // Nothing to remove
        clear_previous_output(&stale).unwrap();

        let blocked = dir.path().join("blocked.nc");
        std::fs::create_dir(&blocked).unwrap();
        assert!(matches!(
            clear_previous_output(&blocked),
            Err(PostFailure::OutputNotReplaceable { .. })
        ));
    }

    #[test]
    fn test_host_errors_map_to_failures() {
        assert_eq!(
            post_failure(HostError::PostProcessorNotFound {
                profile: "fanuc".to_string()
            }),
            PostFailure::PostProcessorNotFound {
                profile: "fanuc".to_string()
            }
        );
        assert!(matches!(
            post_failure(HostError::Other {
                message: "crashed".to_string()
            }),
            PostFailure::Host { .. }
        ));
    }
}
