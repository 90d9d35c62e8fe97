//! Sync orchestrator.
//!
//! One run: create the run directory, invoke the sync tool, parse its
//! output, resolve the remote objects (or fall back to the local tree),
//! write link files, then persist the JSON log and, when anything failed,
//! `FAILURE.md`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use b2_mirror_b2::{StorageTool, SyncRequest, ToolError};
use b2_mirror_config::MirrorConfig;
use b2_mirror_models::{
    ItemError, ItemErrorKind, LinkSource, Operation, RunMetadata, SyncReport,
};
use chrono::Local;

use crate::fallback::{compile_exclusions, enumerate_local};
use crate::links::LinkGenerator;
use crate::mirror::Mirror;
use crate::parser::parse_sync_output;
use crate::progress::{ProgressCallback, null_progress};
use crate::report::{ReportError, write_failure_report, write_json_log};
use crate::resolver::{Resolved, UrlTemplate, resolve_remote};
use crate::run_dir::create_run_dir;

/// Whole-operation failures of a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The input directory does not exist.
    #[error("Input directory {} does not exist", path.display())]
    MissingInput {
        /// Configured input directory.
        path: PathBuf,
    },

    /// The run directory could not be created.
    #[error("Failed to create run directory under {}: {source}", path.display())]
    RunDir {
        /// Configured output directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An exclusion pattern does not compile.
    #[error("Invalid exclusion pattern: {0}")]
    Exclusion(#[from] regex::Error),

    /// The sync tool could not be run at all.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The run log could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Ask the tool for a preview and write no link files.
    pub dry_run: bool,
}

/// Drives one sync of the configured input tree.
pub struct SyncOrchestrator<'a, T: StorageTool + ?Sized> {
    tool: &'a T,
    config: &'a MirrorConfig,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a, T: StorageTool + ?Sized> SyncOrchestrator<'a, T> {
    /// Creates an orchestrator over `tool` with an already-validated
    /// `config`.
    #[must_use]
    pub fn new(tool: &'a T, config: &'a MirrorConfig) -> Self {
        Self {
            tool,
            config,
            progress: null_progress(),
        }
    }

    /// Reports link-writing progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the sync and everything after it.
    ///
    /// A failed or timed-out invocation is not an `Err`: it comes back as a
    /// report with `exit_status = Failure` and the raw output attached.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the run cannot start, the tool cannot be
    /// spawned, or the run log cannot be written.
    pub async fn run(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let b2 = &self.config.b2;
        let input_dir = &self.config.paths.input_dir;

        if !input_dir.is_dir() {
            return Err(SyncError::MissingInput {
                path: input_dir.clone(),
            });
        }
        let exclusions = compile_exclusions(&self.config.processing.exclude_patterns)?;

        let output_dir = &self.config.paths.output_dir;
        let run_dir =
            create_run_dir(output_dir, Local::now()).map_err(|source| SyncError::RunDir {
                path: output_dir.clone(),
                source,
            })?;
        log::info!("Output directory: {}", run_dir.display());

        let request = SyncRequest {
            source: input_dir.clone(),
            bucket: b2.bucket_name.clone(),
            prefix: self.config.key_prefix(),
            exclude_patterns: self.config.processing.exclude_patterns.clone(),
            threads: b2.sync_threads,
            dry_run: options.dry_run,
        };

        log::info!(
            "Starting sync: {} -> b2://{}/{}",
            input_dir.display(),
            b2.bucket_name,
            request.prefix
        );
        let timeout = self.config.sync_timeout();
        let output = match self.tool.sync(&request, timeout).await {
            Ok(output) => output,
            Err(e) => {
                log::error!("Sync could not be started: {e}");
                let errors = [ItemError::new(
                    "sync",
                    ItemErrorKind::InvocationFailure,
                    e.to_string(),
                )];
                if let Err(report_err) =
                    write_failure_report(&run_dir, Operation::Sync, &errors, None)
                {
                    log::error!("{report_err}");
                }
                return Err(e.into());
            }
        };

        let raw = output.combined();
        let mut statistics = parse_sync_output(&raw);
        let mut errors = Vec::new();

        if output.timed_out {
            let message = format!("Sync timed out after {} seconds", timeout.as_secs());
            log::error!("{message}");
            statistics.record_error(message.clone());
            errors.push(ItemError::new("sync", ItemErrorKind::InvocationFailure, message));
        } else if !output.success {
            let message = output.exit_code.map_or_else(
                || "Sync was terminated by a signal".to_string(),
                |code| format!("Sync exited with status {code}"),
            );
            log::error!("{message}");
            statistics.record_error(message.clone());
            errors.push(ItemError::new("sync", ItemErrorKind::InvocationFailure, message));
        }

        let mut link_files = Vec::new();
        let mut link_source = None;

        if statistics.is_success() && !options.dry_run {
            let (resolved, source) = self.resolve(&exclusions, &mut errors).await;
            errors.extend(resolved.rejected);

            let mirror = Mirror::new(&run_dir, self.config.processing.link_extension.clone());
            let outcome = LinkGenerator::new(&mirror)
                .with_progress(self.progress.clone())
                .write_all(&resolved.items);

            link_files = outcome.written;
            link_source = Some(source);
            errors.extend(outcome.errors);
        } else if options.dry_run {
            log::info!("Dry run: no link files written");
        } else {
            log::error!("Sync failed, skipping link generation");
        }

        let invocation_failed = !statistics.is_success();
        let report = SyncReport {
            metadata: RunMetadata {
                timestamp: Local::now().to_rfc3339(),
                operation: Operation::Sync,
                bucket_name: b2.bucket_name.clone(),
                execution_time_seconds: started.elapsed().as_secs_f64(),
                dry_run: options.dry_run,
                output_dir: Some(run_dir.clone()),
            },
            link_files_written: link_files.len(),
            link_files,
            link_source,
            raw_output: invocation_failed.then_some(raw),
            statistics,
            errors,
        };

        write_json_log(&run_dir, Operation::Sync, &report)?;

        if needs_failure_report(&report) {
            let mut failures = report.errors.clone();
            for line in &report.statistics.errors {
                if !failures.iter().any(|e| &e.message == line) {
                    failures.push(ItemError::new(
                        "sync output",
                        ItemErrorKind::InvocationFailure,
                        line.clone(),
                    ));
                }
            }
            write_failure_report(
                &run_dir,
                Operation::Sync,
                &failures,
                report.raw_output.as_deref(),
            )?;
        }

        log_summary(&report);
        Ok(report)
    }

    async fn resolve(
        &self,
        exclusions: &[regex::Regex],
        errors: &mut Vec<ItemError>,
    ) -> (Resolved, LinkSource) {
        let b2 = &self.config.b2;
        let urls = UrlTemplate::from_config(self.config);
        let prefix = self.config.key_prefix();

        match resolve_remote(
            self.tool,
            &b2.bucket_name,
            &prefix,
            self.config.list_timeout(),
            &urls,
        )
        .await
        {
            Ok(resolved) => (resolved, LinkSource::RemoteListing),
            Err(e) => {
                log::warn!("{e}; deriving links from the local input tree");
                errors.push(ItemError::new(
                    format!("b2://{}/{prefix}", b2.bucket_name),
                    ItemErrorKind::ResolutionError,
                    e.to_string(),
                ));
                let resolved = enumerate_local(
                    &self.config.paths.input_dir,
                    &prefix,
                    exclusions,
                    &urls,
                );
                (resolved, LinkSource::LocalFallback)
            }
        }
    }
}

/// A fallback after a listing failure alone is a warning, not a failure.
fn needs_failure_report(report: &SyncReport) -> bool {
    !report.statistics.is_success()
        || report
            .errors
            .iter()
            .any(|e| e.kind != ItemErrorKind::ResolutionError)
}

fn log_summary(report: &SyncReport) {
    log::info!("Sync summary: {}", report.statistics);
    log::info!(
        "Link files written: {} ({} error(s)) in {:.1}s",
        report.link_files_written,
        report.errors.len(),
        report.metadata.execution_time_seconds
    );
    if let Some(dir) = &report.metadata.output_dir {
        log::info!("Output directory: {}", dir.display());
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use b2_mirror_b2::ToolOutput;
    use b2_mirror_models::{ExitStatus, RemoteAction, RemoteObject};

    use super::*;
    use crate::report::{FAILURE_REPORT, log_path};
    use crate::test_support::{FakeTool, scratch_config};

    fn ok_output(stdout: &str) -> ToolOutput {
        ToolOutput {
            exit_code: Some(0),
            success: true,
            stdout: stdout.to_string(),
            ..ToolOutput::default()
        }
    }

    fn write_inputs(config: &MirrorConfig, files: &[&str]) {
        for file in files {
            let path = config.paths.input_dir.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"pixels").unwrap();
        }
    }

    fn run_dir(report: &SyncReport) -> &Path {
        report.metadata.output_dir.as_deref().unwrap()
    }

    fn cleanup(config: &MirrorConfig) {
        let _ = std::fs::remove_dir_all(config.paths.input_dir.parent().unwrap());
    }

    #[tokio::test]
    async fn end_to_end_mirrors_uploaded_tree() {
        let config = scratch_config("sync_end_to_end");
        write_inputs(&config, &["root.jpg", "folder1/subfolder/image.jpg"]);

        let tool = FakeTool {
            sync_output: ok_output(
                "upload: root.jpg -> b2://photos/root.jpg\n\
                 upload: folder1/subfolder/image.jpg -> b2://photos/folder1/subfolder/image.jpg\n",
            ),
            objects: vec![
                RemoteObject::file("root.jpg", 6),
                RemoteObject {
                    action: RemoteAction::Folder,
                    ..RemoteObject::file("folder1/", 0)
                },
                RemoteObject::file("folder1/subfolder/image.jpg", 6),
            ],
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.statistics.files_uploaded, 2);
        assert!(report.statistics.errors.is_empty());
        assert!(report.errors.is_empty());
        assert_eq!(report.link_files_written, 2);
        assert_eq!(report.link_source, Some(LinkSource::RemoteListing));
        assert!(report.raw_output.is_none());

        let out = run_dir(&report);
        assert_eq!(
            std::fs::read_to_string(out.join("root.txt")).unwrap(),
            "https://f003.backblazeb2.com/file/photos/root.jpg"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("folder1/subfolder/image.txt")).unwrap(),
            "https://f003.backblazeb2.com/file/photos/folder1/subfolder/image.jpg"
        );
        assert!(log_path(out, Operation::Sync).is_file());
        assert!(!out.join(FAILURE_REPORT).exists());

        let log: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(log_path(out, Operation::Sync)).unwrap())
                .unwrap();
        assert_eq!(log["statistics"]["files_uploaded"], 2);
        assert_eq!(log["link_files_written"], 2);

        cleanup(&config);
    }

    #[tokio::test]
    async fn sync_request_carries_configured_values() {
        let config = scratch_config("sync_request");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_output: ok_output(""),
            ..FakeTool::default()
        };

        SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        let request = tool.last_sync_request().unwrap();
        assert_eq!(request.bucket, "photos");
        assert_eq!(request.source, config.paths.input_dir);
        assert_eq!(request.exclude_patterns, config.processing.exclude_patterns);
        assert_eq!(request.threads, 4);
        assert!(!request.dry_run);

        cleanup(&config);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_raw_output_and_skips_links() {
        let config = scratch_config("sync_failure");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_output: ToolOutput {
                exit_code: Some(1),
                success: false,
                stdout: "upload: a.jpg\n".to_string(),
                stderr: "something unexpected happened\n".to_string(),
                ..ToolOutput::default()
            },
            objects: vec![RemoteObject::file("a.jpg", 6)],
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.statistics.exit_status, ExitStatus::Failure);
        assert_eq!(report.link_files_written, 0);
        assert_eq!(tool.count("list_objects"), 0);
        assert_eq!(report.errors[0].kind, ItemErrorKind::InvocationFailure);
        let raw = report.raw_output.as_deref().unwrap();
        assert!(raw.contains("upload: a.jpg"));
        assert!(raw.contains("something unexpected happened"));

        let failure = std::fs::read_to_string(run_dir(&report).join(FAILURE_REPORT)).unwrap();
        assert!(failure.contains("Sync exited with status 1"));
        assert!(failure.contains("something unexpected happened"));

        cleanup(&config);
    }

    #[tokio::test]
    async fn timeout_reports_failure() {
        let config = scratch_config("sync_timeout");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_output: ToolOutput {
                timed_out: true,
                stdout: "upload: a.jpg\n".to_string(),
                ..ToolOutput::default()
            },
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        assert!(!report.statistics.is_success());
        assert!(report.statistics.errors[0].contains("timed out after 1800 seconds"));
        assert!(report.raw_output.is_some());

        cleanup(&config);
    }

    #[tokio::test]
    async fn error_lines_in_output_fail_the_run() {
        let config = scratch_config("sync_error_lines");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_output: ok_output("ERROR: upload of a.jpg failed\n"),
            objects: vec![RemoteObject::file("a.jpg", 6)],
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.link_files_written, 0);
        let failure = std::fs::read_to_string(run_dir(&report).join(FAILURE_REPORT)).unwrap();
        assert!(failure.contains("ERROR: upload of a.jpg failed"));

        cleanup(&config);
    }

    #[tokio::test]
    async fn listing_failure_falls_back_to_local_tree() {
        let config = scratch_config("sync_fallback");
        write_inputs(&config, &["root.jpg", "folder1/subfolder/image.jpg", ".DS_Store"]);
        let tool = FakeTool {
            sync_output: ok_output("upload: root.jpg\nupload: folder1/subfolder/image.jpg\n"),
            listing_fails: true,
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.link_source, Some(LinkSource::LocalFallback));
        assert_eq!(report.link_files_written, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ItemErrorKind::ResolutionError);

        let out = run_dir(&report);
        assert_eq!(
            std::fs::read_to_string(out.join("folder1/subfolder/image.txt")).unwrap(),
            "https://f003.backblazeb2.com/file/photos/folder1/subfolder/image.jpg"
        );
        assert!(!out.join(".DS_Store.txt").exists());
        assert!(!out.join(FAILURE_REPORT).exists());

        cleanup(&config);
    }

    #[tokio::test]
    async fn traversal_key_is_isolated() {
        let config = scratch_config("sync_traversal");
        write_inputs(&config, &["ok.jpg"]);
        let tool = FakeTool {
            sync_output: ok_output("upload: ok.jpg\n"),
            objects: vec![
                RemoteObject::file("../../etc/passwd.jpg", 6),
                RemoteObject::file("ok.jpg", 6),
            ],
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.link_files, ["ok.txt"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ItemErrorKind::PathTraversal);
        assert!(run_dir(&report).join(FAILURE_REPORT).exists());

        cleanup(&config);
    }

    #[tokio::test]
    async fn dry_run_writes_no_links() {
        let config = scratch_config("sync_dry_run");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_output: ok_output("upload: a.jpg\n"),
            objects: vec![RemoteObject::file("a.jpg", 6)],
            ..FakeTool::default()
        };

        let report = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions { dry_run: true })
            .await
            .unwrap();

        assert!(tool.last_sync_request().unwrap().dry_run);
        assert!(report.metadata.dry_run);
        assert_eq!(report.statistics.files_uploaded, 1);
        assert_eq!(report.link_files_written, 0);
        assert!(report.link_source.is_none());
        assert!(!run_dir(&report).join("a.txt").exists());

        cleanup(&config);
    }

    #[tokio::test]
    async fn spawn_failure_aborts_with_failure_report() {
        let config = scratch_config("sync_spawn");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_spawn_fails: true,
            ..FakeTool::default()
        };

        let err = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Tool(ToolError::Spawn { .. })));

        let run = std::fs::read_dir(&config.paths.output_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert!(run.join(FAILURE_REPORT).is_file());

        cleanup(&config);
    }

    #[tokio::test]
    async fn missing_input_dir_is_fatal_before_any_call() {
        let config = scratch_config("sync_missing_input");
        let tool = FakeTool::default();

        let err = SyncOrchestrator::new(&tool, &config)
            .run(SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MissingInput { .. }));
        assert!(tool.calls().is_empty());
        assert!(!config.paths.output_dir.exists());

        cleanup(&config);
    }

    #[tokio::test]
    async fn consecutive_runs_get_distinct_output_roots() {
        let config = scratch_config("sync_distinct_runs");
        write_inputs(&config, &["a.jpg"]);
        let tool = FakeTool {
            sync_output: ok_output(""),
            ..FakeTool::default()
        };
        let orchestrator = SyncOrchestrator::new(&tool, &config);

        let first = orchestrator.run(SyncOptions::default()).await.unwrap();
        let second = orchestrator.run(SyncOptions::default()).await.unwrap();

        assert_ne!(first.metadata.output_dir, second.metadata.output_dir);

        cleanup(&config);
    }
}
