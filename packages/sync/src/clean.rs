//! Clean orchestrator: guarded deletion of everything in the bucket.
//!
//! ```text
//! Init → VerifyAccess → AwaitConfirmation → Execute → CleanupPartials → Done
//!                                        ↘ Aborted
//! ```
//!
//! Access is verified before anything else and before a run directory
//! exists. The plan is fixed before the operator sees it, and nothing is
//! deleted unless the plan was confirmed (interactively or via `force`).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use b2_mirror_b2::{StorageTool, ToolError};
use b2_mirror_config::MirrorConfig;
use b2_mirror_models::{
    CleanPlan, CleanReport, CleanState, ItemError, ItemErrorKind, Operation, RemoteAction,
    RunMetadata,
};
use chrono::{Local, Utc};

use crate::progress::{ProgressCallback, null_progress};
use crate::report::{ReportError, write_json_log};
use crate::run_dir::create_run_dir;

/// Asks the operator to approve a clean plan.
///
/// Anything other than an explicit yes must return `false`.
pub trait Confirmer {
    /// Returns whether `plan` may be executed.
    fn confirm(&self, plan: &CleanPlan) -> bool;
}

/// Whole-operation failures of a clean run.
#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    /// The bucket is unreachable or the credentials are rejected.
    #[error("Cannot access bucket '{bucket}': {source}")]
    Access {
        /// Bucket being cleaned.
        bucket: String,
        /// Underlying tool error.
        source: ToolError,
    },

    /// The object listing for the plan could not be obtained.
    #[error("Failed to list bucket '{bucket}': {source}")]
    Listing {
        /// Bucket being cleaned.
        bucket: String,
        /// Underlying tool error.
        source: ToolError,
    },

    /// The run directory could not be created.
    #[error("Failed to create run directory under {}: {source}", path.display())]
    RunDir {
        /// Configured output directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The run log could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanOptions {
    /// Skip the interactive prompt.
    pub force: bool,
    /// Show the plan and stop without deleting anything.
    pub dry_run: bool,
}

/// Drives one clean of the configured bucket.
pub struct CleanOrchestrator<'a, T: StorageTool + ?Sized, C: Confirmer + ?Sized> {
    tool: &'a T,
    config: &'a MirrorConfig,
    confirmer: &'a C,
    progress: Arc<dyn ProgressCallback>,
    state: CleanState,
}

impl<'a, T: StorageTool + ?Sized, C: Confirmer + ?Sized> CleanOrchestrator<'a, T, C> {
    /// Creates an orchestrator in the `Init` state.
    #[must_use]
    pub fn new(tool: &'a T, config: &'a MirrorConfig, confirmer: &'a C) -> Self {
        Self {
            tool,
            config,
            confirmer,
            progress: null_progress(),
            state: CleanState::Init,
        }
    }

    /// Reports deletion progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CleanState {
        self.state
    }

    fn transition(&mut self, next: CleanState) {
        log::debug!("Clean state: {} -> {next}", self.state);
        self.state = next;
    }

    /// Runs the state machine to `Done` or `Aborted`.
    ///
    /// Per-object deletion failures and partial-upload failures are
    /// collected in the report and never stop the run.
    ///
    /// # Errors
    ///
    /// Returns [`CleanError::Access`] without prompting when the bucket is
    /// unreachable, and other [`CleanError`]s when the plan cannot be
    /// built or the log cannot be written.
    pub async fn run(&mut self, options: CleanOptions) -> Result<CleanReport, CleanError> {
        let started = Instant::now();
        let started_millis = Utc::now().timestamp_millis();
        let bucket = self.config.b2.bucket_name.clone();

        self.transition(CleanState::VerifyAccess);
        self.tool
            .verify_access(&bucket)
            .await
            .map_err(|source| CleanError::Access {
                bucket: bucket.clone(),
                source,
            })?;

        let plan = self.plan(&bucket).await?;
        let target_count = plan.targets().len();

        self.transition(CleanState::AwaitConfirmation);
        log::warn!("About to delete {target_count} object(s) from bucket '{bucket}'");

        let plan = if options.dry_run {
            for key in plan.targets() {
                log::info!("Would delete: {key}");
            }
            log::info!("Dry run: nothing deleted");
            None
        } else if options.force {
            log::info!("Confirmation skipped (--force)");
            Some(plan.confirm())
        } else if self.confirmer.confirm(&plan) {
            Some(plan.confirm())
        } else {
            log::info!("Clean cancelled by user");
            None
        };

        let Some(plan) = plan else {
            self.transition(CleanState::Aborted);
            return Ok(CleanReport {
                metadata: clean_metadata(&bucket, started, options, None),
                final_state: self.state,
                targets: target_count,
                deleted: 0,
                cancelled_uploads: 0,
                errors: Vec::new(),
            });
        };

        let output_dir = &self.config.paths.output_dir;
        let run_dir =
            create_run_dir(output_dir, Local::now()).map_err(|source| CleanError::RunDir {
                path: output_dir.clone(),
                source,
            })?;

        self.transition(CleanState::Execute);
        let mut errors = Vec::new();
        let deleted = self.execute(&plan, &mut errors).await;

        self.transition(CleanState::CleanupPartials);
        let cancelled_uploads = self
            .cleanup_partials(&bucket, started_millis, &mut errors)
            .await;

        self.transition(CleanState::Done);
        let report = CleanReport {
            metadata: clean_metadata(&bucket, started, options, Some(run_dir.clone())),
            final_state: self.state,
            targets: target_count,
            deleted,
            cancelled_uploads,
            errors,
        };
        write_json_log(&run_dir, Operation::Clean, &report)?;

        log::info!(
            "Clean summary: {}/{} object(s) deleted, {} unfinished upload(s) cancelled, {} error(s)",
            report.deleted,
            report.targets,
            report.cancelled_uploads,
            report.errors.len()
        );
        Ok(report)
    }

    /// Lists the bucket once and fixes the set of keys to delete.
    async fn plan(&self, bucket: &str) -> Result<CleanPlan, CleanError> {
        let objects = self
            .tool
            .list_objects(bucket, "", self.config.list_timeout())
            .await
            .map_err(|source| CleanError::Listing {
                bucket: bucket.to_string(),
                source,
            })?;

        let targets: BTreeSet<String> = objects
            .into_iter()
            .filter(|o| !matches!(o.action, RemoteAction::Folder | RemoteAction::Start))
            .map(|o| o.key)
            .collect();

        Ok(CleanPlan::new(bucket.to_string(), targets))
    }

    async fn execute(&self, plan: &CleanPlan, errors: &mut Vec<ItemError>) -> usize {
        debug_assert!(plan.is_confirmed());
        let mut deleted = 0;
        self.progress.set_total(plan.targets().len() as u64);

        for key in plan.targets() {
            match self.tool.delete_object(plan.bucket_name(), key).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    log::error!("Failed to delete {key}: {e}");
                    errors.push(ItemError::new(
                        key.clone(),
                        ItemErrorKind::PartialDeletion,
                        e.to_string(),
                    ));
                }
            }
            self.progress.inc(1);
        }

        self.progress
            .finish(format!("{deleted}/{} object(s) deleted", plan.targets().len()));
        deleted
    }

    /// Cancels unfinished uploads that started before this operation.
    async fn cleanup_partials(
        &self,
        bucket: &str,
        started_millis: i64,
        errors: &mut Vec<ItemError>,
    ) -> usize {
        let uploads = match self.tool.list_unfinished_uploads(bucket).await {
            Ok(uploads) => uploads,
            Err(e) => {
                log::error!("Failed to list unfinished uploads: {e}");
                errors.push(ItemError::new(
                    bucket,
                    ItemErrorKind::PartialUploadCleanup,
                    e.to_string(),
                ));
                return 0;
            }
        };

        let mut cancelled = 0;
        for upload in uploads
            .iter()
            .filter(|u| u.upload_timestamp < started_millis)
        {
            match self.tool.cancel_unfinished_upload(upload).await {
                Ok(()) => cancelled += 1,
                Err(e) => {
                    log::error!("Failed to cancel unfinished upload {}: {e}", upload.file_name);
                    errors.push(ItemError::new(
                        upload.file_name.clone(),
                        ItemErrorKind::PartialUploadCleanup,
                        e.to_string(),
                    ));
                }
            }
        }

        if cancelled > 0 {
            log::info!("Cancelled {cancelled} unfinished upload(s)");
        }
        cancelled
    }
}

fn clean_metadata(
    bucket: &str,
    started: Instant,
    options: CleanOptions,
    output_dir: Option<PathBuf>,
) -> RunMetadata {
    RunMetadata {
        timestamp: Local::now().to_rfc3339(),
        operation: Operation::Clean,
        bucket_name: bucket.to_string(),
        execution_time_seconds: started.elapsed().as_secs_f64(),
        dry_run: options.dry_run,
        output_dir,
    }
}
