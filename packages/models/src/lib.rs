#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the b2-mirror sync and link-mirroring engine.
//!
//! These records flow between the storage tool adapter, the sync core and
//! the CLI. Everything that ends up in a run report is [`Serialize`] so the
//! JSON log can be written straight from these types.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Separator used inside remote object keys.
pub const REMOTE_SEPARATOR: char = '/';

// ---------------------------------------------------------------------------
// Sync items
// ---------------------------------------------------------------------------

/// One remotely visible object, resolved to the path it represents relative
/// to the synced root.
///
/// `relative_path` never contains `..`, `.` or empty segments; items are
/// only produced through [`SyncItem::new`] by code that has already split
/// and checked the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncItem {
    remote_key: String,
    relative_path: Vec<String>,
    url: Option<String>,
}

impl SyncItem {
    /// Creates an item from an already-split relative path.
    #[must_use]
    pub const fn new(remote_key: String, relative_path: Vec<String>, url: Option<String>) -> Self {
        Self {
            remote_key,
            relative_path,
            url,
        }
    }

    /// Full remote key of the object.
    #[must_use]
    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    /// Path segments relative to the synced root.
    #[must_use]
    pub fn relative_path(&self) -> &[String] {
        &self.relative_path
    }

    /// Retrievable URL, when one could be built.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Overall outcome of one external sync invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// The tool finished and reported no errors.
    #[default]
    Success,
    /// The tool failed, timed out, or reported at least one error.
    Failure,
}

impl ExitStatus {
    /// Returns the `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured summary of the textual output of one sync invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Files uploaded (new or replaced).
    pub files_uploaded: u64,
    /// Files left alone because the remote copy was current.
    pub files_skipped: u64,
    /// Remote files deleted or hidden because they no longer exist locally.
    pub files_deleted: u64,
    /// Bytes reported as transferred.
    pub bytes_transferred: u64,
    /// Warning lines, in output order.
    pub warnings: Vec<String>,
    /// Error lines, in output order.
    pub errors: Vec<String>,
    /// Final outcome.
    pub exit_status: ExitStatus,
}

impl SyncStatistics {
    /// Records an error and marks the run as failed.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.exit_status = ExitStatus::Failure;
    }

    /// Records a warning. Warnings never change the exit status.
    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Whether the invocation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Success
    }
}

impl fmt::Display for SyncStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} skipped, {} deleted, {} bytes, {} warning(s), {} error(s) [{}]",
            self.files_uploaded,
            self.files_skipped,
            self.files_deleted,
            self.bytes_transferred,
            self.warnings.len(),
            self.errors.len(),
            self.exit_status,
        )
    }
}

// ---------------------------------------------------------------------------
// Link files
// ---------------------------------------------------------------------------

/// Where a link file goes and what it contains.
///
/// `destination_path` is always rooted under the current run's output
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFileSpec {
    /// Full path of the link file to write.
    pub destination_path: PathBuf,
    /// URL written as the file's content.
    pub content_url: String,
}

/// Which producer supplied the items a run's link files were written from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    /// Authoritative recursive listing of the bucket.
    RemoteListing,
    /// Keys derived from the local input tree after the listing failed.
    LocalFallback,
}

// ---------------------------------------------------------------------------
// Remote listing
// ---------------------------------------------------------------------------

/// Kind of a listing entry as reported by the storage tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAction {
    /// A stored file version.
    Upload,
    /// A virtual folder entry.
    Folder,
    /// A hide marker left behind by a deletion.
    Hide,
    /// An unfinished large-file (multi-part) upload.
    Start,
    /// Anything newer than this list.
    #[serde(other)]
    Other,
}

/// One entry from a recursive bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Full object key.
    pub key: String,
    /// Reported size in bytes.
    pub size: u64,
    /// Entry kind.
    pub action: RemoteAction,
    /// Tool-specific file identifier, when reported.
    pub file_id: Option<String>,
    /// Upload start time in milliseconds since the Unix epoch, when
    /// reported.
    pub upload_timestamp: Option<i64>,
}

impl RemoteObject {
    /// Convenience constructor for a plain stored file.
    #[must_use]
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            action: RemoteAction::Upload,
            file_id: None,
            upload_timestamp: None,
        }
    }
}

/// An incomplete multi-part upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnfinishedUpload {
    /// Identifier used to cancel the session.
    pub file_id: String,
    /// Key the upload was targeting.
    pub file_name: String,
    /// Session start time in milliseconds since the Unix epoch.
    pub upload_timestamp: i64,
}

// ---------------------------------------------------------------------------
// Clean
// ---------------------------------------------------------------------------

/// The set of keys a clean invocation intends to delete.
///
/// Targets are fixed at construction; confirming produces a new plan and
/// nothing can change the targets afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanPlan {
    bucket_name: String,
    confirmed: bool,
    targets: BTreeSet<String>,
}

impl CleanPlan {
    /// Creates an unconfirmed plan.
    #[must_use]
    pub const fn new(bucket_name: String, targets: BTreeSet<String>) -> Self {
        Self {
            bucket_name,
            confirmed: false,
            targets,
        }
    }

    /// Returns the same plan marked as confirmed.
    #[must_use]
    pub fn confirm(self) -> Self {
        Self {
            confirmed: true,
            ..self
        }
    }

    /// Bucket the plan applies to.
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Whether the operator (or `--force`) confirmed the plan.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Keys to delete.
    #[must_use]
    pub const fn targets(&self) -> &BTreeSet<String> {
        &self.targets
    }
}

/// States of the clean state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanState {
    /// Nothing done yet.
    Init,
    /// Checking that the bucket is reachable.
    VerifyAccess,
    /// Waiting for the operator.
    AwaitConfirmation,
    /// Deleting the confirmed targets.
    Execute,
    /// The operator declined; nothing was deleted.
    Aborted,
    /// Cancelling unfinished multi-part uploads.
    CleanupPartials,
    /// Finished.
    Done,
}

impl CleanState {
    /// Returns the `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::VerifyAccess => "verify_access",
            Self::AwaitConfirmation => "await_confirmation",
            Self::Execute => "execute",
            Self::Aborted => "aborted",
            Self::CleanupPartials => "cleanup_partials",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for CleanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Operation a run directory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `sync`
    Sync,
    /// `clean`
    Clean,
}

impl Operation {
    /// Returns the `snake_case` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Clean => "clean",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a per-item or per-operation failure in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// The external tool exited non-zero or timed out.
    InvocationFailure,
    /// The remote listing could not be obtained.
    ResolutionError,
    /// A relative path would escape the output root.
    PathTraversal,
    /// Two items mirror to the same link file.
    LinkCollision,
    /// A local filesystem operation failed.
    Io,
    /// A single object could not be deleted.
    PartialDeletion,
    /// An unfinished upload could not be listed or cancelled.
    PartialUploadCleanup,
}

/// A report entry with enough raw context to diagnose without re-running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    /// Key, path or operation name the failure applies to.
    pub item: String,
    /// Failure category.
    pub kind: ItemErrorKind,
    /// Original error text.
    pub message: String,
}

impl ItemError {
    /// Creates a report entry.
    #[must_use]
    pub fn new(item: impl Into<String>, kind: ItemErrorKind, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Metadata common to every run log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    /// RFC 3339 timestamp of when the report was assembled.
    pub timestamp: String,
    /// Operation that produced the run.
    pub operation: Operation,
    /// Bucket the run targeted.
    pub bucket_name: String,
    /// Wall-clock duration of the operation.
    pub execution_time_seconds: f64,
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Run directory the report lives in; `None` when the operation ended
    /// before creating one.
    pub output_dir: Option<PathBuf>,
}

/// Final report of a sync run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Run metadata.
    pub metadata: RunMetadata,
    /// Parsed tool output.
    pub statistics: SyncStatistics,
    /// Number of link files written.
    pub link_files_written: usize,
    /// Link files written, relative to the run directory.
    pub link_files: Vec<String>,
    /// Producer the link files came from, if link generation ran.
    pub link_source: Option<LinkSource>,
    /// Per-item and per-operation failures.
    pub errors: Vec<ItemError>,
    /// Raw tool output, kept verbatim whenever the invocation failed.
    pub raw_output: Option<String>,
}

impl SyncReport {
    /// Whether the sync phase succeeded and every item was mirrored.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.statistics.is_success() && self.errors.is_empty()
    }
}

/// Final report of a clean run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanReport {
    /// Run metadata.
    pub metadata: RunMetadata,
    /// State the machine stopped in.
    pub final_state: CleanState,
    /// Number of keys in the plan.
    pub targets: usize,
    /// Number of keys actually deleted.
    pub deleted: usize,
    /// Number of unfinished uploads cancelled.
    pub cancelled_uploads: usize,
    /// Per-object deletion and partial-upload failures.
    pub errors: Vec<ItemError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_statistics_default_to_success() {
        let stats = SyncStatistics::default();
        assert_eq!(stats.files_uploaded, 0);
        assert_eq!(stats.bytes_transferred, 0);
        assert!(stats.warnings.is_empty());
        assert!(stats.is_success());
    }

    #[test]
    fn recording_an_error_fails_the_run() {
        let mut stats = SyncStatistics::default();
        stats.record_warning("slow");
        assert!(stats.is_success());
        stats.record_error("boom");
        assert_eq!(stats.exit_status, ExitStatus::Failure);
        assert_eq!(stats.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn confirming_keeps_targets() {
        let targets: BTreeSet<String> = ["a.jpg".to_string(), "b/c.jpg".to_string()].into();
        let plan = CleanPlan::new("bucket".to_string(), targets.clone());
        assert!(!plan.is_confirmed());
        let plan = plan.confirm();
        assert!(plan.is_confirmed());
        assert_eq!(plan.targets(), &targets);
        assert_eq!(plan.bucket_name(), "bucket");
    }

    #[test]
    fn unknown_remote_action_deserializes_as_other() {
        let action: RemoteAction = serde_json::from_str("\"copy\"").unwrap();
        assert_eq!(action, RemoteAction::Other);
        let action: RemoteAction = serde_json::from_str("\"start\"").unwrap();
        assert_eq!(action, RemoteAction::Start);
    }

    #[test]
    fn report_errors_serialize_snake_case() {
        let err = ItemError::new("../x", ItemErrorKind::PathTraversal, "escapes");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "path_traversal");
        assert_eq!(json["item"], "../x");
    }
}
