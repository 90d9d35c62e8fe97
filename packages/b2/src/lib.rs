#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storage tool seam for b2-mirror.
//!
//! The remote storage protocol is never spoken directly. Everything the
//! sync core needs from the remote side goes through the [`StorageTool`]
//! trait, and [`B2Cli`] implements it by driving the Backblaze `b2`
//! command-line tool as a child process.
//!
//! Every child runs under a bounded timeout. On expiry the child is killed
//! and reaped before returning, so no orphaned process outlives a call.

mod b2_cli;
pub mod command;
pub mod listing;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use b2_mirror_models::{RemoteObject, UnfinishedUpload};

pub use b2_cli::B2Cli;
pub use command::ToolOutput;

/// Errors that can occur while driving the storage tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool could not be started at all (usually not installed).
    #[error("Failed to start {program} (is it installed?): {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on or killing the child failed.
    #[error("I/O error while running {command}: {source}")]
    Io {
        /// Command line.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The tool ran but exited unsuccessfully.
    #[error("{command} exited with {}: {stderr}", describe_exit(.exit_code))]
    Failed {
        /// Command line.
        command: String,
        /// Exit code, if the child exited normally.
        exit_code: Option<i32>,
        /// Raw stderr (or stdout when stderr was empty).
        stderr: String,
    },

    /// The tool did not finish within its timeout and was killed.
    #[error("{command} timed out after {timeout:?}")]
    TimedOut {
        /// Command line.
        command: String,
        /// Timeout that expired.
        timeout: Duration,
    },

    /// The tool's output could not be parsed.
    #[error("Failed to parse output of {command}: {source}")]
    Parse {
        /// Command line.
        command: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("status {c}"))
}

/// Everything needed to invoke one sync of a local tree into a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Local directory to upload.
    pub source: PathBuf,
    /// Destination bucket.
    pub bucket: String,
    /// Key prefix inside the bucket (may be empty).
    pub prefix: String,
    /// Regexes excluded from the sync.
    pub exclude_patterns: Vec<String>,
    /// Upload threads.
    pub threads: u32,
    /// Preview only.
    pub dry_run: bool,
}

/// Operations consumed from the external sync/storage tool.
///
/// Implementations must be `Send + Sync` so orchestrators can hold them
/// behind shared references.
#[async_trait]
pub trait StorageTool: Send + Sync {
    /// Runs one sync, capturing output and exit status.
    ///
    /// A non-zero exit or a timeout is reported inside [`ToolOutput`], not
    /// as an error, so the caller always gets the raw output.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Spawn`] or [`ToolError::Io`] when the tool
    /// cannot be run at all.
    async fn sync(&self, request: &SyncRequest, timeout: Duration)
    -> Result<ToolOutput, ToolError>;

    /// Recursively lists every object under `prefix` in one call.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the listing cannot be completed.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<RemoteObject>, ToolError>;

    /// Checks that the bucket is reachable with the current credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when it is not.
    async fn verify_access(&self, bucket: &str) -> Result<(), ToolError>;

    /// Deletes every version of one object.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the deletion fails.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ToolError>;

    /// Enumerates incomplete multi-part upload sessions in the bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the enumeration fails.
    async fn list_unfinished_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<UnfinishedUpload>, ToolError>;

    /// Cancels one multi-part upload session.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the cancellation fails.
    async fn cancel_unfinished_upload(&self, upload: &UnfinishedUpload) -> Result<(), ToolError>;

    /// Returns the account's download host (e.g.
    /// `https://f003.backblazeb2.com`).
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the account info is unavailable.
    async fn download_base_url(&self) -> Result<String, ToolError>;
}
