//! [`StorageTool`] implementation backed by the Backblaze `b2` CLI.

use std::ffi::OsString;
use std::time::Duration;

use async_trait::async_trait;
use b2_mirror_models::{RemoteObject, UnfinishedUpload};

use crate::command::{ToolOutput, display_command, run_with_timeout};
use crate::listing::{parse_download_url, parse_listing, unfinished_uploads};
use crate::{StorageTool, SyncRequest, ToolError};

/// Drives the `b2` command-line tool.
///
/// The tool picks up credentials from `B2_APPLICATION_KEY_ID` /
/// `B2_APPLICATION_KEY` or its own account cache.
#[derive(Debug, Clone)]
pub struct B2Cli {
    binary: String,
    query_timeout: Duration,
}

impl B2Cli {
    /// Creates an adapter for the `b2` executable at `binary`.
    ///
    /// `query_timeout` bounds every call except `sync`, which takes its own
    /// timeout.
    #[must_use]
    pub fn new(binary: impl Into<String>, query_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            query_timeout,
        }
    }

    /// Arguments for one `b2 sync` invocation.
    ///
    /// Always mirrors (`--delete`) and lets local files replace newer
    /// remote ones (`--replace-newer`).
    #[must_use]
    pub fn sync_args(request: &SyncRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "sync".into(),
            "--threads".into(),
            request.threads.to_string().into(),
            "--replace-newer".into(),
            "--delete".into(),
        ];

        for pattern in &request.exclude_patterns {
            args.push("--exclude-regex".into());
            args.push(pattern.into());
        }

        if request.dry_run {
            args.push("--dry-run".into());
        }

        args.push(request.source.clone().into_os_string());
        args.push(bucket_uri(&request.bucket, &request.prefix).into());
        args
    }

    /// Arguments for a recursive JSON listing.
    #[must_use]
    pub fn list_args(bucket: &str, prefix: &str, versions: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["ls".into(), "--json".into(), "--recursive".into()];
        if versions {
            args.push("--versions".into());
        }
        args.push(bucket_uri(bucket, prefix).into());
        args
    }

    async fn run(&self, args: Vec<OsString>, timeout: Duration) -> Result<ToolOutput, ToolError> {
        run_with_timeout(&self.binary, &args, timeout).await
    }

    /// Runs a query command and turns timeouts and non-zero exits into
    /// errors.
    async fn query(&self, args: Vec<OsString>) -> Result<(String, ToolOutput), ToolError> {
        let command = display_command(&self.binary, &args);
        let output = self.run(args, self.query_timeout).await?;

        if output.timed_out {
            return Err(ToolError::TimedOut {
                command,
                timeout: self.query_timeout,
            });
        }
        if !output.success {
            return Err(ToolError::Failed {
                command,
                exit_code: output.exit_code,
                stderr: output.error_text(),
            });
        }

        Ok((command, output))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        versions: bool,
        timeout: Duration,
    ) -> Result<Vec<RemoteObject>, ToolError> {
        let args = Self::list_args(bucket, prefix, versions);
        let command = display_command(&self.binary, &args);
        log::info!("Listing b2://{bucket}/{prefix}*");

        let output = self.run(args, timeout).await?;
        if output.timed_out {
            return Err(ToolError::TimedOut { command, timeout });
        }
        if !output.success {
            return Err(ToolError::Failed {
                command,
                exit_code: output.exit_code,
                stderr: output.error_text(),
            });
        }

        let objects =
            parse_listing(&output.stdout).map_err(|source| ToolError::Parse { command, source })?;
        log::info!("  found {} entries", objects.len());
        Ok(objects)
    }
}

#[async_trait]
impl StorageTool for B2Cli {
    async fn sync(
        &self,
        request: &SyncRequest,
        timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        let args = Self::sync_args(request);
        log::info!(
            "Executing sync command: {}",
            display_command(&self.binary, &args)
        );
        self.run(args, timeout).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Vec<RemoteObject>, ToolError> {
        self.list(bucket, prefix, false, timeout).await
    }

    async fn verify_access(&self, bucket: &str) -> Result<(), ToolError> {
        self.query(vec!["ls".into(), bucket_uri(bucket, "").into()])
            .await?;
        log::info!("Bucket '{bucket}' is accessible");
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ToolError> {
        log::debug!("Deleting b2://{bucket}/{key}");
        self.query(vec![
            "rm".into(),
            "--versions".into(),
            bucket_uri(bucket, key).into(),
        ])
        .await?;
        Ok(())
    }

    async fn list_unfinished_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<UnfinishedUpload>, ToolError> {
        let objects = self.list(bucket, "", true, self.query_timeout).await?;
        Ok(unfinished_uploads(objects))
    }

    async fn cancel_unfinished_upload(&self, upload: &UnfinishedUpload) -> Result<(), ToolError> {
        log::debug!(
            "Cancelling unfinished upload {} ({})",
            upload.file_name,
            upload.file_id
        );
        self.query(vec![
            "file".into(),
            "large".into(),
            "unfinished".into(),
            "cancel".into(),
            format!("b2id://{}", upload.file_id).into(),
        ])
        .await?;
        Ok(())
    }

    async fn download_base_url(&self) -> Result<String, ToolError> {
        let (command, output) = self.query(vec!["account".into(), "get".into()]).await?;
        parse_download_url(&output.stdout).map_err(|source| ToolError::Parse { command, source })
    }
}

/// `b2://bucket/path` for a bucket and a key or prefix.
#[must_use]
fn bucket_uri(bucket: &str, path: &str) -> String {
    format!("b2://{bucket}/{path}")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn request() -> SyncRequest {
        SyncRequest {
            source: PathBuf::from("USER-FILES/04.INPUT"),
            bucket: "photos".to_string(),
            prefix: String::new(),
            exclude_patterns: vec![r".*\.DS_Store".to_string(), r".*Thumbs\.db".to_string()],
            threads: 4,
            dry_run: false,
        }
    }

    #[test]
    fn sync_args_include_exclusions_then_source_and_destination() {
        assert_eq!(
            strings(&B2Cli::sync_args(&request())),
            vec![
                "sync",
                "--threads",
                "4",
                "--replace-newer",
                "--delete",
                "--exclude-regex",
                r".*\.DS_Store",
                "--exclude-regex",
                r".*Thumbs\.db",
                "USER-FILES/04.INPUT",
                "b2://photos/",
            ]
        );
    }

    #[test]
    fn dry_run_and_prefix_are_passed_through() {
        let req = SyncRequest {
            prefix: "gallery/".to_string(),
            dry_run: true,
            exclude_patterns: Vec::new(),
            ..request()
        };
        let args = strings(&B2Cli::sync_args(&req));
        assert!(args.contains(&"--dry-run".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("b2://photos/gallery/"));
    }

    #[test]
    fn list_args_are_recursive_json() {
        assert_eq!(
            strings(&B2Cli::list_args("photos", "folder1/", false)),
            vec!["ls", "--json", "--recursive", "b2://photos/folder1/"]
        );
        assert!(strings(&B2Cli::list_args("photos", "", true)).contains(&"--versions".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_fails_verification() {
        let cli = B2Cli::new("b2-mirror-missing-binary", Duration::from_secs(5));
        let err = cli.verify_access("photos").await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failed_query() {
        // `false` ignores its arguments and exits 1.
        let cli = B2Cli::new("false", Duration::from_secs(5));
        let err = cli.delete_object("photos", "a.jpg").await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::Failed {
                exit_code: Some(1),
                ..
            }
        ));
    }
}
