//! In-memory [`StorageTool`] for orchestrator tests.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use b2_mirror_b2::{StorageTool, SyncRequest, ToolError, ToolOutput};
use b2_mirror_config::MirrorConfig;
use b2_mirror_models::{RemoteObject, UnfinishedUpload};

/// Scripted tool that records every call as `"<method> <args>"`.
#[derive(Default)]
pub struct FakeTool {
    pub sync_output: ToolOutput,
    pub sync_spawn_fails: bool,
    pub objects: Vec<RemoteObject>,
    pub listing_fails: bool,
    pub access_denied: bool,
    pub undeletable: BTreeSet<String>,
    pub unfinished: Vec<UnfinishedUpload>,
    pub unfinished_fails: bool,
    pub calls: Mutex<Vec<String>>,
    pub sync_requests: Mutex<Vec<SyncRequest>>,
}

impl FakeTool {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .count()
    }

    pub fn last_sync_request(&self) -> Option<SyncRequest> {
        self.sync_requests.lock().unwrap().last().cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn failed(command: &str, stderr: &str) -> ToolError {
    ToolError::Failed {
        command: command.to_string(),
        exit_code: Some(1),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl StorageTool for FakeTool {
    async fn sync(
        &self,
        request: &SyncRequest,
        _timeout: Duration,
    ) -> Result<ToolOutput, ToolError> {
        self.record(format!("sync {}", request.bucket));
        self.sync_requests.lock().unwrap().push(request.clone());
        if self.sync_spawn_fails {
            return Err(ToolError::Spawn {
                program: "b2".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }
        Ok(self.sync_output.clone())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        _timeout: Duration,
    ) -> Result<Vec<RemoteObject>, ToolError> {
        self.record(format!("list_objects {bucket} {prefix}"));
        if self.listing_fails {
            return Err(failed("b2 ls", "connection reset"));
        }
        Ok(self
            .objects
            .iter()
            .filter(|o| o.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn verify_access(&self, bucket: &str) -> Result<(), ToolError> {
        self.record(format!("verify_access {bucket}"));
        if self.access_denied {
            return Err(failed("b2 ls", "unauthorized"));
        }
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ToolError> {
        self.record(format!("delete_object {bucket} {key}"));
        if self.undeletable.contains(key) {
            return Err(failed("b2 rm", "access denied"));
        }
        Ok(())
    }

    async fn list_unfinished_uploads(
        &self,
        bucket: &str,
    ) -> Result<Vec<UnfinishedUpload>, ToolError> {
        self.record(format!("list_unfinished_uploads {bucket}"));
        if self.unfinished_fails {
            return Err(failed("b2 ls", "service unavailable"));
        }
        Ok(self.unfinished.clone())
    }

    async fn cancel_unfinished_upload(&self, upload: &UnfinishedUpload) -> Result<(), ToolError> {
        self.record(format!("cancel_unfinished_upload {}", upload.file_id));
        Ok(())
    }

    async fn download_base_url(&self) -> Result<String, ToolError> {
        self.record("download_base_url".to_string());
        Ok("https://f003.backblazeb2.com".to_string())
    }
}

/// Config rooted in a fresh scratch directory under the system temp dir.
///
/// Neither the input nor the output directory exists yet; both live under
/// one parent so a test can remove everything at once.
pub fn scratch_config(name: &str) -> MirrorConfig {
    let root: PathBuf = std::env::temp_dir().join(format!("b2_mirror_sync_test_{name}"));
    let _ = std::fs::remove_dir_all(&root);

    let mut config =
        MirrorConfig::default().with_download_url("https://f003.backblazeb2.com".to_string());
    config.b2.bucket_name = "photos".to_string();
    config.paths.input_dir = root.join("input");
    config.paths.output_dir = root.join("output");
    config
}
