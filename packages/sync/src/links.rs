//! Link-file generator.
//!
//! A link file holds exactly one URL and nothing else (no trailing
//! newline). Writes go to a sibling temp file that is renamed over the
//! target, so a link file is either absent or complete.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use b2_mirror_models::{ItemError, ItemErrorKind, LinkFileSpec, SyncItem};

use crate::mirror::Mirror;
use crate::progress::{ProgressCallback, null_progress};
use crate::resolver::kind_of;

/// Writes one link file, replacing any existing file at the destination.
///
/// Writing the same spec twice leaves identical content.
///
/// # Errors
///
/// Returns the I/O error if the temp file cannot be written or renamed.
pub fn write_link(spec: &LinkFileSpec) -> std::io::Result<()> {
    let tmp = temp_path(&spec.destination_path);
    std::fs::write(&tmp, spec.content_url.as_bytes())?;
    if let Err(e) = std::fs::rename(&tmp, &spec.destination_path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn temp_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".partial");
    destination.with_file_name(name)
}

/// Result of writing a batch of link files.
#[derive(Debug, Default)]
pub struct LinkOutcome {
    /// Written link files, relative to the mirror root, `/`-joined.
    pub written: Vec<String>,
    /// Items that could not be written.
    pub errors: Vec<ItemError>,
}

/// Writes link files for resolved items under one mirror root.
///
/// Items from the remote listing and from the local fallback go through
/// the same generator.
pub struct LinkGenerator<'a> {
    mirror: &'a Mirror,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a> LinkGenerator<'a> {
    /// Creates a generator writing under `mirror`.
    #[must_use]
    pub fn new(mirror: &'a Mirror) -> Self {
        Self {
            mirror,
            progress: null_progress(),
        }
    }

    /// Reports per-item progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Writes every item, isolating per-item failures.
    ///
    /// When two items mirror to the same link file (`a.jpg` and `a.png`),
    /// the first one wins and the later one is recorded as a collision.
    #[must_use]
    pub fn write_all(&self, items: &[SyncItem]) -> LinkOutcome {
        let mut outcome = LinkOutcome::default();
        let mut claimed: BTreeMap<PathBuf, &str> = BTreeMap::new();

        self.progress.set_total(items.len() as u64);

        for item in items {
            match self.write_item(item, &mut claimed) {
                Ok(path) => {
                    log::debug!("Created link file: {}", path.display());
                    outcome.written.push(self.relative_display(&path));
                }
                Err(error) => {
                    log::error!("Error creating link file for {}: {}", error.item, error.message);
                    outcome.errors.push(error);
                }
            }
            self.progress.inc(1);
        }

        self.progress.finish(format!(
            "{} link file(s) written, {} failed",
            outcome.written.len(),
            outcome.errors.len()
        ));
        outcome
    }

    fn write_item<'i>(
        &self,
        item: &'i SyncItem,
        claimed: &mut BTreeMap<PathBuf, &'i str>,
    ) -> Result<PathBuf, ItemError> {
        let key = item.remote_key();
        let Some(url) = item.url() else {
            return Err(ItemError::new(
                key,
                ItemErrorKind::ResolutionError,
                "no URL could be built for this object",
            ));
        };

        let planned = self
            .mirror
            .destination_for(item.relative_path())
            .map_err(|e| ItemError::new(key, kind_of(&e), e.to_string()))?;

        if let Some(winner) = claimed.get(&planned) {
            return Err(ItemError::new(
                key,
                ItemErrorKind::LinkCollision,
                format!("{} is already the link file for {winner}", planned.display()),
            ));
        }

        let destination_path = self
            .mirror
            .derive_destination(item.relative_path())
            .map_err(|e| ItemError::new(key, kind_of(&e), e.to_string()))?;

        let spec = LinkFileSpec {
            destination_path,
            content_url: url.to_string(),
        };
        write_link(&spec).map_err(|e| {
            ItemError::new(
                key,
                ItemErrorKind::Io,
                format!("{}: {e}", spec.destination_path.display()),
            )
        })?;

        claimed.insert(planned, key);
        Ok(spec.destination_path)
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(self.mirror.root())
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
