//! Remote-listing resolver: bucket listing in, [`SyncItem`]s out.
//!
//! The resolver and the local fallback both build items through
//! [`item_from_key`] and URLs through [`UrlTemplate::render`], so a key
//! produces the same relative path and URL whichever side supplied it.

use std::sync::LazyLock;
use std::time::Duration;

use b2_mirror_b2::{StorageTool, ToolError};
use b2_mirror_config::MirrorConfig;
use b2_mirror_models::{
    ItemError, ItemErrorKind, REMOTE_SEPARATOR, RemoteAction, RemoteObject, SyncItem,
};

use url::Url;

use crate::mirror::{MirrorError, normalize_segments};

static PATH_BASE: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://localhost/").expect("valid base URL"));

/// The remote listing could not be obtained.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The listing call failed or timed out.
    #[error("Failed to list b2://{bucket}/{prefix}: {source}")]
    Listing {
        /// Bucket being listed.
        bucket: String,
        /// Prefix being listed.
        prefix: String,
        /// Underlying tool error.
        source: ToolError,
    },
}

/// Items resolved from one listing plus the keys that were refused.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Items to mirror, in key order.
    pub items: Vec<SyncItem>,
    /// Keys rejected while building items (traversal, empty paths).
    pub rejected: Vec<ItemError>,
}

/// Builds link URLs from the configured template.
///
/// Supported placeholders are `{download_url}`, `{bucket}` and `{key}`. The
/// key is percent-encoded one segment at a time so `/` stays a separator.
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    template: String,
    download_url: String,
    bucket: String,
}

impl UrlTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(
        template: impl Into<String>,
        download_url: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            download_url: download_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        }
    }

    /// Template described by `config`.
    #[must_use]
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(
            config.b2.url_template.clone(),
            config.download_url(),
            config.b2.bucket_name.clone(),
        )
    }

    /// Renders the URL for a full remote key.
    #[must_use]
    pub fn render(&self, key: &str) -> String {
        self.template
            .replace("{download_url}", &self.download_url)
            .replace("{bucket}", &encode_path(&self.bucket))
            .replace("{key}", &encode_path(key))
    }
}

/// Percent-encodes each `/`-separated segment of `path` with the URL path
/// segment rules (spaces, `%`, `?`, `#` and non-ASCII are escaped).
fn encode_path(path: &str) -> String {
    let mut url = PATH_BASE.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(path.split(REMOTE_SEPARATOR));
    }
    url.path().trim_start_matches('/').to_string()
}

/// Joins a key prefix and a `/`-separated relative path into a key.
///
/// A non-empty prefix without a trailing `/` still names a directory.
#[must_use]
pub fn join_key(prefix: &str, relative: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(REMOTE_SEPARATOR) {
        format!("{prefix}{relative}")
    } else {
        format!("{prefix}{REMOTE_SEPARATOR}{relative}")
    }
}

/// Splits a key into a normalized relative path below `prefix`.
///
/// A key that does not start with `prefix` is taken as-is. Keys with `.`
/// or `..` segments are rejected outright: download URLs cannot carry
/// them, so the link would point at a different object.
///
/// # Errors
///
/// Returns [`MirrorError::PathTraversal`] or [`MirrorError::Empty`].
pub fn split_key(prefix: &str, key: &str) -> Result<Vec<String>, MirrorError> {
    let relative = key.strip_prefix(prefix).map_or(key, |rest| {
        rest.strip_prefix(REMOTE_SEPARATOR).unwrap_or(rest)
    });
    let segments: Vec<&str> = relative.split(REMOTE_SEPARATOR).collect();
    if segments.iter().any(|s| matches!(*s, "." | "..")) {
        return Err(MirrorError::PathTraversal {
            path: key.to_string(),
        });
    }
    normalize_segments(&segments)
}

/// Builds the [`SyncItem`] for one key.
///
/// # Errors
///
/// Returns [`MirrorError`] if the key cannot be mapped to a safe relative
/// path.
pub fn item_from_key(
    prefix: &str,
    key: &str,
    url: Option<String>,
) -> Result<SyncItem, MirrorError> {
    let relative_path = split_key(prefix, key)?;
    Ok(SyncItem::new(key.to_string(), relative_path, url))
}

/// Whether a listing entry is a directory marker (or otherwise not a
/// stored file).
///
/// Markers are keys ending in `/`, zero-length entries whose last segment
/// has no extension, and anything that isn't a plain upload.
#[must_use]
pub fn is_directory_marker(object: &RemoteObject) -> bool {
    if object.action != RemoteAction::Upload || object.key.ends_with(REMOTE_SEPARATOR) {
        return true;
    }
    let name = object
        .key
        .rsplit(REMOTE_SEPARATOR)
        .next()
        .unwrap_or(&object.key);
    object.size == 0 && !has_extension(name)
}

fn has_extension(name: &str) -> bool {
    name.rfind('.').is_some_and(|dot| dot > 0 && dot + 1 < name.len())
}

/// Turns listing entries into items, dropping markers and rejecting keys
/// that would escape the output root.
#[must_use]
pub fn resolve_objects(
    mut objects: Vec<RemoteObject>,
    prefix: &str,
    urls: &UrlTemplate,
) -> Resolved {
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    objects.dedup_by(|a, b| a.key == b.key);

    let mut resolved = Resolved::default();
    for object in objects {
        if is_directory_marker(&object) {
            log::trace!("Skipping directory marker {}", object.key);
            continue;
        }

        let url = urls.render(&object.key);
        match item_from_key(prefix, &object.key, Some(url)) {
            Ok(item) => resolved.items.push(item),
            Err(e) => {
                log::error!("Refusing remote key {:?}: {e}", object.key);
                resolved
                    .rejected
                    .push(ItemError::new(object.key, kind_of(&e), e.to_string()));
            }
        }
    }
    resolved
}

/// Lists everything under `prefix` in one recursive call and resolves it.
///
/// # Errors
///
/// Returns [`ResolveError::Listing`] when the listing is unavailable; the
/// caller falls back to the local tree.
pub async fn resolve_remote<T: StorageTool + ?Sized>(
    tool: &T,
    bucket: &str,
    prefix: &str,
    timeout: Duration,
    urls: &UrlTemplate,
) -> Result<Resolved, ResolveError> {
    let objects = tool
        .list_objects(bucket, prefix, timeout)
        .await
        .map_err(|source| ResolveError::Listing {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            source,
        })?;

    let resolved = resolve_objects(objects, prefix, urls);
    log::info!(
        "Resolved {} remote file(s), {} rejected",
        resolved.items.len(),
        resolved.rejected.len()
    );
    Ok(resolved)
}

pub(crate) const fn kind_of(error: &MirrorError) -> ItemErrorKind {
    match error {
        MirrorError::PathTraversal { .. } | MirrorError::Empty { .. } => {
            ItemErrorKind::PathTraversal
        }
        MirrorError::Io { .. } => ItemErrorKind::Io,
    }
}
