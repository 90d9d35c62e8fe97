//! Local fallback: derives items from the input tree when the remote
//! listing is unavailable.
//!
//! Each file's key is rebuilt the way the sync tool names it (prefix plus
//! the `/`-joined relative path) and then goes through the same
//! [`item_from_key`] and [`UrlTemplate`] as remote listings.
//!
//! Names are used exactly as the filesystem returns them. A file stored
//! under a different Unicode normalization than the remote key (NFD on
//! macOS volumes against an NFC key) therefore produces a different URL.

use std::path::Path;

use b2_mirror_models::{ItemError, ItemErrorKind, REMOTE_SEPARATOR};
use regex::Regex;
use walkdir::WalkDir;

use crate::resolver::{Resolved, UrlTemplate, item_from_key, join_key, kind_of};

/// Compiles exclusion patterns anchored at the start of the relative key,
/// which is how the sync tool applies `--exclude-regex`.
///
/// # Errors
///
/// Returns the regex error for the first pattern that doesn't compile.
pub fn compile_exclusions(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|pattern| Regex::new(&format!("^(?:{pattern})")))
        .collect()
}

/// Walks `input_dir` and builds the items the sync would have uploaded.
///
/// Unreadable entries and non-UTF-8 names are recorded and skipped.
#[must_use]
pub fn enumerate_local(
    input_dir: &Path,
    prefix: &str,
    exclusions: &[Regex],
    urls: &UrlTemplate,
) -> Resolved {
    let mut resolved = Resolved::default();

    for entry in WalkDir::new(input_dir).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let item = e.path().unwrap_or(input_dir).display().to_string();
                log::warn!("Skipping unreadable entry {item}: {e}");
                resolved
                    .rejected
                    .push(ItemError::new(item, ItemErrorKind::Io, e.to_string()));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(relative) = relative_key(entry.path(), input_dir) else {
            let item = entry.path().display().to_string();
            log::warn!("Skipping non-UTF-8 path {item}");
            resolved.rejected.push(ItemError::new(
                item,
                ItemErrorKind::Io,
                "path is not valid UTF-8",
            ));
            continue;
        };

        if exclusions.iter().any(|re| re.is_match(&relative)) {
            log::debug!("Excluded {relative}");
            continue;
        }

        let key = join_key(prefix, &relative);
        match item_from_key(prefix, &key, Some(urls.render(&key))) {
            Ok(item) => resolved.items.push(item),
            Err(e) => resolved
                .rejected
                .push(ItemError::new(key, kind_of(&e), e.to_string())),
        }
    }

    resolved.items.sort_by(|a, b| a.remote_key().cmp(b.remote_key()));
    log::info!(
        "Derived {} item(s) from local tree {}",
        resolved.items.len(),
        input_dir.display()
    );
    resolved
}

/// `/`-joined path of `path` relative to `root`, or `None` for non-UTF-8
/// names.
fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join(&REMOTE_SEPARATOR.to_string()))
}
