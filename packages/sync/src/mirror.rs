//! Path mirroring: relative path in, link-file location under the run's
//! output root out.
//!
//! Every relative path is normalized lexically before anything touches the
//! filesystem. A path that would climb above the output root, or that
//! carries an absolute or drive-prefixed segment, is rejected with
//! [`MirrorError::PathTraversal`] and nothing is created for it.

use std::path::{Component, Path, PathBuf};

/// Errors that can occur while mapping a relative path into the output
/// tree.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The path would escape the output root.
    #[error("Path {path:?} escapes the output root")]
    PathTraversal {
        /// Offending relative path, as given.
        path: String,
    },

    /// Nothing is left of the path after normalization.
    #[error("Path {path:?} has no file name")]
    Empty {
        /// Offending relative path, as given.
        path: String,
    },

    /// Creating the destination's parent directories failed.
    #[error("Failed to create {}: {source}", path.display())]
    Io {
        /// Directory being created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Normalizes relative path segments.
///
/// `.` and empty segments are dropped and `..` pops the previous segment.
/// Segments are also split on the platform's own separators so a key like
/// `a\..\..\x` cannot sneak past on Windows.
///
/// # Errors
///
/// Returns [`MirrorError::PathTraversal`] if a `..` would climb above the
/// root or a segment is absolute, and [`MirrorError::Empty`] if nothing is
/// left.
pub fn normalize_segments<S: AsRef<str>>(segments: &[S]) -> Result<Vec<String>, MirrorError> {
    let original = || {
        segments
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("/")
    };

    let mut normalized: Vec<String> = Vec::with_capacity(segments.len());
    for segment in segments {
        for component in Path::new(segment.as_ref()).components() {
            match component {
                Component::Normal(part) => {
                    normalized.push(part.to_string_lossy().into_owned());
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if normalized.pop().is_none() {
                        return Err(MirrorError::PathTraversal { path: original() });
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(MirrorError::PathTraversal { path: original() });
                }
            }
        }
    }

    if normalized.is_empty() {
        return Err(MirrorError::Empty { path: original() });
    }
    Ok(normalized)
}

/// Maps relative paths into one run's output root.
#[derive(Debug, Clone)]
pub struct Mirror {
    root: PathBuf,
    extension: String,
}

impl Mirror {
    /// Creates a mirror rooted at `root` writing `.{extension}` link files.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// Output root of the run.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Computes the link-file path for `relative_path` without touching
    /// the filesystem.
    ///
    /// `folder1/subfolder/image.jpg` becomes
    /// `{root}/folder1/subfolder/image.txt`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::PathTraversal`] or [`MirrorError::Empty`].
    pub fn destination_for<S: AsRef<str>>(
        &self,
        relative_path: &[S],
    ) -> Result<PathBuf, MirrorError> {
        let segments = normalize_segments(relative_path)?;
        let mut path = self.root.clone();
        path.extend(&segments);
        path.set_extension(&self.extension);
        debug_assert!(path.starts_with(&self.root));
        Ok(path)
    }

    /// Computes the link-file path and creates its parent directories.
    ///
    /// Creating a directory that already exists is not an error. Nothing
    /// is created when the path is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError`] on rejection or when the directories cannot
    /// be created.
    pub fn derive_destination<S: AsRef<str>>(
        &self,
        relative_path: &[S],
    ) -> Result<PathBuf, MirrorError> {
        let path = self.destination_for(relative_path)?;
        if let Some(parent) = path.parent()
            && parent != self.root
        {
            std::fs::create_dir_all(parent).map_err(|source| MirrorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
            log::debug!("Ensured subdirectory: {}", parent.display());
        }
        Ok(path)
    }
}
