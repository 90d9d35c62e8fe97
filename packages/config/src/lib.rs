#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration for b2-mirror.
//!
//! [`MirrorConfig`] is loaded once at startup from a TOML file (missing
//! sections and keys fall back to defaults), overlaid with environment
//! variables, validated, and then handed to the orchestrators by reference.
//! Nothing downstream reads the environment.
//!
//! # Environment Variables
//!
//! | Variable | Overrides |
//! |---|---|
//! | `B2_MIRROR_CONFIG` | Config file path |
//! | `B2_MIRROR_BUCKET` | `b2.bucket_name` |
//! | `B2_MIRROR_DOWNLOAD_URL` | `b2.download_url` |
//! | `B2_MIRROR_SYNC_TIMEOUT` | `b2.sync_timeout` (seconds) |
//! | `B2_MIRROR_B2_BIN` | `b2.binary` |
//! | `B2_MIRROR_INPUT_DIR` | `paths.input_dir` |
//! | `B2_MIRROR_OUTPUT_DIR` | `paths.output_dir` |
//!
//! Credentials are not part of this configuration; the `b2` tool reads
//! `B2_APPLICATION_KEY_ID` / `B2_APPLICATION_KEY` on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Config file used when neither `--config` nor `B2_MIRROR_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "USER-FILES/01.CONFIG/b2_sync_config.toml";

/// Download host used when none is configured or discoverable.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://f003.backblazeb2.com";

/// Default URL template for link files.
pub const DEFAULT_URL_TEMPLATE: &str = "{download_url}/file/{bucket}/{key}";

/// Default sync timeout (30 minutes).
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 1800;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// Serializing the default config failed.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Writing the config file failed.
    #[error("Failed to write config file {}: {source}", path.display())]
    Write {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// `init-config` would overwrite an existing file.
    #[error("Config file {} already exists", path.display())]
    AlreadyExists {
        /// Config file path.
        path: PathBuf,
    },

    /// An environment override has an unusable value.
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// A value failed validation.
    #[error("Invalid config value {field}: {message}")]
    Invalid {
        /// Dotted TOML key.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

// ── File schema ──────────────────────────────────────────────────────────

/// Storage settings (`[b2]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct B2Settings {
    /// Bucket to sync into.
    pub bucket_name: String,
    /// Key prefix inside the bucket the input tree is synced under.
    pub key_prefix: String,
    /// Download host (e.g. `https://f003.backblazeb2.com`). When unset the
    /// CLI asks the tool for the account's download URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Link URL template with `{download_url}`, `{bucket}` and `{key}`
    /// placeholders.
    pub url_template: String,
    /// Upload threads passed to the sync tool.
    pub sync_threads: u32,
    /// Sync timeout in seconds.
    pub sync_timeout: u64,
    /// Listing timeout in seconds.
    pub list_timeout: u64,
    /// Name or path of the `b2` executable.
    pub binary: String,
}

impl Default for B2Settings {
    fn default() -> Self {
        Self {
            bucket_name: "fal-bucket".to_string(),
            key_prefix: String::new(),
            download_url: None,
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            // More threads trip over upload token limits on B2.
            sync_threads: 4,
            sync_timeout: DEFAULT_SYNC_TIMEOUT_SECS,
            list_timeout: 300,
            binary: "b2".to_string(),
        }
    }
}

/// Input processing settings (`[processing]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Regexes (matched against the relative key) excluded from the sync.
    pub exclude_patterns: Vec<String>,
    /// Extension given to link files.
    pub link_extension: String,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![r".*\.DS_Store".to_string(), r".*Thumbs\.db".to_string()],
            link_extension: "txt".to_string(),
        }
    }
}

/// Directory settings (`[paths]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Local tree to sync.
    pub input_dir: PathBuf,
    /// Parent of the per-run output directories.
    pub output_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("USER-FILES/04.INPUT"),
            output_dir: PathBuf::from("USER-FILES/05.OUTPUT"),
        }
    }
}

/// Complete, validated configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// `[b2]`
    pub b2: B2Settings,
    /// `[processing]`
    pub processing: ProcessingSettings,
    /// `[paths]`
    pub paths: PathSettings,
}

impl MirrorConfig {
    /// Loads the config file at `path` (or the default path), applies
    /// environment overrides and validates the result.
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable or malformed, an
    /// override is unusable, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_path(path, |name| std::env::var(name).ok());
        let mut config = Self::from_file(&path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file, returning defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the text does not match the schema.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a non-numeric timeout.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(bucket) = lookup("B2_MIRROR_BUCKET") {
            self.b2.bucket_name = bucket;
        }
        if let Some(url) = lookup("B2_MIRROR_DOWNLOAD_URL") {
            self.b2.download_url = Some(url);
        }
        if let Some(value) = lookup("B2_MIRROR_SYNC_TIMEOUT") {
            self.b2.sync_timeout = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "B2_MIRROR_SYNC_TIMEOUT".to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(binary) = lookup("B2_MIRROR_B2_BIN") {
            self.b2.binary = binary;
        }
        if let Some(dir) = lookup("B2_MIRROR_INPUT_DIR") {
            self.paths.input_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("B2_MIRROR_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Checks every value the orchestrators rely on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.b2.bucket_name.trim().is_empty() {
            return Err(invalid("b2.bucket_name", "must not be empty"));
        }
        if self.b2.sync_timeout == 0 {
            return Err(invalid("b2.sync_timeout", "must be greater than zero"));
        }
        if self.b2.list_timeout == 0 {
            return Err(invalid("b2.list_timeout", "must be greater than zero"));
        }
        if self.b2.sync_threads == 0 {
            return Err(invalid("b2.sync_threads", "must be greater than zero"));
        }
        if !self.b2.url_template.contains("{key}") {
            return Err(invalid("b2.url_template", "must contain {key}"));
        }
        if self.b2.key_prefix.starts_with('/') {
            return Err(invalid("b2.key_prefix", "must not start with '/'"));
        }

        let ext = &self.processing.link_extension;
        if ext.is_empty() || ext.contains(['/', '\\', '.']) {
            return Err(invalid(
                "processing.link_extension",
                "must be a bare extension such as \"txt\"",
            ));
        }

        for pattern in &self.processing.exclude_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(invalid(
                    "processing.exclude_patterns",
                    format!("{pattern}: {e}"),
                ));
            }
        }

        Ok(())
    }

    /// Returns this config with the download host filled in.
    #[must_use]
    pub fn with_download_url(mut self, url: String) -> Self {
        self.b2.download_url = Some(url);
        self
    }

    /// Key prefix as the sync tool stores it: empty, or ending in exactly
    /// one `/` (`"gallery"` becomes `"gallery/"`).
    #[must_use]
    pub fn key_prefix(&self) -> String {
        let prefix = self.b2.key_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        }
    }

    /// Download host, falling back to [`DEFAULT_DOWNLOAD_URL`].
    #[must_use]
    pub fn download_url(&self) -> &str {
        self.b2
            .download_url
            .as_deref()
            .unwrap_or(DEFAULT_DOWNLOAD_URL)
    }

    /// Sync timeout as a [`Duration`].
    #[must_use]
    pub const fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.b2.sync_timeout)
    }

    /// Listing timeout as a [`Duration`].
    #[must_use]
    pub const fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.b2.list_timeout)
    }

    /// Writes the default configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyExists`] rather than overwriting, or a
    /// write/serialize error.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let text = toml::to_string_pretty(&Self::default())?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, text).map_err(write_err)?;

        log::info!("Wrote default config to {}", path.display());
        Ok(())
    }
}

/// Picks the config path: explicit argument, then `B2_MIRROR_CONFIG`, then
/// [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn resolve_path(explicit: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    explicit.map_or_else(
        || {
            lookup("B2_MIRROR_CONFIG")
                .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
        },
        Path::to_path_buf,
    )
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn key_prefix_always_ends_with_one_separator() {
        let mut config = MirrorConfig::default();
        assert_eq!(config.key_prefix(), "");
        config.b2.key_prefix = "gallery".to_string();
        assert_eq!(config.key_prefix(), "gallery/");
        config.b2.key_prefix = "gallery/2024//".to_string();
        assert_eq!(config.key_prefix(), "gallery/2024/");
    }

    #[test]
    fn defaults_are_valid() {
        let config = MirrorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sync_timeout(), Duration::from_secs(1800));
        assert_eq!(config.download_url(), DEFAULT_DOWNLOAD_URL);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let config = MirrorConfig::from_toml(
            r#"
            [b2]
            bucket_name = "photos"

            [processing]
            exclude_patterns = ['.*\.tmp']
            "#,
        )
        .unwrap();

        assert_eq!(config.b2.bucket_name, "photos");
        assert_eq!(config.b2.sync_threads, 4);
        assert_eq!(config.processing.exclude_patterns, vec![r".*\.tmp"]);
        assert_eq!(config.processing.link_extension, "txt");
        assert_eq!(config.paths, PathSettings::default());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = MirrorConfig::default();
        config
            .apply_env(env(&[
                ("B2_MIRROR_BUCKET", "other"),
                ("B2_MIRROR_SYNC_TIMEOUT", "60"),
                ("B2_MIRROR_OUTPUT_DIR", "/tmp/out"),
            ]))
            .unwrap();

        assert_eq!(config.b2.bucket_name, "other");
        assert_eq!(config.sync_timeout(), Duration::from_secs(60));
        assert_eq!(config.paths.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn rejects_non_numeric_timeout_override() {
        let mut config = MirrorConfig::default();
        let err = config
            .apply_env(env(&[("B2_MIRROR_SYNC_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn rejects_bad_exclude_pattern() {
        let mut config = MirrorConfig::default();
        config.processing.exclude_patterns.push("(unclosed".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "processing.exclude_patterns",
                ..
            }
        ));
    }

    #[test]
    fn rejects_template_without_key() {
        let mut config = MirrorConfig::default();
        config.b2.url_template = "{download_url}/file/{bucket}".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_dotted_link_extension() {
        let mut config = MirrorConfig::default();
        config.processing.link_extension = ".txt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_path_wins_over_env() {
        let lookup = env(&[("B2_MIRROR_CONFIG", "/etc/b2.toml")]);
        assert_eq!(
            resolve_path(Some(Path::new("mine.toml")), &lookup),
            PathBuf::from("mine.toml")
        );
        assert_eq!(resolve_path(None, &lookup), PathBuf::from("/etc/b2.toml"));
        assert_eq!(
            resolve_path(None, env(&[])),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn write_default_round_trips_and_refuses_overwrite() {
        let dir = std::env::temp_dir().join("b2_mirror_config_test_write_default");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("config.toml");

        MirrorConfig::write_default(&path).unwrap();
        let loaded = MirrorConfig::from_file(&path).unwrap();
        assert_eq!(loaded, MirrorConfig::default());

        let err = MirrorConfig::write_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::AlreadyExists { .. }));
        assert_eq!(
            err.to_string(),
            format!("Config file {} already exists", path.display())
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_error_names_the_file() {
        let path = std::env::temp_dir().join("b2_mirror_config_test_malformed.toml");
        std::fs::write(&path, "[b2\nbucket_name = ").unwrap();
        let err = MirrorConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&path.display().to_string()));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("b2_mirror_config_test_missing.toml");
        let _ = std::fs::remove_file(&path);
        assert_eq!(
            MirrorConfig::from_file(&path).unwrap(),
            MirrorConfig::default()
        );
    }
}
