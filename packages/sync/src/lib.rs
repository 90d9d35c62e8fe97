#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Sync-report and link-mirroring engine for b2-mirror.
//!
//! [`SyncOrchestrator`] runs the external sync, parses its output into
//! [`SyncStatistics`](b2_mirror_models::SyncStatistics), resolves the
//! objects now in the bucket and writes one link file per object into a
//! fresh timestamped run directory that mirrors the input tree.
//! [`CleanOrchestrator`] deletes a bucket's contents behind an explicit
//! confirmation and cancels abandoned multi-part uploads.
//!
//! Both take a [`StorageTool`](b2_mirror_b2::StorageTool) and an
//! immutable [`MirrorConfig`](b2_mirror_config::MirrorConfig); nothing in
//! here reads the environment.

pub mod clean;
pub mod fallback;
pub mod links;
pub mod mirror;
pub mod parser;
pub mod progress;
pub mod report;
pub mod resolver;
pub mod run_dir;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use clean::{CleanError, CleanOptions, CleanOrchestrator, Confirmer};
pub use mirror::{Mirror, MirrorError};
pub use parser::parse_sync_output;
pub use progress::{NullProgress, ProgressCallback};
pub use resolver::{ResolveError, UrlTemplate};
pub use sync::{SyncError, SyncOptions, SyncOrchestrator};
