//! Progress reporting seam for link writing and deletion batches.
//!
//! The core never renders anything itself; the CLI plugs in `indicatif`
//! bars and tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a batch operation.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of units in the batch.
    fn set_total(&self, total: u64);

    /// Advances by `delta` units.
    fn inc(&self, delta: u64);

    /// Marks the batch finished.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn finish(&self, _msg: String) {}
}

/// Shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
