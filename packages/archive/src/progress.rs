//! Export progress reporting.
//!
//! An [`ExportWorkflow`](crate::workflow::ExportWorkflow) announces each
//! phase by name as it starts. While the server-side batch job runs, it
//! forwards every percentage the job reports, always out of
//! [`BATCH_TOTAL`]. A query ends in exactly one of
//! [`ProgressCallback::completed`] or [`ProgressCallback::abandoned`].

use std::sync::Arc;

/// Scale of the batch job's progress reports.
pub const BATCH_TOTAL: u64 = 100;

/// Observer for one query's trip through the export workflow.
///
/// Shared as `Arc<dyn ProgressCallback>` between a client and every
/// workflow it starts, hence `Send + Sync`. Every method defaults to doing
/// nothing.
pub trait ProgressCallback: Send + Sync {
    /// A workflow phase has started, e.g. `"Submitting query"`.
    fn phase(&self, _name: &str) {}

    /// The batch job has started; percentages follow.
    fn batch_started(&self) {}

    /// The batch job reported `percent` (0 through [`BATCH_TOTAL`]) along
    /// with its own status line, which may be empty.
    fn batch_percent(&self, _percent: u8, _status: &str) {}

    /// The export has been downloaded.
    fn completed(&self) {}

    /// The query failed and no export will follow.
    fn abandoned(&self) {}
}

/// Reports nothing.
pub struct NullProgress;

impl ProgressCallback for NullProgress {}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
