//! Batch export progress polling.
//!
//! The archive exports through a Drupal-style batch job: the browser keeps
//! POSTing to the batch URL with `op=do` and gets back a small JSON status
//! until the reported percentage hits 100. [`poll_until_complete`] does the
//! same with a fixed interval, an optional attempt cap, an optional
//! deadline, and a [`CancellationToken`] the caller can trigger at any time.
//!
//! A malformed status body is a hard failure; only "not finished yet" leads
//! to another request.

use std::sync::Arc;
use std::time::Duration;

use gva_archive_models::ProgressStatus;
use reqwest::Url;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressCallback;
use crate::session::Session;
use crate::{ArchiveError, Phase};

/// Query parameter selecting the batch operation.
pub const BATCH_OP_PARAM: &str = "op";

/// Batch operation that advances the job and reports progress.
pub const BATCH_OP_RUN: &str = "do";

/// Batch operation that closes the job and redirects to the artifact.
pub const BATCH_OP_FINISHED: &str = "finished";

/// Default pause between progress requests.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Default cap on progress requests.
const DEFAULT_MAX_ATTEMPTS: u32 = 1200;

/// Default cap on total polling time.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);

/// How often and for how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between consecutive progress requests.
    pub interval: Duration,
    /// Give up after this many requests. `None` never gives up.
    pub max_attempts: Option<u32>,
    /// Give up after this much time. `None` never gives up.
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            deadline: Some(DEFAULT_DEADLINE),
        }
    }
}

impl PollConfig {
    /// Back-to-back requests with no limit, as a browser tab left open
    /// would do.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: None,
            deadline: None,
        }
    }

    /// Sets the pause between requests.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the attempt cap.
    #[must_use]
    pub const fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Returns `batch_url` with its `op` parameter replaced by `op`. All other
/// parameters are kept in order.
#[must_use]
pub fn with_batch_op(batch_url: &Url, op: &str) -> Url {
    let kept: Vec<(String, String)> = batch_url
        .query_pairs()
        .filter(|(k, _)| k != BATCH_OP_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = batch_url.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(BATCH_OP_PARAM, op);
    url
}

/// Polls the batch job behind `batch_url` until it reports 100%.
///
/// Returns the number of progress requests issued.
///
/// # Errors
///
/// * [`ArchiveError::Cancelled`] if `cancel` fires.
/// * [`ArchiveError::PollExhausted`] / [`ArchiveError::PollTimedOut`] when a
///   configured bound is hit.
/// * [`ArchiveError::Protocol`] for a non-success status or a job that
///   reports failure.
/// * [`ArchiveError::Json`] for a body that is not a progress status.
/// * [`ArchiveError::Network`] if a request fails.
pub async fn poll_until_complete(
    session: &Session,
    batch_url: &Url,
    config: PollConfig,
    progress: &Arc<dyn ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<u32, ArchiveError> {
    let run_url = with_batch_op(batch_url, BATCH_OP_RUN);
    let started = Instant::now();
    let deadline_at = config.deadline.map(|d| started + d);
    let mut attempts: u32 = 0;

    progress.batch_started();

    loop {
        if let Some(max) = config.max_attempts
            && attempts >= max
        {
            return Err(ArchiveError::PollExhausted { attempts });
        }
        attempts += 1;

        log::debug!("Requesting progress update (attempt {attempts})");
        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ArchiveError::Cancelled { phase: Phase::Poll }),
            () = sleep_until_deadline(deadline_at) => {
                return Err(ArchiveError::PollTimedOut { elapsed: started.elapsed() });
            }
            result = request_progress(session, &run_url, batch_url) => result?,
        };

        log::debug!(
            "Received update on progress: {}% ({})",
            status.percentage,
            status.message
        );
        progress.batch_percent(status.percentage, &status.message);

        if status.is_complete() {
            log::info!("Export batch complete after {attempts} progress request(s)");
            return Ok(attempts);
        }

        if !config.interval.is_zero() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ArchiveError::Cancelled { phase: Phase::Poll }),
                () = sleep_until_deadline(deadline_at) => {
                    return Err(ArchiveError::PollTimedOut { elapsed: started.elapsed() });
                }
                () = tokio::time::sleep(config.interval) => {}
            }
        }
    }
}

/// Completes at `deadline`, or never when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Issues one progress request and decodes the status.
async fn request_progress(
    session: &Session,
    run_url: &Url,
    referer: &Url,
) -> Result<ProgressStatus, ArchiveError> {
    let response = session.post_progress(run_url, referer).await?;
    let http_status = response.status();
    if !http_status.is_success() {
        return Err(ArchiveError::protocol(
            Phase::Poll,
            format!("progress request returned {http_status}"),
        ));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| ArchiveError::network(Phase::Poll, e))?;
    let status: ProgressStatus =
        serde_json::from_slice(&body).map_err(|source| ArchiveError::Json {
            phase: Phase::Poll,
            source,
        })?;

    if !status.status {
        return Err(ArchiveError::protocol(
            Phase::Poll,
            format!("export batch reported failure: {}", status.message),
        ));
    }

    Ok(status)
}
