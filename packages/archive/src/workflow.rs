//! The six-step export workflow.
//!
//! ```text
//! Idle -> Submitted -> ExportRequested -> BatchStarted -> Polling
//!      -> BatchFinished -> Downloaded
//! ```
//!
//! Any failure moves the workflow to [`WorkflowState::Failed`]. Steps run
//! strictly in order; calling one out of order is rejected without a
//! request. Only polling repeats, everything else fails on the first
//! unexpected response.

use std::sync::Arc;

use gva_archive_models::QueryId;
use reqwest::{Response, Url};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::options::QueryOptions;
use crate::poll::{BATCH_OP_FINISHED, PollConfig, poll_until_complete, with_batch_op};
use crate::progress::ProgressCallback;
use crate::session::{Session, redirect_location};
use crate::{ArchiveError, Phase};

/// Where a workflow stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum WorkflowState {
    /// Nothing sent yet.
    Idle,
    /// The search form was accepted.
    Submitted,
    /// The export was triggered and the batch URL is known.
    ExportRequested,
    /// The batch job was opened.
    BatchStarted,
    /// The batch job is being (or has been) polled.
    Polling,
    /// The batch job was closed and the artifact located.
    BatchFinished,
    /// The artifact download has started.
    Downloaded,
    /// A step failed; the workflow cannot continue.
    Failed,
}

/// Fixed endpoint paths below the configured root URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    root: Url,
}

impl Endpoints {
    /// Parses the root URL every endpoint hangs off.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] if `root` is not an absolute
    /// hierarchical URL.
    pub fn new(root: &str) -> Result<Self, ArchiveError> {
        let root = Url::parse(root)
            .map_err(|e| ArchiveError::config(format!("invalid root URL '{root}': {e}")))?;
        if root.cannot_be_a_base() {
            return Err(ArchiveError::config(format!(
                "root URL '{root}' cannot carry a path"
            )));
        }
        Ok(Self { root })
    }

    /// The configured root.
    #[must_use]
    pub const fn root(&self) -> &Url {
        &self.root
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `POST` target of the search form.
    #[must_use]
    pub fn query(&self) -> Url {
        self.join(&["query"])
    }

    /// Export trigger for one query.
    #[must_use]
    pub fn export_csv(&self, query_id: &QueryId) -> Url {
        self.join(&["query", query_id.as_str(), "export-csv"])
    }

    /// Map page for one query.
    #[must_use]
    pub fn map(&self, query_id: &QueryId) -> Url {
        self.join(&["query", query_id.as_str(), "map"])
    }

    /// Download endpoint, carrying the query string of the finished
    /// batch's redirect.
    #[must_use]
    pub fn download(&self, finished: &Url) -> Url {
        let mut url = self.join(&["export-finished", "download"]);
        url.set_query(finished.query());
        url
    }
}

/// The exported CSV, not yet read.
///
/// Dropping it releases the connection whether or not the body was read.
#[derive(Debug)]
pub struct ExportDownload {
    response: Response,
}

impl ExportDownload {
    /// Size announced by the server, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Reads the next chunk of the body. `None` marks the end.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Network`] if the transfer fails.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ArchiveError> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|c| c.to_vec()))
            .map_err(|e| ArchiveError::network(Phase::Download, e))
    }

    /// Reads the remaining body.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Network`] if the transfer fails.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, ArchiveError> {
        let mut body = Vec::with_capacity(
            self.content_length()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
        );
        while let Some(chunk) = self.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        log::debug!("Downloaded {} bytes of CSV", body.len());
        Ok(body)
    }
}

/// Drives one query through the export workflow.
pub struct ExportWorkflow {
    session: Session,
    endpoints: Endpoints,
    poll: PollConfig,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
    state: WorkflowState,
}

impl ExportWorkflow {
    /// Creates an idle workflow.
    ///
    /// `progress` receives a message for every step and the batch job's
    /// percentage while polling. `cancel` interrupts polling.
    #[must_use]
    pub fn new(
        session: Session,
        endpoints: Endpoints,
        poll: PollConfig,
        progress: Arc<dyn ProgressCallback>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            endpoints,
            poll,
            progress,
            cancel,
            state: WorkflowState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> WorkflowState {
        self.state
    }

    /// The session carrying this workflow's cookies.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Runs every step and returns the unread export.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step.
    pub async fn run(
        &mut self,
        query_id: &QueryId,
        options: &QueryOptions,
    ) -> Result<ExportDownload, ArchiveError> {
        self.submit(query_id, options).await?;
        let batch_url = self.request_export(query_id).await?;
        self.start_batch(&batch_url).await?;
        self.poll(&batch_url).await?;
        let finished = self.finish(&batch_url).await?;
        self.download(&finished).await
    }

    /// Posts the search form. The server must answer with a redirect.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Protocol`] for a non-redirect answer and
    /// [`ArchiveError::Network`] if the request fails.
    pub async fn submit(
        &mut self,
        query_id: &QueryId,
        options: &QueryOptions,
    ) -> Result<(), ArchiveError> {
        self.begin(Phase::Submit, WorkflowState::Idle, "Registering query")?;
        log::debug!("Registering query {query_id}");
        for (key, value) in options.iter() {
            log::debug!("  {key} = {value}");
        }

        let result = async {
            let response = self
                .session
                .post_form(Phase::Submit, &self.endpoints.query(), options)
                .await?;
            let status = response.status();
            if !status.is_redirection() {
                return Err(ArchiveError::protocol(
                    Phase::Submit,
                    format!("expected a redirect after posting the query, got {status}"),
                ));
            }
            Ok(())
        }
        .await;

        self.advance(result, WorkflowState::Submitted)
    }

    /// Triggers the CSV export and returns the batch URL it redirects to.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Protocol`] for a missing redirect and
    /// [`ArchiveError::Network`] if the request fails.
    pub async fn request_export(&mut self, query_id: &QueryId) -> Result<Url, ArchiveError> {
        self.begin(
            Phase::RequestExport,
            WorkflowState::Submitted,
            "Kicking off CSV export",
        )?;

        let result = async {
            let response = self
                .session
                .get(Phase::RequestExport, &self.endpoints.export_csv(query_id))
                .await?;
            redirect_location(Phase::RequestExport, &response)
        }
        .await;

        let batch_url = self.advance(result, WorkflowState::ExportRequested)?;
        log::debug!("Batch URL: {batch_url}");
        Ok(batch_url)
    }

    /// Opens the batch job at `batch_url` as received.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Protocol`] for a missing redirect and
    /// [`ArchiveError::Network`] if the request fails.
    pub async fn start_batch(&mut self, batch_url: &Url) -> Result<(), ArchiveError> {
        self.begin(
            Phase::StartBatch,
            WorkflowState::ExportRequested,
            "Starting batch process",
        )?;

        let result = async {
            let response = self.session.get(Phase::StartBatch, batch_url).await?;
            redirect_location(Phase::StartBatch, &response).map(|_| ())
        }
        .await;

        self.advance(result, WorkflowState::BatchStarted)
    }

    /// Polls the batch job until it reports 100%. Returns the number of
    /// progress requests issued.
    ///
    /// # Errors
    ///
    /// See [`poll_until_complete`].
    pub async fn poll(&mut self, batch_url: &Url) -> Result<u32, ArchiveError> {
        self.begin(
            Phase::Poll,
            WorkflowState::BatchStarted,
            "Waiting for export batch",
        )?;
        self.state = WorkflowState::Polling;

        let result = poll_until_complete(
            &self.session,
            batch_url,
            self.poll,
            &self.progress,
            &self.cancel,
        )
        .await;

        self.advance(result, WorkflowState::Polling)
    }

    /// Closes the batch job. Returns the redirect target, whose query
    /// string identifies the exported file.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Protocol`] for a missing redirect and
    /// [`ArchiveError::Network`] if the request fails.
    pub async fn finish(&mut self, batch_url: &Url) -> Result<Url, ArchiveError> {
        self.begin(Phase::Finish, WorkflowState::Polling, "Finishing batch process")?;

        let finish_url = with_batch_op(batch_url, BATCH_OP_FINISHED);
        let result = async {
            let response = self.session.get(Phase::Finish, &finish_url).await?;
            let location = redirect_location(Phase::Finish, &response)?;
            if location.query().is_none_or(str::is_empty) {
                return Err(ArchiveError::protocol(
                    Phase::Finish,
                    format!("finished batch redirected to {location} without identifying the export"),
                ));
            }
            Ok(location)
        }
        .await;

        self.advance(result, WorkflowState::BatchFinished)
    }

    /// Starts downloading the exported CSV. The body is left unread.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Protocol`] for a non-success status and
    /// [`ArchiveError::Network`] if the request fails.
    pub async fn download(&mut self, finished: &Url) -> Result<ExportDownload, ArchiveError> {
        self.begin(
            Phase::Download,
            WorkflowState::BatchFinished,
            "Downloading CSV result",
        )?;

        let download_url = self.endpoints.download(finished);
        let result = async {
            let response = self.session.get(Phase::Download, &download_url).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ArchiveError::protocol(
                    Phase::Download,
                    format!("download returned {status}"),
                ));
            }
            Ok(ExportDownload { response })
        }
        .await;

        let download = self.advance(result, WorkflowState::Downloaded)?;
        self.progress.completed();
        Ok(download)
    }

    /// Fetches the query's map page markup.
    ///
    /// Independent of the export steps; needs only a submitted query in
    /// the same session.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Protocol`] for a non-success status and
    /// [`ArchiveError::Network`] if the request fails.
    pub async fn fetch_map(&self, query_id: &QueryId) -> Result<String, ArchiveError> {
        log::debug!("Getting map for query {query_id}");
        let response = self
            .session
            .get(Phase::Map, &self.endpoints.map(query_id))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::protocol(
                Phase::Map,
                format!("map page returned {status}"),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| ArchiveError::network(Phase::Map, e))
    }

    fn begin(
        &mut self,
        phase: Phase,
        expected: WorkflowState,
        message: &str,
    ) -> Result<(), ArchiveError> {
        if self.state != expected {
            let err = ArchiveError::protocol(
                phase,
                format!("workflow is {}, expected {expected}", self.state),
            );
            self.state = WorkflowState::Failed;
            return Err(err);
        }
        log::info!("{message}");
        self.progress.phase(message);
        Ok(())
    }

    fn advance<T>(
        &mut self,
        result: Result<T, ArchiveError>,
        next: WorkflowState,
    ) -> Result<T, ArchiveError> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                log::warn!("Query workflow failed: {e}");
                self.state = WorkflowState::Failed;
                self.progress.abandoned();
                Err(e)
            }
        }
    }
}
