//! High-level entry point: one call per query.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gva_archive_models::{CoordinateOrder, FusedIncident, QueryId, ResultsType};
use tokio_util::sync::CancellationToken;

use crate::ArchiveError;
use crate::coordinates::scrape_coordinates;
use crate::fusion::fuse_incidents;
use crate::options::QuerySpec;
use crate::poll::PollConfig;
use crate::progress::ProgressCallback;
use crate::records::parse_incident_records;
use crate::session::Session;
use crate::workflow::{Endpoints, ExportWorkflow};

/// Public site of the Gun Violence Archive.
pub const DEFAULT_ROOT_URL: &str = "https://www.gunviolencearchive.org";

/// Settings shared by every query a client runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Root URL every endpoint hangs off.
    pub root_url: String,
    /// Poll loop bounds.
    pub poll: PollConfig,
    /// Field order of the map page's coordinate table.
    pub coordinate_order: CoordinateOrder,
    /// Overrides reqwest's default `User-Agent`.
    pub user_agent: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            root_url: DEFAULT_ROOT_URL.to_owned(),
            poll: PollConfig::default(),
            coordinate_order: CoordinateOrder::default(),
            user_agent: None,
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    #[must_use]
    pub const fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub const fn with_coordinate_order(mut self, order: CoordinateOrder) -> Self {
        self.coordinate_order = order;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Runs queries against the archive.
///
/// Every query gets a fresh [`Session`], so queries never share cookies
/// and several may run concurrently from one client.
pub struct ArchiveClient {
    config: ClientConfig,
    endpoints: Endpoints,
    progress: Arc<dyn ProgressCallback>,
}

impl ArchiveClient {
    /// Validates `config` without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] if the root URL or user agent is
    /// unusable.
    pub fn new(
        config: ClientConfig,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<Self, ArchiveError> {
        let endpoints = Endpoints::new(&config.root_url)?;
        // Surfaces a bad user agent now rather than on the first query.
        Session::new(config.user_agent.as_deref(), config.request_timeout)?;

        Ok(Self {
            config,
            endpoints,
            progress,
        })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs one incident query end to end and returns the fused records in
    /// export order.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step. Nothing is returned for a
    /// query that fails part way.
    pub async fn query_incidents(
        &self,
        spec: &QuerySpec,
        cancel: &CancellationToken,
    ) -> Result<Vec<FusedIncident>, ArchiveError> {
        let query_id = QueryId::new();
        let options = spec.to_options(&query_id, ResultsType::Incidents);
        log::info!(
            "Running query {query_id} with {} criteria",
            spec.criteria().len()
        );

        let session = Session::new(
            self.config.user_agent.as_deref(),
            self.config.request_timeout,
        )?;
        let mut workflow = ExportWorkflow::new(
            session,
            self.endpoints.clone(),
            self.config.poll,
            Arc::clone(&self.progress),
            cancel.clone(),
        );

        let download = workflow.run(&query_id, &options).await?;
        let body = download.read_to_end().await?;
        let records = parse_incident_records(body.as_slice())?;

        let markup = workflow.fetch_map(&query_id).await?;
        let coordinates = scrape_coordinates(&markup, &query_id, self.config.coordinate_order)?;

        let fused = fuse_incidents(records, &coordinates, Utc::now());
        log::info!("Query {query_id} returned {} incident(s)", fused.len());

        Ok(fused)
    }
}
