#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the Gun Violence Archive's browser-oriented search workflow.
//!
//! The archive has no public API. A query is registered by posting the
//! search form, exported through a server-side batch job that is polled
//! until it finishes, and downloaded as CSV. Coordinates are not part of
//! the export; they are scraped from the query's map page. [`ArchiveClient`]
//! drives the whole sequence and joins both datasets into
//! [`FusedIncident`](gva_archive_models::FusedIncident)s.
//!
//! The lower layers are public so they can be used and tested on their
//! own: [`criteria`] and [`options`] build the form, [`session`] and
//! [`workflow`] speak the protocol, [`poll`] watches the batch job,
//! [`records`] and [`coordinates`] decode the two datasets, and [`fusion`]
//! merges them.

pub mod client;
pub mod coordinates;
pub mod criteria;
pub mod dates;
pub mod fusion;
pub mod options;
pub mod poll;
pub mod progress;
pub mod records;
pub mod session;
pub mod workflow;

pub use client::{ArchiveClient, ClientConfig};

use gva_archive_models::QueryId;
use strum_macros::{AsRefStr, Display};

/// A step of the export workflow, carried in errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    /// Posting the search form.
    Submit,
    /// Triggering the CSV export.
    RequestExport,
    /// Opening the batch job.
    StartBatch,
    /// Polling the batch job.
    Poll,
    /// Closing the batch job.
    Finish,
    /// Fetching the exported CSV.
    Download,
    /// Fetching the map page.
    Map,
}

/// Errors that can occur while querying the archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A caller-supplied option is invalid. Raised before any request.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// The server answered, but not the way the workflow expects.
    #[error("Protocol error during {phase}: {message}")]
    Protocol {
        /// Phase that received the response.
        phase: Phase,
        /// Description of what went wrong.
        message: String,
    },

    /// The map page has no coordinate table for this query.
    #[error("Coordinates not found in map page for query {query_id}")]
    CoordinatesNotFound {
        /// Query whose map was fetched.
        query_id: QueryId,
    },

    /// A field could not be decoded.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of what went wrong.
        message: String,
    },

    /// The exported CSV could not be decoded.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A JSON response body could not be decoded.
    #[error("JSON parse error during {phase}: {source}")]
    Json {
        /// Phase that received the body.
        phase: Phase,
        /// Underlying decoder error.
        source: serde_json::Error,
    },

    /// The HTTP request itself failed.
    #[error("HTTP request failed during {phase}: {source}")]
    Network {
        /// Phase that issued the request.
        phase: Phase,
        /// Underlying transport error.
        source: reqwest::Error,
    },

    /// The caller cancelled the workflow.
    #[error("Cancelled during {phase}")]
    Cancelled {
        /// Phase that observed the cancellation.
        phase: Phase,
    },

    /// The batch job did not finish within the allowed number of polls.
    #[error("Export batch still incomplete after {attempts} progress requests")]
    PollExhausted {
        /// Number of progress requests issued.
        attempts: u32,
    },

    /// The batch job did not finish before the poll deadline.
    #[error("Export batch still incomplete after {elapsed:?}")]
    PollTimedOut {
        /// Time spent polling.
        elapsed: std::time::Duration,
    },
}

impl ArchiveError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(phase: Phase, message: impl Into<String>) -> Self {
        Self::Protocol {
            phase,
            message: message.into(),
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub(crate) const fn network(phase: Phase, source: reqwest::Error) -> Self {
        Self::Network { phase, source }
    }

    /// Whether the caller supplied an invalid option.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Whether the server broke the expected redirect/markup protocol.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::CoordinatesNotFound { .. }
                | Self::PollExhausted { .. }
                | Self::PollTimedOut { .. }
        )
    }

    /// Whether a numeric, date, CSV, or JSON field was malformed.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Csv(_) | Self::Json { .. })
    }

    /// Whether the transport failed.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// The workflow phase the error came from, when known.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Protocol { phase, .. }
            | Self::Json { phase, .. }
            | Self::Network { phase, .. }
            | Self::Cancelled { phase } => Some(*phase),
            Self::CoordinatesNotFound { .. } => Some(Phase::Map),
            Self::PollExhausted { .. } | Self::PollTimedOut { .. } => Some(Phase::Poll),
            Self::Config { .. } | Self::Parse { .. } | Self::Csv(_) => None,
        }
    }
}
