//! Cookie-bearing HTTP session that never follows redirects.
//!
//! The export workflow moves from one state to the next by reading the
//! `Location` header of each redirect, so redirects have to reach the
//! caller as ordinary responses. The cookie jar carries the server-side
//! batch state from one request to the next.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, LOCATION, REFERER};
use reqwest::{Response, Url};

use crate::options::QueryOptions;
use crate::{ArchiveError, Phase};

/// `Accept` header the browser sends with batch progress requests.
const PROGRESS_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

/// One cookie jar and one connection pool, shared by every request of a
/// query.
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
}

impl Session {
    /// Builds a session with an empty cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Config`] if the user agent is not a valid
    /// header value or the HTTP client cannot be constructed.
    pub fn new(user_agent: Option<&str>, timeout: Option<Duration>) -> Result<Self, ArchiveError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(ua) = user_agent {
            let value = HeaderValue::from_str(ua)
                .map_err(|e| ArchiveError::config(format!("invalid user agent '{ua}': {e}")))?;
            let mut headers = HeaderMap::new();
            headers.insert(reqwest::header::USER_AGENT, value);
            builder = builder.default_headers(headers);
        }

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| ArchiveError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Sends a `GET`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Network`] if the request fails.
    pub async fn get(&self, phase: Phase, url: &Url) -> Result<Response, ArchiveError> {
        log::debug!("[{phase}] GET {url}");
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ArchiveError::network(phase, e))
    }

    /// Sends a form-encoded `POST`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Network`] if the request fails.
    pub async fn post_form(
        &self,
        phase: Phase,
        url: &Url,
        form: &QueryOptions,
    ) -> Result<Response, ArchiveError> {
        log::debug!("[{phase}] POST {url} ({} fields)", form.len());
        self.client
            .post(url.clone())
            .form(form.as_pairs())
            .send()
            .await
            .map_err(|e| ArchiveError::network(phase, e))
    }

    /// Sends the empty `POST` a browser uses to ask a batch job for its
    /// progress, with the same AJAX headers the browser sends.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Network`] if the request fails.
    pub async fn post_progress(&self, url: &Url, referer: &Url) -> Result<Response, ArchiveError> {
        self.client
            .post(url.clone())
            .header(ACCEPT, PROGRESS_ACCEPT)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(REFERER, referer.as_str())
            .send()
            .await
            .map_err(|e| ArchiveError::network(Phase::Poll, e))
    }
}

/// Returns the absolute target of a redirect response.
///
/// Relative `Location` values are resolved against the request URL.
///
/// # Errors
///
/// Returns [`ArchiveError::Protocol`] if the response is not a redirect or
/// its `Location` header is missing or unparseable.
pub fn redirect_location(phase: Phase, response: &Response) -> Result<Url, ArchiveError> {
    let status = response.status();
    if !status.is_redirection() {
        return Err(ArchiveError::protocol(
            phase,
            format!("expected a redirect from {}, got {status}", response.url()),
        ));
    }

    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| ArchiveError::protocol(phase, format!("{status} without a Location header")))?
        .to_str()
        .map_err(|e| ArchiveError::protocol(phase, format!("unreadable Location header: {e}")))?;

    response
        .url()
        .join(location)
        .map_err(|e| ArchiveError::protocol(phase, format!("invalid Location '{location}': {e}")))
}
