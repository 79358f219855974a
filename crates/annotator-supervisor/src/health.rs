//! HTTP health probing for a running annotation server.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub(crate) const HEALTH_TARGET: &str = "annotator_supervisor::health";

const HEALTH_PATH: &str = "api/health";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTHY_STATUS: &str = "UP";

/// Body returned by the server's health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    /// Status reported by the server, `"UP"` when healthy.
    pub status: String,
}

impl HealthReport {
    /// Whether the server declared itself healthy.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.status == HEALTHY_STATUS
    }
}

/// Errors raised while probing the health endpoint.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The server URL could not be turned into a health endpoint.
    #[error("invalid server url '{base_url}': {source}")]
    Url {
        /// URL supplied by the caller.
        base_url: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
    /// The request failed, timed out, or returned an unusable response.
    #[error("health request to {url} failed: {source}")]
    Request {
        /// Health endpoint that was queried.
        url: String,
        /// HTTP client failure.
        #[source]
        source: reqwest::Error,
    },
}

/// Queries a server's health endpoint.
pub trait HealthProbe {
    /// Fetches the health report from the server rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the URL is invalid or the server does not
    /// answer with a JSON health report.
    fn check(&self, base_url: &str, api_key: Option<&str>) -> Result<HealthReport, ProbeError>;
}

/// Probe backed by a blocking HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct HttpHealthProbe {
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Creates a probe that gives up after `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(PROBE_TIMEOUT)
    }
}

impl HealthProbe for HttpHealthProbe {
    fn check(&self, base_url: &str, api_key: Option<&str>) -> Result<HealthReport, ProbeError> {
        let endpoint = health_url(base_url)?;
        let url = endpoint.to_string();
        let request_error = |source| ProbeError::Request {
            url: url.clone(),
            source,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(request_error)?;
        let mut request = client.get(endpoint);
        if let Some(key) = api_key {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {key}"));
        }
        debug!(target: HEALTH_TARGET, url = %url, "probing server health");
        let report = request
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::json::<HealthReport>)
            .map_err(request_error)?;
        debug!(target: HEALTH_TARGET, url = %url, status = %report.status, "health reported");
        Ok(report)
    }
}

fn health_url(base_url: &str) -> Result<Url, ProbeError> {
    let url_error = |source| ProbeError::Url {
        base_url: String::from(base_url),
        source,
    };
    let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/'))).map_err(url_error)?;
    base.join(HEALTH_PATH).map_err(url_error)
}
