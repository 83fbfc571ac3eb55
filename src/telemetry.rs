//! Telemetry sink: the HTTP API readings are forwarded to.
//!
//! The API takes one JSON object per `POST {base_url}/{access_token}/telemetry`
//! and answers with a bare status code. [`TelemetrySink`] is the seam the
//! uploader talks to; [`HttpSink`] is the real `reqwest` implementation.

use crate::decoder::Reading;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Last path segment of the telemetry endpoint.
pub const TELEMETRY_PATH: &str = "telemetry";

/// JSON body of one telemetry upload.
///
/// Serializes as `{"temperature": 23.58}` or
/// `{"temperature": 23.58, "group_id": 7}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u8>,
}

impl From<&Reading> for TelemetryPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            temperature: reading.temperature_celsius,
            group_id: reading.group_id,
        }
    }
}

/// How the sink answered an upload that reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// HTTP 200
    Accepted,
    /// HTTP 400: invalid URL, request parameters or body
    BadRequest,
    /// HTTP 404: the access token is unknown to the API
    InvalidToken,
    /// Any other status
    Rejected(u16),
}

impl UploadOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => UploadOutcome::Accepted,
            400 => UploadOutcome::BadRequest,
            404 => UploadOutcome::InvalidToken,
            other => UploadOutcome::Rejected(other),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, UploadOutcome::Accepted)
    }
}

/// Transport-level upload failures: the request never got a status back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for UploadError {
    /// The request URL embeds the access token and is stripped from the message.
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            UploadError::Timeout(err.to_string())
        } else if err.is_connect() {
            UploadError::Connect(err.to_string())
        } else {
            UploadError::Transport(err.to_string())
        }
    }
}

/// Result of a single upload attempt.
pub type UploadResult = Result<UploadOutcome, UploadError>;

/// Destination for telemetry uploads.
///
/// Implementations perform exactly one attempt per call and never retry.
pub trait TelemetrySink: Send + Sync {
    fn post<'a>(
        &'a self,
        payload: &'a TelemetryPayload,
    ) -> Pin<Box<dyn Future<Output = UploadResult> + Send + 'a>>;
}

/// Build the telemetry endpoint URL. A trailing `/` on `base_url` is ignored.
pub fn telemetry_url(base_url: &str, access_token: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        access_token,
        TELEMETRY_PATH
    )
}

/// HTTP sink posting JSON with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpSink {
    /// Reusable HTTP client with connection pooling.
    http: reqwest::Client,
    url: String,
}

impl HttpSink {
    /// Create a sink for `{base_url}/{access_token}/telemetry`.
    ///
    /// # Errors
    /// Returns `UploadError::Transport` if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: telemetry_url(base_url, access_token),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TelemetrySink for HttpSink {
    fn post<'a>(
        &'a self,
        payload: &'a TelemetryPayload,
    ) -> Pin<Box<dyn Future<Output = UploadResult> + Send + 'a>> {
        Box::pin(async move {
            let response = self.http.post(&self.url).json(payload).send().await?;
            Ok(UploadOutcome::from_status(response.status().as_u16()))
        })
    }
}
