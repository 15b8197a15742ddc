//! Job-control client — start / stop / retry commands over HTTP.
//!
//! Transport failures (`Err`) and refusals (`Ok` with an error status) are
//! different things; the controller maps each per the session rules.  No
//! automatic retries here — a failed command surfaces to the user.

use anyhow::{Context, Result};
use tunedl_proto::protocol::{ApiReply, RetryRequest, StartRequest};

pub struct JobClient {
    http: reqwest::Client,
    base_url: String,
}

impl JobClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of the long-lived event stream for this server.
    pub fn stream_url(&self) -> String {
        format!("{}/stream", self.base_url)
    }

    pub async fn start(&self, request: &StartRequest) -> Result<ApiReply> {
        let response = self
            .http
            .post(format!("{}/start-download", self.base_url))
            .form(request)
            .send()
            .await
            .context("failed to send start command")?;
        response
            .json()
            .await
            .context("failed to parse start reply")
    }

    pub async fn stop(&self) -> Result<ApiReply> {
        let response = self
            .http
            .post(format!("{}/stop-download", self.base_url))
            .send()
            .await
            .context("failed to send stop command")?;
        response.json().await.context("failed to parse stop reply")
    }

    pub async fn retry_failed(&self, request: &RetryRequest) -> Result<ApiReply> {
        let response = self
            .http
            .post(format!("{}/retry-failed-songs", self.base_url))
            .json(request)
            .send()
            .await
            .context("failed to send retry command")?;
        response
            .json()
            .await
            .context("failed to parse retry reply")
    }
}
