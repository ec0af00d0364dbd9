//! HTTP client for the upscale task API.
//!
//! Wraps the two endpoints the service exposes:
//!
//! * `POST /api/task/` submits a job and returns its ticket (`tid`).
//! * `GET /api/task/{tid}` reports the job status, keyed by ticket.

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::UpscaleConfig;

/// Header carrying the account key on every request.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Job status reported once the result is ready.
const SUCCESS_STATUS: &str = "success";

/// HTTP client for one upscale account.
pub struct UpscaleClient {
    client: reqwest::Client,
    api_key: String,
    config: UpscaleConfig,
}

/// Errors from upscale submission and polling.
#[derive(Debug, thiserror::Error)]
pub enum UpscaleError {
    /// The HTTP request itself failed (network, DNS, TLS, body decode).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Upscale API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The service answered, but not with what the request needs.
    #[error("Upscale request failed: {0}")]
    Request(String),

    /// The service refused the submission with its own status text.
    #[error("Upscale service refused task: {0}")]
    Remote(String),

    /// The job did not finish within the retry budget.
    #[error("Upscale timed out: {0}")]
    Timeout(String),

    #[error("Upscale cancelled")]
    Cancelled,
}

/// Result of a single status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The job finished; carries the result image URL.
    Done(String),
    /// Not finished yet. `status` is whatever the service reported, if
    /// the ticket appeared in the reply at all.
    Pending { status: Option<String> },
}

/// Body of a task submission.
#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    style: &'a str,
    noise: &'a str,
    x2: &'a str,
    input: &'a str,
}

impl UpscaleClient {
    /// Create a client with the default service settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(api_key, UpscaleConfig::default())
    }

    pub fn with_config(api_key: impl Into<String>, config: UpscaleConfig) -> Self {
        Self::with_client(reqwest::Client::new(), api_key, config)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_key: impl Into<String>,
        config: UpscaleConfig,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            config,
        }
    }

    pub fn config(&self) -> &UpscaleConfig {
        &self.config
    }

    /// Submit `source_url` for upscaling and return the job ticket.
    ///
    /// A reply without `tid` is a refusal: its `status` text becomes
    /// [`UpscaleError::Remote`]; with neither field the reply is
    /// unusable and yields [`UpscaleError::Request`].
    pub async fn submit(&self, source_url: &str) -> Result<String, UpscaleError> {
        let body = SubmitRequest {
            style: &self.config.style,
            noise: &self.config.noise,
            x2: &self.config.scale,
            input: source_url,
        };

        let response = self
            .client
            .post(self.config.submit_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let reply: Value = Self::parse_response(response).await?;

        if let Some(ticket) = reply.get("tid").and_then(value_text) {
            tracing::info!(ticket = %ticket, source = %source_url, "Upscale task submitted");
            return Ok(ticket);
        }
        match reply.get("status").and_then(value_text) {
            Some(status) => Err(UpscaleError::Remote(status)),
            None => Err(UpscaleError::Request("fetch task failed".to_string())),
        }
    }

    /// Query the status of `ticket` once.
    pub async fn poll_once(&self, ticket: &str) -> Result<PollOutcome, UpscaleError> {
        let response = self
            .client
            .get(self.config.task_url(ticket))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let reply: Value = Self::parse_response(response).await?;

        let Some(entry) = reply.get(ticket) else {
            return Ok(PollOutcome::Pending { status: None });
        };
        let status = entry.get("status").and_then(value_text);
        if status.as_deref() != Some(SUCCESS_STATUS) {
            return Ok(PollOutcome::Pending { status });
        }

        match entry.get("url").and_then(value_text) {
            Some(url) => Ok(PollOutcome::Done(url)),
            None => Err(UpscaleError::Request(format!(
                "task {ticket} succeeded without a result url"
            ))),
        }
    }

    /// Poll `ticket` until it succeeds, the retry budget runs out, or
    /// `cancel` fires.
    ///
    /// Polls at most `retry_budget` times, sleeping `poll_interval`
    /// between attempts. HTTP failures abort immediately; only a pending
    /// status is retried. Both the status request and the sleep race
    /// `cancel`.
    pub async fn poll_until_done(
        &self,
        ticket: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UpscaleError> {
        let budget = self.config.retry_budget;

        for attempt in 1..=budget {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpscaleError::Cancelled),
                outcome = self.poll_once(ticket) => outcome?,
            };

            match outcome {
                PollOutcome::Done(url) => {
                    tracing::info!(ticket = %ticket, attempt, url = %url, "Upscale task finished");
                    return Ok(url);
                }
                PollOutcome::Pending { status } => {
                    tracing::debug!(
                        ticket = %ticket,
                        attempt,
                        budget,
                        status = status.as_deref().unwrap_or("unknown"),
                        "Upscale task pending",
                    );
                }
            }

            if attempt < budget {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UpscaleError::Cancelled),
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        tracing::warn!(ticket = %ticket, budget, "Upscale task did not finish in time");
        Err(UpscaleError::Timeout("poll failed".to_string()))
    }

    /// Submit `source_url` and wait for the upscaled image URL.
    pub async fn magnify(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UpscaleError> {
        let ticket = self.submit(source_url).await?;
        self.poll_until_done(&ticket, cancel).await
    }

    // ---- private helpers ----

    /// Check the status code and deserialize the JSON body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, UpscaleError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(UpscaleError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

/// Render a JSON scalar as text; strings lose their quotes.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn value_text_unquotes_strings() {
        assert_eq!(value_text(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(value_text(&json!(42)).as_deref(), Some("42"));
        assert_eq!(value_text(&Value::Null), None);
    }

    #[test]
    fn submit_body_uses_service_field_names() {
        let body = SubmitRequest {
            style: "photo",
            noise: "1",
            x2: "2",
            input: "http://img/a.png",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"style": "photo", "noise": "1", "x2": "2", "input": "http://img/a.png"})
        );
    }
}
