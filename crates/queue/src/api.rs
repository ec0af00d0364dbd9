//! REST helper for the queue's out-of-band data endpoint.
//!
//! On the streamed transport the server cannot receive responses over
//! the join stream, so when it asks for the work payload (`send_data`)
//! the client POSTs it to `/queue/data` instead.

use reqwest::Url;

use crate::dispatcher::Response;
use crate::endpoint;

/// HTTP client for a queue's data endpoint.
pub struct QueueApi {
    client: reqwest::Client,
    base_url: Url,
    data_url: Url,
}

/// Errors from the queue REST layer.
#[derive(Debug, thiserror::Error)]
pub enum QueueApiError {
    /// The base address cannot be turned into a data address.
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Queue API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl QueueApi {
    /// Create an API client for the queue behind `base_url`.
    pub fn new(base_url: &Url) -> Result<Self, QueueApiError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &Url) -> Result<Self, QueueApiError> {
        let data_url =
            endpoint::data_url(base_url).map_err(|e| QueueApiError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.clone(),
            data_url,
        })
    }

    pub fn data_url(&self) -> &Url {
        &self.data_url
    }

    /// Download address of a file the server produced.
    pub fn file_url(&self, name: &str) -> Result<String, QueueApiError> {
        endpoint::file_url(&self.base_url, name)
            .map_err(|e| QueueApiError::InvalidUrl(e.to_string()))
    }

    /// Submit a work payload.
    ///
    /// Sends `POST /queue/data` with `payload` as the JSON body.
    pub async fn post_data(&self, payload: &Response) -> Result<(), QueueApiError> {
        let response = self
            .client
            .post(self.data_url.clone())
            .json(payload)
            .send()
            .await?;

        Self::check_status(response).await?;
        tracing::debug!(url = %self.data_url, "Posted queue data");
        Ok(())
    }

    // ---- private helpers ----

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), QueueApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(QueueApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn payload() -> Response {
        json!({"fn_index": 0, "session_hash": "abc", "data": ["a cat"]})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn post_data_sends_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue/data"))
            .and(body_json(json!({"fn_index": 0, "session_hash": "abc", "data": ["a cat"]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = QueueApi::new(&Url::parse(&server.uri()).unwrap()).unwrap();
        api.post_data(&payload()).await.unwrap();
    }

    #[tokio::test]
    async fn post_data_surfaces_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue/data"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad fn_index"))
            .mount(&server)
            .await;

        let api = QueueApi::new(&Url::parse(&server.uri()).unwrap()).unwrap();
        assert_matches!(
            api.post_data(&payload()).await,
            Err(QueueApiError::ApiError { status: 422, body }) if body == "bad fn_index"
        );
    }

    #[test]
    fn urls_derive_from_websocket_base() {
        let api = QueueApi::new(&Url::parse("wss://space.hf.space?fn_index=2").unwrap()).unwrap();
        assert_eq!(api.data_url().as_str(), "https://space.hf.space/queue/data");
        assert_eq!(
            api.file_url("/tmp/a.png").unwrap(),
            "https://space.hf.space/file=/tmp/a.png"
        );
    }
}
