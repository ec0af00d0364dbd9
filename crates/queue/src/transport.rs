//! Transports to the queue join endpoint.
//!
//! [`connect`] opens the join endpoint in the requested
//! [`TransportMode`] and returns it behind the [`Transport`] trait, so
//! the session loop drives both transports the same way:
//!
//! * [`DuplexTransport`] wraps a WebSocket; one data frame is one
//!   message and responses go back as text frames.
//! * [`StreamedTransport`] wraps a streamed HTTP response body and
//!   extracts `data: ` lines through a [`LineFramer`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio_tungstenite::tungstenite::http::StatusCode as HandshakeStatus;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::dispatcher::Response;
use crate::endpoint::TransportMode;
use crate::error::SessionError;
use crate::framer::{LineFramer, LineState};

/// The raw WebSocket stream used by the duplex transport.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Byte chunks feeding a [`StreamedTransport`].
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, SessionError>>;

/// An open connection to the join endpoint.
#[async_trait]
pub trait Transport: Send {
    fn mode(&self) -> TransportMode;

    /// Read the raw bytes of the next protocol message.
    ///
    /// Returns `Ok(None)` once the server has closed the stream.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError>;

    /// Serialize `response` and write it to the server.
    ///
    /// The session only calls this on duplex transports.
    async fn send(&mut self, response: &Response) -> Result<(), SessionError>;

    /// Release the connection. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Open the join endpoint at `url` in the given mode.
///
/// `http` is used for the streamed mode only.
pub async fn connect(
    url: &Url,
    mode: TransportMode,
    http: &reqwest::Client,
) -> Result<Box<dyn Transport>, SessionError> {
    let transport: Box<dyn Transport> = match mode {
        TransportMode::Duplex => Box::new(DuplexTransport::connect(url).await?),
        TransportMode::Streamed => Box::new(StreamedTransport::connect(http, url).await?),
    };
    tracing::info!(endpoint = %url, mode = %mode, "Joined queue");
    Ok(transport)
}

// ---------------------------------------------------------------------------
// Duplex (WebSocket)
// ---------------------------------------------------------------------------

/// WebSocket transport: one data frame per message, responses written
/// back as text frames.
pub struct DuplexTransport {
    ws_stream: WsStream,
}

impl DuplexTransport {
    /// Perform the WebSocket handshake against `url`.
    pub async fn connect(url: &Url) -> Result<Self, SessionError> {
        let (ws_stream, response) = connect_async(url.as_str()).await.map_err(|e| {
            SessionError::Connection(format!("Failed to connect to queue at {url}: {e}"))
        })?;

        if response.status() != HandshakeStatus::SWITCHING_PROTOCOLS {
            return Err(SessionError::Connection(format!(
                "Queue handshake at {url} answered {}",
                response.status()
            )));
        }

        Ok(Self { ws_stream })
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(ws_stream: WsStream) -> Self {
        Self { ws_stream }
    }
}

#[async_trait]
impl Transport for DuplexTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Duplex
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        while let Some(msg_result) = self.ws_stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => return Ok(Some(text.into_bytes())),
                Ok(Message::Binary(data)) => return Ok(Some(data)),
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Queue WebSocket closed by server");
                    return Ok(None);
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    return Err(SessionError::TransportIo(format!(
                        "WebSocket receive error: {e}"
                    )));
                }
            }
        }
        Ok(None)
    }

    async fn send(&mut self, response: &Response) -> Result<(), SessionError> {
        let json = serde_json::to_string(response)
            .map_err(|e| SessionError::Protocol(format!("Failed to encode response: {e}")))?;
        self.ws_stream
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::TransportIo(format!("WebSocket send error: {e}")))
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(error = %e, "Error while closing queue WebSocket");
        }
    }
}

// ---------------------------------------------------------------------------
// Streamed (HTTP line stream)
// ---------------------------------------------------------------------------

/// Receive-only transport over a streamed HTTP response.
pub struct StreamedTransport {
    chunks: ChunkStream,
    framer: LineFramer,
    exhausted: bool,
}

impl StreamedTransport {
    /// Issue the join GET and keep the response body as a byte stream.
    pub async fn connect(http: &reqwest::Client, url: &Url) -> Result<Self, SessionError> {
        let response = http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                SessionError::Connection(format!("Failed to connect to queue at {url}: {e}"))
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SessionError::Connection(format!(
                "Queue join at {url} answered {status}"
            )));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| SessionError::TransportIo(format!("Stream read error: {e}")))
            })
            .boxed();
        Ok(Self::from_chunks(chunks))
    }

    /// Build a transport over an arbitrary chunk stream.
    pub fn from_chunks(chunks: ChunkStream) -> Self {
        Self {
            chunks,
            framer: LineFramer::new(),
            exhausted: false,
        }
    }
}

#[async_trait]
impl Transport for StreamedTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Streamed
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        loop {
            match self.framer.next_line() {
                LineState::PayloadExtracted(payload) => return Ok(Some(payload)),
                LineState::LineComplete(line) => {
                    tracing::trace!(
                        line = %String::from_utf8_lossy(&line),
                        "Skipping non-data line",
                    );
                    continue;
                }
                LineState::Accumulating => {}
            }

            if self.exhausted {
                return Ok(None);
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => self.framer.push(&chunk),
                Some(Err(e)) => return Err(e),
                None => {
                    self.exhausted = true;
                    if let LineState::PayloadExtracted(payload) = self.framer.finish() {
                        return Ok(Some(payload));
                    }
                }
            }
        }
    }

    async fn send(&mut self, _response: &Response) -> Result<(), SessionError> {
        tracing::trace!("Streamed transport is receive-only, dropping response");
        Ok(())
    }

    async fn close(&mut self) {
        self.exhausted = true;
        self.chunks = futures::stream::empty().boxed();
    }
}
