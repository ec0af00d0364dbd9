//! The queue session loop.
//!
//! A [`QueueSession`] is configured with a base address and a set of
//! reactions, then [`run`](QueueSession::run) drives it through
//!
//! ```text
//! Connecting -> Streaming -> Completed | Failed | Cancelled
//! ```
//!
//! Messages are handled strictly in arrival order: every reaction for a
//! message, and every write-back it produced, finishes before the next
//! read. Reads race the caller's [`CancellationToken`], so cancelling
//! while the server is silent ends the session immediately instead of
//! waiting for the next message.

use reqwest::Url;
use sdq_core::protocol::TERMINAL_EVENT;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{EventDispatcher, Reaction, Response};
use crate::endpoint::{self, TransportMode};
use crate::error::SessionError;
use crate::messages::{parse_message, QueueMessage};
use crate::transport::{self, Transport};

/// Lifecycle states of a session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// Terminal state corresponding to the outcome of a run.
    pub fn from_outcome(outcome: &Result<(), SessionError>) -> Self {
        match outcome {
            Ok(()) => Self::Completed,
            Err(SessionError::Cancelled) => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One client session against a queue join endpoint.
///
/// The caller owns the session exclusively: registering reactions and
/// running both take `&mut self`.
#[derive(Debug)]
pub struct QueueSession {
    base_url: Url,
    mode: TransportMode,
    http: reqwest::Client,
    dispatcher: EventDispatcher,
}

impl QueueSession {
    /// Create a session for `base_url`.
    ///
    /// The transport mode defaults from the scheme: `ws`/`wss` use the
    /// duplex transport, `http`/`https` the streamed one. Override it
    /// with [`with_mode`](Self::with_mode).
    pub fn new(base_url: &str) -> Result<Self, SessionError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| SessionError::InvalidUrl(format!("{base_url}: {e}")))?;
        let mode = TransportMode::from_scheme(parsed.scheme()).ok_or_else(|| {
            SessionError::InvalidUrl(format!(
                "unsupported scheme `{}` in {base_url}",
                parsed.scheme()
            ))
        })?;

        Ok(Self {
            base_url: parsed,
            mode,
            http: reqwest::Client::new(),
            dispatcher: EventDispatcher::new(),
        })
    }

    /// Select the transport explicitly.
    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use an existing [`reqwest::Client`] for the streamed transport.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// The join address this session connects to.
    pub fn join_url(&self) -> Result<Url, SessionError> {
        endpoint::join_url(&self.base_url, self.mode)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Register a closure for `event` (or `"*"` for every message).
    ///
    /// A later registration for the same name replaces this one.
    pub fn on<F>(&mut self, event: impl Into<String>, reaction: F) -> &mut Self
    where
        F: Fn(&QueueMessage, &[u8]) -> Option<Response> + Send + Sync + 'static,
    {
        self.dispatcher.on(event, reaction);
        self
    }

    /// Register a [`Reaction`] implementation for `event`.
    pub fn register<R>(&mut self, event: impl Into<String>, reaction: R) -> &mut Self
    where
        R: Reaction + 'static,
    {
        self.dispatcher.register(event, reaction);
        self
    }

    /// Connect and process messages until the terminal event, an error,
    /// or cancellation.
    ///
    /// Returns `Ok(())` once a successful `process_completed` arrives.
    /// The transport is closed on every path.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let endpoint = self.join_url()?;
        tracing::debug!(
            endpoint = %endpoint,
            state = ?SessionState::Connecting,
            "Starting queue session",
        );

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = transport::connect(&endpoint, self.mode, &self.http) => result,
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                let outcome = Err(e);
                log_outcome(&endpoint, &outcome);
                return outcome;
            }
        };

        tracing::debug!(
            endpoint = %endpoint,
            state = ?SessionState::Streaming,
            "Streaming queue events",
        );
        let outcome = drive(transport.as_mut(), &self.dispatcher, cancel).await;
        transport.close().await;

        log_outcome(&endpoint, &outcome);
        outcome
    }
}

/// Pump messages from `transport` through `dispatcher` until the
/// terminal event, a transport or decode error, or cancellation.
///
/// Responses are written back only when the transport is duplex; on
/// the streamed transport they are dropped, since that transport is
/// receive-only.
pub async fn drive(
    transport: &mut dyn Transport,
    dispatcher: &EventDispatcher,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            frame = transport.next_frame() => frame?,
        };
        let Some(raw) = frame else {
            return Err(SessionError::TransportIo(format!(
                "stream closed before {TERMINAL_EVENT}"
            )));
        };

        let message = parse_message(&raw).map_err(|e| {
            SessionError::Protocol(format!(
                "malformed queue message ({e}): {}",
                String::from_utf8_lossy(&raw)
            ))
        })?;

        let responses = dispatcher.dispatch(&message, &raw);
        match transport.mode() {
            TransportMode::Duplex => {
                for response in &responses {
                    transport.send(response).await?;
                }
            }
            TransportMode::Streamed if !responses.is_empty() => {
                tracing::trace!(
                    event = %message.msg,
                    dropped = responses.len(),
                    "Streamed transport is receive-only, dropping responses",
                );
            }
            TransportMode::Streamed => {}
        }

        if message.is_terminal() {
            return Ok(());
        }
        if message.msg == TERMINAL_EVENT {
            tracing::warn!(
                event_id = ?message.event_id,
                error = ?message.output.error,
                "Queue reported an unsuccessful completion",
            );
        }
    }
}

fn log_outcome(endpoint: &Url, outcome: &Result<(), SessionError>) {
    let state = SessionState::from_outcome(outcome);
    match outcome {
        Ok(()) => tracing::info!(endpoint = %endpoint, ?state, "Queue session completed"),
        Err(SessionError::Cancelled) => {
            tracing::info!(endpoint = %endpoint, ?state, "Queue session cancelled")
        }
        Err(e) => tracing::warn!(endpoint = %endpoint, ?state, error = %e, "Queue session failed"),
    }
}
