//! Address derivation for the queue endpoints.
//!
//! A session is configured with one base address (e.g.
//! `https://host.hf.space` or `wss://host.hf.space?fn_index=0`). The
//! join, data and file addresses are all derived from it, switching
//! between the HTTP and WebSocket scheme families while preserving the
//! secure/insecure choice.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use sdq_core::protocol::{DATA_PATH, JOIN_PATH};

use crate::error::SessionError;

/// How a session talks to the join endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Persistent WebSocket connection; reaction responses are sent back.
    Duplex,
    /// Long-lived HTTP response read line by line; receive-only.
    Streamed,
}

impl TransportMode {
    /// Default mode for a base address scheme.
    ///
    /// `ws`/`wss` select [`Duplex`](Self::Duplex), `http`/`https`
    /// select [`Streamed`](Self::Streamed). Any other scheme is `None`.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "wss" => Some(Self::Duplex),
            "http" | "https" => Some(Self::Streamed),
            _ => None,
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplex => f.write_str("duplex"),
            Self::Streamed => f.write_str("streamed"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duplex" | "websocket" | "ws" => Ok(Self::Duplex),
            "streamed" | "stream" | "sse" | "http" => Ok(Self::Streamed),
            other => Err(format!("unknown transport mode `{other}`")),
        }
    }
}

/// Join address for `base` under the given transport mode.
///
/// Produces `{scheme}://{host}{path}/queue/join[?{query}]`, where the
/// scheme is the WebSocket variant for duplex mode and the HTTP variant
/// for streamed mode.
pub fn join_url(base: &Url, mode: TransportMode) -> Result<Url, SessionError> {
    let scheme = match (mode, is_secure(base)?) {
        (TransportMode::Duplex, true) => "wss",
        (TransportMode::Duplex, false) => "ws",
        (TransportMode::Streamed, true) => "https",
        (TransportMode::Streamed, false) => "http",
    };
    derive(base, scheme, JOIN_PATH, true)
}

/// Address the streamed-transport servers accept work payloads on.
pub fn data_url(base: &Url) -> Result<Url, SessionError> {
    derive(base, http_scheme(base)?, DATA_PATH, false)
}

/// Download address of a file produced by the server, as
/// `{base}/file={name}`.
pub fn file_url(base: &Url, name: &str) -> Result<String, SessionError> {
    let root = derive(base, http_scheme(base)?, "", false)?;
    Ok(format!("{}/file={name}", root.as_str().trim_end_matches('/')))
}

fn http_scheme(base: &Url) -> Result<&'static str, SessionError> {
    Ok(if is_secure(base)? { "https" } else { "http" })
}

fn is_secure(base: &Url) -> Result<bool, SessionError> {
    match base.scheme() {
        "https" | "wss" => Ok(true),
        "http" | "ws" => Ok(false),
        other => Err(SessionError::InvalidUrl(format!(
            "unsupported scheme `{other}` in {base}"
        ))),
    }
}

fn derive(base: &Url, scheme: &str, suffix: &str, keep_query: bool) -> Result<Url, SessionError> {
    let mut url = base.clone();
    url.set_scheme(scheme).map_err(|()| {
        SessionError::InvalidUrl(format!("cannot switch {base} to scheme `{scheme}`"))
    })?;

    let path = format!("{}{suffix}", base.path().trim_end_matches('/'));
    url.set_path(&path);
    if !keep_query {
        url.set_query(None);
    }
    url.set_fragment(None);
    Ok(url)
}
