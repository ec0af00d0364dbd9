//! Errors produced by a queue session.

/// Terminal failure of a queue session.
///
/// Every variant ends the session; nothing is retried inside the
/// session loop. Callers decide whether to start a fresh session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The base address could not be parsed or uses an unsupported scheme.
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    /// Failed to open the join endpoint (handshake, status or I/O).
    #[error("Connection error: {0}")]
    Connection(String),

    /// A message could not be decoded, or a response could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Reading from or writing to an established transport failed.
    #[error("Transport I/O error: {0}")]
    TransportIo(String),

    /// The caller's cancellation token fired.
    #[error("Session cancelled")]
    Cancelled,
}
