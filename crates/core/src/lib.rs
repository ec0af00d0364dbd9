//! Shared building blocks for the queue-session client crates.
//!
//! This crate has zero internal dependencies so that the protocol
//! constants and session-hash generator can be used by the session
//! client, the upscale poller and the runner alike.

pub mod protocol;
pub mod session_hash;
