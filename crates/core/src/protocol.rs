//! Wire-level constants of the queue/join protocol.

/// Path appended to the base address to join the queue.
pub const JOIN_PATH: &str = "/queue/join";

/// Path that streamed-transport servers expect work payloads on.
pub const DATA_PATH: &str = "/queue/data";

/// Literal prefix of a payload-carrying line on the streamed transport.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Event name that ends a session when reported with `success: true`.
pub const TERMINAL_EVENT: &str = "process_completed";

/// Registration name of the reaction invoked for every message.
pub const WILDCARD_EVENT: &str = "*";

/// Event asking the client to identify its session.
pub const SEND_HASH_EVENT: &str = "send_hash";

/// Event asking the client to submit its work payload.
pub const SEND_DATA_EVENT: &str = "send_data";
