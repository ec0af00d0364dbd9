//! Client for the queue/join protocol of interactive inference services.
//!
//! A [`QueueSession`] joins a queue over either a WebSocket (duplex) or
//! a streamed HTTP response, decodes each event into a
//! [`QueueMessage`], runs the reactions registered for its event name,
//! and (duplex only) sends their responses back. The session ends on a
//! successful `process_completed`, on the first error, or when the
//! caller's cancellation token fires.

pub mod api;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod messages;
pub mod session;
pub mod transport;

pub use dispatcher::{EventDispatcher, Reaction, Response};
pub use endpoint::TransportMode;
pub use error::SessionError;
pub use messages::{parse_message, OutputShapeError, QueueMessage, QueueOutput};
pub use session::{QueueSession, SessionState};
