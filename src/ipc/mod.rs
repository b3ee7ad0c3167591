//! TCP transport: length-prefixed JSON frames, request/response correlation
//! and handler dispatch.
//!
//! Either side may send requests. An inbound message whose id matches a
//! request this side sent resolves that request; anything else goes to the
//! handler registered for its type tag.

pub mod codec;
pub mod connection;
pub mod correlation;
pub mod dispatcher;
pub mod message;
pub mod registry;
pub mod server;
pub mod service;

pub use codec::{FrameCodec, DEFAULT_MAX_FRAME_BYTES, LENGTH_PREFIX_SIZE};
pub use connection::{Connection, ConnectionState};
pub use correlation::{CorrelationTable, PendingResponse};
pub use dispatcher::{Handler, HandlerDispatcher};
pub use message::Message;
pub use registry::{MessageRegistry, PayloadSchema};
pub use server::CommServer;
pub use service::CommService;
