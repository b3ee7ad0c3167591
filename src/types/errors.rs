//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. The variants
//! follow the failure classes of the wire protocol: transport, protocol,
//! timeout, connection closed and handler failures.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the communication service.
#[derive(Error, Debug)]
pub enum Error {
    /// Connect/accept/read/write failure. Always moves the connection to `Closing`.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed frame, unknown or unhandled type tag.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No response arrived before the request deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The connection closed while the request was pending (or before it was sent).
    #[error("connection closed")]
    ConnectionClosed,

    /// A registered handler failed.
    #[error("handler error: {0}")]
    Handler(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Protocol-level errors. Local to one frame unless the frame boundary itself is lost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame body is not a JSON object.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Required envelope field is absent or has the wrong JSON type.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// No schema registered for the type tag.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// No handler registered for the type tag.
    #[error("unhandled message type: {0}")]
    UnhandledType(String),

    /// Declared frame length exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The response type did not pair with the request that was sent.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },
}

impl ProtocolError {
    /// Whether the stream can continue after this error.
    ///
    /// A frame that exceeds the size cap leaves the length prefix untrusted, so
    /// the remaining bytes cannot be resynchronised.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProtocolError::FrameTooLarge { .. })
    }

    /// Well-formed frame that nothing here accepts. Dropped without counting
    /// against the connection.
    pub fn is_unroutable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownType(_) | ProtocolError::UnhandledType(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::MalformedFrame(msg.into()))
    }

    /// True when the error means the connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_too_large_is_unrecoverable() {
        let err = ProtocolError::FrameTooLarge { size: 10, max: 5 };
        assert!(!err.is_recoverable());
        assert!(ProtocolError::UnknownType("Foo".to_string()).is_recoverable());
    }

    #[test]
    fn test_unroutable_frames() {
        assert!(ProtocolError::UnknownType("Foo".to_string()).is_unroutable());
        assert!(ProtocolError::UnhandledType("Foo".to_string()).is_unroutable());
        assert!(!ProtocolError::MalformedFrame("bad".to_string()).is_unroutable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::from(ProtocolError::UnhandledType("StopRegistrationRequest".into()));
        assert_eq!(
            err.to_string(),
            "protocol error: unhandled message type: StopRegistrationRequest"
        );
        assert_eq!(Error::ConnectionClosed.to_string(), "connection closed");
    }

    #[test]
    fn test_connection_lost_classification() {
        assert!(Error::ConnectionClosed.is_connection_lost());
        assert!(Error::Transport(std::io::ErrorKind::BrokenPipe.into()).is_connection_lost());
        assert!(!Error::timeout("late").is_connection_lost());
    }
}
