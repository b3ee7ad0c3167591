//! Core types for the communication service.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (CorrelationId, ConnectionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for server, protocol and logging

mod config;
mod errors;
mod ids;

pub use config::{
    CommConfig, Config, HandlerExecution, ObservabilityConfig, ServerConfig, ENV_LISTEN_ADDR,
    ENV_LOG_LEVEL,
};
pub use errors::{Error, ProtocolError, Result};
pub use ids::{ConnectionId, CorrelationId};
