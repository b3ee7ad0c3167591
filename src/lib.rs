//! # catheter-comm - console ↔ processing server messaging
//!
//! Framed request/response messaging over TCP between the catheter
//! registration console and the registration processing server:
//! - Length-prefixed JSON frames carrying a correlation id and a type tag
//! - A catalogue of typed request/response messages
//! - Per-connection correlation of responses to outstanding requests
//! - Handler dispatch for requests initiated by the peer
//!
//! ## Architecture
//!
//! ```text
//!   CommService ── registry + dispatcher + config (shared)
//!        │
//!        ├── connect() → Connection ─┐
//!        └── bind() → CommServer ─ accept → Connection
//!                                    │
//!        ┌───────────────────────────┘
//!        ▼
//!   read loop ── id pending? ── yes → CorrelationTable → waiting request
//!                      │
//!                      no → HandlerDispatcher → handler → reply (same id)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod ipc;
pub mod messages;
pub mod types;

// Internal utilities
pub mod observability;

pub use ipc::{CommServer, CommService, Connection, ConnectionState, Handler};
pub use types::{CommConfig, Config, Error, ProtocolError, Result};
