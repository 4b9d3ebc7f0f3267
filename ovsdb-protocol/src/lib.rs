//! # ovsdb-protocol
//!
//! Wire protocol implementation for OVSDB (RFC 7047 JSON-RPC).
//!
//! This crate provides:
//! - JSON-RPC 1.0 request, notification and response envelopes
//! - Classification of inbound messages
//! - A streaming decoder for back-to-back JSON texts
//! - Method names and protocol constants

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use message::{Message, Method, Notification, Request, Response};

/// Default port for OVSDB servers.
pub const DEFAULT_PORT: u16 = 6640;

/// Maximum size of a single buffered message (64 MiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
