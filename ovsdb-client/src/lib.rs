//! # ovsdb-client
//!
//! Async client library for OVSDB servers.
//!
//! This crate provides:
//! - TCP, TLS and Unix socket transports
//! - A JSON-RPC broker with per-call timeouts and inbound handlers
//! - Monitor subscriptions that survive reconnects
//! - Replica mirroring on top of subscriptions
//! - Keep-alive probing and automatic reconnection

pub mod client;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod stream;
pub mod subscription;
#[cfg(test)]
mod test_peer;
pub mod tls;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, Handlers, RpcTransport};
pub use endpoint::Endpoint;
pub use error::ClientError;
pub use subscription::{Delivery, SubscriptionManager, SubscriptionState};
pub use tls::TlsClientConfig;
