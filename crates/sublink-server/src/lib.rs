//! # sublink-server
//!
//! Axum `WebSocket` transport for GraphQL subscriptions.
//!
//! - `graphql-ws` protocol handling with a single-operation fallback
//! - Per-connection sessions, operation registry and stop/terminate semantics
//! - Backpressure-aware result delivery and a shared keep-alive scheduler
//! - `/health` and Prometheus `/metrics` endpoints
//! - Layered configuration (defaults, JSON file, `SUBLINK_*` environment)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod keepalive;
pub mod listener;
pub mod loader;
pub mod metrics;
pub mod operation;
pub mod operations;
pub mod protocol;
pub mod sender;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod tracker;
pub mod ws;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::ServerConfig;
pub use connection::{Connection, UserProperties, WsConnection};
pub use errors::ServerError;
pub use keepalive::KeepAliveScheduler;
pub use listener::{ConnectionListener, ConnectionRejected, NoopListener};
pub use loader::load_config;
pub use server::SublinkServer;
pub use session::{Session, SessionState};
