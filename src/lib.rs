//! # Basalt
//!
//! A Redis-compatible in-memory key-value server.
//!
//! The core pieces, leaves first:
//! - [`protocol`]: RESP2 codec — frames and the streaming parser
//! - [`types`]: typed value containers (string, list, hash, set,
//!   bitmap view)
//! - [`storage`]: sharded keyspace with ordered multi-key locking,
//!   TTL table, and the expiration timing wheel
//! - [`commands`]: the command table and dispatch engine
//! - [`server`]: configuration, TCP accept loop, per-client sessions
//!
//! ## Example
//!
//! ```no_run
//! use basalt::{Config, Server};
//!
//! #[tokio::main]
//! async fn main() -> basalt::Result<()> {
//!     let server = Server::new(Config::default());
//!     server.run().await
//! }
//! ```

#![warn(clippy::all, rust_2018_idioms, unused_lifetimes, unused_qualifications)]
#![allow(clippy::module_name_repetitions)]

/// Command parsing, registry, and the dispatch engine.
pub mod commands;
/// Error types and result aliases.
pub mod error;
/// RESP2 protocol implementation.
pub mod protocol;
/// TCP server and connection management.
pub mod server;
/// Sharded in-memory storage and expiration.
pub mod storage;
/// Typed value containers.
pub mod types;

pub use commands::Engine;
pub use error::{Error, Result};
pub use protocol::{Frame, RespParser};
pub use server::{Config, Server, Session};
pub use storage::Db;
pub use types::Value;

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Redis version reported for client compatibility.
pub const SERVER_VERSION: &str = "7.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Maximum inline request size (64 KiB).
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum bulk string size (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Default maximum number of concurrent clients.
pub const MAX_CLIENTS: usize = 10_000;
