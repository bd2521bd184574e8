//! # sparkkv - A Single-Threaded In-Memory Key-Value Server
//!
//! sparkkv is a Redis-compatible, in-memory key-value server written in
//! Rust. It speaks RESP v2 over TCP and serves every client from a single
//! thread using readiness-based I/O multiplexing.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP v2 framing, pipelining, the familiar
//!   SET/GET/DEL/PING/ECHO surface
//! - **Single-Threaded**: one poll(2) loop owns every socket and all
//!   state; no locks, no atomics, no async runtime
//! - **TTL Support**: per-key expiry with lazy removal on access plus a
//!   periodic sweep
//! - **LFU Eviction**: a memory ceiling enforced by evicting the least
//!   frequently read keys first
//! - **AOF Persistence**: mutating commands appended to a log and
//!   replayed on startup
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           sparkkv                              │
//! │                                                                │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐              │
//! │  │ Event Loop │──>│    RESP    │──>│  Command   │              │
//! │  │  (poll)    │   │   Parser   │   │  Handler   │              │
//! │  └────────────┘   └────────────┘   └─────┬──────┘              │
//! │                                          │                     │
//! │                              ┌───────────┴──────────┐          │
//! │                              ▼                      ▼          │
//! │                       ┌─────────────┐        ┌───────────┐     │
//! │                       │  Storage    │        │  AOF Log  │     │
//! │                       │  Engine     │        │           │     │
//! │                       └─────────────┘        └───────────┘     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sparkkv::commands::CommandHandler;
//! use sparkkv::persistence::AofLog;
//! use sparkkv::server::Server;
//!
//! fn main() -> std::io::Result<()> {
//!     let handler = CommandHandler::new(AofLog::new("redis.aof"));
//!     let mut server = Server::bind(6380, handler)?;
//!     server.run()
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]` / `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`
//! - `DEL key [key ...]`
//! - `CONFIG SET parameter value` / `CONFIG GET parameter`
//!   (`maxmemory`, `appendfsync`)
//! - `AOF ENABLE` / `AOF DISABLE`
//! - `INFO`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP frame codec (incremental parser + serializer)
//! - [`storage`]: keyspace engine with TTL, memory accounting, LFU
//! - [`persistence`]: append-only file write and replay paths
//! - [`commands`]: command validation and dispatch
//! - [`server`]: the poll event loop

pub mod commands;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use persistence::{AofLog, SyncPolicy};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::Server;
pub use storage::StorageEngine;

/// The default port sparkkv listens on
pub const DEFAULT_PORT: u16 = 6380;

/// Version of sparkkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
