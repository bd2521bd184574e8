//! Persistence Module
//!
//! Crash-recovery durability via an append-only file of mutating
//! commands. Read commands are never logged; replaying the file through
//! the dispatcher reproduces the keyspace.
//!
//! ## Write path
//!
//! ```text
//! client ──> dispatcher ──> keyspace
//!                │ (mutation succeeded, AOF enabled)
//!                ▼
//!          AofLog::append(original frame bytes)
//!                │ (everysec)
//!                ▼
//!            fsync ≥ 1s apart
//! ```
//!
//! ## Replay path
//!
//! On startup, an existing log is parsed as a concatenated RESP stream
//! and each command is dispatched with AOF writes suppressed. Corruption
//! anywhere aborts startup.

pub mod aof;

// Re-export commonly used types
pub use aof::{replay, AofLog, ReplayError, SyncPolicy, DEFAULT_AOF_PATH};
