//! Storage Engine Module
//!
//! This module provides the keyspace for sparkkv: a string-valued map
//! with per-key TTL, an expiry index, approximate memory accounting and
//! LFU eviction.
//!
//! ## Features
//!
//! - **Single owner**: the engine lives on the event-loop thread and is
//!   passed around by `&mut` reference; nothing is shared
//! - **TTL support**: keys can carry an absolute millisecond deadline
//! - **Lazy expiry**: expired keys are cleaned on access
//! - **Active expiry**: the event loop sweeps the expiry index periodically
//! - **LFU eviction**: when a write would exceed the memory ceiling, the
//!   least-frequently-read entries are removed first
//!
//! ## Example
//!
//! ```
//! use sparkkv::storage::StorageEngine;
//! use bytes::Bytes;
//!
//! let mut engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("value"), None);
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("value")));
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::{now_ms, Entry, MemoryStats, StorageEngine, DEFAULT_MEMORY_LIMIT, ENTRY_OVERHEAD};
