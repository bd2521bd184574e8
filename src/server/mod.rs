//! Server Module
//!
//! The event loop that ties everything together: one thread, one
//! pollset, many clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Server (one thread)                  │
//! │                                                          │
//! │   poll(listener + every client, 1s timeout)              │
//! │        │                                                 │
//! │        ├── maintenance: expiry sweep, AOF sync           │
//! │        ├── accept-drain ──> new Connection records       │
//! │        └── per ready connection:                         │
//! │              read ──> parse ──> execute ──> buffer reply │
//! │              write-drain (shared 64 KiB budget)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All process-wide state (keyspace, expiry index, memory stats, AOF)
//! lives inside the `CommandHandler` the loop owns. There is exactly one
//! thread of execution, so no locks, atomics or channels appear anywhere
//! on the serving path.

pub mod event_loop;

// Re-export the server entry point
pub use event_loop::Server;
