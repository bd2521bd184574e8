//! Command Handler Module
//!
//! The command processing layer: parsed RESP frames come in, RESP
//! responses go out.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ├──────────────────┐
//!          ▼                  ▼
//! ┌─────────────────┐  ┌─────────────┐
//! │ StorageEngine   │  │   AofLog    │
//! └─────────────────┘  └─────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO`
//! - `SET` (with `EX`/`PX`), `GET`, `DEL`
//! - `CONFIG SET` / `CONFIG GET` (`maxmemory`, `appendfsync`)
//! - `AOF ENABLE` / `AOF DISABLE`
//! - `INFO`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
