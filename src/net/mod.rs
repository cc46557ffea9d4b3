//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address strings
//!     → address.rs (tcp://host:port | unix:/path)
//!     → listener.rs (bind while privileged, chmod unix sockets)
//!     ... privilege drop ...
//!     → listener.rs (attach to runtime, accept with connection limits)
//!     → connection.rs (lifecycle tracking for graceful shutdown)
//!     → Hand off to ingestion or admin service
//! ```
//!
//! # Design Decisions
//! - No socket is ever created after privilege drop
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked so shutdown can wait for clients to leave

pub mod address;
pub mod connection;
pub mod listener;

pub use address::ServerAddress;
pub use listener::{bind_listeners, Accepted, BoundSocket, Listener, ListeningSocketSet};
