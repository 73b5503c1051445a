//! # nmdb - Networked Memory Database
//!
//! A key-value cache server in front of a pluggable persistent store.
//!
//! ## Architecture
//!
//! - `cache`: bounded hash table with per-bucket LRU eviction
//! - `backend`: pluggable persistent stores (sled, memory, null)
//! - `proto`: wire codec shared by every transport
//! - `dispatch`: cache-then-queue request routing
//! - `queue`: deferred-operation FIFO between the two threads
//! - `dbloop`: the database worker thread
//! - `reply`: transport-tagged reply sinks
//! - `server`: TIPC/TCP/UDP/SCTP listeners, signals, event loop
//! - `settings`, `state`, `stats`, `logging`: configuration and
//!   ambient plumbing

#![warn(clippy::all)]

// Core data structures
pub mod cache;
pub mod queue;
pub mod stats;

// Persistent stores
pub mod backend;

// Wire protocol and request handling
pub mod dispatch;
pub mod proto;
pub mod reply;

// The database worker
pub mod dbloop;

// Network front-end
pub mod server;

// Configuration and shared state
pub mod logging;
pub mod settings;
pub mod state;

// Re-export commonly used types
pub use backend::{BackendKind, Store};
pub use cache::Cache;
pub use settings::Settings;
pub use state::ServerState;

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
