//! # Persistence Module
//!
//! Durable storage for ingested log lines with minimal impact on the ingest
//! hot path. A single background writer thread drains a channel, appends to
//! `current.log` with a flush per line, rotates by size into
//! `YYYY-MM-DD HH:MM:SS.log` files, and prunes the oldest rotated files past
//! the retention limit. On startup the replay path rebuilds the in-memory
//! buffer from whatever is on disk before live traffic is accepted.

pub mod manager;
pub mod replay;

pub use manager::{PersistenceConfig, PersistenceManager, PersistenceStats};
pub use replay::replay_existing;

/// Name of the mutable file currently being appended to.
pub const CURRENT_LOG: &str = "current.log";
