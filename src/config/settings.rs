//! Server configuration.
//!
//! All fields are optional in the JSON file; absent fields take the
//! documented defaults. `validate` runs once at startup so every component
//! can assume sane values afterwards.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, ServerError};

/// Complete configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port for the log ingest listener.
    pub log_port: u16,
    /// TCP port for the query listener.
    pub query_port: u16,
    /// TCP port for the IRC listener (only bound when `irc_enabled`).
    pub irc_port: u16,
    pub irc_enabled: bool,
    /// Server name used in IRC reply prefixes.
    pub irc_server_name: String,
    /// Channels every client is joined to on registration.
    pub irc_auto_join: Vec<String>,
    pub persistence_enabled: bool,
    pub persistence_directory: PathBuf,
    /// Rotation threshold in bytes for `current.log`.
    pub persistence_max_file_size: u64,
    /// Retained rotated files after pruning.
    pub persistence_max_files: usize,
    /// Fixed in-memory window size in entries.
    pub buffer_capacity: usize,
    /// Worker threads serving ingest/query sessions.
    pub worker_threads: usize,
    /// Cap on concurrent ingest + query sessions.
    pub max_clients: usize,
    /// Poll interval for accept loops and session reads; bounds shutdown
    /// latency.
    pub select_timeout_ms: u64,
    /// Requested accept backlog. Recognized and validated, but the standard
    /// listener does not expose the backlog, so the OS default applies.
    pub max_pending_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_port: 9999,
            query_port: 9998,
            irc_port: 6667,
            irc_enabled: false,
            irc_server_name: "logcrafter".to_string(),
            irc_auto_join: vec!["#logs-all".to_string()],
            persistence_enabled: false,
            persistence_directory: PathBuf::from("./logs"),
            persistence_max_file_size: 10 * 1024 * 1024,
            persistence_max_files: 10,
            buffer_capacity: 10_000,
            worker_threads: 4,
            max_clients: 64,
            select_timeout_ms: 500,
            max_pending_connections: 32,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, filling absent fields with
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            ServerError::ConfigFile(format!("open {}: {}", path.display(), err))
        })?;
        let config: Config = serde_json::from_reader(file).map_err(|err| {
            ServerError::ConfigFile(format!("parse {}: {}", path.display(), err))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(ServerError::InvalidConfig(
                "buffer_capacity must be positive".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::InvalidConfig(
                "worker_threads must be positive".to_string(),
            ));
        }
        if self.select_timeout_ms == 0 || self.select_timeout_ms > 1000 {
            return Err(ServerError::InvalidConfig(
                "select_timeout_ms must be within 1..=1000".to_string(),
            ));
        }
        if self.max_clients == 0 {
            return Err(ServerError::InvalidConfig(
                "max_clients must be positive".to_string(),
            ));
        }
        if self.persistence_enabled && self.persistence_max_file_size == 0 {
            return Err(ServerError::InvalidConfig(
                "persistence_max_file_size must be positive".to_string(),
            ));
        }
        if self.irc_enabled && self.irc_server_name.is_empty() {
            return Err(ServerError::InvalidConfig(
                "irc_server_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
