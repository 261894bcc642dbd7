//! Component wiring and lifecycle.
//!
//! Startup order matters: persistence opens first, replay fills the buffer,
//! the IRC server comes up, and only then do the ingest and query listeners
//! start accepting, which guarantees that every replayed entry is in the
//! buffer before the first live line arrives. Shutdown reverses the flow:
//! stop accepting, drain the worker pool, drain persistence, close IRC.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::info;

use crate::buffer::LogBuffer;
use crate::config::Config;
use crate::irc::IrcServer;
use crate::persist::{self, PersistenceConfig, PersistenceManager};
use crate::server::ingest::IngestServer;
use crate::server::metrics::ServerMetrics;
use crate::server::pool::WorkerPool;
use crate::server::query_srv::QueryServer;
use crate::utils::error::Result;

/// A fully started LogCrafter instance.
pub struct LogCrafter {
    running: Arc<AtomicBool>,
    buffer: Arc<LogBuffer>,
    persistence: Option<Arc<PersistenceManager>>,
    irc: Option<Arc<IrcServer>>,
    pool: Arc<WorkerPool>,
    metrics: Arc<ServerMetrics>,
    ingest_addr: SocketAddr,
    query_addr: SocketAddr,
    irc_addr: Option<SocketAddr>,
    accept_handles: Vec<JoinHandle<()>>,
}

impl LogCrafter {
    /// Validate the configuration, build every component and start
    /// listening. On any error nothing keeps running.
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let select_timeout = Duration::from_millis(config.select_timeout_ms);
        let running = Arc::new(AtomicBool::new(true));
        let buffer = Arc::new(LogBuffer::new(config.buffer_capacity)?);
        let metrics = Arc::new(ServerMetrics::new());

        let persistence = if config.persistence_enabled {
            let manager = Arc::new(PersistenceManager::new(PersistenceConfig {
                directory: config.persistence_directory.clone(),
                max_file_size: config.persistence_max_file_size,
                max_files: config.persistence_max_files,
            })?);
            // Replay runs to completion before any listener exists, so live
            // entries can never interleave with replayed ones.
            let replay_buffer = Arc::clone(&buffer);
            persist::replay_existing(manager.directory(), |message, timestamp| {
                replay_buffer.push(message.as_bytes(), timestamp);
            })?;
            Some(manager)
        } else {
            None
        };

        let irc = if config.irc_enabled {
            let server = Arc::new(IrcServer::new(
                config.irc_server_name.clone(),
                config.irc_auto_join.clone(),
                select_timeout,
                Arc::clone(&running),
                Arc::clone(&buffer),
                persistence.clone(),
            ));
            Some(server)
        } else {
            None
        };
        let irc_addr = match &irc {
            Some(server) => Some(server.start(config.irc_port)?),
            None => None,
        };

        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        let mut accept_handles = Vec::with_capacity(2);

        let ingest = Arc::new(IngestServer::new(
            config.log_port,
            select_timeout,
            config.max_clients,
            Arc::clone(&running),
            Arc::clone(&buffer),
            persistence.clone(),
            irc.clone(),
            Arc::clone(&pool),
            Arc::clone(&metrics),
        ));
        let (ingest_addr, ingest_handle) = ingest.start()?;
        accept_handles.push(ingest_handle);

        let query = Arc::new(QueryServer::new(
            config.query_port,
            select_timeout,
            config.max_clients,
            Arc::clone(&running),
            Arc::clone(&buffer),
            persistence.clone(),
            irc.clone(),
            Arc::clone(&pool),
            Arc::clone(&metrics),
        ));
        let (query_addr, query_handle) = query.start()?;
        accept_handles.push(query_handle);

        info!(
            ingest = %ingest_addr,
            query = %query_addr,
            irc = ?irc_addr,
            "LogCrafter started"
        );
        Ok(LogCrafter {
            running,
            buffer,
            persistence,
            irc,
            pool,
            metrics,
            ingest_addr,
            query_addr,
            irc_addr,
            accept_handles,
        })
    }

    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub fn query_addr(&self) -> SocketAddr {
        self.query_addr
    }

    pub fn irc_addr(&self) -> Option<SocketAddr> {
        self.irc_addr
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Flag observed by every accept loop and session; clearing it stops
    /// the server within one select timeout.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Orderly shutdown: stop accepting, drain in-flight sessions, drain the
    /// persistence queue, close IRC clients.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.accept_handles.drain(..) {
            let _ = handle.join();
        }
        self.pool.shutdown();
        if let Some(persistence) = &self.persistence {
            persistence.shutdown();
        }
        if let Some(irc) = &self.irc {
            irc.stop();
        }
        info!("LogCrafter stopped");
    }

    /// Block until the server is externally stopped via [`Self::stop_flag`],
    /// then run the shutdown sequence.
    pub fn wait(mut self) {
        let handles: Vec<JoinHandle<()>> = self.accept_handles.drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.shutdown();
    }
}
