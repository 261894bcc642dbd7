//! Log ingest listener and sessions.
//!
//! The accept loop polls a non-blocking listener so the running flag is
//! observed within one select timeout, and hands each admitted connection to
//! the worker pool. A session reads newline-delimited lines and fans each
//! one out to the buffer, the persistence queue and the IRC layer, in that
//! order; the three sinks are independent and a failure in one never blocks
//! the others.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buffer::{LogBuffer, MAX_MESSAGE_BYTES};
use crate::irc::IrcServer;
use crate::persist::PersistenceManager;
use crate::server::conn::LineAccumulator;
use crate::server::metrics::ServerMetrics;
use crate::server::pool::WorkerPool;
use crate::utils::error::{Result, ServerError};

const BANNER: &str = "LogCrafter ingest ready; send newline-delimited log lines\n";

/// Retained partial-line cap. Anything longer still truncates to
/// [`MAX_MESSAGE_BYTES`] with a `...` marker during sanitization, so keeping
/// twice that is enough to make the marker deterministic.
const INGEST_LINE_LIMIT: usize = MAX_MESSAGE_BYTES * 2;

pub struct IngestServer {
    port: u16,
    select_timeout: Duration,
    max_clients: usize,
    running: Arc<AtomicBool>,
    buffer: Arc<LogBuffer>,
    persistence: Option<Arc<PersistenceManager>>,
    irc: Option<Arc<IrcServer>>,
    pool: Arc<WorkerPool>,
    metrics: Arc<ServerMetrics>,
}

impl IngestServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        port: u16,
        select_timeout: Duration,
        max_clients: usize,
        running: Arc<AtomicBool>,
        buffer: Arc<LogBuffer>,
        persistence: Option<Arc<PersistenceManager>>,
        irc: Option<Arc<IrcServer>>,
        pool: Arc<WorkerPool>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        IngestServer {
            port,
            select_timeout,
            max_clients,
            running,
            buffer,
            persistence,
            irc,
            pool,
            metrics,
        }
    }

    /// Bind the listener and spawn the accept thread. Binding happens here,
    /// not in the thread, so a port conflict fails startup.
    pub fn start(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .map_err(|err| ServerError::Bind(format!("ingest port {}: {}", self.port, err)))?;
        let addr = listener
            .local_addr()
            .map_err(|err| ServerError::Bind(format!("ingest local_addr: {}", err)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| ServerError::Bind(format!("ingest nonblocking: {}", err)))?;

        let server = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("ingest-accept".to_string())
            .spawn(move || server.accept_loop(listener))
            .map_err(|err| ServerError::Bind(format!("spawn ingest accept: {}", err)))?;
        info!(%addr, "ingest server listening");
        Ok((addr, handle))
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.running.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(self.select_timeout);
                }
                Err(err) => {
                    warn!("ingest accept failed: {}", err);
                    std::thread::sleep(self.select_timeout);
                }
            }
        }
        debug!("ingest accept loop stopped");
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if self.metrics.active_sessions() >= self.max_clients {
            self.metrics.client_rejected();
            warn!(%addr, "ingest connection rejected: max_clients reached");
            return;
        }
        if stream.set_nonblocking(false).is_err()
            || stream
                .set_read_timeout(Some(self.select_timeout))
                .is_err()
        {
            return;
        }

        self.metrics.log_session_started();
        let server = Arc::clone(self);
        let submitted = self.pool.submit(move || {
            server.run_session(stream, addr);
            server.metrics.log_session_finished();
        });
        if submitted.is_err() {
            // Pool already draining for shutdown; the socket just closes.
            self.metrics.log_session_finished();
        }
    }

    fn run_session(&self, mut stream: TcpStream, addr: SocketAddr) {
        debug!(%addr, "ingest session started");
        if stream.write_all(BANNER.as_bytes()).is_err() {
            return;
        }

        let mut accumulator = LineAccumulator::new(INGEST_LINE_LIMIT);
        let mut buf = [0u8; 1024];
        while self.running.load(Ordering::Acquire) {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in accumulator.extend(&buf[..n]) {
                        self.store_line(&line);
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(err) => {
                    debug!(%addr, "ingest read error: {}", err);
                    break;
                }
            }
        }
        debug!(%addr, "ingest session ended");
    }

    /// Buffer insert, persistence enqueue, IRC fan-out, in that order.
    fn store_line(&self, raw: &[u8]) {
        let (message, timestamp) = self.buffer.push_now(raw);
        if let Some(persistence) = &self.persistence {
            persistence.enqueue(&message, timestamp);
        }
        if let Some(irc) = &self.irc {
            irc.publish_log(&message, timestamp);
        }
    }
}
