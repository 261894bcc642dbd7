//! Query listener and single-shot query sessions.
//!
//! Each connection gets a banner, sends exactly one line, receives the
//! response and is closed. The server keeps no per-connection state.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::buffer::LogBuffer;
use crate::irc::IrcServer;
use crate::persist::PersistenceManager;
use crate::query::QueryRequest;
use crate::server::conn::LineAccumulator;
use crate::server::metrics::ServerMetrics;
use crate::server::pool::WorkerPool;
use crate::utils::error::{Result, ServerError};

const BANNER: &str = "LogCrafter query interface; commands: HELP, COUNT, STATS, QUERY\n";

const HELP_TEXT: &str = "Commands:\n\
    HELP                      - this text\n\
    COUNT                     - number of buffered entries\n\
    STATS                     - buffer, persistence and session counters\n\
    QUERY key=value [...]     - search the buffer\n\
    QUERY parameters: keyword=, keywords=a,b operator=AND|OR, regex=, time_from=, time_to=\n";

/// Longest accepted command line.
const QUERY_LINE_LIMIT: usize = 512;

pub struct QueryServer {
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

impl QueryServer {
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
        QueryServer {
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

    pub fn start(self: Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .map_err(|err| ServerError::Bind(format!("query port {}: {}", self.port, err)))?;
        let addr = listener
            .local_addr()
            .map_err(|err| ServerError::Bind(format!("query local_addr: {}", err)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| ServerError::Bind(format!("query nonblocking: {}", err)))?;

        let server = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("query-accept".to_string())
            .spawn(move || server.accept_loop(listener))
            .map_err(|err| ServerError::Bind(format!("spawn query accept: {}", err)))?;
        info!(%addr, "query server listening");
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
                    warn!("query accept failed: {}", err);
                    std::thread::sleep(self.select_timeout);
                }
            }
        }
        debug!("query accept loop stopped");
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if self.metrics.active_sessions() >= self.max_clients {
            self.metrics.client_rejected();
            warn!(%addr, "query connection rejected: max_clients reached");
            return;
        }
        if stream.set_nonblocking(false).is_err()
            || stream
                .set_read_timeout(Some(self.select_timeout))
                .is_err()
        {
            return;
        }

        self.metrics.query_session_started();
        let server = Arc::clone(self);
        let submitted = self.pool.submit(move || {
            server.run_session(stream, addr);
            server.metrics.query_session_finished();
        });
        if submitted.is_err() {
            self.metrics.query_session_finished();
        }
    }

    fn run_session(&self, mut stream: TcpStream, addr: SocketAddr) {
        debug!(%addr, "query session started");
        if stream.write_all(BANNER.as_bytes()).is_err() {
            return;
        }

        let Some(line) = self.read_one_line(&mut stream) else {
            return;
        };
        let response = self.dispatch(line.trim_end_matches(['\r', '\n']));
        let _ = stream.write_all(response.as_bytes());
        debug!(%addr, "query session ended");
    }

    fn read_one_line(&self, stream: &mut TcpStream) -> Option<String> {
        let mut accumulator = LineAccumulator::new(QUERY_LINE_LIMIT);
        let mut buf = [0u8; 512];
        while self.running.load(Ordering::Acquire) {
            match stream.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => {
                    if let Some(line) = accumulator.extend(&buf[..n]).into_iter().next() {
                        return Some(String::from_utf8_lossy(&line).into_owned());
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => return None,
            }
        }
        None
    }

    fn dispatch(&self, line: &str) -> String {
        if line == "HELP" {
            return HELP_TEXT.to_string();
        }
        if line == "COUNT" {
            return format!("COUNT: {}\n", self.buffer.count());
        }
        if line == "STATS" {
            return self.format_stats();
        }
        if line == "QUERY" || line.starts_with("QUERY ") {
            // Bare "QUERY" falls through to the parser, which reports the
            // missing filters.
            let args = line.strip_prefix("QUERY").unwrap_or_default();
            return match QueryRequest::parse(args) {
                Ok(request) => {
                    let results = self.buffer.execute(&request);
                    let mut response = format!("FOUND: {}\n", results.len());
                    for entry in results {
                        response.push_str(&entry);
                        response.push('\n');
                    }
                    response
                }
                Err(err) => format!("ERROR: {}\n", err),
            };
        }
        "ERROR: Unknown command. Use HELP for usage.\n".to_string()
    }

    fn format_stats(&self) -> String {
        let buffer = self.buffer.stats();
        let mut line = format!(
            "STATS: Total={}, Dropped={}, Current={}",
            buffer.total_logs, buffer.dropped_logs, buffer.size
        );
        if let Some(persistence) = &self.persistence {
            let stats = persistence.stats();
            line.push_str(&format!(
                ", Persisted={}, PersistFailed={}",
                stats.persisted_logs, stats.failed_logs
            ));
        }
        let sessions = self.metrics.snapshot();
        line.push_str(&format!(
            ", ActiveLog={}, ActiveQuery={}",
            sessions.active_log_clients, sessions.active_query_clients
        ));
        if let Some(irc) = &self.irc {
            let stats = irc.stats();
            line.push_str(&format!(
                ", ActiveIRC={}, IRCChannels={}",
                stats.clients, stats.channels
            ));
        }
        line.push_str(&format!(
            ", Rejected={}, Uptime={}s",
            sessions.rejected_clients, sessions.uptime_secs
        ));
        line.push('\n');
        line
    }
}
