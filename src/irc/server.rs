//! IRC listener, registration state machine and log fan-out.
//!
//! The accept loop runs on its own thread and spawns one reader thread per
//! connection. Each reader extracts complete lines (partial lines capped at
//! 512 bytes), processes them while holding the client-map lock, and sends
//! the collected replies only after the lock is released. Log fan-out runs
//! synchronously on the producer thread; a bounded write timeout plus
//! drop-on-error keeps one slow subscriber from ever stalling ingest.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::LogBuffer;
use crate::irc::channel::IrcChannelManager;
use crate::irc::client::{ClientId, IrcClient, send_line};
use crate::irc::command::{self, IrcCommand};
use crate::irc::handler::{self, BangContext};
use crate::persist::PersistenceManager;
use crate::server::conn::LineAccumulator;
use crate::utils::error::{Result, ServerError};
use crate::utils::time;

/// Longest retained partial line per connection.
const IRC_LINE_LIMIT: usize = 512;

/// Cap on a blocking send to one subscriber; beyond it the delivery drops.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot used by STATS and `!logstats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrcStats {
    pub clients: usize,
    pub channels: usize,
    pub dropped_deliveries: u64,
}

/// Replies produced by one command, resolved to write handles so they can be
/// sent after the client-map lock is released.
#[derive(Default)]
struct Outputs {
    sends: Vec<(Arc<TcpStream>, String)>,
    close: bool,
}

pub struct IrcServer {
    server_name: String,
    auto_join: Vec<String>,
    select_timeout: Duration,
    running: Arc<AtomicBool>,
    buffer: Arc<LogBuffer>,
    persistence: Option<Arc<PersistenceManager>>,
    channels: IrcChannelManager,
    clients: Mutex<AHashMap<ClientId, IrcClient>>,
    next_client_id: AtomicU64,
    dropped_deliveries: AtomicU64,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    reader_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl IrcServer {
    pub fn new(
        server_name: String,
        auto_join: Vec<String>,
        select_timeout: Duration,
        running: Arc<AtomicBool>,
        buffer: Arc<LogBuffer>,
        persistence: Option<Arc<PersistenceManager>>,
    ) -> Self {
        IrcServer {
            server_name,
            auto_join,
            select_timeout,
            running,
            buffer,
            persistence,
            channels: IrcChannelManager::new(),
            clients: Mutex::new(AHashMap::new()),
            next_client_id: AtomicU64::new(1),
            dropped_deliveries: AtomicU64::new(0),
            accept_handle: Mutex::new(None),
            reader_handles: Mutex::new(Vec::new()),
        }
    }

    /// Bind the IRC listener and start the accept thread. Returns the bound
    /// address so callers can use an ephemeral port.
    pub fn start(self: &Arc<Self>, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|err| ServerError::Bind(format!("irc port {}: {}", port, err)))?;
        let addr = listener
            .local_addr()
            .map_err(|err| ServerError::Bind(format!("irc local_addr: {}", err)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| ServerError::Bind(format!("irc nonblocking: {}", err)))?;

        let server = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("irc-accept".to_string())
            .spawn(move || server.accept_loop(listener))
            .map_err(|err| ServerError::Bind(format!("spawn irc accept: {}", err)))?;
        *self.accept_handle.lock() = Some(handle);
        info!(%addr, "IRC server listening");
        Ok(addr)
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.running.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(self.select_timeout);
                }
                Err(err) => {
                    warn!("IRC accept failed: {}", err);
                    std::thread::sleep(self.select_timeout);
                }
            }
        }
        debug!("IRC accept loop stopped");
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        // The accepted socket may inherit the listener's non-blocking mode.
        if stream.set_nonblocking(false).is_err()
            || stream.set_read_timeout(Some(self.select_timeout)).is_err()
            || stream.set_write_timeout(Some(WRITE_TIMEOUT)).is_err()
        {
            return;
        }
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let stream = Arc::new(stream);
        self.clients
            .lock()
            .insert(id, IrcClient::new(id, Arc::clone(&stream), addr));
        debug!(client = id, %addr, "IRC client connected");

        let server = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("irc-client-{}", id))
            .spawn(move || server.reader_loop(id, stream));
        match spawned {
            Ok(handle) => {
                let mut handles = self.reader_handles.lock();
                // Reap threads whose connections already ended.
                let (finished, live): (Vec<_>, Vec<_>) =
                    handles.drain(..).partition(|h| h.is_finished());
                *handles = live;
                handles.push(handle);
                drop(handles);
                for h in finished {
                    let _ = h.join();
                }
            }
            Err(err) => {
                warn!("spawn IRC reader failed: {}", err);
                self.drop_client(id);
            }
        }
    }

    fn reader_loop(self: Arc<Self>, id: ClientId, stream: Arc<TcpStream>) {
        let mut accumulator = LineAccumulator::new(IRC_LINE_LIMIT);
        let mut buf = [0u8; 1024];
        'session: while self.running.load(Ordering::Acquire) {
            match (&*stream).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for raw in accumulator.extend(&buf[..n]) {
                        let text = String::from_utf8_lossy(&raw);
                        let Some(cmd) = command::parse(&text) else {
                            continue;
                        };
                        let outputs = self.handle_command(id, cmd);
                        for (target, line) in &outputs.sends {
                            if send_line(target, line).is_err() {
                                self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        if outputs.close {
                            break 'session;
                        }
                    }
                }
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => break,
            }
        }
        self.drop_client(id);
    }

    fn drop_client(&self, id: ClientId) {
        self.channels.remove_client(id);
        if let Some(client) = self.clients.lock().remove(&id) {
            client.close();
            debug!(client = id, "IRC client disconnected");
        }
    }

    /// Apply one parsed command. Takes the client-map lock for the whole
    /// decision, resolving reply targets to write handles before returning
    /// so the caller can send lock-free. Lock order is always clients ->
    /// channels; the channel manager never calls back into the client map.
    fn handle_command(&self, id: ClientId, cmd: IrcCommand) -> Outputs {
        let mut outputs = Outputs::default();
        let mut messages: Vec<(ClientId, String)> = Vec::new();
        let mut clients = self.clients.lock();
        let Some(client) = clients.get(&id) else {
            return outputs;
        };
        let nick = client.nick().to_string();
        let registered = client.registered;
        let sn = self.server_name.clone();

        match cmd.verb.as_str() {
            "NICK" => match cmd.params.first() {
                Some(new_nick) if !new_nick.is_empty() => {
                    if let Some(client) = clients.get_mut(&id) {
                        client.nickname = Some(new_nick.clone());
                    }
                    self.try_register(&mut clients, id, &mut messages);
                }
                _ => messages.push((id, format!(":{} 431 {} :No nickname given", sn, nick))),
            },
            "USER" => {
                if cmd.params.len() < 4 {
                    messages.push((
                        id,
                        format!(":{} 461 {} USER :Not enough parameters", sn, nick),
                    ));
                } else {
                    if let Some(client) = clients.get_mut(&id) {
                        client.username = Some(cmd.params[0].clone());
                    }
                    self.try_register(&mut clients, id, &mut messages);
                }
            }
            "PASS" | "PONG" => {}
            "PING" => {
                let token = cmd.params.first().cloned().unwrap_or_else(|| sn.clone());
                messages.push((id, format!(":{} PONG {} :{}", sn, sn, token)));
            }
            "QUIT" => {
                messages.push((id, "ERROR :Closing link".to_string()));
                outputs.close = true;
            }
            _ if !registered => {
                messages.push((
                    id,
                    format!(":{} NOTICE {} :Register first using NICK and USER", sn, nick),
                ));
            }
            "JOIN" => match cmd.params.first() {
                Some(arg) => {
                    let names: Vec<String> = arg.split(',').map(str::to_string).collect();
                    self.join_and_reply(id, &nick, &names, &mut messages);
                }
                None => messages.push((
                    id,
                    format!(":{} 461 {} JOIN :Not enough parameters", sn, nick),
                )),
            },
            "PART" => match cmd.params.first() {
                Some(arg) => {
                    let names: Vec<String> = arg.split(',').map(str::to_string).collect();
                    for chan in self.channels.part(id, &names) {
                        messages.push((id, format!(":{} PART {}", nick, chan)));
                    }
                }
                None => messages.push((
                    id,
                    format!(":{} 461 {} PART :Not enough parameters", sn, nick),
                )),
            },
            "LIST" => {
                messages.push((id, format!(":{} 321 {} Channel :Users Name", sn, nick)));
                for row in self.channels.stats() {
                    let detail = if row.broadcasts_logs {
                        format!("{} broadcasts", row.broadcasts)
                    } else {
                        "chat".to_string()
                    };
                    messages.push((
                        id,
                        format!(":{} 322 {} {} {} :{}", sn, nick, row.name, row.members, detail),
                    ));
                }
                messages.push((id, format!(":{} 323 {} :End of /LIST", sn, nick)));
            }
            "NAMES" => {
                let targets: Vec<String> = match cmd.params.first() {
                    Some(arg) => arg.split(',').map(str::to_string).collect(),
                    None => self.channels.stats().into_iter().map(|s| s.name).collect(),
                };
                for target in targets {
                    let chan = IrcChannelManager::normalize(&target);
                    if let Some(members) = self.channels.members_for(&chan) {
                        let mut nicks: Vec<String> = members
                            .iter()
                            .filter_map(|member| clients.get(member))
                            .map(|member| member.nick().to_string())
                            .collect();
                        nicks.sort();
                        messages.push((
                            id,
                            format!(":{} 353 {} = {} :{}", sn, nick, chan, nicks.join(" ")),
                        ));
                    }
                    messages.push((
                        id,
                        format!(":{} 366 {} {} :End of /NAMES list", sn, nick, chan),
                    ));
                }
            }
            "TOPIC" => match cmd.params.first() {
                Some(target) => {
                    let chan = IrcChannelManager::normalize(target);
                    match self.channels.topic_for(&chan) {
                        Some(topic) if !topic.is_empty() => {
                            messages.push((id, format!(":{} 332 {} {} :{}", sn, nick, chan, topic)));
                        }
                        _ => {
                            messages.push((
                                id,
                                format!(":{} 331 {} {} :No topic is set", sn, nick, chan),
                            ));
                        }
                    }
                }
                None => messages.push((
                    id,
                    format!(":{} 461 {} TOPIC :Not enough parameters", sn, nick),
                )),
            },
            "PRIVMSG" => {
                let text = cmd.params.get(1);
                match (cmd.params.first(), text) {
                    (Some(_target), Some(text)) if text.starts_with('!') => {
                        let ctx = BangContext {
                            nickname: &nick,
                            buffer: &self.buffer,
                            channels: &self.channels,
                            persistence: self.persistence.as_deref(),
                            client_count: clients.len(),
                            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
                        };
                        let outcome = handler::handle_bang(&ctx, text);
                        for reply in outcome.replies {
                            messages.push((id, format!(":{} NOTICE {} :{}", sn, nick, reply)));
                        }
                        if !outcome.join.is_empty() {
                            self.join_and_reply(id, &nick, &outcome.join, &mut messages);
                        }
                        for chan in self.channels.part(id, &outcome.part) {
                            messages.push((id, format!(":{} PART {}", nick, chan)));
                        }
                    }
                    (Some(_), Some(_)) => {
                        messages.push((
                            id,
                            format!(
                                ":{} NOTICE {} :LogCrafter channels carry log traffic only; try !help",
                                sn, nick
                            ),
                        ));
                    }
                    _ => messages.push((
                        id,
                        format!(":{} 461 {} PRIVMSG :Not enough parameters", sn, nick),
                    )),
                }
            }
            "NOTICE" => {}
            "WHO" | "WHOIS" | "MODE" => {
                messages.push((
                    id,
                    format!(":{} NOTICE {} :{} is not implemented", sn, nick, cmd.verb),
                ));
            }
            _ => {
                messages.push((
                    id,
                    format!(":{} 421 {} {} :Unknown command", sn, nick, cmd.verb),
                ));
            }
        }

        outputs.sends = messages
            .into_iter()
            .filter_map(|(target, line)| {
                clients
                    .get(&target)
                    .map(|client| (client.stream_handle(), line))
            })
            .collect();
        outputs
    }

    /// Flip to registered once both NICK and USER have arrived, emitting the
    /// welcome sequence and auto-joining the configured channels.
    fn try_register(
        &self,
        clients: &mut AHashMap<ClientId, IrcClient>,
        id: ClientId,
        messages: &mut Vec<(ClientId, String)>,
    ) {
        let Some(client) = clients.get_mut(&id) else {
            return;
        };
        if client.registered || client.nickname.is_none() || client.username.is_none() {
            return;
        }
        client.registered = true;
        let nick = client.nick().to_string();
        let sn = &self.server_name;

        messages.push((
            id,
            format!(":{} 001 {} :Welcome to the LogCrafter IRC server {}", sn, nick, nick),
        ));
        messages.push((id, format!(":{} 422 {} :No MOTD available", sn, nick)));
        let auto_join = self.auto_join.clone();
        self.join_and_reply(id, &nick, &auto_join, messages);
        messages.push((
            id,
            format!(":{} NOTICE {} :LogCrafter extensions available; try !help", sn, nick),
        ));
        info!(client = id, nick = %nick, "IRC client registered");
    }

    fn join_and_reply(
        &self,
        id: ClientId,
        nick: &str,
        names: &[String],
        messages: &mut Vec<(ClientId, String)>,
    ) {
        for chan in self.channels.join(id, names) {
            messages.push((id, format!(":{} JOIN :{}", nick, chan)));
            if let Some(topic) = self.channels.topic_for(&chan)
                && !topic.is_empty()
            {
                messages.push((
                    id,
                    format!(":{} 332 {} {} :{}", self.server_name, nick, chan, topic),
                ));
            }
        }
    }

    /// Fan one freshly stored entry out to every registered subscriber whose
    /// channel filter accepts it. Runs on the producer (ingest) thread; the
    /// client-map lock is held only while collecting write handles.
    pub fn publish_log(&self, message: &str, timestamp: i64) {
        let deliveries = self.channels.prepare_log_deliveries(message);
        if deliveries.is_empty() {
            return;
        }
        let payload = format!("[{}] {}", time::format_timestamp(timestamp), message);

        let mut sends = Vec::with_capacity(deliveries.len());
        {
            let clients = self.clients.lock();
            for (member, chan) in deliveries {
                if let Some(client) = clients.get(&member)
                    && client.registered
                {
                    sends.push((
                        client.stream_handle(),
                        format!(":{} PRIVMSG {} :{}", self.server_name, chan, payload),
                    ));
                }
            }
        }
        for (stream, line) in sends {
            if send_line(&stream, &line).is_err() {
                self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> IrcStats {
        IrcStats {
            clients: self.clients.lock().len(),
            channels: self.channels.channel_count(),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
        }
    }

    pub fn channels(&self) -> &IrcChannelManager {
        &self.channels
    }

    /// Finish shutdown after the running flag has been cleared: join the
    /// accept loop, push `ERROR :Closing link` to every client best-effort,
    /// close all sockets and join the reader threads.
    pub fn stop(&self) {
        if let Some(handle) = self.accept_handle.lock().take() {
            let _ = handle.join();
        }
        let farewell: Vec<Arc<TcpStream>> = {
            let clients = self.clients.lock();
            clients.values().map(|client| client.stream_handle()).collect()
        };
        for stream in farewell {
            let _ = send_line(&stream, "ERROR :Closing link");
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        let handles: Vec<JoinHandle<()>> = self.reader_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.clients.lock().clear();
    }
}
