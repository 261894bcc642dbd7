//! Channel registry with log-broadcast filters.
//!
//! Five reserved `#logs-*` channels always exist and stream buffer traffic
//! through case-insensitive level filters. Regular channels are created on
//! JOIN and garbage-collected when their last member leaves; per-user filter
//! channels created by `!logfilter` behave like log channels and survive
//! empty. Channels hold member ids only; the client map owns the records and
//! tells the manager when an id dies.

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::irc::client::ClientId;

/// `(name, topic, level substring)` for the permanent log channels.
const RESERVED_CHANNELS: [(&str, &str, Option<&str>); 5] = [
    ("#logs-all", "All ingested log entries", None),
    ("#logs-error", "Log entries containing 'error'", Some("error")),
    ("#logs-warning", "Log entries containing 'warn'", Some("warn")),
    ("#logs-info", "Log entries containing 'info'", Some("info")),
    ("#logs-debug", "Log entries containing 'debug'", Some("debug")),
];

/// Predicate deciding which log messages a channel streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFilter {
    /// Every message.
    All,
    /// Every keyword must appear, case-insensitively.
    AllOf(Vec<String>),
}

impl ChannelFilter {
    pub fn accepts(&self, message: &str) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::AllOf(keywords) => {
                let lower = message.to_lowercase();
                keywords.iter().all(|keyword| lower.contains(keyword.as_str()))
            }
        }
    }
}

struct IrcChannel {
    name: String,
    topic: String,
    broadcasts_logs: bool,
    filter: ChannelFilter,
    members: AHashSet<ClientId>,
    broadcast_count: u64,
}

impl IrcChannel {
    fn reserved(name: &str, topic: &str, level: Option<&str>) -> Self {
        IrcChannel {
            name: name.to_string(),
            topic: topic.to_string(),
            broadcasts_logs: true,
            filter: match level {
                Some(keyword) => ChannelFilter::AllOf(vec![keyword.to_string()]),
                None => ChannelFilter::All,
            },
            members: AHashSet::new(),
            broadcast_count: 0,
        }
    }

    fn regular(name: &str) -> Self {
        IrcChannel {
            name: name.to_string(),
            topic: String::new(),
            broadcasts_logs: false,
            filter: ChannelFilter::All,
            members: AHashSet::new(),
            broadcast_count: 0,
        }
    }
}

/// One row of [`IrcChannelManager::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub name: String,
    pub members: usize,
    pub broadcasts: u64,
    pub broadcasts_logs: bool,
}

/// Registry of channels keyed by normalized name, behind one lock.
pub struct IrcChannelManager {
    inner: Mutex<AHashMap<String, IrcChannel>>,
}

impl IrcChannelManager {
    /// New registry seeded with the reserved log channels.
    pub fn new() -> Self {
        let manager = IrcChannelManager {
            inner: Mutex::new(AHashMap::new()),
        };
        manager.reset();
        manager
    }

    /// Drop everything and recreate the reserved channels with defaults.
    pub fn reset(&self) {
        let mut channels = self.inner.lock();
        channels.clear();
        for (name, topic, level) in RESERVED_CHANNELS {
            channels.insert(name.to_string(), IrcChannel::reserved(name, topic, level));
        }
    }

    /// Trim, prepend `#` if missing, lowercase.
    pub fn normalize(name: &str) -> String {
        let trimmed = name.trim();
        if trimmed.starts_with('#') {
            trimmed.to_lowercase()
        } else {
            format!("#{}", trimmed.to_lowercase())
        }
    }

    /// Add `client` to each named channel, creating channels as needed.
    /// Reserved log channels are recreated with defaults if missing; other
    /// names become regular (non-broadcasting) channels. Returns the
    /// normalized names newly joined.
    pub fn join(&self, client: ClientId, names: &[String]) -> Vec<String> {
        let mut channels = self.inner.lock();
        let mut joined = Vec::new();
        for raw in names {
            let name = Self::normalize(raw);
            if name == "#" {
                continue;
            }
            let channel = channels.entry(name.clone()).or_insert_with(|| {
                match RESERVED_CHANNELS.iter().find(|(n, _, _)| *n == name) {
                    Some((n, topic, level)) => IrcChannel::reserved(n, topic, *level),
                    None => IrcChannel::regular(&name),
                }
            });
            if channel.members.insert(client) {
                joined.push(name);
            }
        }
        joined
    }

    /// Remove `client` from each named channel; empty regular channels are
    /// deleted. Returns the normalized names actually parted.
    pub fn part(&self, client: ClientId, names: &[String]) -> Vec<String> {
        let mut channels = self.inner.lock();
        let mut parted = Vec::new();
        for raw in names {
            let name = Self::normalize(raw);
            if let Some(channel) = channels.get_mut(&name)
                && channel.members.remove(&client)
            {
                if !channel.broadcasts_logs && channel.members.is_empty() {
                    channels.remove(&name);
                }
                parted.push(name);
            }
        }
        parted
    }

    /// Scrub a disconnected client from every channel.
    pub fn remove_client(&self, client: ClientId) {
        let mut channels = self.inner.lock();
        channels.retain(|_, channel| {
            channel.members.remove(&client);
            channel.broadcasts_logs || !channel.members.is_empty()
        });
    }

    /// For one stored log message, record a broadcast on every accepting log
    /// channel and collect `(member, channel)` delivery pairs.
    pub fn prepare_log_deliveries(
        &self,
        message: &str,
    ) -> SmallVec<[(ClientId, String); 8]> {
        let mut channels = self.inner.lock();
        let mut deliveries = SmallVec::new();
        for channel in channels.values_mut() {
            if !channel.broadcasts_logs || !channel.filter.accepts(message) {
                continue;
            }
            channel.broadcast_count += 1;
            for &member in &channel.members {
                deliveries.push((member, channel.name.clone()));
            }
        }
        deliveries
    }

    /// Create the named filter channel, or replace an existing channel's
    /// filter and topic, marking it as a log channel either way.
    pub fn ensure_filter_channel(
        &self,
        name: &str,
        topic: &str,
        keywords: Vec<String>,
    ) -> String {
        let name = Self::normalize(name);
        let mut channels = self.inner.lock();
        let channel = channels
            .entry(name.clone())
            .or_insert_with(|| IrcChannel::regular(&name));
        channel.topic = topic.to_string();
        channel.filter = ChannelFilter::AllOf(keywords);
        channel.broadcasts_logs = true;
        name
    }

    /// Per-channel summary, log channels first, then by name.
    pub fn stats(&self) -> Vec<ChannelStats> {
        let channels = self.inner.lock();
        let mut rows: Vec<ChannelStats> = channels
            .values()
            .map(|channel| ChannelStats {
                name: channel.name.clone(),
                members: channel.members.len(),
                broadcasts: channel.broadcast_count,
                broadcasts_logs: channel.broadcasts_logs,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.broadcasts_logs
                .cmp(&a.broadcasts_logs)
                .then_with(|| a.name.cmp(&b.name))
        });
        rows
    }

    pub fn members_for(&self, name: &str) -> Option<Vec<ClientId>> {
        let channels = self.inner.lock();
        channels
            .get(&Self::normalize(name))
            .map(|channel| channel.members.iter().copied().collect())
    }

    pub fn topic_for(&self, name: &str) -> Option<String> {
        let channels = self.inner.lock();
        channels
            .get(&Self::normalize(name))
            .map(|channel| channel.topic.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for IrcChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
