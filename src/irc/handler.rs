//! LogCrafter `!` command handling.
//!
//! PRIVMSG bodies starting with `!` are translated here into buffer reads
//! and channel membership changes. The handler never touches client records
//! or sockets: results come back as `(join, part, replies)` and the server
//! applies them under its own locking.

use once_cell::sync::Lazy;

use ahash::AHashMap;

use crate::buffer::LogBuffer;
use crate::irc::channel::IrcChannelManager;
use crate::persist::PersistenceManager;
use crate::query::QueryRequest;

/// Result lines shown for `!query` before truncation kicks in.
const MAX_QUERY_RESULTS: usize = 5;

/// Maximum length of the nickname-derived filter-channel slug.
const MAX_SLUG_LEN: usize = 12;

static LOGSTREAM_CHANNELS: Lazy<AHashMap<&'static str, &'static str>> = Lazy::new(|| {
    AHashMap::from_iter([
        ("all", "#logs-all"),
        ("error", "#logs-error"),
        ("warning", "#logs-warning"),
        ("info", "#logs-info"),
        ("debug", "#logs-debug"),
    ])
});

/// Everything a `!` command may read.
pub struct BangContext<'a> {
    pub nickname: &'a str,
    pub buffer: &'a LogBuffer,
    pub channels: &'a IrcChannelManager,
    pub persistence: Option<&'a PersistenceManager>,
    pub client_count: usize,
    pub dropped_deliveries: u64,
}

/// Channel membership changes plus NOTICE bodies for the sender.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BangOutcome {
    pub join: Vec<String>,
    pub part: Vec<String>,
    pub replies: Vec<String>,
}

impl BangOutcome {
    fn reply(text: impl Into<String>) -> Self {
        BangOutcome {
            replies: vec![text.into()],
            ..Default::default()
        }
    }
}

/// Derive the filter-channel slug from a nickname: lowercase, every
/// non-alphanumeric becomes `-`, capped at 12 characters, trailing dashes
/// dropped, `anon` when nothing survives.
pub fn nick_slug(nickname: &str) -> String {
    let slug: String = nickname
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "anon".to_string()
    } else {
        slug.to_string()
    }
}

fn filter_channel_for(nickname: &str) -> String {
    format!("#logs-filter-{}", nick_slug(nickname))
}

/// Dispatch one `!` command body.
pub fn handle_bang(ctx: &BangContext<'_>, body: &str) -> BangOutcome {
    let (verb, args) = match body.split_once(' ') {
        Some((verb, args)) => (verb, args.trim()),
        None => (body, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "!query" => run_query(ctx, args),
        "!logstream" => logstream(args),
        "!logfilter" => logfilter(ctx, args),
        "!logstats" => logstats(ctx),
        "!help" => BangOutcome {
            replies: vec![
                "LogCrafter commands:".to_string(),
                "!query <key=value ...> - search the log buffer".to_string(),
                "!logstream <all|error|warning|info|debug|off> - join or leave log channels"
                    .to_string(),
                "!logfilter <kw[,kw...]|off> - personal AND-filtered log channel".to_string(),
                "!logstats - buffer, persistence and IRC statistics".to_string(),
                "!help - this list".to_string(),
            ],
            ..Default::default()
        },
        _ => BangOutcome::reply("Unknown command. Try !help for usage."),
    }
}

fn run_query(ctx: &BangContext<'_>, args: &str) -> BangOutcome {
    let request = match QueryRequest::parse(args) {
        Ok(request) => request,
        Err(err) => return BangOutcome::reply(format!("ERROR: {}", err)),
    };

    let results = ctx.buffer.execute(&request);
    if results.is_empty() {
        return BangOutcome::reply("!query matched no entries");
    }

    let total = results.len();
    let shown = total.min(MAX_QUERY_RESULTS);
    let mut summary = if total == 1 {
        "!query matched 1 entry".to_string()
    } else {
        format!("!query matched {} entries", total)
    };
    if shown < total {
        summary.push_str(&format!(" (showing {})", shown));
    }

    let mut replies = Vec::with_capacity(shown + 1);
    replies.push(summary);
    replies.extend(results.into_iter().take(shown));
    BangOutcome {
        replies,
        ..Default::default()
    }
}

fn logstream(args: &str) -> BangOutcome {
    let level = args.to_ascii_lowercase();
    if level == "off" {
        return BangOutcome {
            part: LOGSTREAM_CHANNELS.values().map(|c| c.to_string()).collect(),
            replies: vec!["Left all log channels".to_string()],
            ..Default::default()
        };
    }
    match LOGSTREAM_CHANNELS.get(level.as_str()) {
        Some(channel) => BangOutcome {
            join: vec![channel.to_string()],
            replies: vec![format!("Streaming {} logs via {}", level, channel)],
            ..Default::default()
        },
        None => BangOutcome::reply(format!(
            "Invalid log stream '{}'. Valid: all, error, warning, info, debug, off",
            args
        )),
    }
}

fn logfilter(ctx: &BangContext<'_>, args: &str) -> BangOutcome {
    if args.is_empty() {
        return BangOutcome::reply("Usage: !logfilter <keyword[,keyword...]> or !logfilter off");
    }

    let channel = filter_channel_for(ctx.nickname);
    if args.eq_ignore_ascii_case("off") {
        return BangOutcome {
            part: vec![channel.clone()],
            replies: vec![format!("Left filter channel {}", channel)],
            ..Default::default()
        };
    }

    let keywords: Vec<String> = args
        .split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect();
    if keywords.is_empty() {
        return BangOutcome::reply("Usage: !logfilter <keyword[,keyword...]> or !logfilter off");
    }

    let topic = format!("Filtered logs: {}", keywords.join(", "));
    let name = ctx.channels.ensure_filter_channel(&channel, &topic, keywords);
    BangOutcome {
        join: vec![name.clone()],
        replies: vec![format!("Filter active on {}", name)],
        ..Default::default()
    }
}

fn logstats(ctx: &BangContext<'_>) -> BangOutcome {
    let buffer = ctx.buffer.stats();
    let mut line = format!(
        "Logs: total={}, dropped={}, current={}",
        buffer.total_logs, buffer.dropped_logs, buffer.size
    );

    if let Some(persistence) = ctx.persistence {
        let stats = persistence.stats();
        line.push_str(&format!(
            " | Persist: queued={}, persisted={}, failed={}, backlog={}",
            stats.queued_logs,
            stats.persisted_logs,
            stats.failed_logs,
            persistence.queue_depth()
        ));
    }

    line.push_str(&format!(
        " | IRC: clients={}, channels={}, dropped_deliveries={}",
        ctx.client_count,
        ctx.channels.channel_count(),
        ctx.dropped_deliveries
    ));

    let mut rows = ctx.channels.stats();
    rows.sort_by(|a, b| b.members.cmp(&a.members).then_with(|| a.name.cmp(&b.name)));
    let top: Vec<String> = rows
        .iter()
        .take(3)
        .map(|row| format!("{}({})", row.name, row.members))
        .collect();
    if !top.is_empty() {
        line.push_str(&format!(" | Top: {}", top.join(" ")));
    }

    BangOutcome::reply(line)
}
