//! # IRC Module
//!
//! IRC-protocol fan-out layer: channels that stream buffer-filtered log
//! entries to subscribers in real time, plus the LogCrafter `!` command
//! extensions evaluated over the same buffer. The wire protocol is parsed
//! leniently; server state (clients, channels) lives behind two independent
//! locks that are only ever nested clients -> channels.

pub mod channel;
pub mod client;
pub mod command;
pub mod handler;
pub mod server;

pub use channel::{ChannelFilter, ChannelStats, IrcChannelManager};
pub use client::ClientId;
pub use server::{IrcServer, IrcStats};
