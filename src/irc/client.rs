//! Per-connection IRC client records.
//!
//! The client map is the single owner of these records; channels refer to
//! clients by [`ClientId`] only, so a record can disappear at any time
//! without leaving dangling references behind.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

/// Stable connection identifier, unique for the server's lifetime.
pub type ClientId = u64;

pub struct IrcClient {
    pub id: ClientId,
    stream: Arc<TcpStream>,
    pub addr: SocketAddr,
    pub nickname: Option<String>,
    pub username: Option<String>,
    /// Set once both NICK and USER have arrived.
    pub registered: bool,
}

impl IrcClient {
    pub fn new(id: ClientId, stream: Arc<TcpStream>, addr: SocketAddr) -> Self {
        IrcClient {
            id,
            stream,
            addr,
            nickname: None,
            username: None,
            registered: false,
        }
    }

    /// Nickname for reply prefixes; `*` before NICK arrives.
    pub fn nick(&self) -> &str {
        self.nickname.as_deref().unwrap_or("*")
    }

    /// Cheap handle for sends performed after the server lock is released.
    pub fn stream_handle(&self) -> Arc<TcpStream> {
        Arc::clone(&self.stream)
    }

    /// Best-effort close of both directions; unblocks the reader thread.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Write one CRLF-terminated line to a client socket.
pub fn send_line(stream: &TcpStream, line: &str) -> io::Result<()> {
    let mut writer = stream;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")
}
