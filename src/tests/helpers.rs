//! Shared plumbing for the end-to-end tests: ephemeral-port configs,
//! loopback connections and polling with deadlines.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::server::LogCrafter;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Config bound to ephemeral ports with fast shutdown observation.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.log_port = 0;
    config.query_port = 0;
    config.irc_port = 0;
    config.select_timeout_ms = 50;
    config.worker_threads = 4;
    config
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(TEST_TIMEOUT))
        .expect("read timeout");
    stream
}

/// Connect to the ingest port, consume the banner, and return the stream.
pub fn ingest_client(server: &LogCrafter) -> (TcpStream, BufReader<TcpStream>) {
    let stream = connect(server.ingest_addr());
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut banner = String::new();
    reader.read_line(&mut banner).expect("banner");
    assert!(banner.contains("ingest"), "unexpected banner: {}", banner);
    (stream, reader)
}

/// Run one query-port exchange: read banner, send `line`, return the full
/// response (the server closes after responding).
pub fn query_exchange(server: &LogCrafter, line: &str) -> String {
    let mut stream = connect(server.query_addr());
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut banner = String::new();
    reader.read_line(&mut banner).expect("banner");

    stream.write_all(line.as_bytes()).expect("send");
    stream.write_all(b"\n").expect("send newline");

    let mut response = String::new();
    reader.read_to_string(&mut response).expect("response");
    response
}

/// Poll until `predicate` holds or the deadline passes.
pub fn wait_until(description: &str, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", description);
}

/// Read CRLF lines until one satisfies `predicate`, returning it. Panics if
/// the connection ends or the read timeout fires first.
pub fn read_line_matching(
    reader: &mut BufReader<TcpStream>,
    description: &str,
    mut predicate: impl FnMut(&str) -> bool,
) -> String {
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .unwrap_or_else(|err| panic!("reading for {}: {}", description, err));
        if n == 0 {
            panic!("connection closed while waiting for {}", description);
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if predicate(&line) {
            return line;
        }
    }
}

/// An IRC test connection registered as `nick`.
pub struct IrcTester {
    pub stream: TcpStream,
    pub reader: BufReader<TcpStream>,
}

impl IrcTester {
    pub fn register(addr: SocketAddr, nick: &str) -> Self {
        let stream = connect(addr);
        let reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut tester = IrcTester { stream, reader };
        tester.send(&format!("NICK {}", nick));
        tester.send(&format!("USER {} 0 * :{}", nick, nick));
        tester.expect(" 001 ", |line| line.contains(" 001 "));
        tester
    }

    pub fn send(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).expect("irc send");
        self.stream.write_all(b"\r\n").expect("irc send crlf");
    }

    pub fn expect(&mut self, description: &str, predicate: impl FnMut(&str) -> bool) -> String {
        read_line_matching(&mut self.reader, description, predicate)
    }

    /// Assert that nothing matching `predicate` arrives before the socket
    /// read timeout elapses.
    pub fn expect_silence(&mut self, quiet: Duration, mut predicate: impl FnMut(&str) -> bool) {
        self.stream
            .set_read_timeout(Some(quiet))
            .expect("read timeout");
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    assert!(
                        !predicate(line.trim_end_matches(['\r', '\n'])),
                        "unexpected line arrived: {}",
                        line
                    );
                }
                Err(_) => break,
            }
        }
        self.stream
            .set_read_timeout(Some(TEST_TIMEOUT))
            .expect("read timeout");
    }
}
