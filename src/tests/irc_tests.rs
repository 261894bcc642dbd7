//! IRC registration, channel membership and log fan-out scenarios.

use std::io::Write;
use std::time::Duration;

use crate::server::LogCrafter;
use crate::tests::helpers::{IrcTester, ingest_client, test_config};

fn irc_config(auto_join: &[&str]) -> crate::config::Config {
    let mut config = test_config();
    config.irc_enabled = true;
    config.irc_auto_join = auto_join.iter().map(|s| s.to_string()).collect();
    config
}

#[test]
fn test_registration_welcome_sequence() {
    let server = LogCrafter::start(irc_config(&["#logs-all"])).unwrap();
    let addr = server.irc_addr().unwrap();

    let stream = crate::tests::helpers::connect(addr);
    let reader = std::io::BufReader::new(stream.try_clone().unwrap());
    let mut tester = IrcTester { stream, reader };

    // Commands before registration are refused, PING still works.
    tester.send("JOIN #logs-error");
    tester.expect("register-first notice", |l| l.contains("Register first"));
    tester.send("PING :abc");
    tester.expect("pong", |l| l.contains("PONG") && l.ends_with(":abc"));

    tester.send("NICK alice");
    tester.send("USER alice 0 * :Alice");
    tester.expect("welcome", |l| l.contains(" 001 alice"));
    tester.expect("no motd", |l| l.contains(" 422 "));
    tester.expect("auto-join", |l| l.contains("JOIN :#logs-all"));
    tester.expect("help notice", |l| l.contains("!help"));

    server.shutdown();
}

#[test]
fn test_user_needs_four_params() {
    let server = LogCrafter::start(irc_config(&[])).unwrap();
    let addr = server.irc_addr().unwrap();

    let stream = crate::tests::helpers::connect(addr);
    let reader = std::io::BufReader::new(stream.try_clone().unwrap());
    let mut tester = IrcTester { stream, reader };
    tester.send("NICK bob");
    tester.send("USER bob");
    tester.expect("461", |l| l.contains(" 461 ") && l.contains("USER"));

    server.shutdown();
}

#[test]
fn test_fan_out_respects_channel_filters() {
    // S5: A joins #logs-error, B joins #logs-all, C joins nothing.
    let server = LogCrafter::start(irc_config(&[])).unwrap();
    let addr = server.irc_addr().unwrap();

    let mut a = IrcTester::register(addr, "alice");
    let mut b = IrcTester::register(addr, "bob");
    let mut c = IrcTester::register(addr, "carol");

    a.send("JOIN #logs-error");
    a.expect("join confirm", |l| l.contains("JOIN :#logs-error"));
    b.send("JOIN #logs-all");
    b.expect("join confirm", |l| l.contains("JOIN :#logs-all"));

    let (mut stream, _reader) = ingest_client(&server);
    writeln!(stream, "system ERROR: disk full").unwrap();

    let line = a.expect("error fan-out to A", |l| l.contains("PRIVMSG #logs-error"));
    assert!(line.contains("system ERROR: disk full"));
    let line = b.expect("fan-out to B", |l| l.contains("PRIVMSG #logs-all"));
    assert!(line.contains("system ERROR: disk full"));

    writeln!(stream, "heartbeat OK").unwrap();
    let line = b.expect("heartbeat to B", |l| l.contains("PRIVMSG #logs-all"));
    assert!(line.contains("heartbeat OK"));
    // A's channel filters heartbeats out; C receives nothing at all.
    a.expect_silence(Duration::from_millis(300), |l| l.contains("heartbeat"));
    c.expect_silence(Duration::from_millis(300), |l| l.contains("PRIVMSG"));

    server.shutdown();
}

#[test]
fn test_logfilter_creates_personal_channel() {
    // S6: nick "ops-lead!" gets #logs-filter-ops-lead with an AND filter.
    let server = LogCrafter::start(irc_config(&["#logs-all"])).unwrap();
    let addr = server.irc_addr().unwrap();

    let mut ops = IrcTester::register(addr, "ops-lead!");
    ops.expect("auto-join", |l| l.contains("JOIN :#logs-all"));

    ops.send("PRIVMSG #logs-all :!logfilter disk,error");
    ops.expect("filter notice", |l| l.contains("Filter active"));
    ops.expect("filter join", |l| l.contains("JOIN :#logs-filter-ops-lead"));

    let (mut stream, _reader) = ingest_client(&server);
    writeln!(stream, "disk error on sda").unwrap();
    let line = ops.expect("filtered delivery", |l| {
        l.contains("PRIVMSG #logs-filter-ops-lead")
    });
    assert!(line.contains("disk error on sda"));

    writeln!(stream, "disk ok").unwrap();
    // Arrives on #logs-all only, never on the filter channel.
    ops.expect("broadcast on logs-all", |l| {
        l.contains("PRIVMSG #logs-all") && l.contains("disk ok")
    });
    ops.expect_silence(Duration::from_millis(300), |l| {
        l.contains("PRIVMSG #logs-filter-ops-lead") && l.contains("disk ok")
    });

    server.shutdown();
}

#[test]
fn test_query_command_over_irc() {
    let server = LogCrafter::start(irc_config(&["#logs-all"])).unwrap();
    let addr = server.irc_addr().unwrap();

    server.buffer().push(b"login ok", 100);
    server.buffer().push(b"login failed", 101);
    server.buffer().push(b"heartbeat", 102);

    let mut tester = IrcTester::register(addr, "alice");
    tester.send("PRIVMSG #logs-all :!query keyword=login");
    let summary = tester.expect("query summary", |l| l.contains("!query matched"));
    assert!(summary.contains("2 entries"), "summary: {}", summary);
    tester.expect("first result", |l| l.contains("login ok"));
    tester.expect("second result", |l| l.contains("login failed"));

    tester.send("PRIVMSG #logs-all :!query keyword=nothing");
    tester.expect("no matches", |l| l.contains("matched no entries"));

    tester.send("PRIVMSG #logs-all :!query operator=OR");
    tester.expect("parse error", |l| l.contains("ERROR: operator requires keywords"));

    server.shutdown();
}

#[test]
fn test_logstream_join_and_off() {
    let server = LogCrafter::start(irc_config(&[])).unwrap();
    let addr = server.irc_addr().unwrap();

    let mut tester = IrcTester::register(addr, "alice");
    tester.send("PRIVMSG #logs-all :!logstream error");
    tester.expect("stream notice", |l| l.contains("Streaming error logs"));
    tester.expect("join", |l| l.contains("JOIN :#logs-error"));

    tester.send("PRIVMSG #logs-all :!logstream off");
    tester.expect("off notice", |l| l.contains("Left all log channels"));
    tester.expect("part", |l| l.contains("PART #logs-error"));

    tester.send("PRIVMSG #logs-all :!logstream bogus");
    tester.expect("invalid", |l| l.contains("Invalid log stream"));

    server.shutdown();
}

#[test]
fn test_logstats_and_help_and_unknown() {
    let server = LogCrafter::start(irc_config(&["#logs-all"])).unwrap();
    let addr = server.irc_addr().unwrap();
    server.buffer().push(b"one entry", 5);

    let mut tester = IrcTester::register(addr, "alice");
    tester.send("PRIVMSG #logs-all :!logstats");
    let line = tester.expect("stats notice", |l| l.contains("Logs: total="));
    assert!(line.contains("IRC: clients=1"));

    tester.send("PRIVMSG #logs-all :!help");
    tester.expect("help", |l| l.contains("!logfilter"));

    tester.send("PRIVMSG #logs-all :!nonsense");
    tester.expect("unknown", |l| l.contains("Unknown command. Try !help"));

    server.shutdown();
}

#[test]
fn test_list_names_topic() {
    let server = LogCrafter::start(irc_config(&["#logs-all"])).unwrap();
    let addr = server.irc_addr().unwrap();

    let mut tester = IrcTester::register(addr, "alice");
    tester.expect("auto-join", |l| l.contains("JOIN :#logs-all"));

    tester.send("LIST");
    tester.expect("list start", |l| l.contains(" 321 "));
    tester.expect("logs-all row", |l| l.contains(" 322 ") && l.contains("#logs-all"));
    tester.expect("list end", |l| l.contains(" 323 "));

    tester.send("NAMES #logs-all");
    let names = tester.expect("names", |l| l.contains(" 353 "));
    assert!(names.contains("alice"));
    tester.expect("names end", |l| l.contains(" 366 "));

    tester.send("TOPIC #logs-all");
    tester.expect("topic", |l| l.contains(" 332 ") && l.contains("All ingested"));
    tester.send("TOPIC #nosuch");
    tester.expect("no topic", |l| l.contains(" 331 "));

    server.shutdown();
}

#[test]
fn test_unknown_verb_and_not_implemented() {
    let server = LogCrafter::start(irc_config(&[])).unwrap();
    let addr = server.irc_addr().unwrap();

    let mut tester = IrcTester::register(addr, "alice");
    tester.send("WHO #logs-all");
    tester.expect("not implemented", |l| l.contains("WHO is not implemented"));
    tester.send("FROBNICATE");
    tester.expect("421", |l| l.contains(" 421 alice FROBNICATE"));

    server.shutdown();
}

#[test]
fn test_quit_closes_connection() {
    use std::io::BufRead;

    let server = LogCrafter::start(irc_config(&[])).unwrap();
    let addr = server.irc_addr().unwrap();

    let mut tester = IrcTester::register(addr, "alice");
    tester.send("QUIT :bye");
    tester.expect("closing link", |l| l.contains("ERROR :Closing link"));

    // The server closes the socket after QUIT.
    let mut line = String::new();
    let n = tester.reader.read_line(&mut line).unwrap_or(0);
    assert_eq!(n, 0, "expected EOF after QUIT, got: {}", line);

    server.shutdown();
}
