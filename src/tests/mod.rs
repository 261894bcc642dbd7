//! End-to-end tests exercising the running server over loopback sockets.

mod helpers;
mod irc_tests;
