//! # Configuration Module
//!
//! Typed settings for every tunable the server recognizes, with the
//! documented defaults baked into `Default` and optional JSON file loading.

pub mod settings;

pub use settings::Config;
