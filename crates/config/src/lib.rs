//! Configuration for the PNG to JPEG watch converter and its supervisor
//!
//! Handles loading configuration from TOML files, environment variable overrides
//! and base-folder lookup.

pub mod config;

pub use config::*;
