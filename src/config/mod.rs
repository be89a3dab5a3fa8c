//! Configuration module for Sumi-Ward
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Only `[crawler]` and `[user-agent]` are required; every other section has
//! defaults.
//!
//! # Example
//!
//! ```no_run
//! use sumi_ward::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ward.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, FallbackConfig, PolitenessConfig, ProxyConfig, ProxyEntry,
    StoreConfig, UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
