//! Configuration module for Sumi-Dispatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; missing keys fall back to conservative defaults.
//!
//! # Example
//!
//! ```no_run
//! use sumi_dispatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("dispatch.toml")).unwrap();
//! println!("Global concurrency: {}", config.concurrency.max_concurrent);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    ConcurrencyConfig, Config, DomainOverride, EndpointEntry, FetchConfig, IdentityConfig,
    OutputConfig, PolicyConfig, RetryConfig, RoutesConfig, SchedulerConfig, SelectionMode,
    StatsConfig, Strategy,
};

pub use parser::{
    compute_config_hash, hash_config, load_config, load_config_with_hash, parse_config,
};
pub use validation::validate;
