//! Sumi-Dispatch: a polite crawl request scheduler and dispatch governor
//!
//! This crate decides which discovered request to dispatch when, through which
//! outbound identity and egress route, while respecting per-domain politeness,
//! global and per-domain concurrency limits, and route health.

pub mod config;
pub mod crawler;
pub mod identity;
pub mod output;
pub mod policy;
pub mod routes;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Invalid request state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::RequestState,
        to: state::RequestState,
    },

    #[error("Route provisioning failed: {0}")]
    Provisioning(String),

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("Coordinator has already been started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    CoordinatorBuilder, CrawlCoordinator, Outcome, OutcomeKind, Request, RequestScheduler,
};
pub use identity::{IdentityProfile, IdentityRotator};
pub use output::CrawlStats;
pub use routes::{ProxyHealthPool, RouteSnapshot};
pub use state::{DomainState, RequestState};
