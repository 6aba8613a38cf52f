use crate::config::types::{
    ConcurrencyConfig, Config, DomainOverride, IdentityConfig, PolicyConfig, RetryConfig,
    RoutesConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_seeds(&config.seeds)?;
    validate_concurrency_config(&config.concurrency)?;
    validate_retry_config(&config.retry)?;
    validate_identity_config(&config.identity)?;
    validate_routes_config(&config.routes)?;
    validate_policy_config(&config.policy)?;
    validate_domain_overrides(&config.domain)?;

    if config.fetch.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.stats.recent_errors == 0 {
        return Err(ConfigError::Validation(
            "stats recent-errors must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }
    Ok(())
}

fn validate_concurrency_config(config: &ConcurrencyConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 1000 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent must be between 1 and 1000, got {}",
            config.max_concurrent
        )));
    }

    if config.max_per_domain < 1 {
        return Err(ConfigError::Validation(format!(
            "max-per-domain must be >= 1, got {}",
            config.max_per_domain
        )));
    }

    if config.max_per_domain > config.max_concurrent {
        return Err(ConfigError::Validation(format!(
            "max-per-domain ({}) cannot exceed max-concurrent ({})",
            config.max_per_domain, config.max_concurrent
        )));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-max-ms ({}) must be >= backoff-base-ms ({})",
            config.backoff_max_ms, config.backoff_base_ms
        )));
    }
    Ok(())
}

fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.cache_capacity < 1 {
        return Err(ConfigError::Validation(
            "identity cache-capacity must be >= 1".to_string(),
        ));
    }

    if let Some(platform) = &config.platform {
        if !matches!(platform.as_str(), "desktop" | "mobile") {
            return Err(ConfigError::Validation(format!(
                "identity platform must be 'desktop' or 'mobile', got '{}'",
                platform
            )));
        }
    }

    if let Some(browser) = &config.browser {
        if !matches!(browser.as_str(), "chrome" | "firefox" | "safari") {
            return Err(ConfigError::Validation(format!(
                "identity browser must be 'chrome', 'firefox' or 'safari', got '{}'",
                browser
            )));
        }
    }

    Ok(())
}

fn validate_routes_config(config: &RoutesConfig) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();

    for endpoint in &config.endpoints {
        if endpoint.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "route endpoint id cannot be empty".to_string(),
            ));
        }

        if !ids.insert(endpoint.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate route endpoint id '{}'",
                endpoint.id
            )));
        }

        let url = Url::parse(&endpoint.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", endpoint.url, e))
        })?;

        if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint '{}' has unsupported scheme '{}'",
                endpoint.id,
                url.scheme()
            )));
        }
    }

    Ok(())
}

fn validate_policy_config(config: &PolicyConfig) -> Result<(), ConfigError> {
    for pattern in &config.blocked_domains {
        validate_domain_pattern(pattern)?;
    }

    if config.robots_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "robots-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_domain_overrides(overrides: &[DomainOverride]) -> Result<(), ConfigError> {
    for entry in overrides {
        let host = entry
            .domain
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&entry.domain);
        validate_domain_string(host)?;
    }
    Ok(())
}

/// Validates a domain pattern (supports a leading "*." wildcard)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    Ok(())
}
