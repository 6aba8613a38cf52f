use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates a configuration file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// SHA-256 of the raw configuration text, hex encoded
pub fn hash_config(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Hashes a configuration file without parsing it
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(hash_config(&std::fs::read_to_string(path)?))
}

/// Loads a configuration together with the hash of the exact text it came from
///
/// The hash is recorded with each run so resume state can be tied to the
/// settings that produced it.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_config(&content)))
}
