//! URL handling module for Sumi-Dispatch
//!
//! This module provides URL canonicalization, domain (netloc) extraction,
//! wildcard domain matching and request fingerprinting.

mod canonical;
mod domain;
mod fingerprint;

pub use canonical::canonicalize_url;
pub use domain::{domain_matches, extract_domain};
pub use fingerprint::{canonicalize_body, fingerprint};
