//! Outbound identity module
//!
//! This module produces and caches the header sets presented to origins:
//! - `IdentityProfile`: an issued header set plus its metadata
//! - `IdentityProfileGenerator`: the synthesis seam (a built-in generator ships here)
//! - `IdentityRotator`: session persistence, rotation interval and TTL cache

mod generator;
mod profile;
mod rotator;

pub use generator::{BuiltinProfileGenerator, IdentityProfileGenerator};
pub use profile::{Browser, IdentityCriteria, IdentityProfile, Platform};
pub use rotator::{IdentityRotator, RotatorStats};
