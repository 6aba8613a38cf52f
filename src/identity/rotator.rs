use super::generator::IdentityProfileGenerator;
use super::profile::{Browser, IdentityCriteria, IdentityProfile, Platform};
use crate::config::IdentityConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotatorStats {
    pub generated: u64,
    pub cache_hits: u64,
    pub rotations: u64,
    pub evictions: u64,
    pub validation_failures: u64,
}

struct RotatorInner {
    cache: HashMap<String, Arc<IdentityProfile>>,
    current: Option<Arc<IdentityProfile>>,
    rotation_counter: u32,
    stats: RotatorStats,
}

/// Issues outbound identities, caching them per criteria key
///
/// All bookkeeping lives behind one lock, so a lookup, a rotation reset and a
/// cache insert are observed atomically by concurrent dispatch units.
pub struct IdentityRotator {
    generator: Arc<dyn IdentityProfileGenerator>,
    session_persistence: bool,
    rotation_interval: u32,
    capacity: usize,
    ttl: Duration,
    default_criteria: IdentityCriteria,
    inner: Mutex<RotatorInner>,
}

impl IdentityRotator {
    pub fn new(config: &IdentityConfig, generator: Arc<dyn IdentityProfileGenerator>) -> Self {
        let default_criteria = IdentityCriteria {
            platform: config.platform.as_deref().and_then(Platform::parse),
            browser: config.browser.as_deref().and_then(Browser::parse),
            locale: config.locale.clone(),
        };

        Self {
            generator,
            session_persistence: config.session_persistence,
            rotation_interval: config.rotation_interval,
            capacity: config.cache_capacity.max(1),
            ttl: config.ttl(),
            default_criteria,
            inner: Mutex::new(RotatorInner {
                cache: HashMap::new(),
                current: None,
                rotation_counter: 0,
                stats: RotatorStats::default(),
            }),
        }
    }

    /// Criteria used for requests that do not ask for anything specific
    pub fn default_criteria(&self) -> &IdentityCriteria {
        &self.default_criteria
    }

    /// Returns an identity for the criteria
    ///
    /// With session persistence the current identity is reused until the
    /// rotation interval elapses or `force_new` is set. Otherwise the profile
    /// is served from the TTL cache, generating a fresh one on a miss.
    pub fn get_identity(&self, criteria: &IdentityCriteria, force_new: bool) -> Arc<IdentityProfile> {
        let mut inner = self.inner.lock();
        let rotation_due =
            self.rotation_interval > 0 && inner.rotation_counter >= self.rotation_interval;

        if self.session_persistence && !force_new && !rotation_due {
            if let Some(current) = inner.current.clone() {
                inner.rotation_counter += 1;
                current.record_use();
                return current;
            }
        }

        let key = criteria.cache_key();

        if rotation_due {
            inner.rotation_counter = 0;
            inner.stats.rotations += 1;
            if let Some(previous) = inner.current.take() {
                inner.cache.remove(&previous.cache_key);
            }
            inner.cache.remove(&key);
            debug!(key = %key, "Identity rotation interval reached");
        }

        inner.rotation_counter += 1;

        if !force_new {
            if let Some(cached) = inner.cache.get(&key).cloned() {
                if self.is_fresh(&cached) {
                    inner.stats.cache_hits += 1;
                    cached.record_use();
                    if self.session_persistence {
                        inner.current = Some(cached.clone());
                    }
                    return cached;
                }
                inner.cache.remove(&key);
            }
        }

        let profile = self.issue(&mut inner, criteria, key);
        if self.session_persistence {
            inner.current = Some(profile.clone());
        }
        profile
    }

    /// Drops every cached profile and the session identity
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.current = None;
        inner.rotation_counter = 0;
    }

    pub fn stats(&self) -> RotatorStats {
        self.inner.lock().stats
    }

    pub fn cached_len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    fn is_fresh(&self, profile: &IdentityProfile) -> bool {
        let age = (chrono::Utc::now() - profile.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age < self.ttl
    }

    fn issue(
        &self,
        inner: &mut RotatorInner,
        criteria: &IdentityCriteria,
        key: String,
    ) -> Arc<IdentityProfile> {
        let profile = self.generator.generate(criteria).with_cache_key(key.clone());

        if let Some(issue) = profile.consistency_issue() {
            inner.stats.validation_failures += 1;
            warn!(profile = profile.id, issue = %issue, "Identity profile failed validation");
        }

        if !inner.cache.contains_key(&key) && inner.cache.len() >= self.capacity {
            let oldest = inner
                .cache
                .iter()
                .min_by_key(|(_, p)| p.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.cache.remove(&oldest);
                inner.stats.evictions += 1;
            }
        }

        profile.record_use();
        let profile = Arc::new(profile);
        inner.cache.insert(key, profile.clone());
        inner.stats.generated += 1;
        debug!(profile = profile.id, key = %profile.cache_key, "Issued new identity");

        profile
    }
}
