//! Two-level admission control
//!
//! One semaphore bounds dispatches across the whole crawl; a second, per
//! domain, bounds dispatches to any single netloc. Domain semaphores live in
//! a sharded map so that unrelated domains never contend on one lock.
//!
//! Permits are RAII guards: dropping one releases its slot, which covers
//! early returns, task cancellation and panics alike.

use crate::{DispatchError, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// A held global dispatch slot
#[derive(Debug)]
pub struct GlobalPermit {
    _permit: OwnedSemaphorePermit,
}

impl GlobalPermit {
    /// Releases the slot now rather than at end of scope
    pub fn release(self) {}
}

/// A held per-domain dispatch slot
#[derive(Debug)]
pub struct DomainPermit {
    domain: String,
    _permit: OwnedSemaphorePermit,
}

impl DomainPermit {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Releases the slot now rather than at end of scope
    pub fn release(self) {}
}

pub struct ConcurrencyGovernor {
    max_concurrent: usize,
    max_per_domain: usize,
    global: Arc<Semaphore>,
    domains: DashMap<String, Arc<Semaphore>>,
    closed: AtomicBool,
    peak_global: AtomicUsize,
}

impl ConcurrencyGovernor {
    pub fn new(max_concurrent: usize, max_per_domain: usize) -> Self {
        Self {
            max_concurrent,
            max_per_domain,
            global: Arc::new(Semaphore::new(max_concurrent)),
            domains: DashMap::new(),
            closed: AtomicBool::new(false),
            peak_global: AtomicUsize::new(0),
        }
    }

    /// Waits for a global slot
    ///
    /// Fails with `ShuttingDown` once the governor is closed, including for
    /// callers already waiting.
    pub async fn acquire_global(&self) -> Result<GlobalPermit> {
        let permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;

        let in_flight = self.in_flight();
        self.peak_global.fetch_max(in_flight, Ordering::Relaxed);

        Ok(GlobalPermit { _permit: permit })
    }

    /// Takes a global slot only if one is free right now
    pub fn try_acquire_global(&self) -> Option<GlobalPermit> {
        let permit = self.global.clone().try_acquire_owned().ok()?;
        let in_flight = self.in_flight();
        self.peak_global.fetch_max(in_flight, Ordering::Relaxed);
        Some(GlobalPermit { _permit: permit })
    }

    /// Waits for a slot on `domain`
    pub async fn acquire_domain(&self, domain: &str) -> Result<DomainPermit> {
        let semaphore = self.domain_semaphore(domain);
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::ShuttingDown)?;

        trace!(domain = %domain, in_flight = self.domain_in_flight(domain), "Domain slot acquired");

        Ok(DomainPermit {
            domain: domain.to_string(),
            _permit: permit,
        })
    }

    /// Takes a slot on `domain` only if one is free right now
    pub fn try_acquire_domain(&self, domain: &str) -> Option<DomainPermit> {
        let permit = self.domain_semaphore(domain).try_acquire_owned().ok()?;
        Some(DomainPermit {
            domain: domain.to_string(),
            _permit: permit,
        })
    }

    /// Dispatches currently holding a global slot
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.global.available_permits())
    }

    /// Dispatches currently holding a slot on `domain`
    pub fn domain_in_flight(&self, domain: &str) -> usize {
        self.domains
            .get(domain)
            .map(|sem| self.max_per_domain.saturating_sub(sem.available_permits()))
            .unwrap_or(0)
    }

    /// In-flight counts for every domain holding at least one slot
    pub fn domains_in_flight(&self) -> HashMap<String, usize> {
        self.domains
            .iter()
            .filter_map(|entry| {
                let held = self
                    .max_per_domain
                    .saturating_sub(entry.value().available_permits());
                (held > 0).then(|| (entry.key().clone(), held))
            })
            .collect()
    }

    /// Drops semaphores of domains with no slot held
    ///
    /// An entry is only removed while the map holds its sole reference, so
    /// no permit or in-progress acquisition can still point at it.
    pub fn prune_idle(&self) -> usize {
        let before = self.domains.len();
        self.domains.retain(|_, semaphore| {
            Arc::strong_count(semaphore) > 1
                || semaphore.available_permits() < self.max_per_domain
        });
        before.saturating_sub(self.domains.len())
    }

    pub fn tracked_domains(&self) -> usize {
        self.domains.len()
    }

    /// Highest global in-flight count observed so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak_global.load(Ordering::Relaxed)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_per_domain(&self) -> usize {
        self.max_per_domain
    }

    /// Refuses all further acquisitions and wakes every waiter
    ///
    /// Held permits stay valid and release normally.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.global.close();
        for entry in self.domains.iter() {
            entry.value().close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn domain_semaphore(&self, domain: &str) -> Arc<Semaphore> {
        if let Some(existing) = self.domains.get(domain) {
            return existing.clone();
        }

        let semaphore = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_domain)))
            .clone();

        // A domain first seen after close() must not hand out slots
        if self.is_closed() {
            semaphore.close();
        }
        semaphore
    }
}
