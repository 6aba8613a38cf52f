//! Request scheduler: the crawl frontier with politeness
//!
//! This module handles:
//! - Per-domain queues (FIFO for BFS and Random, LIFO for DFS)
//! - A single global heap for the Priority strategy
//! - Fingerprint deduplication
//! - Per-domain politeness delays, checked and reserved atomically

use crate::config::{SchedulerConfig, Strategy};
use crate::crawler::request::Request;
use crate::state::{DomainState, RequestState};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::trace;

/// Result of a dequeue attempt
#[derive(Debug)]
pub enum Dequeue<T = Request> {
    /// A request whose domain was ready; the domain is now reserved
    Ready(T),

    /// Requests are queued but none can go now; wait at most this long
    NotReady(Duration),

    /// Nothing is queued
    Empty,
}

impl<T> Dequeue<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Dequeue<U> {
        match self {
            Self::Ready(value) => Dequeue::Ready(f(value)),
            Self::NotReady(wait) => Dequeue::NotReady(wait),
            Self::Empty => Dequeue::Empty,
        }
    }
}

/// Wait reported when every ready domain was refused admission
///
/// Admission frees up when an in-flight dispatch finishes, which callers
/// observe on their own; this only bounds the sleep.
pub const ADMISSION_WAIT: Duration = Duration::from_secs(1);

/// Heap entry for the priority strategy
///
/// Ordered by priority (highest first), then by insertion sequence
/// (earliest first).
struct HeapEntry {
    priority: i32,
    seq: u64,
    request: Request,
}

impl HeapEntry {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

struct SchedulerInner {
    seen: HashSet<String>,
    domains: HashMap<String, DomainState>,

    /// Domain keys in first-seen order, for deterministic scans
    domain_order: Vec<String>,

    queues: HashMap<String, VecDeque<Request>>,
    heap: BinaryHeap<HeapEntry>,
    seq: u64,
    queued: usize,
    duplicates: u64,
    rng: StdRng,
}

/// Frontier of requests waiting to be dispatched
///
/// Enqueue never blocks and only refuses duplicates. Dequeue never waits: it
/// either hands out a request whose domain it has just reserved, or says how
/// long until some domain becomes ready.
pub struct RequestScheduler {
    strategy: Strategy,
    dedup: bool,
    default_delay: Duration,
    inner: Mutex<SchedulerInner>,
    notify: Notify,
}

impl RequestScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Scheduler whose Random strategy draws from a fixed seed
    pub fn with_seed(config: &SchedulerConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SchedulerConfig, rng: StdRng) -> Self {
        Self {
            strategy: config.strategy,
            dedup: config.dedup,
            default_delay: config.default_delay(),
            inner: Mutex::new(SchedulerInner {
                seen: HashSet::new(),
                domains: HashMap::new(),
                domain_order: Vec::new(),
                queues: HashMap::new(),
                heap: BinaryHeap::new(),
                seq: 0,
                queued: 0,
                duplicates: 0,
                rng,
            }),
            notify: Notify::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Adds a new request to the frontier
    ///
    /// Returns false if the fingerprint was already seen and dedup is on.
    pub fn enqueue(&self, request: Request) -> bool {
        let mut inner = self.inner.lock();

        let fresh = inner.seen.insert(request.fingerprint().to_string());
        if !fresh && self.dedup {
            inner.duplicates += 1;
            trace!(url = %request.url(), "Duplicate request ignored");
            return false;
        }

        self.push(&mut inner, request);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Puts a request back without the dedup check (retries and deferrals)
    pub fn requeue(&self, mut request: Request) {
        if request.state() != RequestState::Queued {
            // Dispatched -> Queued (deferral) or Retrying -> Queued (retry)
            if let Err(e) = request.advance(RequestState::Queued) {
                trace!(error = %e, "Requeue from unexpected state");
            }
        }

        let mut inner = self.inner.lock();
        inner.seen.insert(request.fingerprint().to_string());
        self.push(&mut inner, request);
        drop(inner);
        self.notify.notify_one();
    }

    /// Takes the next dispatchable request, reserving its domain
    pub fn dequeue(&self) -> Dequeue {
        self.dequeue_admitted(|_| Some(())).map(|(request, ())| request)
    }

    /// Like `dequeue`, but a ready domain is only served if `admit` accepts it
    ///
    /// `admit` runs under the scheduler lock, between the readiness check and
    /// the reservation; whatever it returns travels with the request. The
    /// coordinator uses it to take the per-domain concurrency slot, so a
    /// domain is never reserved for a dispatch that cannot start right away.
    pub fn dequeue_admitted<T, F>(&self, mut admit: F) -> Dequeue<(Request, T)>
    where
        F: FnMut(&str) -> Option<T>,
    {
        let mut inner = self.inner.lock();
        if inner.queued == 0 {
            return Dequeue::Empty;
        }

        let now = Instant::now();
        let mut refused = HashSet::new();
        let picked = match self.strategy {
            Strategy::Priority => Self::pop_priority(&mut inner, now, &mut admit, &mut refused),
            Strategy::Bfs | Strategy::Dfs => {
                Self::pop_oldest_ready(&mut inner, now, &mut admit, &mut refused)
            }
            Strategy::Random => Self::pop_random(&mut inner, now, &mut admit, &mut refused),
        };

        match picked {
            Some((request, admitted)) => {
                inner.queued -= 1;
                let delay = self.default_delay;
                inner
                    .domains
                    .entry(request.domain().to_string())
                    .or_insert_with(|| DomainState::new(delay))
                    .reserve(now);
                Dequeue::Ready((request, admitted))
            }
            None => Dequeue::NotReady(
                Self::min_wait(&inner, now, &refused).unwrap_or(ADMISSION_WAIT),
            ),
        }
    }

    /// Sets the politeness delay for a domain
    pub fn set_domain_delay(&self, domain: &str, delay: Duration) {
        let mut inner = self.inner.lock();
        let default_delay = self.default_delay;
        let is_new = !inner.domains.contains_key(domain);
        inner
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(default_delay))
            .pin_delay(delay);
        if is_new {
            inner.domain_order.push(domain.to_string());
        }
    }

    /// Current politeness delay for a domain
    pub fn domain_delay(&self, domain: &str) -> Duration {
        self.inner
            .lock()
            .domains
            .get(domain)
            .map(|state| state.delay)
            .unwrap_or(self.default_delay)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queued == 0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queued
    }

    /// Number of enqueues refused as duplicates
    pub fn duplicates(&self) -> u64 {
        self.inner.lock().duplicates
    }

    /// Queued request count per domain
    pub fn queued_per_domain(&self) -> HashMap<String, usize> {
        let inner = self.inner.lock();
        let mut counts: HashMap<String, usize> = inner
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(domain, queue)| (domain.clone(), queue.len()))
            .collect();
        for entry in inner.heap.iter() {
            *counts.entry(entry.request.domain().to_string()).or_default() += 1;
        }
        counts
    }

    /// Removes and returns every queued request
    ///
    /// Fingerprints stay in the seen set.
    pub fn drain(&self) -> Vec<Request> {
        let mut inner = self.inner.lock();
        let mut drained: Vec<Request> = inner.heap.drain().map(|entry| entry.request).collect();
        let order = inner.domain_order.clone();
        for domain in &order {
            if let Some(queue) = inner.queues.remove(domain) {
                drained.extend(queue);
            }
        }
        inner.queues.clear();
        inner.queued = 0;
        drop(inner);
        self.notify.notify_one();
        drained
    }

    /// Marks fingerprints as seen, e.g. from a resumed run
    pub fn mark_seen<I>(&self, fingerprints: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.inner.lock().seen.extend(fingerprints);
    }

    pub fn seen_fingerprints(&self) -> Vec<String> {
        self.inner.lock().seen.iter().cloned().collect()
    }

    /// Resolves after the next enqueue, requeue or clear
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    fn push(&self, inner: &mut SchedulerInner, request: Request) {
        let domain = request.domain().to_string();
        if !inner.domains.contains_key(&domain) {
            inner
                .domains
                .insert(domain.clone(), DomainState::new(self.default_delay));
            inner.domain_order.push(domain.clone());
        }

        match self.strategy {
            Strategy::Priority => {
                let seq = inner.seq;
                inner.seq += 1;
                inner.heap.push(HeapEntry {
                    priority: request.priority,
                    seq,
                    request,
                });
            }
            Strategy::Dfs => inner.queues.entry(domain).or_default().push_front(request),
            Strategy::Bfs | Strategy::Random => {
                inner.queues.entry(domain).or_default().push_back(request)
            }
        }
        inner.queued += 1;
    }

    fn pop_priority<T>(
        inner: &mut SchedulerInner,
        now: Instant,
        admit: &mut impl FnMut(&str) -> Option<T>,
        refused: &mut HashSet<String>,
    ) -> Option<(Request, T)> {
        let mut skipped = Vec::new();
        let mut picked = None;

        while let Some(entry) = inner.heap.pop() {
            let domain = entry.request.domain();
            let ready = !refused.contains(domain)
                && inner
                    .domains
                    .get(domain)
                    .map_or(true, |state| state.is_ready(now));
            if ready {
                if let Some(admitted) = admit(domain) {
                    picked = Some((entry.request, admitted));
                    break;
                }
                refused.insert(domain.to_string());
            }
            skipped.push(entry);
        }

        inner.heap.extend(skipped);
        picked
    }

    /// Among ready domains with queued work, serves the one waiting longest
    fn pop_oldest_ready<T>(
        inner: &mut SchedulerInner,
        now: Instant,
        admit: &mut impl FnMut(&str) -> Option<T>,
        refused: &mut HashSet<String>,
    ) -> Option<(Request, T)> {
        let mut candidates: Vec<(Option<Instant>, String)> = Self::ready_domains(inner, now)
            .into_iter()
            .map(|domain| {
                let last = inner.domains.get(&domain).and_then(|s| s.last_dispatch);
                (last, domain)
            })
            .collect();
        // Stable: first-seen order breaks ties
        candidates.sort_by_key(|(last, _)| *last);

        for (_, domain) in candidates {
            match admit(&domain) {
                Some(admitted) => {
                    let request = inner.queues.get_mut(&domain)?.pop_front()?;
                    return Some((request, admitted));
                }
                None => {
                    refused.insert(domain);
                }
            }
        }
        None
    }

    fn pop_random<T>(
        inner: &mut SchedulerInner,
        now: Instant,
        admit: &mut impl FnMut(&str) -> Option<T>,
        refused: &mut HashSet<String>,
    ) -> Option<(Request, T)> {
        let mut candidates = Self::ready_domains(inner, now);

        while !candidates.is_empty() {
            let index = inner.rng.gen_range(0..candidates.len());
            let domain = candidates.swap_remove(index);
            match admit(&domain) {
                Some(admitted) => {
                    let request = inner.queues.get_mut(&domain)?.pop_front()?;
                    return Some((request, admitted));
                }
                None => {
                    refused.insert(domain);
                }
            }
        }
        None
    }

    /// Ready domains with queued work, in first-seen order
    fn ready_domains(inner: &SchedulerInner, now: Instant) -> Vec<String> {
        inner
            .domain_order
            .iter()
            .filter(|domain| inner.queues.get(*domain).map_or(false, |q| !q.is_empty()))
            .filter(|domain| {
                inner
                    .domains
                    .get(*domain)
                    .map_or(true, |state| state.is_ready(now))
            })
            .cloned()
            .collect()
    }

    /// Smallest wait until a domain with queued work becomes ready
    ///
    /// Domains refused admission are left out; None if nothing else is queued.
    fn min_wait(inner: &SchedulerInner, now: Instant, refused: &HashSet<String>) -> Option<Duration> {
        let queued_domains = inner
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(domain, _)| domain.as_str())
            .chain(inner.heap.iter().map(|entry| entry.request.domain()));

        queued_domains
            .filter(|domain| !refused.contains(*domain))
            .filter_map(|domain| inner.domains.get(domain))
            .map(|state| state.time_until_ready(now).unwrap_or(Duration::ZERO))
            .min()
    }
}
