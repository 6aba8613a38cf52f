//! Dispatch statistics
//!
//! The coordinator owns one `StatsCollector`; every counter is mutated
//! through it. `CrawlStats` is the point-in-time snapshot handed to callers.

use crate::crawler::{Outcome, OutcomeKind};
use crate::routes::RouteSnapshot;
use crate::state::RequestState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// One entry of a bounded recent-error list
#[derive(Debug, Clone, PartialEq)]
pub struct RecentError {
    pub url: String,
    pub kind: OutcomeKind,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Counters for one domain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainStats {
    /// Fetch attempts, retries included
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub policy_blocked: u64,
    pub retries: u64,
    pub queued: usize,
    pub in_flight: usize,
    pub recent_errors: Vec<RecentError>,
}

/// Counters for one egress route, with its current health
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteStats {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub score: f64,
    pub blacklisted: bool,
    pub recent_errors: Vec<RecentError>,
}

/// Snapshot returned by `CrawlCoordinator::get_stats`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStats {
    pub queued: usize,
    pub in_flight: usize,

    /// Requests that ended successfully
    pub completed: u64,

    /// Requests that ended Fatal (retries exhausted included)
    pub failed: u64,

    pub policy_blocked: u64,
    pub filtered: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub deferrals: u64,
    pub duplicates: u64,
    pub elapsed: Duration,
    pub per_domain: BTreeMap<String, DomainStats>,
    pub per_route: BTreeMap<String, RouteStats>,
}

impl CrawlStats {
    /// Requests that reached any terminal state
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.policy_blocked + self.filtered + self.cancelled
    }
}

#[derive(Default)]
struct Counters {
    attempts: u64,
    succeeded: u64,
    failed: u64,
    policy_blocked: u64,
    retries: u64,
    recent_errors: VecDeque<RecentError>,
}

impl Counters {
    fn record(&mut self, kind: OutcomeKind) {
        self.attempts += 1;
        match kind {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::PolicyBlocked => {
                self.failed += 1;
                self.policy_blocked += 1;
            }
            OutcomeKind::Transient | OutcomeKind::Fatal => self.failed += 1,
        }
    }

    fn push_error(&mut self, entry: RecentError, limit: usize) {
        if self.recent_errors.len() == limit {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(entry);
    }
}

#[derive(Default)]
struct Totals {
    completed: u64,
    failed: u64,
    policy_blocked: u64,
    filtered: u64,
    cancelled: u64,
    retries: u64,
    deferrals: u64,
}

struct CollectorInner {
    totals: Totals,
    domains: HashMap<String, Counters>,
    routes: HashMap<String, Counters>,
    started: Option<Instant>,
}

pub struct StatsCollector {
    recent_limit: usize,
    inner: Mutex<CollectorInner>,
}

impl StatsCollector {
    pub fn new(recent_limit: usize) -> Self {
        Self {
            recent_limit: recent_limit.max(1),
            inner: Mutex::new(CollectorInner {
                totals: Totals::default(),
                domains: HashMap::new(),
                routes: HashMap::new(),
                started: None,
            }),
        }
    }

    pub fn mark_started(&self) {
        self.inner.lock().started = Some(Instant::now());
    }

    /// Records one fetch attempt against its domain and route
    pub fn record_attempt(&self, domain: &str, route: Option<&str>, url: &str, outcome: &Outcome) {
        let mut inner = self.inner.lock();
        let entry = (!outcome.is_success()).then(|| RecentError {
            url: url.to_string(),
            kind: outcome.kind,
            error: outcome.describe(),
            at: Utc::now(),
        });

        let counters = inner.domains.entry(domain.to_string()).or_default();
        counters.record(outcome.kind);
        if let Some(entry) = entry.clone() {
            counters.push_error(entry, self.recent_limit);
        }

        if let Some(route) = route {
            let counters = inner.routes.entry(route.to_string()).or_default();
            counters.record(outcome.kind);
            if let Some(entry) = entry {
                counters.push_error(entry, self.recent_limit);
            }
        }
    }

    /// Records an error that never reached a fetch (policy refusal, deferral limit)
    pub fn record_error(&self, domain: &str, url: &str, kind: OutcomeKind, error: &str) {
        let mut inner = self.inner.lock();
        let counters = inner.domains.entry(domain.to_string()).or_default();
        counters.push_error(
            RecentError {
                url: url.to_string(),
                kind,
                error: error.to_string(),
                at: Utc::now(),
            },
            self.recent_limit,
        );
    }

    pub fn record_retry(&self, domain: &str) {
        let mut inner = self.inner.lock();
        inner.totals.retries += 1;
        inner.domains.entry(domain.to_string()).or_default().retries += 1;
    }

    pub fn record_deferral(&self) {
        self.inner.lock().totals.deferrals += 1;
    }

    /// Counts a request reaching a terminal state
    pub fn record_terminal(&self, state: RequestState) {
        let mut inner = self.inner.lock();
        let totals = &mut inner.totals;
        match state {
            RequestState::Succeeded => totals.completed += 1,
            RequestState::Failed => totals.failed += 1,
            RequestState::PolicyBlocked => totals.policy_blocked += 1,
            RequestState::Filtered => totals.filtered += 1,
            RequestState::Cancelled => totals.cancelled += 1,
            RequestState::Queued | RequestState::Dispatched | RequestState::Retrying => {}
        }
    }

    /// Builds a snapshot, merging in state owned by other components
    pub fn snapshot(
        &self,
        queued: &HashMap<String, usize>,
        in_flight: &HashMap<String, usize>,
        routes: &[RouteSnapshot],
        duplicates: u64,
    ) -> CrawlStats {
        let inner = self.inner.lock();

        let mut per_domain: BTreeMap<String, DomainStats> = inner
            .domains
            .iter()
            .map(|(domain, counters)| {
                let stats = DomainStats {
                    attempts: counters.attempts,
                    succeeded: counters.succeeded,
                    failed: counters.failed,
                    policy_blocked: counters.policy_blocked,
                    retries: counters.retries,
                    queued: 0,
                    in_flight: 0,
                    recent_errors: counters.recent_errors.iter().cloned().collect(),
                };
                (domain.clone(), stats)
            })
            .collect();

        for (domain, count) in queued {
            per_domain.entry(domain.clone()).or_default().queued = *count;
        }
        for (domain, count) in in_flight {
            per_domain.entry(domain.clone()).or_default().in_flight = *count;
        }

        let per_route = routes
            .iter()
            .map(|snapshot| {
                let counters = inner.routes.get(&snapshot.id);
                let stats = RouteStats {
                    attempts: counters.map_or(0, |c| c.attempts),
                    succeeded: counters.map_or(0, |c| c.succeeded),
                    failed: counters.map_or(0, |c| c.failed),
                    score: snapshot.score,
                    blacklisted: snapshot.blacklisted,
                    recent_errors: counters
                        .map(|c| c.recent_errors.iter().cloned().collect())
                        .unwrap_or_default(),
                };
                (snapshot.id.clone(), stats)
            })
            .collect();

        CrawlStats {
            queued: queued.values().sum(),
            in_flight: in_flight.values().sum(),
            completed: inner.totals.completed,
            failed: inner.totals.failed,
            policy_blocked: inner.totals.policy_blocked,
            filtered: inner.totals.filtered,
            cancelled: inner.totals.cancelled,
            retries: inner.totals.retries,
            deferrals: inner.totals.deferrals,
            duplicates,
            elapsed: inner.started.map(|s| s.elapsed()).unwrap_or_default(),
            per_domain,
            per_route,
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStats) {
    println!("=== Dispatch Statistics ===\n");

    println!("Overview:");
    println!("  Elapsed: {:.1}s", stats.elapsed.as_secs_f64());
    println!("  Completed: {}", stats.completed);
    println!("  Failed: {}", stats.failed);
    println!("  Policy blocked: {}", stats.policy_blocked);
    println!("  Filtered: {}", stats.filtered);
    println!("  Cancelled: {}", stats.cancelled);
    println!("  Retries: {}", stats.retries);
    println!("  Deferrals: {}", stats.deferrals);
    println!("  Duplicates ignored: {}", stats.duplicates);
    println!("  Still queued: {}", stats.queued);
    println!();

    if !stats.per_domain.is_empty() {
        println!("Domains:");
        let mut domains: Vec<_> = stats.per_domain.iter().collect();
        domains.sort_by(|a, b| b.1.attempts.cmp(&a.1.attempts));
        for (domain, d) in domains {
            println!(
                "  {}: {} attempts, {} ok, {} failed ({} blocked), {} retries",
                domain, d.attempts, d.succeeded, d.failed, d.policy_blocked, d.retries
            );
            for error in d.recent_errors.iter().rev().take(3) {
                println!("    - [{}] {}: {}", error.kind, error.url, error.error);
            }
        }
        println!();
    }

    if !stats.per_route.is_empty() {
        println!("Routes:");
        for (id, r) in &stats.per_route {
            println!(
                "  {}: score {:.1}{}, {} attempts, {} ok, {} failed",
                id,
                r.score,
                if r.blacklisted { " (blacklisted)" } else { "" },
                r.attempts,
                r.succeeded,
                r.failed
            );
        }
        println!();
    }

    let finished = stats.finished();
    let success_rate = if finished > 0 {
        (stats.completed as f64 / finished as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Success Rate: {:.1}% ({} / {} requests completed)",
        success_rate, stats.completed, finished
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_snapshot(id: &str) -> RouteSnapshot {
        RouteSnapshot {
            id: id.to_string(),
            url: "http://10.0.0.1:3128".to_string(),
            tag: None,
            success_count: 0,
            failure_count: 0,
            policy_blocks: 0,
            avg_latency_ms: 0.0,
            score: 100.0,
            blacklisted: false,
        }
    }

    #[test]
    fn test_attempts_counted_per_domain_and_route() {
        let stats = StatsCollector::new(5);
        let ok = Outcome::from_status(200, Duration::from_millis(3));
        let blocked = Outcome::from_status(429, Duration::from_millis(3));

        stats.record_attempt("a.com", Some("r1"), "https://a.com/1", &ok);
        stats.record_attempt("a.com", Some("r1"), "https://a.com/2", &blocked);
        stats.record_attempt("b.com", None, "https://b.com/", &ok);

        let snapshot = stats.snapshot(&HashMap::new(), &HashMap::new(), &[route_snapshot("r1")], 0);
        let a = &snapshot.per_domain["a.com"];
        assert_eq!((a.attempts, a.succeeded, a.failed, a.policy_blocked), (2, 1, 1, 1));
        assert_eq!(a.recent_errors.len(), 1);
        assert_eq!(a.recent_errors[0].error, "HTTP 429");

        let r1 = &snapshot.per_route["r1"];
        assert_eq!((r1.attempts, r1.succeeded, r1.failed), (2, 1, 1));
        assert_eq!(snapshot.per_domain["b.com"].attempts, 1);
    }

    #[test]
    fn test_recent_errors_bounded() {
        let stats = StatsCollector::new(3);
        for i in 0..10 {
            let outcome = Outcome::transient(format!("err {}", i), Duration::ZERO);
            stats.record_attempt("a.com", None, "https://a.com/", &outcome);
        }
        let snapshot = stats.snapshot(&HashMap::new(), &HashMap::new(), &[], 0);
        let errors: Vec<&str> = snapshot.per_domain["a.com"]
            .recent_errors
            .iter()
            .map(|e| e.error.as_str())
            .collect();
        assert_eq!(errors, ["err 7", "err 8", "err 9"]);
    }

    #[test]
    fn test_terminal_totals_and_merge() {
        let stats = StatsCollector::new(5);
        stats.record_terminal(RequestState::Succeeded);
        stats.record_terminal(RequestState::Succeeded);
        stats.record_terminal(RequestState::Failed);
        stats.record_terminal(RequestState::Filtered);
        stats.record_retry("a.com");

        let mut queued = HashMap::new();
        queued.insert("c.com".to_string(), 4);
        let mut in_flight = HashMap::new();
        in_flight.insert("c.com".to_string(), 1);
        // First request to d.com is still out: no counters, nothing queued
        in_flight.insert("d.com".to_string(), 2);
        let snapshot = stats.snapshot(&queued, &in_flight, &[], 2);

        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.finished(), 4);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.queued, 4);
        assert_eq!(snapshot.in_flight, 3);
        assert_eq!(snapshot.duplicates, 2);
        assert_eq!(snapshot.per_domain["c.com"].queued, 4);
        assert_eq!(snapshot.per_domain["d.com"].in_flight, 2);
    }
}
