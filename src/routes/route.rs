use std::collections::VecDeque;
use std::time::Instant;

/// Number of latency samples kept per route
pub const LATENCY_WINDOW: usize = 100;

/// Requests a route must carry before it can be blacklisted
const BLACKLIST_MIN_REQUESTS: u64 = 10;

/// Success rate below which an experienced route is blacklisted
const BLACKLIST_SUCCESS_RATE: f64 = 0.5;

/// Where a route sends traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub id: String,

    /// Proxy URL (http, https, socks5 or socks5h)
    pub url: String,

    /// Region or purpose tag
    pub tag: Option<String>,
}

/// What a dispatch unit gets back from `acquire_route`
///
/// Carries only what the fetcher needs; the route itself stays in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHandle {
    pub id: String,
    pub url: String,
    pub tag: Option<String>,
}

/// Point-in-time view of a route's health
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSnapshot {
    pub id: String,
    pub url: String,
    pub tag: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub policy_blocks: u64,
    pub avg_latency_ms: f64,
    pub score: f64,
    pub blacklisted: bool,
}

impl RouteSnapshot {
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// An egress route and its rolling health
#[derive(Debug, Clone)]
pub struct Route {
    pub endpoint: EndpointDescriptor,
    pub success_count: u64,
    pub failure_count: u64,
    pub policy_blocks: u64,
    latencies: VecDeque<u64>,
    pub blacklisted: bool,
    pub blacklisted_at: Option<Instant>,
}

impl Route {
    pub fn new(endpoint: EndpointDescriptor) -> Self {
        Self {
            endpoint,
            success_count: 0,
            failure_count: 0,
            policy_blocks: 0,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            blacklisted: false,
            blacklisted_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.endpoint.id
    }

    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Defaults to 1.0 before any sample
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.success_count as f64 / total as f64,
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        self.latencies.iter().sum::<u64>() as f64 / self.latencies.len() as f64
    }

    fn latency_penalty(&self) -> f64 {
        let avg = self.avg_latency_ms();
        if avg > 2000.0 {
            0.8
        } else if avg > 1000.0 {
            0.9
        } else {
            1.0
        }
    }

    /// Health score in [1, 100]
    pub fn score(&self) -> f64 {
        (100.0 * self.success_rate() * self.latency_penalty()).max(1.0)
    }

    /// Records one outcome; returns true if this report blacklisted the route
    pub fn record(&mut self, success: bool, latency_ms: u64) -> bool {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }

        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);

        if !self.blacklisted
            && self.total() >= BLACKLIST_MIN_REQUESTS
            && self.success_rate() < BLACKLIST_SUCCESS_RATE
        {
            self.blacklisted = true;
            self.blacklisted_at = Some(Instant::now());
            return true;
        }
        false
    }

    pub fn clear_blacklist(&mut self) {
        self.blacklisted = false;
        self.blacklisted_at = None;
    }

    pub fn handle(&self) -> RouteHandle {
        RouteHandle {
            id: self.endpoint.id.clone(),
            url: self.endpoint.url.clone(),
            tag: self.endpoint.tag.clone(),
        }
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot {
            id: self.endpoint.id.clone(),
            url: self.endpoint.url.clone(),
            tag: self.endpoint.tag.clone(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            policy_blocks: self.policy_blocks,
            avg_latency_ms: self.avg_latency_ms(),
            score: self.score(),
            blacklisted: self.blacklisted,
        }
    }

    /// Restores counts from a previous run's snapshot
    ///
    /// Latency samples are not persisted; the window starts empty.
    pub fn restore(&mut self, snapshot: &RouteSnapshot) {
        self.success_count = snapshot.success_count;
        self.failure_count = snapshot.failure_count;
        self.policy_blocks = snapshot.policy_blocks;
        if snapshot.blacklisted {
            self.blacklisted = true;
            self.blacklisted_at = Some(Instant::now());
        }
    }
}
