use super::provisioner::GatewayProvisioner;
use super::route::{EndpointDescriptor, Route, RouteHandle, RouteSnapshot};
use crate::config::{RoutesConfig, SelectionMode};
use crate::Result;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Picks an index by walking cumulative scores until the sum reaches `r`
///
/// `r` is expected in `[0, total)`. Returns None for an empty slice, and the
/// last index if rounding leaves `r` past the total.
pub fn pick_weighted(scores: &[f64], r: f64) -> Option<usize> {
    let mut running = 0.0;
    for (index, score) in scores.iter().enumerate() {
        running += score;
        if running >= r {
            return Some(index);
        }
    }
    scores.len().checked_sub(1)
}

struct PoolInner {
    routes: Vec<Route>,
    cursor: usize,
    rng: StdRng,
    fail_open_clears: u64,
}

/// Health-scored pool of egress routes
///
/// Every read and update happens under one lock, so a score update and a
/// selection never interleave.
pub struct ProxyHealthPool {
    mode: SelectionMode,
    cooldown: Option<Duration>,
    inner: Mutex<PoolInner>,
}

impl ProxyHealthPool {
    pub fn new(config: &RoutesConfig, endpoints: Vec<EndpointDescriptor>) -> Self {
        Self::with_rng(config, endpoints, StdRng::from_entropy())
    }

    pub fn with_seed(config: &RoutesConfig, endpoints: Vec<EndpointDescriptor>, seed: u64) -> Self {
        Self::with_rng(config, endpoints, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &RoutesConfig, endpoints: Vec<EndpointDescriptor>, rng: StdRng) -> Self {
        Self {
            mode: config.selection,
            cooldown: config.blacklist_cooldown(),
            inner: Mutex::new(PoolInner {
                routes: endpoints.into_iter().map(Route::new).collect(),
                cursor: 0,
                rng,
                fail_open_clears: 0,
            }),
        }
    }

    /// Builds the pool from the endpoints a provisioner lists for the region
    ///
    /// A seed makes weighted and random selection reproducible.
    pub async fn provision(
        config: &RoutesConfig,
        provisioner: &dyn GatewayProvisioner,
        seed: Option<u64>,
    ) -> Result<Self> {
        let endpoints = provisioner.list_endpoints(config.region.as_deref()).await?;
        info!(
            count = endpoints.len(),
            region = config.region.as_deref().unwrap_or("any"),
            "Provisioned egress routes"
        );
        Ok(match seed {
            Some(seed) => Self::with_seed(config, endpoints, seed),
            None => Self::new(config, endpoints),
        })
    }

    /// Chooses a route for one dispatch
    ///
    /// Routes tagged with `purpose` are preferred when any is eligible. If
    /// every route is blacklisted, all blacklists are cleared first so the
    /// crawl cannot deadlock. Returns None only when the pool is empty.
    pub fn acquire_route(&self, purpose: Option<&str>) -> Option<RouteHandle> {
        let mut inner = self.inner.lock();
        if inner.routes.is_empty() {
            return None;
        }

        if let Some(cooldown) = self.cooldown {
            let now = Instant::now();
            for route in inner.routes.iter_mut() {
                let expired = route
                    .blacklisted_at
                    .map_or(false, |at| now.saturating_duration_since(at) >= cooldown);
                if route.blacklisted && expired {
                    debug!(route = %route.id(), "Blacklist cooldown elapsed");
                    route.clear_blacklist();
                }
            }
        }

        let mut eligible = Self::eligible(&inner.routes);
        if eligible.is_empty() {
            warn!(
                routes = inner.routes.len(),
                "Every route is blacklisted; clearing blacklists"
            );
            inner.routes.iter_mut().for_each(Route::clear_blacklist);
            inner.fail_open_clears += 1;
            eligible = Self::eligible(&inner.routes);
        }

        if let Some(purpose) = purpose {
            let tagged: Vec<usize> = eligible
                .iter()
                .copied()
                .filter(|&i| inner.routes[i].endpoint.tag.as_deref() == Some(purpose))
                .collect();
            if !tagged.is_empty() {
                eligible = tagged;
            }
        }

        let chosen = match self.mode {
            SelectionMode::Random => Self::pick_uniform(&mut inner, &eligible),
            SelectionMode::RoundRobin => {
                let position = inner.cursor % eligible.len();
                inner.cursor = inner.cursor.wrapping_add(1);
                eligible.get(position).copied()
            }
            SelectionMode::Weighted => {
                let scores: Vec<f64> = eligible.iter().map(|&i| inner.routes[i].score()).collect();
                let total: f64 = scores.iter().sum();
                if total > 0.0 {
                    let r = inner.rng.gen_range(0.0..total);
                    pick_weighted(&scores, r).and_then(|pos| eligible.get(pos).copied())
                } else {
                    Self::pick_uniform(&mut inner, &eligible)
                }
            }
        }?;

        Some(inner.routes[chosen].handle())
    }

    /// Feeds one dispatch result into the route's health
    ///
    /// Returns false if no route has this id.
    pub fn report_outcome(&self, route_id: &str, success: bool, latency_ms: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(route) = inner.routes.iter_mut().find(|r| r.id() == route_id) else {
            return false;
        };

        if route.record(success, latency_ms) {
            warn!(
                route = %route_id,
                success_rate = route.success_rate(),
                requests = route.total(),
                "Route blacklisted"
            );
        }
        true
    }

    /// Counts a 403/429 seen through this route
    pub fn record_policy_block(&self, route_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(route) = inner.routes.iter_mut().find(|r| r.id() == route_id) {
            route.policy_blocks += 1;
        }
    }

    /// Returns every route to the eligible set; counts are kept
    pub fn clear_blacklist(&self) {
        let mut inner = self.inner.lock();
        inner.routes.iter_mut().for_each(Route::clear_blacklist);
    }

    pub fn snapshots(&self) -> Vec<RouteSnapshot> {
        self.inner.lock().routes.iter().map(Route::snapshot).collect()
    }

    /// Applies health saved by a previous run to routes that still exist
    pub fn restore(&self, snapshots: &[RouteSnapshot]) {
        let mut inner = self.inner.lock();
        for snapshot in snapshots {
            if let Some(route) = inner.routes.iter_mut().find(|r| r.id() == snapshot.id) {
                route.restore(snapshot);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().routes.is_empty()
    }

    /// Times every route was blacklisted at once and the pool failed open
    pub fn fail_open_clears(&self) -> u64 {
        self.inner.lock().fail_open_clears
    }

    fn eligible(routes: &[Route]) -> Vec<usize> {
        routes
            .iter()
            .enumerate()
            .filter(|(_, route)| !route.blacklisted)
            .map(|(index, _)| index)
            .collect()
    }

    fn pick_uniform(inner: &mut PoolInner, eligible: &[usize]) -> Option<usize> {
        if eligible.is_empty() {
            return None;
        }
        let position = inner.rng.gen_range(0..eligible.len());
        eligible.get(position).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str, tag: Option<&str>) -> EndpointDescriptor {
        EndpointDescriptor {
            id: id.to_string(),
            url: format!("http://{}.proxy.test:3128", id),
            tag: tag.map(str::to_string),
        }
    }

    fn config(selection: SelectionMode) -> RoutesConfig {
        RoutesConfig {
            selection,
            ..Default::default()
        }
    }

    #[test]
    fn test_pick_weighted_walk() {
        let scores = [90.0, 10.0];
        assert_eq!(pick_weighted(&scores, 0.0), Some(0));
        assert_eq!(pick_weighted(&scores, 89.9), Some(0));
        assert_eq!(pick_weighted(&scores, 90.5), Some(1));
        assert_eq!(pick_weighted(&scores, 150.0), Some(1));
        assert_eq!(pick_weighted(&[], 1.0), None);
    }

    #[test]
    fn test_weighted_distribution() {
        let mut rng = StdRng::seed_from_u64(2024);
        let scores = [90.0, 10.0];
        let picks_a = (0..1000)
            .filter(|_| pick_weighted(&scores, rng.gen_range(0.0..100.0)) == Some(0))
            .count();
        assert!((850..=950).contains(&picks_a), "A picked {} times", picks_a);
    }

    #[test]
    fn test_weighted_pool_prefers_healthy_route() {
        let pool = ProxyHealthPool::with_seed(
            &config(SelectionMode::Weighted),
            vec![endpoint("a", None), endpoint("b", None)],
            7,
        );
        // a: 9 of 10 ok scores 90; b: 1 of 9 ok scores about 11, not yet blacklisted
        for i in 0..10 {
            pool.report_outcome("a", i != 0, 50);
        }
        for i in 0..9 {
            pool.report_outcome("b", i == 0, 50);
        }

        let picks_a = (0..1000)
            .filter(|_| pool.acquire_route(None).map(|h| h.id) == Some("a".to_string()))
            .count();
        assert!((850..=950).contains(&picks_a), "a picked {} times", picks_a);
    }

    #[test]
    fn test_blacklisted_route_excluded() {
        let pool = ProxyHealthPool::with_seed(
            &config(SelectionMode::Random),
            vec![endpoint("good", None), endpoint("bad", None)],
            1,
        );
        for _ in 0..10 {
            pool.report_outcome("bad", false, 10);
        }

        for _ in 0..200 {
            assert_eq!(pool.acquire_route(None).unwrap().id, "good");
        }

        pool.clear_blacklist();
        let seen_bad = (0..200).any(|_| pool.acquire_route(None).unwrap().id == "bad");
        assert!(seen_bad);
    }

    #[test]
    fn test_fail_open_when_all_blacklisted() {
        let pool = ProxyHealthPool::new(&config(SelectionMode::RoundRobin), vec![endpoint("only", None)]);
        for _ in 0..10 {
            pool.report_outcome("only", false, 10);
        }
        assert!(pool.snapshots()[0].blacklisted);

        let handle = pool.acquire_route(None);
        assert_eq!(handle.unwrap().id, "only");
        assert_eq!(pool.fail_open_clears(), 1);
        assert!(!pool.snapshots()[0].blacklisted);
    }

    #[test]
    fn test_cooldown_clears_blacklist() {
        let mut cfg = config(SelectionMode::RoundRobin);
        cfg.blacklist_cooldown_secs = 1;
        let pool = ProxyHealthPool::new(&cfg, vec![endpoint("a", None), endpoint("b", None)]);
        for _ in 0..10 {
            pool.report_outcome("b", false, 10);
        }
        assert!((0..4).all(|_| pool.acquire_route(None).unwrap().id == "a"));

        std::thread::sleep(Duration::from_millis(1050));
        let ids: Vec<String> = (0..2).map(|_| pool.acquire_route(None).unwrap().id).collect();
        assert!(ids.contains(&"b".to_string()));
    }

    #[test]
    fn test_round_robin_cycles() {
        let pool = ProxyHealthPool::new(
            &config(SelectionMode::RoundRobin),
            vec![endpoint("a", None), endpoint("b", None), endpoint("c", None)],
        );
        let ids: Vec<String> = (0..6).map(|_| pool.acquire_route(None).unwrap().id).collect();
        assert_eq!(ids, ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_purpose_prefers_tag() {
        let pool = ProxyHealthPool::new(
            &config(SelectionMode::RoundRobin),
            vec![endpoint("us", Some("us")), endpoint("eu", Some("eu"))],
        );
        assert!((0..4).all(|_| pool.acquire_route(Some("eu")).unwrap().id == "eu"));
        // Unknown purpose falls back to the whole eligible set
        assert!(pool.acquire_route(Some("apac")).is_some());
    }

    #[test]
    fn test_empty_pool_and_unknown_route() {
        let pool = ProxyHealthPool::new(&config(SelectionMode::Weighted), Vec::new());
        assert!(pool.acquire_route(None).is_none());
        assert!(!pool.report_outcome("ghost", true, 1));
    }

    #[test]
    fn test_restore_applies_counts() {
        let pool = ProxyHealthPool::new(&config(SelectionMode::Weighted), vec![endpoint("a", None)]);
        let mut saved = pool.snapshots();
        saved[0].success_count = 7;
        saved[0].failure_count = 3;
        pool.restore(&saved);

        let restored = &pool.snapshots()[0];
        assert_eq!(restored.success_count, 7);
        assert!((restored.success_rate() - 0.7).abs() < 1e-9);
    }
}
