//! Integration tests for the crawl coordinator
//!
//! These tests drive the full dispatch loop against a scripted fetcher that
//! records every dispatch, so scheduling, admission and retry behaviour can
//! be checked without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_dispatch::config::{Config, Strategy};
use sumi_dispatch::crawler::{CrawlCoordinator, FetchResult, Fetcher, Outcome, Request, Response};
use sumi_dispatch::routes::RouteHandle;

/// One call to the scripted fetcher
#[derive(Debug, Clone)]
struct Dispatch {
    url: String,
    at: Instant,
    retry: u32,
    identity_id: Option<u64>,
    user_agent: Option<String>,
}

type Script = dyn Fn(&Request) -> FetchResult + Send + Sync;

struct ScriptedFetcher {
    latency: Duration,
    respond: Box<Script>,
    log: Mutex<Vec<Dispatch>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    per_domain: Mutex<HashMap<String, usize>>,
    per_domain_peak: AtomicUsize,
}

impl ScriptedFetcher {
    fn new<F>(latency: Duration, respond: F) -> Arc<Self>
    where
        F: Fn(&Request) -> FetchResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            latency,
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            per_domain: Mutex::new(HashMap::new()),
            per_domain_peak: AtomicUsize::new(0),
        })
    }

    fn ok(latency: Duration) -> Arc<Self> {
        Self::new(latency, |request| answer(request, 200))
    }

    fn dispatches(&self) -> Vec<Dispatch> {
        self.log.lock().clone()
    }

    fn urls(&self) -> Vec<String> {
        self.dispatches().into_iter().map(|d| d.url).collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request, _route: Option<&RouteHandle>) -> FetchResult {
        self.log.lock().push(Dispatch {
            url: request.url().to_string(),
            at: Instant::now(),
            retry: request.retry_count,
            identity_id: request.identity_id,
            user_agent: request.headers.get("User-Agent").cloned(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        {
            let mut per_domain = self.per_domain.lock();
            let count = per_domain.entry(request.domain().to_string()).or_default();
            *count += 1;
            self.per_domain_peak.fetch_max(*count, Ordering::SeqCst);
        }

        tokio::time::sleep(self.latency).await;

        if let Some(count) = self.per_domain.lock().get_mut(request.domain()) {
            *count -= 1;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.respond)(request)
    }
}

fn answer(request: &Request, status: u16) -> FetchResult {
    FetchResult::answered(
        Response {
            url: request.url().clone(),
            status,
            headers: BTreeMap::new(),
            body: String::new(),
        },
        Duration::from_millis(1),
    )
}

/// Configuration with no politeness delay and millisecond backoff
fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.default_delay_ms = 0;
    config.retry.backoff_base_ms = 1;
    config.retry.backoff_max_ms = 5;
    config.policy.respect_robots = false;
    config
}

async fn coordinator(config: Config, fetcher: Arc<ScriptedFetcher>) -> CrawlCoordinator {
    CrawlCoordinator::builder(config)
        .fetcher(fetcher)
        .seed(42)
        .build()
        .await
        .expect("Failed to build coordinator")
}

#[tokio::test]
async fn test_duplicate_seeds_dispatch_once() {
    let fetcher = ScriptedFetcher::ok(Duration::ZERO);
    let coordinator = coordinator(fast_config(), fetcher.clone()).await;

    let stats = coordinator
        .start(&[
            "https://example.com/page",
            "https://EXAMPLE.com/page#top",
            "https://example.com/page",
        ])
        .await
        .unwrap();

    assert_eq!(fetcher.urls(), ["https://example.com/page"]);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.duplicates, 2);
}

#[tokio::test]
async fn test_bfs_single_domain_respects_delay() {
    let mut config = fast_config();
    config.scheduler.strategy = Strategy::Bfs;
    config.scheduler.default_delay_ms = 1000;

    let fetcher = ScriptedFetcher::ok(Duration::ZERO);
    let coordinator = coordinator(config, fetcher.clone()).await;

    let seeds = [
        "https://slow.example/1",
        "https://slow.example/2",
        "https://slow.example/3",
    ];
    coordinator.start(&seeds).await.unwrap();

    let dispatches = fetcher.dispatches();
    let urls: Vec<_> = dispatches.iter().map(|d| d.url.as_str()).collect();
    assert_eq!(urls, seeds);

    // 5ms allowance for task spawn jitter between reservation and fetch
    for pair in dispatches.windows(2) {
        let gap = pair[1].at.duration_since(pair[0].at);
        assert!(
            gap >= Duration::from_millis(995),
            "dispatches only {:?} apart",
            gap
        );
    }
}

#[tokio::test]
async fn test_in_flight_never_exceeds_limits() {
    let mut config = fast_config();
    config.concurrency.max_concurrent = 3;
    config.concurrency.max_per_domain = 1;

    let fetcher = ScriptedFetcher::ok(Duration::from_millis(20));
    let coordinator = coordinator(config, fetcher.clone()).await;

    let seeds: Vec<String> = (0..6)
        .flat_map(|d| (0..3).map(move |p| format!("https://site{}.test/{}", d, p)))
        .collect();
    let stats = coordinator.start(&seeds).await.unwrap();

    assert_eq!(stats.completed, 18);
    assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    assert!(fetcher.per_domain_peak.load(Ordering::SeqCst) <= 1);
    assert!(coordinator.governor().peak_in_flight() <= 3);
    assert_eq!(coordinator.governor().in_flight(), 0);
    // The limit is actually reached
    assert!(fetcher.peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_transient_failure_retries_then_fails() {
    let mut config = fast_config();
    config.retry.max_retries = 2;

    let fetcher = ScriptedFetcher::new(Duration::ZERO, |_| {
        FetchResult::failed(Outcome::transient("connection reset", Duration::from_millis(3)))
    });
    let coordinator = coordinator(config, fetcher.clone()).await;

    let stats = coordinator.start(&["https://flaky.test/"]).await.unwrap();

    let retries: Vec<u32> = fetcher.dispatches().iter().map(|d| d.retry).collect();
    assert_eq!(retries, [0, 1, 2]);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);

    let domain = &stats.per_domain["flaky.test"];
    assert_eq!(domain.attempts, 3);
    assert!(!domain.recent_errors.is_empty());
}

#[tokio::test]
async fn test_server_error_recovers_on_retry() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO, |request| {
        if request.retry_count == 0 {
            answer(request, 503)
        } else {
            answer(request, 200)
        }
    });
    let coordinator = coordinator(fast_config(), fetcher.clone()).await;

    let stats = coordinator.start(&["https://busy.test/"]).await.unwrap();

    assert_eq!(fetcher.dispatches().len(), 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.retries, 1);
}

#[tokio::test]
async fn test_priority_strategy_dispatches_highest_first() {
    let mut config = fast_config();
    config.scheduler.strategy = Strategy::Priority;
    config.concurrency.max_concurrent = 1;
    config.concurrency.max_per_domain = 1;

    let fetcher = ScriptedFetcher::ok(Duration::ZERO);
    let coordinator = coordinator(config, fetcher.clone()).await;

    for (url, priority) in [
        ("https://low.test/", 1),
        ("https://high.test/", 10),
        ("https://mid.test/", 5),
        ("https://high.test/second", 10),
    ] {
        assert!(coordinator.submit(Request::get(url).unwrap().with_priority(priority)));
    }

    coordinator.start::<&str>(&[]).await.unwrap();

    assert_eq!(
        fetcher.urls(),
        [
            "https://high.test/",
            "https://high.test/second",
            "https://mid.test/",
            "https://low.test/",
        ]
    );
}

#[tokio::test]
async fn test_stop_cancels_in_flight_and_keeps_pending() {
    let mut config = fast_config();
    config.concurrency.max_concurrent = 1;

    let fetcher = ScriptedFetcher::ok(Duration::from_secs(30));
    let coordinator = Arc::new(coordinator(config, fetcher.clone()).await);

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .start(&["https://a.test/", "https://b.test/", "https://c.test/"])
                .await
        })
    };

    // Wait for the first dispatch to be in flight
    while fetcher.dispatches().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    coordinator.stop();

    let stats = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("coordinator did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(coordinator.governor().in_flight(), 0);

    let resume = coordinator.resume_state();
    assert_eq!(resume.pending.len(), 3);
    assert!(resume.seen.is_empty());
}

#[tokio::test]
async fn test_stats_count_first_requests_in_flight() {
    let fetcher = ScriptedFetcher::ok(Duration::from_millis(500));
    let coordinator = Arc::new(coordinator(fast_config(), fetcher.clone()).await);

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.start(&["https://a.test/", "https://b.test/"]).await })
    };

    while fetcher.dispatches().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Neither domain has finished a request or has anything queued yet
    let stats = coordinator.get_stats();
    assert_eq!(stats.in_flight, 2);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.per_domain["a.test"].in_flight, 1);
    assert_eq!(stats.per_domain["b.test"].in_flight, 1);

    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_session_identity_is_shared() {
    let mut config = fast_config();
    config.identity.session_persistence = true;

    let fetcher = ScriptedFetcher::ok(Duration::ZERO);
    let coordinator = coordinator(config, fetcher.clone()).await;

    coordinator
        .start(&["https://a.test/", "https://b.test/", "https://c.test/"])
        .await
        .unwrap();

    let dispatches = fetcher.dispatches();
    assert_eq!(dispatches.len(), 3);
    let ids: Vec<_> = dispatches.iter().map(|d| d.identity_id).collect();
    assert!(ids[0].is_some());
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert!(dispatches.iter().all(|d| d.user_agent.is_some()));
    assert_eq!(coordinator.rotator().stats().generated, 1);
}

#[tokio::test]
async fn test_retry_gets_fresh_identity_when_configured() {
    let mut config = fast_config();
    config.identity.rotate_on_retry = true;

    let fetcher = ScriptedFetcher::new(Duration::ZERO, |request| {
        if request.retry_count == 0 {
            answer(request, 502)
        } else {
            answer(request, 200)
        }
    });
    let coordinator = coordinator(config, fetcher.clone()).await;

    coordinator.start(&["https://a.test/"]).await.unwrap();

    let dispatches = fetcher.dispatches();
    assert_eq!(dispatches.len(), 2);
    assert_ne!(dispatches[0].identity_id, dispatches[1].identity_id);
}

#[tokio::test]
async fn test_failures_never_stop_the_loop() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO, |request| match request.url().path() {
        "/gone" => answer(request, 404),
        "/blocked" => answer(request, 403),
        _ => answer(request, 200),
    });
    let coordinator = coordinator(fast_config(), fetcher.clone()).await;

    let stats = coordinator
        .start(&[
            "https://a.test/gone",
            "not a url",
            "https://b.test/blocked",
            "https://c.test/fine",
        ])
        .await
        .unwrap();

    assert_eq!(stats.completed, 1);
    assert_eq!(stats.policy_blocked, 1);
    // the 404 and the malformed seed
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.retries, 0);
}
