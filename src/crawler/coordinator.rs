//! Crawl coordinator: the dispatch loop
//!
//! One control loop pulls ready requests from the scheduler and spawns a
//! dispatch unit per request. A unit owns its request until it reaches a
//! terminal state or is handed back to the scheduler for a retry or a
//! deferral. Governor permits travel with the unit and are released on every
//! exit path, including cancellation.
//!
//! ```text
//! loop:  acquire global slot -> dequeue (domain ready + domain slot free) -> spawn
//! unit:  policy -> request hooks -> route -> fetch -> report route
//!        -> response hooks + links      (success)
//!        -> exception hooks -> requeue  (retry / deferral, after backoff)
//!        -> terminal                    (everything else)
//! ```

use crate::config::Config;
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::governor::{ConcurrencyGovernor, DomainPermit, GlobalPermit};
use crate::crawler::middleware::{
    DefaultHeadersMiddleware, IdentityMiddleware, Middleware, MiddlewarePipeline,
    RetryMiddleware, TracingMiddleware,
};
use crate::crawler::outcome::{Outcome, OutcomeKind};
use crate::crawler::parser::{HtmlLinkExtractor, LinkExtractor};
use crate::crawler::request::{Method, Request};
use crate::crawler::scheduler::{Dequeue, RequestScheduler};
use crate::identity::{BuiltinProfileGenerator, IdentityProfileGenerator, IdentityRotator};
use crate::output::{CrawlStats, StatsCollector};
use crate::policy::{DispatchPolicy, RobotsRules};
use crate::routes::{
    GatewayProvisioner, ProxyHealthPool, RouteHandle, RouteSnapshot, StaticProvisioner,
};
use crate::state::RequestState;
use crate::storage::{PendingRequest, ResumeState};
use crate::{DispatchError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Longest the loop sleeps without re-checking the scheduler
const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Assembles a coordinator from configuration and optional collaborators
///
/// Anything not supplied falls back to the built-in implementation: the
/// reqwest fetcher, the HTML link extractor, the built-in identity generator
/// and a route pool provisioned from `[[routes.endpoint]]`.
pub struct CoordinatorBuilder {
    config: Config,
    fetcher: Option<Arc<dyn Fetcher>>,
    link_extractor: Option<Arc<dyn LinkExtractor>>,
    identity_generator: Option<Arc<dyn IdentityProfileGenerator>>,
    routes: Option<ProxyHealthPool>,
    provisioner: Option<Arc<dyn GatewayProvisioner>>,
    default_headers: BTreeMap<String, String>,
    middleware: Vec<Arc<dyn Middleware>>,
    resume: Option<ResumeState>,
    seed: Option<u64>,
}

impl CoordinatorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fetcher: None,
            link_extractor: None,
            identity_generator: None,
            routes: None,
            provisioner: None,
            default_headers: BTreeMap::new(),
            middleware: Vec::new(),
            resume: None,
            seed: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn link_extractor(mut self, extractor: Arc<dyn LinkExtractor>) -> Self {
        self.link_extractor = Some(extractor);
        self
    }

    pub fn identity_generator(mut self, generator: Arc<dyn IdentityProfileGenerator>) -> Self {
        self.identity_generator = Some(generator);
        self
    }

    /// Uses an already built route pool instead of provisioning one
    pub fn routes(mut self, pool: ProxyHealthPool) -> Self {
        self.routes = Some(pool);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn GatewayProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Headers added to every request that does not already carry them
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Registers an extra hook; extras run after the built-in request hooks
    /// and before the retry hook
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Seen fingerprints and route health carried over from an earlier run
    pub fn resume(mut self, state: ResumeState) -> Self {
        self.resume = Some(state);
        self
    }

    /// Fixes every random choice (strategy, routes, identities)
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub async fn build(self) -> Result<CrawlCoordinator> {
        let config = self.config;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config.fetch, &config.policy.robots_agent)?),
        };
        let extractor: Arc<dyn LinkExtractor> = match self.link_extractor {
            Some(extractor) => extractor,
            None => Arc::new(HtmlLinkExtractor::new()),
        };
        let generator: Arc<dyn IdentityProfileGenerator> = match (self.identity_generator, self.seed)
        {
            (Some(generator), _) => generator,
            (None, Some(seed)) => Arc::new(BuiltinProfileGenerator::with_seed(seed)),
            (None, None) => Arc::new(BuiltinProfileGenerator::new()),
        };

        let routes = match self.routes {
            Some(pool) => pool,
            None => {
                let provisioner: Arc<dyn GatewayProvisioner> = match self.provisioner {
                    Some(provisioner) => provisioner,
                    None => Arc::new(StaticProvisioner::from_entries(&config.routes.endpoints)),
                };
                ProxyHealthPool::provision(&config.routes, provisioner.as_ref(), self.seed).await?
            }
        };

        let scheduler = match self.seed {
            Some(seed) => RequestScheduler::with_seed(&config.scheduler, seed),
            None => RequestScheduler::new(&config.scheduler),
        };
        for entry in &config.domain {
            scheduler.set_domain_delay(&entry.domain, Duration::from_millis(entry.delay_ms));
        }

        if let Some(resume) = self.resume {
            if !resume.is_empty() {
                info!(
                    seen = resume.seen.len(),
                    pending = resume.pending.len(),
                    routes = resume.routes.len(),
                    "Restoring resume state"
                );
            }
            scheduler.mark_seen(resume.seen);
            for pending in &resume.pending {
                match restore_pending(pending) {
                    Some(request) => {
                        scheduler.enqueue(request);
                    }
                    None => warn!(url = %pending.url, "Dropping unusable pending request"),
                }
            }
            routes.restore(&resume.routes);
        }

        let rotator = Arc::new(IdentityRotator::new(&config.identity, generator));

        let mut hooks: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TracingMiddleware),
            Arc::new(IdentityMiddleware::new(
                rotator.clone(),
                config.identity.rotate_on_retry,
            )),
        ];
        if !self.default_headers.is_empty() {
            hooks.push(Arc::new(DefaultHeadersMiddleware::new(self.default_headers)));
        }
        hooks.extend(self.middleware);
        hooks.push(Arc::new(RetryMiddleware::new(config.retry.max_retries)));
        let pipeline = MiddlewarePipeline::new(hooks);
        debug!(hooks = ?pipeline.names(), "Middleware pipeline ready");

        let governor = ConcurrencyGovernor::new(
            config.concurrency.max_concurrent as usize,
            config.concurrency.max_per_domain as usize,
        );

        Ok(CrawlCoordinator {
            shared: Arc::new(Shared {
                policy: DispatchPolicy::new(&config.policy),
                stats: StatsCollector::new(config.stats.recent_errors),
                scheduler,
                governor,
                pipeline,
                rotator,
                routes,
                fetcher,
                extractor,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                unfinished: Mutex::new(Vec::new()),
                config,
            }),
        })
    }
}

/// Handle that stops a running coordinator from another task
#[derive(Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Shared {
    config: Config,
    scheduler: RequestScheduler,
    governor: ConcurrencyGovernor,
    pipeline: MiddlewarePipeline,
    rotator: Arc<IdentityRotator>,
    routes: ProxyHealthPool,
    policy: DispatchPolicy,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn LinkExtractor>,
    stats: StatsCollector,
    cancel: CancellationToken,
    started: AtomicBool,

    /// Requests cut short by a stop, kept for the resume state
    unfinished: Mutex<Vec<Request>>,
}

/// Drives requests from the scheduler to the fetcher and back
pub struct CrawlCoordinator {
    shared: Arc<Shared>,
}

impl CrawlCoordinator {
    pub fn builder(config: Config) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// Crawls from `seeds` until nothing is queued or in flight, or until stopped
    ///
    /// Seeds that fail to parse are counted as failed and skipped. A
    /// coordinator runs once; a second call fails with `AlreadyStarted`.
    pub async fn start<S: AsRef<str>>(&self, seeds: &[S]) -> Result<CrawlStats> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyStarted);
        }

        self.shared.stats.mark_started();
        let mut accepted = 0usize;
        for seed in seeds {
            if self.submit_seed(seed.as_ref()) {
                accepted += 1;
            }
        }
        info!(
            seeds = accepted,
            strategy = ?self.shared.scheduler.strategy(),
            max_concurrent = self.shared.governor.max_concurrent(),
            max_per_domain = self.shared.governor.max_per_domain(),
            routes = self.shared.routes.len(),
            "Starting dispatch"
        );

        self.run_loop().await;

        let stats = self.get_stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            policy_blocked = stats.policy_blocked,
            cancelled = stats.cancelled,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Dispatch finished"
        );
        Ok(stats)
    }

    /// Adds a request to the frontier; false if it was a duplicate
    ///
    /// Usable before `start` and while it runs.
    pub fn submit(&self, request: Request) -> bool {
        self.shared.scheduler.enqueue(request)
    }

    /// Requests a graceful stop
    ///
    /// Queued requests are discarded, in-flight units finish as Cancelled at
    /// their next suspension point, and `start` returns.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.shared.cancel.clone(),
        }
    }

    pub fn get_stats(&self) -> CrawlStats {
        let shared = &self.shared;
        shared.stats.snapshot(
            &shared.scheduler.queued_per_domain(),
            &shared.governor.domains_in_flight(),
            &shared.routes.snapshots(),
            shared.scheduler.duplicates(),
        )
    }

    pub fn get_route_health(&self) -> Vec<RouteSnapshot> {
        self.shared.routes.snapshots()
    }

    /// State a later run can resume from
    ///
    /// Requests discarded or cancelled by a stop are listed as pending and
    /// left out of the seen set, so the next run dispatches them.
    pub fn resume_state(&self) -> ResumeState {
        let unfinished = self.shared.unfinished.lock();
        let pending_fingerprints: HashSet<&str> =
            unfinished.iter().map(|r| r.fingerprint()).collect();

        let seen = self
            .shared
            .scheduler
            .seen_fingerprints()
            .into_iter()
            .filter(|fp| !pending_fingerprints.contains(fp.as_str()))
            .collect();

        ResumeState {
            seen,
            pending: unfinished.iter().map(pending_entry).collect(),
            routes: self.shared.routes.snapshots(),
        }
    }

    /// Installs robots.txt rules for a domain
    ///
    /// A crawl delay in the rules raises the domain's politeness delay; it
    /// never lowers it.
    pub fn register_robots(&self, domain: &str, rules: RobotsRules) {
        if let Some(delay) = self.shared.policy.register_robots(domain, rules) {
            if delay > self.shared.scheduler.domain_delay(domain) {
                info!(
                    domain = %domain,
                    delay_ms = delay.as_millis() as u64,
                    "Applying robots.txt crawl delay"
                );
                self.shared.scheduler.set_domain_delay(domain, delay);
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.shared.scheduler
    }

    pub fn governor(&self) -> &ConcurrencyGovernor {
        &self.shared.governor
    }

    pub fn routes(&self) -> &ProxyHealthPool {
        &self.shared.routes
    }

    pub fn rotator(&self) -> &IdentityRotator {
        &self.shared.rotator
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.shared.policy
    }

    fn submit_seed(&self, seed: &str) -> bool {
        match Request::get(seed) {
            Ok(request) => {
                let accepted = self.shared.scheduler.enqueue(request);
                if !accepted {
                    debug!(url = %seed, "Seed already seen");
                }
                accepted
            }
            Err(e) => {
                warn!(url = %seed, error = %e, "Dropping malformed seed");
                self.shared.stats.record_terminal(RequestState::Failed);
                false
            }
        }
    }

    async fn run_loop(&self) {
        let shared = &self.shared;
        let mut units = JoinSet::new();

        loop {
            if shared.cancel.is_cancelled() {
                break;
            }
            if shared.scheduler.is_empty() && units.is_empty() {
                info!("Frontier is empty, dispatch complete");
                break;
            }

            let global = tokio::select! {
                _ = shared.cancel.cancelled() => break,
                joined = units.join_next(), if !units.is_empty() => {
                    reap(&shared.governor, joined);
                    continue;
                }
                permit = shared.governor.acquire_global() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = shared
                .scheduler
                .dequeue_admitted(|domain| shared.governor.try_acquire_domain(domain));

            match next {
                Dequeue::Ready((request, domain_slot)) => {
                    let unit = shared.clone();
                    units.spawn(async move { unit.dispatch(request, global, domain_slot).await });
                }
                Dequeue::NotReady(wait) => {
                    global.release();
                    let wait = wait.min(MAX_IDLE_WAIT);
                    tokio::select! {
                        _ = shared.cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                        _ = shared.scheduler.notified() => {}
                        joined = units.join_next(), if !units.is_empty() => reap(&shared.governor, joined),
                    }
                }
                Dequeue::Empty => {
                    global.release();
                    if units.is_empty() {
                        continue;
                    }
                    tokio::select! {
                        _ = shared.cancel.cancelled() => break,
                        _ = shared.scheduler.notified() => {}
                        joined = units.join_next() => reap(&shared.governor, joined),
                    }
                }
            }
        }

        if shared.cancel.is_cancelled() {
            let discarded = shared.scheduler.drain();
            shared.governor.close();
            info!(
                discarded = discarded.len(),
                in_flight = units.len(),
                "Stopping dispatch"
            );
            shared.unfinished.lock().extend(discarded);
        }

        while let Some(joined) = units.join_next().await {
            reap(&shared.governor, Some(joined));
        }
    }
}

fn pending_entry(request: &Request) -> PendingRequest {
    PendingRequest {
        method: request.method().as_str().to_string(),
        url: request.url().to_string(),
        body: request.body().map(str::to_string),
        depth: request.depth,
        priority: request.priority,
    }
}

fn restore_pending(pending: &PendingRequest) -> Option<Request> {
    let method = Method::parse(&pending.method)?;
    let request = Request::new(method, &pending.url, pending.body.clone()).ok()?;
    Some(request.with_depth(pending.depth).with_priority(pending.priority))
}

fn reap(
    governor: &ConcurrencyGovernor,
    joined: Option<std::result::Result<(), tokio::task::JoinError>>,
) {
    if let Some(Err(e)) = joined {
        error!(error = %e, "Dispatch unit aborted");
    }
    // Held domains never exceed max_concurrent, so this bounds the map
    if governor.tracked_domains() > governor.max_concurrent() * 2 {
        let pruned = governor.prune_idle();
        trace!(pruned, "Pruned idle domain slots");
    }
}

/// Where a dispatch unit left its request
enum Disposition {
    Terminal(RequestState),
    Requeue { request: Request, wait: Duration },
}

impl Shared {
    /// Runs one request through the pipeline and settles its outcome
    async fn dispatch(
        self: Arc<Self>,
        mut request: Request,
        global: GlobalPermit,
        domain_slot: DomainPermit,
    ) {
        if let Err(e) = request.advance(RequestState::Dispatched) {
            warn!(url = %request.url(), error = %e, "Dropping request in unexpected state");
            return;
        }

        let resume_copy = request.clone();
        let disposition = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.unfinished.lock().push(resume_copy);
                Disposition::Terminal(RequestState::Cancelled)
            }
            disposition = self.run_unit(request) => disposition,
        };

        // Slots go back before any backoff
        domain_slot.release();
        global.release();

        match disposition {
            Disposition::Terminal(state) => self.stats.record_terminal(state),
            Disposition::Requeue { request, wait } => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.stats.record_terminal(RequestState::Cancelled);
                        self.unfinished.lock().push(request);
                    }
                    _ = tokio::time::sleep(wait) => {
                        self.scheduler.requeue(request);
                    }
                }
            }
        }
    }

    async fn run_unit(&self, request: Request) -> Disposition {
        let domain = request.domain().to_string();
        let url = request.url().to_string();

        if let Err(reason) = self.policy.check(&request) {
            warn!(url = %url, reason = %reason, "Refused by dispatch policy");
            self.stats
                .record_error(&domain, &url, OutcomeKind::Fatal, &reason);
            return Disposition::Terminal(RequestState::Failed);
        }

        let Some(mut request) = self.pipeline.process_request(request).await else {
            debug!(url = %url, "Request filtered by middleware");
            return Disposition::Terminal(RequestState::Filtered);
        };

        let route = match self.routes.acquire_route(request.route_tag.as_deref()) {
            Some(route) => Some(route),
            None if self.config.routes.allow_direct => None,
            None => return self.defer(request),
        };

        let result = self.fetcher.fetch(&request, route.as_ref()).await;
        let outcome = result.outcome;
        let route_id = route.as_ref().map(|r| r.id.as_str());
        self.report_route(route.as_ref(), &outcome);
        self.stats.record_attempt(&domain, route_id, &url, &outcome);

        match (outcome.kind, result.response) {
            (OutcomeKind::Success, Some(response)) => {
                let response = self.pipeline.process_response(&request, response).await;
                self.follow_links(&request, &self.extractor.extract(&response));
                if let Err(e) = request.advance(RequestState::Succeeded) {
                    debug!(url = %url, error = %e, "Unexpected state on success");
                }
                Disposition::Terminal(RequestState::Succeeded)
            }
            (kind, _) => {
                let outcome = if kind == OutcomeKind::Success {
                    // A success without a body cannot be processed further
                    Outcome::fatal("fetcher reported success without a response")
                } else {
                    outcome
                };
                self.settle_failure(request, &outcome).await
            }
        }
    }

    async fn settle_failure(&self, request: Request, outcome: &Outcome) -> Disposition {
        let retry = self.pipeline.process_exception(&request, outcome).await;

        if let Some(mut retry) = retry {
            // Hooks may hand back the request unchanged; every retry counts
            retry.retry_count = retry.retry_count.max(request.retry_count + 1);
            if outcome.kind == OutcomeKind::PolicyBlocked {
                debug!(url = %request.url(), "Retry refused: blocked by origin");
            } else if retry.retry_count <= self.config.retry.max_retries {
                self.stats.record_retry(request.domain());
                let wait = self.config.retry.backoff(retry.retry_count);
                debug!(
                    url = %request.url(),
                    attempt = retry.retry_count,
                    backoff_ms = wait.as_millis() as u64,
                    "Retry scheduled"
                );
                return Disposition::Requeue {
                    request: retry,
                    wait,
                };
            } else {
                debug!(url = %request.url(), "Retry refused: retry budget spent");
            }
        }

        match outcome.kind {
            OutcomeKind::PolicyBlocked => {
                warn!(url = %request.url(), error = %outcome.describe(), "Blocked by origin");
                Disposition::Terminal(RequestState::PolicyBlocked)
            }
            _ => {
                warn!(
                    url = %request.url(),
                    kind = %outcome.kind,
                    retries = request.retry_count,
                    error = %outcome.describe(),
                    "Request failed"
                );
                Disposition::Terminal(RequestState::Failed)
            }
        }
    }

    /// Puts a request back when no egress route could carry it
    fn defer(&self, mut request: Request) -> Disposition {
        if request.deferrals >= self.config.retry.max_deferrals {
            let reason = format!("no egress route after {} deferrals", request.deferrals);
            warn!(url = %request.url(), "{}", reason);
            self.stats
                .record_error(request.domain(), request.url().as_str(), OutcomeKind::Fatal, &reason);
            return Disposition::Terminal(RequestState::Failed);
        }

        request.deferrals += 1;
        self.stats.record_deferral();
        let wait = self.config.retry.backoff(request.deferrals);
        debug!(url = %request.url(), deferrals = request.deferrals, "No route available, deferring");
        Disposition::Requeue { request, wait }
    }

    /// Feeds the outcome into the route's health score
    fn report_route(&self, route: Option<&RouteHandle>, outcome: &Outcome) {
        let Some(route) = route else {
            return;
        };

        let success = match outcome.kind {
            OutcomeKind::Success => true,
            // The route delivered an answer; the origin just did not like the request
            OutcomeKind::Fatal => outcome.status.is_some(),
            OutcomeKind::Transient => false,
            OutcomeKind::PolicyBlocked => {
                self.routes.record_policy_block(&route.id);
                if !self.config.routes.penalize_policy_blocks {
                    return;
                }
                false
            }
        };

        self.routes
            .report_outcome(&route.id, success, outcome.latency_ms());
    }

    fn follow_links(&self, parent: &Request, links: &[String]) {
        let max_depth = self.config.scheduler.max_depth;
        if parent.depth >= max_depth {
            return;
        }

        let mut added = 0usize;
        for link in links {
            match parent.child(link) {
                Ok(child) => {
                    if self.scheduler.enqueue(child) {
                        added += 1;
                    }
                }
                Err(e) => debug!(link = %link, error = %e, "Skipping unusable link"),
            }
        }

        if added > 0 {
            debug!(url = %parent.url(), added, depth = parent.depth + 1, "Enqueued discovered links");
        }
    }
}
