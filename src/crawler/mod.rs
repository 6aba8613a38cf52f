//! Crawler module: everything between the frontier and the fetch
//!
//! This module contains the dispatch machinery, including:
//! - The request scheduler (frontier, dedup, politeness)
//! - The concurrency governor (global and per-domain admission)
//! - The middleware pipeline and its built-in hooks
//! - The fetcher and link extractor seams, with reqwest and scraper backends
//! - The coordinator that drives requests through all of the above

pub mod action;
mod coordinator;
mod fetcher;
mod governor;
mod middleware;
mod outcome;
mod parser;
mod request;
mod scheduler;

pub use action::PageAction;
pub use coordinator::{CoordinatorBuilder, CrawlCoordinator, StopHandle};
pub use fetcher::{build_http_client, FetchResult, Fetcher, HttpFetcher, Response};
pub use governor::{ConcurrencyGovernor, DomainPermit, GlobalPermit};
pub use middleware::{
    DefaultHeadersMiddleware, IdentityMiddleware, Middleware, MiddlewarePipeline,
    RetryMiddleware, TracingMiddleware,
};
pub use outcome::{classify_status, Outcome, OutcomeKind};
pub use parser::{HtmlLinkExtractor, LinkExtractor};
pub use request::{Method, Request};
pub use scheduler::{Dequeue, RequestScheduler, ADMISSION_WAIT};
