//! Middleware pipeline
//!
//! Hooks run around every dispatch in registration order:
//! - `process_request` may rewrite a request or drop it (returning None)
//! - `process_response` may transform the response
//! - `process_exception` may hand back a request to retry; the first hook
//!   that does wins
//!
//! The pipeline is built once at startup and shared read-only afterwards.

use crate::crawler::fetcher::Response;
use crate::crawler::outcome::{Outcome, OutcomeKind};
use crate::crawler::request::Request;
use crate::identity::IdentityRotator;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the request to continue with, or None to drop it
    async fn process_request(&self, request: Request) -> Option<Request> {
        Some(request)
    }

    async fn process_response(&self, _request: &Request, response: Response) -> Response {
        response
    }

    /// Returns a request to requeue, or None to let the next hook decide
    async fn process_exception(&self, _request: &Request, _outcome: &Outcome) -> Option<Request> {
        None
    }
}

/// Ordered, immutable list of middleware
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub async fn process_request(&self, request: Request) -> Option<Request> {
        let mut current = request;
        for middleware in &self.middlewares {
            match middleware.process_request(current).await {
                Some(next) => current = next,
                None => {
                    debug!(middleware = middleware.name(), "Request dropped by middleware");
                    return None;
                }
            }
        }
        Some(current)
    }

    pub async fn process_response(&self, request: &Request, response: Response) -> Response {
        let mut current = response;
        for middleware in &self.middlewares {
            current = middleware.process_response(request, current).await;
        }
        current
    }

    pub async fn process_exception(&self, request: &Request, outcome: &Outcome) -> Option<Request> {
        for middleware in &self.middlewares {
            if let Some(retry) = middleware.process_exception(request, outcome).await {
                trace!(middleware = middleware.name(), "Exception hook scheduled a retry");
                return Some(retry);
            }
        }
        None
    }
}

/// Adds fixed headers the request does not already carry
pub struct DefaultHeadersMiddleware {
    headers: BTreeMap<String, String>,
}

impl DefaultHeadersMiddleware {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self { headers }
    }
}

#[async_trait]
impl Middleware for DefaultHeadersMiddleware {
    fn name(&self) -> &str {
        "default-headers"
    }

    async fn process_request(&self, mut request: Request) -> Option<Request> {
        for (name, value) in &self.headers {
            let present = request
                .headers
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(name));
            if !present {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        Some(request)
    }
}

/// Applies an outbound identity to each request
///
/// On the first dispatch, identity headers fill in whatever the request
/// does not set itself. On a re-dispatch they replace the headers of the
/// previous identity.
pub struct IdentityMiddleware {
    rotator: Arc<IdentityRotator>,
    rotate_on_retry: bool,
}

impl IdentityMiddleware {
    pub fn new(rotator: Arc<IdentityRotator>, rotate_on_retry: bool) -> Self {
        Self {
            rotator,
            rotate_on_retry,
        }
    }
}

#[async_trait]
impl Middleware for IdentityMiddleware {
    fn name(&self) -> &str {
        "identity"
    }

    async fn process_request(&self, mut request: Request) -> Option<Request> {
        let force_new = self.rotate_on_retry && request.retry_count > 0;
        let criteria = request
            .identity
            .clone()
            .unwrap_or_else(|| self.rotator.default_criteria().clone());
        let profile = self.rotator.get_identity(&criteria, force_new);
        let replace = request.identity_id.is_some();

        for (name, value) in &profile.headers {
            let existing = request
                .headers
                .keys()
                .find(|key| key.eq_ignore_ascii_case(name))
                .cloned();
            match existing {
                Some(key) if replace => {
                    request.headers.remove(&key);
                    request.headers.insert(name.clone(), value.clone());
                }
                Some(_) => {}
                None => {
                    request.headers.insert(name.clone(), value.clone());
                }
            }
        }

        request.identity_id = Some(profile.id);
        Some(request)
    }
}

/// Retries transient failures while the request has retries left
pub struct RetryMiddleware {
    max_retries: u32,
}

impl RetryMiddleware {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn process_exception(&self, request: &Request, outcome: &Outcome) -> Option<Request> {
        if outcome.kind != OutcomeKind::Transient || request.retry_count >= self.max_retries {
            return None;
        }
        debug!(
            url = %request.url(),
            attempt = request.retry_count + 1,
            max = self.max_retries,
            error = %outcome.describe(),
            "Scheduling retry"
        );
        Some(request.retry())
    }
}

/// Emits a trace event at every hook
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn process_request(&self, request: Request) -> Option<Request> {
        trace!(
            method = %request.method(),
            url = %request.url(),
            depth = request.depth,
            retry = request.retry_count,
            "Dispatching"
        );
        Some(request)
    }

    async fn process_response(&self, request: &Request, response: Response) -> Response {
        trace!(url = %request.url(), status = response.status, "Response");
        response
    }

    async fn process_exception(&self, request: &Request, outcome: &Outcome) -> Option<Request> {
        trace!(url = %request.url(), kind = %outcome.kind, error = %outcome.describe(), "Exception");
        None
    }
}
