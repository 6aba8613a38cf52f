//! Fetch backends
//!
//! This module provides:
//! - The `Fetcher` trait the coordinator dispatches through
//! - `HttpFetcher`, a reqwest backend with one client per egress route
//! - Error classification into `Outcome`s (a fetch never returns an error)

use crate::config::FetchConfig;
use crate::crawler::outcome::Outcome;
use crate::crawler::request::{Method, Request};
use crate::routes::RouteHandle;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Proxy};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

/// A response handed back by a fetcher
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map_or(true, |value| value.contains("text/html"))
    }
}

/// Result of one fetch attempt
///
/// `response` is present whenever the origin answered, whatever the status.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub response: Option<Response>,
    pub outcome: Outcome,
}

impl FetchResult {
    pub fn answered(response: Response, latency: Duration) -> Self {
        let outcome = Outcome::from_status(response.status, latency);
        Self {
            response: Some(response),
            outcome,
        }
    }

    pub fn failed(outcome: Outcome) -> Self {
        Self {
            response: None,
            outcome,
        }
    }
}

/// Backend that performs the actual request
///
/// Implementations classify every failure into the returned `Outcome`;
/// nothing about the origin's answer is reported as an error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request, route: Option<&RouteHandle>) -> FetchResult;
}

/// reqwest-backed fetcher
///
/// The direct client is built up front; a proxied client is built the first
/// time each route is used and then reused.
pub struct HttpFetcher {
    config: FetchConfig,
    user_agent: String,
    direct: Client,
    routed: DashMap<String, Client>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig, user_agent: impl Into<String>) -> crate::Result<Self> {
        let user_agent = user_agent.into();
        let direct = build_http_client(config, &user_agent, None)?;
        Ok(Self {
            config: config.clone(),
            user_agent,
            direct,
            routed: DashMap::new(),
        })
    }

    /// The client without a proxy, also used for robots.txt
    pub fn direct_client(&self) -> &Client {
        &self.direct
    }

    fn client_for(&self, route: Option<&RouteHandle>) -> Result<Client, reqwest::Error> {
        let Some(route) = route else {
            return Ok(self.direct.clone());
        };

        if let Some(client) = self.routed.get(&route.id) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.config, &self.user_agent, Some(&route.url))?;
        self.routed.insert(route.id.clone(), client.clone());
        debug!(route = %route.id, "Built client for route");
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, route: Option<&RouteHandle>) -> FetchResult {
        let client = match self.client_for(route) {
            Ok(client) => client,
            // Counted against the route so a broken endpoint gets blacklisted
            Err(e) => {
                return FetchResult::failed(Outcome::transient(
                    format!("route client: {}", e),
                    Duration::ZERO,
                ))
            }
        };

        let mut builder = client.request(reqwest_method(request.method()), request.url().as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_string());
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return FetchResult::failed(classify_error(&e, started.elapsed())),
        };

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return FetchResult::failed(Outcome::transient(
                    format!("reading body: {}", e),
                    started.elapsed(),
                ))
            }
        };

        trace!(url = %url, status, bytes = body.len(), "Fetched");

        FetchResult::answered(
            Response {
                url,
                status,
                headers,
                body,
            },
            started.elapsed(),
        )
    }
}

/// Builds an HTTP client, optionally sending everything through a proxy
pub fn build_http_client(
    config: &FetchConfig,
    user_agent: &str,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Maps a transport error onto an outcome
///
/// | Condition | Kind |
/// |-----------|------|
/// | Timeout | Transient |
/// | Connection failure | Transient |
/// | Interrupted request or body | Transient |
/// | Redirect loop, builder error, anything else | Fatal |
fn classify_error(error: &reqwest::Error, latency: Duration) -> Outcome {
    if error.is_timeout() {
        Outcome::transient("request timeout", latency)
    } else if error.is_connect() {
        Outcome::transient(format!("connection failed: {}", error), latency)
    } else if error.is_request() || error.is_body() {
        Outcome::transient(error.to_string(), latency)
    } else {
        let mut outcome = Outcome::fatal(error.to_string());
        outcome.latency = latency;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&FetchConfig::default(), "TestBot/1.0", None);
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_proxied_client() {
        let config = FetchConfig::default();
        assert!(build_http_client(&config, "TestBot/1.0", Some("http://10.0.0.1:3128")).is_ok());
        assert!(build_http_client(&config, "TestBot/1.0", Some("socks5://10.0.0.1:1080")).is_ok());
    }

    #[test]
    fn test_response_header_lookup() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
        let response = Response {
            url: Url::parse("https://example.com/").unwrap(),
            status: 200,
            headers,
            body: String::new(),
        };
        assert_eq!(response.header("Content-Type"), Some("text/html; charset=utf-8"));
        assert!(response.is_html());
    }
}
