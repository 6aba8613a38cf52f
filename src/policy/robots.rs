//! Robots.txt rules
//!
//! Allow/disallow matching is delegated to the robotstxt crate; `Crawl-delay`
//! is not part of that matcher, so groups are scanned here for it.

use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Longest crawl delay taken from a robots.txt
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Rules from one origin's robots.txt
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// Raw file content; empty allows everything
    content: String,
}

impl RobotsRules {
    pub fn parse(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, agent, url)
    }

    /// Crawl delay for `agent`, capped at one minute
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        let agent = agent.to_ascii_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut specific = None;
        let mut wildcard = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if in_rules {
                        group.clear();
                        in_rules = false;
                    }
                    group.push(value.to_ascii_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(seconds) = value.parse::<f64>() else {
                        continue;
                    };
                    if !seconds.is_finite() || seconds < 0.0 {
                        continue;
                    }
                    let delay = Duration::from_secs_f64(seconds).min(MAX_CRAWL_DELAY);
                    if group.iter().any(|ua| !ua.is_empty() && ua != "*" && agent.contains(ua.as_str())) {
                        specific = Some(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        wildcard = Some(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        specific.or(wildcard)
    }
}

/// Fetches robots.txt for the origin of `url`
///
/// A missing file (4xx) allows everything. Server errors and network
/// failures also fall back to allowing everything, with a warning.
pub async fn fetch_robots(client: &Client, url: &Url) -> RobotsRules {
    let mut robots_url = url.clone();
    robots_url.set_path("/robots.txt");
    robots_url.set_query(None);
    robots_url.set_fragment(None);

    match client.get(robots_url.as_str()).send().await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(body) => {
                debug!(url = %robots_url, bytes = body.len(), "Fetched robots.txt");
                RobotsRules::parse(&body)
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "Failed to read robots.txt body");
                RobotsRules::allow_all()
            }
        },
        Ok(response) if response.status().is_client_error() => {
            debug!(url = %robots_url, status = response.status().as_u16(), "No robots.txt");
            RobotsRules::allow_all()
        }
        Ok(response) => {
            warn!(url = %robots_url, status = response.status().as_u16(), "robots.txt unavailable");
            RobotsRules::allow_all()
        }
        Err(e) => {
            warn!(url = %robots_url, error = %e, "Failed to fetch robots.txt");
            RobotsRules::allow_all()
        }
    }
}
