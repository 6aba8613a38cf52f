//! Dispatch policy
//!
//! Decides whether a request may be dispatched at all. A refusal here is a
//! Fatal outcome: the request is dropped and logged once, never retried.

mod robots;

pub use robots::{fetch_robots, RobotsRules};

use crate::config::PolicyConfig;
use crate::crawler::action::validate_actions;
use crate::crawler::Request;
use crate::url::domain_matches;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

pub struct DispatchPolicy {
    blocked_domains: Vec<String>,
    respect_robots: bool,
    agent: String,
    robots: DashMap<String, RobotsRules>,
}

impl DispatchPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            blocked_domains: config.blocked_domains.clone(),
            respect_robots: config.respect_robots,
            agent: config.robots_agent.clone(),
            robots: DashMap::new(),
        }
    }

    /// Product token matched against robots.txt groups
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn respects_robots(&self) -> bool {
        self.respect_robots
    }

    /// Installs robots.txt rules for a domain
    ///
    /// Returns the crawl delay the rules ask of this agent, if any.
    pub fn register_robots(&self, domain: &str, rules: RobotsRules) -> Option<Duration> {
        let delay = rules.crawl_delay(&self.agent);
        debug!(domain = %domain, crawl_delay = ?delay, "Registered robots.txt rules");
        self.robots.insert(domain.to_string(), rules);
        delay
    }

    pub fn has_robots(&self, domain: &str) -> bool {
        self.robots.contains_key(domain)
    }

    /// Checks a request against every policy rule
    ///
    /// The error string says which rule refused it.
    pub fn check(&self, request: &Request) -> Result<(), String> {
        let domain = request.domain();

        if let Some(pattern) = self
            .blocked_domains
            .iter()
            .find(|pattern| domain_matches(pattern, domain))
        {
            return Err(format!("domain {} is blocked by pattern '{}'", domain, pattern));
        }

        validate_actions(&request.actions)?;

        if self.respect_robots {
            if let Some(rules) = self.robots.get(domain) {
                if !rules.is_allowed(request.url().as_str(), &self.agent) {
                    return Err("disallowed by robots.txt".to_string());
                }
            }
        }

        Ok(())
    }
}
