//! The request data model
//!
//! A [`Request`] is built through exactly one validated constructor,
//! [`Request::new`], which canonicalizes the URL, derives the domain key and
//! computes the dedup fingerprint. Those three fields cannot be changed
//! afterwards; everything else is dispatch metadata.

use crate::crawler::action::PageAction;
use crate::identity::IdentityCriteria;
use crate::state::RequestState;
use crate::url::{canonicalize_url, extract_domain, fingerprint};
use crate::{UrlError, UrlResult};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a method name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    fingerprint: String,
    url: Url,
    method: Method,
    body: Option<String>,
    domain: String,
    state: RequestState,

    /// Link distance from the seed that led here
    pub depth: u32,

    /// Higher values dispatch first under the priority strategy
    pub priority: i32,

    /// Retries already spent on this request
    pub retry_count: u32,

    /// Times this request was put back for lack of an egress route
    pub deferrals: u32,

    /// Extra headers; identity headers are merged in by middleware
    pub headers: BTreeMap<String, String>,

    /// Steps for browser-backed fetchers
    pub actions: Vec<PageAction>,

    /// Identity wanted for this request (rotator defaults when unset)
    pub identity: Option<IdentityCriteria>,

    /// Id of the identity profile applied to the request, once chosen
    pub identity_id: Option<u64>,

    /// Preferred route tag passed to the route pool as the purpose
    pub route_tag: Option<String>,
}

impl Request {
    /// Creates a request, canonicalizing the URL and computing its fingerprint
    pub fn new(method: Method, url: &str, body: Option<String>) -> UrlResult<Self> {
        let url = canonicalize_url(url)?;
        let domain = extract_domain(&url).ok_or(UrlError::MissingDomain)?;
        let fingerprint = fingerprint(method.as_str(), &url, body.as_deref());

        Ok(Self {
            fingerprint,
            url,
            method,
            body,
            domain,
            state: RequestState::Queued,
            depth: 0,
            priority: 0,
            retry_count: 0,
            deferrals: 0,
            headers: BTreeMap::new(),
            actions: Vec::new(),
            identity: None,
            identity_id: None,
            route_tag: None,
        })
    }

    pub fn get(url: &str) -> UrlResult<Self> {
        Self::new(Method::Get, url, None)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_actions(mut self, actions: Vec<PageAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_route_tag(mut self, tag: impl Into<String>) -> Self {
        self.route_tag = Some(tag.into());
        self
    }

    pub fn with_identity(mut self, criteria: IdentityCriteria) -> Self {
        self.identity = Some(criteria);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// A GET request for a link discovered on this request's page
    pub fn child(&self, url: &str) -> UrlResult<Self> {
        let mut child = Self::get(url)?.with_depth(self.depth + 1);
        child.priority = self.priority;
        child.route_tag = self.route_tag.clone();
        child.identity = self.identity.clone();
        Ok(child)
    }

    /// Copy of this request marked as the next retry attempt
    ///
    /// The fingerprint is unchanged; retries bypass dedup through
    /// `RequestScheduler::requeue`.
    pub fn retry(&self) -> Self {
        let mut next = self.clone();
        next.retry_count += 1;
        next.state = RequestState::Retrying;
        next
    }

    /// Moves the request along its lifecycle
    pub fn advance(&mut self, next: RequestState) -> crate::Result<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn state(&self) -> RequestState {
        self.state
    }
}
