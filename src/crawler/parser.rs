//! Link extraction
//!
//! The coordinator turns responses into new requests through the
//! `LinkExtractor` trait. `HtmlLinkExtractor` is the scraper-backed default.

use crate::crawler::fetcher::Response;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Finds URLs worth following in a response
pub trait LinkExtractor: Send + Sync {
    /// Absolute http(s) URLs, in document order, without duplicates
    fn extract(&self, response: &Response) -> Vec<String>;
}

/// Extracts `<a href>` and canonical links from HTML
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `rel="nofollow"` links, unless `follow_nofollow` is set
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
///
/// Relative links resolve against `<base href>` when the page has one.
#[derive(Debug, Clone)]
pub struct HtmlLinkExtractor {
    pub follow_nofollow: bool,
}

impl Default for HtmlLinkExtractor {
    fn default() -> Self {
        Self {
            follow_nofollow: true,
        }
    }
}

impl HtmlLinkExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts links from raw HTML
    pub fn extract_from_html(&self, html: &str, page_url: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let base = document_base(&document, page_url);

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        let mut push = |href: &str| {
            if let Some(url) = resolve_link(href, &base) {
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
        };

        if let Ok(anchors) = Selector::parse("a[href]") {
            for element in document.select(&anchors) {
                let attrs = element.value();
                if attrs.attr("download").is_some() {
                    continue;
                }
                let nofollow = attrs
                    .attr("rel")
                    .map_or(false, |rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("nofollow")));
                if nofollow && !self.follow_nofollow {
                    continue;
                }
                if let Some(href) = attrs.attr("href") {
                    push(href);
                }
            }
        }

        if let Ok(canonical) = Selector::parse("link[rel='canonical'][href]") {
            for element in document.select(&canonical) {
                if let Some(href) = element.value().attr("href") {
                    push(href);
                }
            }
        }

        links
    }
}

impl LinkExtractor for HtmlLinkExtractor {
    fn extract(&self, response: &Response) -> Vec<String> {
        if !response.is_html() {
            return Vec::new();
        }
        self.extract_from_html(&response.body, &response.url)
    }
}

/// The URL relative links resolve against
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|element| element.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Resolves an href to an absolute http(s) URL, or None if it is not followable
fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn page() -> Url {
        Url::parse("https://example.com/dir/page.html").unwrap()
    }

    fn extract(html: &str) -> Vec<String> {
        HtmlLinkExtractor::new().extract_from_html(html, &page())
    }

    #[test]
    fn test_absolute_and_relative_links() {
        let links = extract(
            r#"<a href="https://other.com/x">a</a><a href="/root">b</a><a href="sibling.html">c</a>"#,
        );
        assert_eq!(
            links,
            [
                "https://other.com/x",
                "https://example.com/root",
                "https://example.com/dir/sibling.html"
            ]
        );
    }

    #[test]
    fn test_skips_unfollowable_links() {
        let links = extract(
            r##"<a href="javascript:void(0)">j</a>
                <a href="MAILTO:a@b.c">m</a>
                <a href="tel:+1">t</a>
                <a href="data:text/plain,hi">d</a>
                <a href="#top">f</a>
                <a href="/file.zip" download>z</a>
                <a href="ftp://example.com/f">ftp</a>
                <a href="/ok">ok</a>"##,
        );
        assert_eq!(links, ["https://example.com/ok"]);
    }

    #[test]
    fn test_duplicates_removed_and_canonical_included() {
        let links = extract(
            r#"<head><link rel="canonical" href="/canon"></head>
               <body><a href="/a">1</a><a href="/a">2</a></body>"#,
        );
        assert_eq!(links, ["https://example.com/a", "https://example.com/canon"]);
    }

    #[test]
    fn test_base_href_respected() {
        let links = extract(r#"<head><base href="https://cdn.example.com/v2/"></head><a href="img">i</a>"#);
        assert_eq!(links, ["https://cdn.example.com/v2/img"]);
    }

    #[test]
    fn test_nofollow_configurable() {
        let html = r#"<a rel="nofollow" href="/n">n</a><a href="/y">y</a>"#;
        assert_eq!(extract(html).len(), 2);

        let strict = HtmlLinkExtractor {
            follow_nofollow: false,
        };
        assert_eq!(strict.extract_from_html(html, &page()), ["https://example.com/y"]);
    }

    #[test]
    fn test_non_html_response_yields_nothing() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = Response {
            url: page(),
            status: 200,
            headers,
            body: r#"<a href="/x">x</a>"#.to_string(),
        };
        assert!(HtmlLinkExtractor::new().extract(&response).is_empty());
    }
}
