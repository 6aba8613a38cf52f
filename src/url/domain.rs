use url::Url;

/// Extracts the politeness key (netloc) from a URL
///
/// The key is the lowercase host, followed by `:port` when the URL carries a
/// non-default port. Two servers on the same host but different ports are
/// separate domains for politeness and concurrency purposes.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_dispatch::url::extract_domain;
///
/// let url = Url::parse("https://Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(extract_domain(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Checks whether a domain key matches a blocklist pattern
///
/// Patterns are either an exact host (`example.com`) or a wildcard
/// (`*.example.com`) that matches the bare host and every subdomain.
/// Any `:port` suffix on the candidate is ignored and comparison is
/// case-insensitive.
pub fn domain_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    let host = domain
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(host, _)| host)
        .unwrap_or(domain)
        .to_lowercase();

    if pattern.is_empty() || host.is_empty() {
        return false;
    }

    match pattern.strip_prefix("*.") {
        Some(base) => host == base || host.ends_with(&format!(".{}", base)),
        None => host == pattern,
    }
}
