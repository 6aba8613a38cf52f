use crate::UrlError;
use url::Url;

/// Query parameters that never change the resource being addressed
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_eid", "mc_cid", "_ga", "yclid",
];

/// Canonicalizes a URL so equivalent spellings produce the same fingerprint
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Require a host (the `url` crate already lowercases it and drops default ports)
/// 3. Drop the fragment
/// 4. Drop tracking parameters (`utm_*` and the known click identifiers)
/// 5. Sort the remaining query pairs by key, then value
/// 6. Remove an empty query string
///
/// Unlike a display normalizer this never changes the scheme or the path,
/// because both are meaningful to the origin server.
///
/// # Examples
///
/// ```
/// use sumi_dispatch::url::canonicalize_url;
///
/// let url = canonicalize_url("https://Example.COM/a?b=2&a=1&utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a?a=1&b=2");
/// ```
pub fn canonicalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingDomain),
    }

    if url.cannot_be_a_base() {
        return Err(UrlError::Malformed(url_str.to_string()));
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
        }
    }

    Ok(url)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
