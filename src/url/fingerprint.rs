use sha2::{Digest, Sha256};
use url::Url;

/// Computes the deduplication key for a request
///
/// The fingerprint is the hex SHA-256 of the upper-case method, the canonical
/// URL and the canonical body, separated by newlines.
pub fn fingerprint(method: &str, url: &Url, body: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_str().as_bytes());
    hasher.update(b"\n");
    if let Some(body) = body {
        hasher.update(canonicalize_body(body).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Canonicalizes a request body for fingerprinting
///
/// Form-encoded bodies (`a=1&b=2`) have their pairs sorted so field order
/// does not matter. Anything else is only trimmed.
pub fn canonicalize_body(body: &str) -> String {
    let trimmed = body.trim();
    if looks_form_encoded(trimmed) {
        let mut pairs: Vec<&str> = trimmed.split('&').filter(|p| !p.is_empty()).collect();
        pairs.sort_unstable();
        pairs.join("&")
    } else {
        trimmed.to_string()
    }
}

fn looks_form_encoded(body: &str) -> bool {
    !body.is_empty()
        && body.contains('=')
        && !body
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '[' | ']' | '<' | '"'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_same_inputs_same_fingerprint() {
        let a = fingerprint("GET", &url("https://example.com/a"), None);
        let b = fingerprint("get", &url("https://example.com/a"), None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_method_changes_fingerprint() {
        let get = fingerprint("GET", &url("https://example.com/a"), None);
        let head = fingerprint("HEAD", &url("https://example.com/a"), None);
        assert_ne!(get, head);
    }

    #[test]
    fn test_form_field_order_ignored() {
        let a = fingerprint("POST", &url("https://example.com/f"), Some("b=2&a=1"));
        let b = fingerprint("POST", &url("https://example.com/f"), Some(" a=1&b=2 "));
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_body_kept_verbatim() {
        assert_eq!(canonicalize_body(" {\"b\":1} "), "{\"b\":1}");
        let a = fingerprint("POST", &url("https://example.com/f"), Some("{\"a\":1}"));
        let b = fingerprint("POST", &url("https://example.com/f"), Some("{\"a\":2}"));
        assert_ne!(a, b);
    }
}
