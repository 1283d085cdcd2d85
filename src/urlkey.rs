//! URL normalization and key derivation (§4.1).

use sha2::{Digest, Sha256};
use url::Url;

/// Normalize a URL to a canonical string: scheme lowercased, host lowercased,
/// trailing slash trimmed from the path (unless path is root), query
/// preserved, fragment dropped. Relative or malformed input is best-effort
/// canonicalized and never panics.
pub fn normalize(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => normalize_parsed(&url),
        Err(_) => raw.to_string(),
    }
}

fn normalize_parsed(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let port_suffix = url
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();

    let path = url.path();
    let trimmed_path = if path == "/" || path.is_empty() {
        "/".to_string()
    } else {
        path.trim_end_matches('/').to_string()
    };

    let mut normalized = format!("{scheme}://{host}{port_suffix}{trimmed_path}");
    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

/// First 16 hex chars of SHA-256(normalize(url)).
pub fn key(raw: &str) -> String {
    let normalized = normalize(raw);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let u = "HTTP://Example.COM/foo/bar/?q=1";
        assert_eq!(normalize(&normalize(u)), normalize(u));
    }

    #[test]
    fn host_case_collapses_to_same_key() {
        let a = "http://Example.com/page";
        let b = "http://example.com/page";
        assert_eq!(key(a), key(b));
    }

    #[test]
    fn trailing_slash_collapses_to_same_key_on_non_root_path() {
        let a = "http://example.com/page/";
        let b = "http://example.com/page";
        assert_eq!(key(a), key(b));
    }

    #[test]
    fn root_path_keeps_single_slash() {
        assert_eq!(normalize("http://example.com"), "http://example.com/");
        assert_eq!(normalize("http://example.com/"), "http://example.com/");
    }

    #[test]
    fn query_is_preserved() {
        let n = normalize("http://example.com/search?q=rust");
        assert!(n.ends_with("?q=rust"));
    }

    #[test]
    fn fragment_is_dropped() {
        let n = normalize("http://example.com/page#section");
        assert!(!n.contains('#'));
    }

    #[test]
    fn key_is_16_hex_chars() {
        let k = key("http://example.com/");
        assert_eq!(k.len(), 16);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn malformed_input_does_not_panic() {
        let _ = normalize("not a url at all");
        let _ = key("");
    }
}
