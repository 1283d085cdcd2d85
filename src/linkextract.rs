//! Shared href/asset extraction used by the prefetch crawler (§4.9).

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)<a\s[^>]*href="([^"]*)""#).unwrap());
static ASSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<(?:img|script)\s[^>]*src="([^"]*)"|<link\s[^>]*href="([^"]*)""#).unwrap()
});

/// All `<a href>` targets found in `html`, unresolved.
pub fn extract_hrefs(html: &str) -> Vec<String> {
    HREF.captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// All asset URLs (`<img src>`, `<script src>`, `<link href>`), unresolved.
pub fn extract_asset_urls(html: &str) -> Vec<String> {
    ASSET
        .captures_iter(html)
        .filter_map(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .map(|m| m.as_str().trim().to_string())
        })
        .collect()
}

/// Resolve a possibly-relative URL against `base_url`, filtering out
/// anchors, `javascript:`, `mailto:`, `data:`, and anything non-http(s).
/// Drops any fragment.
pub fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    if href.is_empty() {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let base = Url::parse(base_url).ok()?;
    let resolved = base.join(href).ok()?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    let mut resolved = resolved;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_anchor_hrefs() {
        let html = r#"<a href="/page1">one</a><a class="x" href="page2">two</a>"#;
        let hrefs = extract_hrefs(html);
        assert_eq!(hrefs, vec!["/page1", "page2"]);
    }

    #[test]
    fn extracts_img_script_and_link_assets() {
        let html = r#"<img src="a.gif"><script src="b.js"></script><link href="c.css">"#;
        let assets = extract_asset_urls(html);
        assert_eq!(assets, vec!["a.gif", "b.js", "c.css"]);
    }

    #[test]
    fn resolves_relative_href_against_base() {
        let resolved = resolve_url("page2", "http://example.com/dir/page1").unwrap();
        assert_eq!(resolved, "http://example.com/dir/page2");
    }

    #[test]
    fn rejects_javascript_and_mailto_and_anchors() {
        assert!(resolve_url("javascript:void(0)", "http://example.com/").is_none());
        assert!(resolve_url("mailto:a@example.com", "http://example.com/").is_none());
        assert!(resolve_url("#top", "http://example.com/").is_none());
        assert!(resolve_url("data:text/plain,hi", "http://example.com/").is_none());
    }

    #[test]
    fn strips_fragment_from_resolved_url() {
        let resolved = resolve_url("/page#section", "http://example.com/").unwrap();
        assert_eq!(resolved, "http://example.com/page");
    }

    #[test]
    fn rejects_ftp_and_other_non_http_schemes() {
        assert!(resolve_url("ftp://example.com/file", "http://example.com/").is_none());
    }
}
