//! Content transformation to clean up Wayback Machine artifacts (§4.4).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::TransformConfig;

static TOOLBAR_INSERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<!-- BEGIN WAYBACK TOOLBAR INSERT -->.*?<!-- END WAYBACK TOOLBAR INSERT -->")
        .unwrap()
});
static ARCHIVE_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--\s*FILE ARCHIVED ON.*$").unwrap());

static SCRIPT_BLOCK_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)(?:<!-- is_embed=True -->\r?\n?)?<script (?:type="text/javascript" )?src="[^"]*/_static/js/.*?<!-- End Wayback Rewrite JS Include -->\r?\n?"#,
    )
    .unwrap()
});
static SCRIPT_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*src="[^"]*/_static/js/[^"]*"[^>]*>.*?</script>"#).unwrap()
});
static INLINE_WM_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?__wm\..*?</script>").unwrap());
static WOMBAT_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]*src="[^"]*wombat\.js[^"]*"[^>]*>.*?</script>"#).unwrap()
});
static WEB_STATIC_STYLESHEET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<link[^>]*href="[^"]*web-static\.archive\.org[^"]*"[^>]*/?\s*>"#).unwrap()
});
static REWRITE_JS_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<!--\s*End Wayback Rewrite JS Include\s*-->\r?\n?").unwrap());

static BASE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(<base\s+[^>]*href=["']?)(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/(?:https?://)?"#)
        .unwrap()
});

static ASSET_URL_ABSOLUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/").unwrap());
static ASSET_URL_RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/web/\d+[a-z_]*/(?:https?://)?").unwrap());

static DOUBLE_HTTP: Lazy<Regex> = Lazy::new(|| Regex::new(r"http://https?://").unwrap());
static DOUBLE_HTTPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"https://https?://").unwrap());

static BODY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<body[^>]*>").unwrap());

static CSS_URL_ABSOLUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(["']?(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/([^)"']+)["']?\)"#)
        .unwrap()
});
static CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"@import\s+(?:url\s*\()?\s*["']?(?:https?:)?//web\.archive\.org/web/\d+[a-z_]*/([^"')\s]+)["']?\s*\)?"#,
    )
    .unwrap()
});
static CSS_URL_RELATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(["']?/web/\d+[a-z_]*/(?:https?://)?([^)"']+)["']?\)"#).unwrap());

/// Stateless HTML/CSS cleanup applied to fetched archive content before it is
/// cached or served (§4.4).
#[derive(Debug, Clone)]
pub struct ContentTransformer {
    remove_toolbar: bool,
    remove_scripts: bool,
    fix_base_tags: bool,
    fix_asset_urls: bool,
    normalize_links: bool,
}

impl ContentTransformer {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            remove_toolbar: config.remove_wayback_toolbar,
            remove_scripts: config.remove_wayback_scripts,
            fix_base_tags: config.fix_base_tags,
            fix_asset_urls: config.fix_asset_urls,
            normalize_links: config.normalize_links,
        }
    }

    /// Dispatch by MIME type. Content types outside HTML/CSS pass through
    /// unmodified.
    pub fn transform(&self, content: &[u8], content_type: &str) -> Vec<u8> {
        if content_type.contains("text/html") {
            self.transform_html(content)
        } else if content_type.contains("text/css") {
            self.transform_css(content)
        } else {
            content.to_vec()
        }
    }

    fn transform_html(&self, content: &[u8]) -> Vec<u8> {
        let mut html = String::from_utf8_lossy(content).into_owned();

        if self.remove_toolbar {
            html = Self::remove_wayback_toolbar(&html);
        }
        if self.remove_scripts {
            html = Self::remove_wayback_scripts(&html);
        }
        if self.fix_base_tags {
            html = Self::fix_base_tags_impl(&html);
        }
        if self.fix_asset_urls {
            html = Self::fix_asset_urls_impl(&html);
        }
        if self.normalize_links {
            html = Self::normalize_links_impl(&html);
        }

        html.into_bytes()
    }

    fn transform_css(&self, content: &[u8]) -> Vec<u8> {
        let mut css = String::from_utf8_lossy(content).into_owned();
        if self.fix_asset_urls {
            css = Self::fix_css_urls(&css);
        }
        css.into_bytes()
    }

    fn remove_wayback_toolbar(html: &str) -> String {
        let html = TOOLBAR_INSERT.replace_all(html, "");
        ARCHIVE_FOOTER.replace(&html, "").into_owned()
    }

    fn remove_wayback_scripts(html: &str) -> String {
        let html = SCRIPT_BLOCK_FIRST.replacen(html, 1, "");
        let html = SCRIPT_INCLUDE.replace_all(&html, "");
        let html = INLINE_WM_SCRIPT.replace_all(&html, "");
        let html = WOMBAT_SCRIPT.replace_all(&html, "");
        let html = WEB_STATIC_STYLESHEET.replace_all(&html, "");
        REWRITE_JS_COMMENT.replace_all(&html, "").into_owned()
    }

    fn fix_base_tags_impl(html: &str) -> String {
        BASE_TAG.replace_all(html, "${1}http://").into_owned()
    }

    fn fix_asset_urls_impl(html: &str) -> String {
        let html = ASSET_URL_ABSOLUTE.replace_all(html, "");
        ASSET_URL_RELATIVE.replace_all(&html, "http://").into_owned()
    }

    fn normalize_links_impl(html: &str) -> String {
        let html = DOUBLE_HTTP.replace_all(html, "http://");
        DOUBLE_HTTPS.replace_all(&html, "https://").into_owned()
    }

    fn fix_css_urls(css: &str) -> String {
        let css = CSS_URL_ABSOLUTE.replace_all(css, "url(\"$1\")");
        let css = CSS_IMPORT.replace_all(&css, "@import url(\"$1\")");
        CSS_URL_RELATIVE.replace_all(&css, "url(\"$1\")").into_owned()
    }

    /// Insert a rendered header bar snippet just after the opening `<body>`
    /// tag, or prepend it when no body tag is found.
    pub fn inject_header_bar(&self, html_content: &[u8], bar_html: &str) -> Vec<u8> {
        let html = String::from_utf8_lossy(html_content);

        let injected = if let Some(m) = BODY_TAG.find(&html) {
            let mut out = String::with_capacity(html.len() + bar_html.len() + 2);
            out.push_str(&html[..m.end()]);
            out.push('\n');
            out.push_str(bar_html);
            out.push('\n');
            out.push_str(&html[m.end()..]);
            out
        } else {
            format!("{bar_html}\n{html}")
        };

        injected.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> ContentTransformer {
        ContentTransformer::new(&TransformConfig::default())
    }

    #[test]
    fn strips_toolbar_insert_block() {
        let html = "<html><body><!-- BEGIN WAYBACK TOOLBAR INSERT -->junk<!-- END WAYBACK TOOLBAR INSERT --><p>real</p></body></html>";
        let out = transformer().transform(html.as_bytes(), "text/html");
        let out = String::from_utf8(out).unwrap();
        assert!(!out.contains("junk"));
        assert!(out.contains("<p>real</p>"));
    }

    #[test]
    fn strips_archived_on_footer() {
        let html = "<html>content<!-- FILE ARCHIVED ON 2001 AND RETRIEVED FROM THE INTERNET ARCHIVE -->";
        let out = transformer().transform(html.as_bytes(), "text/html");
        let out = String::from_utf8(out).unwrap();
        assert!(!out.contains("FILE ARCHIVED ON"));
    }

    #[test]
    fn fixes_absolute_wayback_asset_urls() {
        let html = r#"<img src="//web.archive.org/web/20010101000000/http://example.com/a.gif">"#;
        let out = transformer().transform(html.as_bytes(), "text/html");
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, r#"<img src="http://example.com/a.gif">"#);
    }

    #[test]
    fn fixes_relative_web_prefixed_urls() {
        let html = r#"<a href="/web/20010101000000/http://example.com/page">link</a>"#;
        let out = transformer().transform(html.as_bytes(), "text/html");
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, r#"<a href="http://example.com/page">link</a>"#);
    }

    #[test]
    fn collapses_double_http_protocol() {
        let html = "http://http://example.com/";
        let out = transformer().transform(html.as_bytes(), "text/html");
        assert_eq!(String::from_utf8(out).unwrap(), "http://example.com/");
    }

    #[test]
    fn collapses_double_https_protocol() {
        let html = "https://https://example.com/";
        let out = transformer().transform(html.as_bytes(), "text/html");
        assert_eq!(String::from_utf8(out).unwrap(), "https://example.com/");
    }

    #[test]
    fn css_url_is_rewritten() {
        let css = r#"body { background: url("//web.archive.org/web/20010101/http://example.com/bg.png"); }"#;
        let out = transformer().transform(css.as_bytes(), "text/css");
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"url("http://example.com/bg.png")"#));
    }

    #[test]
    fn non_html_css_passes_through() {
        let js = b"console.log('hi');".to_vec();
        let out = transformer().transform(&js, "application/javascript");
        assert_eq!(out, js);
    }

    #[test]
    fn disabled_passes_clean() {
        let config = TransformConfig {
            remove_wayback_toolbar: false,
            remove_wayback_scripts: false,
            fix_base_tags: false,
            fix_asset_urls: false,
            normalize_links: false,
        };
        let t = ContentTransformer::new(&config);
        let html = "<html>unchanged</html>";
        let out = t.transform(html.as_bytes(), "text/html");
        assert_eq!(String::from_utf8(out).unwrap(), html);
    }

    #[test]
    fn header_bar_injected_after_body_tag() {
        let html = b"<html><body class=\"x\"><p>hi</p></body></html>";
        let out = transformer().inject_header_bar(html, "<div id=\"bar\">bar</div>");
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("<html><body class=\"x\">\n<div id=\"bar\">bar</div>\n<p>hi</p>"));
    }

    #[test]
    fn header_bar_prepended_when_no_body_tag() {
        let html = b"<p>no body here</p>";
        let out = transformer().inject_header_bar(html, "<div>bar</div>");
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("<div>bar</div>\n<p>no body here</p>"));
    }
}
