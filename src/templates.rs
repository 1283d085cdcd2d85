//! Error page, landing page, and header bar rendering (§4.8 supplement).
//!
//! Templates use `$name` / `${name}` placeholders, substituted the way
//! Python's `string.Template.safe_substitute` does: unknown placeholders are
//! left untouched rather than erroring.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{Config, HeaderBarConfig};
use crate::throttle;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").unwrap());

fn safe_substitute(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
            vars.get(name).cloned().unwrap_or_else(|| caps.get(0).unwrap().as_str().to_string())
        })
        .into_owned()
}

const FALLBACK_ERROR_TEMPLATE: &str = "<html><body><h1>$code $message</h1><p>$description</p>\
<hr><small>$url &middot; $date</small></body></html>";

const FALLBACK_LANDING_TEMPLATE: &str =
    "<html><body><h1>Wayback Proxy</h1><p>Target date: $date</p>$most_viewed</body></html>";

fn error_description(code: u16) -> &'static str {
    match code {
        400 => "The request could not be understood by the proxy.",
        403 => "This URL is not in the allowlist.",
        404 => "This page was not found in the Wayback Machine's archive.",
        500 => "An unexpected error occurred in the proxy.",
        501 => "This feature is not yet implemented.",
        502 => "The Wayback Machine could not be reached.",
        504 => "The request to the Wayback Machine timed out.",
        _ => "",
    }
}

/// HTTP reason phrase for a status code, falling back to a generic label.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

/// Loaded template set: per-code error pages, a default error page, a
/// landing page, and a header bar snippet, all optional — falling back to
/// built-in minimal templates when no template directory is configured.
pub struct Templates {
    error_templates: HashMap<u16, String>,
    default_error_template: Option<String>,
    landing_template: Option<String>,
    header_bar_template: Option<String>,
}

impl Templates {
    /// Load templates from the directories named in `config`. Missing
    /// directories are not an error — the fallback templates are used.
    pub fn load(config: &Config) -> Self {
        let mut templates = Templates {
            error_templates: HashMap::new(),
            default_error_template: None,
            landing_template: None,
            header_bar_template: None,
        };

        templates.load_error_templates(&config.proxy.error_pages_dir);
        if config.landing_page.enabled {
            templates.load_landing_template(&config.landing_page.template_dir);
        }
        if config.header_bar.enabled {
            templates.load_header_bar_template();
        }

        templates
    }

    fn load_error_templates(&mut self, configured_dir: &str) {
        let dir = if configured_dir.is_empty() {
            Path::new("error_pages")
        } else {
            Path::new(configured_dir)
        };

        if !dir.is_dir() {
            tracing::info!(target: "proxy", "no error_pages directory found, using fallback template");
            return;
        }

        tracing::info!(target: "proxy", "loading error templates from {}", dir.display());

        let default_path = dir.join("error.html");
        if let Ok(content) = fs::read_to_string(&default_path) {
            self.default_error_template = Some(content);
            tracing::info!(target: "proxy", "loaded default: error.html");
        }

        let Ok(entries) = fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "error.html" {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".html") {
                if let Ok(code) = stem.parse::<u16>() {
                    if let Ok(content) = fs::read_to_string(entry.path()) {
                        self.error_templates.insert(code, content);
                        tracing::info!(target: "proxy", "loaded template: {name}");
                    }
                }
            }
        }
    }

    fn load_landing_template(&mut self, configured_dir: &str) {
        if configured_dir.is_empty() {
            return;
        }
        let index_path = Path::new(configured_dir).join("index.html");
        if let Ok(content) = fs::read_to_string(&index_path) {
            self.landing_template = Some(content);
            tracing::info!(target: "proxy", "loaded landing page from {configured_dir}");
        } else {
            tracing::info!(target: "proxy", "no landing_page directory found, using fallback");
        }
    }

    fn load_header_bar_template(&mut self) {
        let path = Path::new("snippets/header_bar.html");
        if let Ok(content) = fs::read_to_string(path) {
            self.header_bar_template = Some(content);
            tracing::info!(target: "proxy", "loaded header bar snippet");
        }
    }

    pub fn has_header_bar(&self) -> bool {
        self.header_bar_template.is_some()
    }

    /// Render an error page, trying the per-code template, then the
    /// default, then the built-in fallback.
    pub fn render_error_page(&self, code: u16, message: &str, url: &str, target_date: &str) -> Vec<u8> {
        let description = error_description(code);
        let mut vars = HashMap::new();
        vars.insert("code", code.to_string());
        vars.insert("message", message.to_string());
        vars.insert("description", description.to_string());
        vars.insert("url", url.to_string());
        vars.insert("date", target_date.to_string());

        let template = self
            .error_templates
            .get(&code)
            .or(self.default_error_template.as_ref())
            .map(|s| s.as_str())
            .unwrap_or(FALLBACK_ERROR_TEMPLATE);

        safe_substitute(template, &vars).into_bytes()
    }

    /// Render the landing page with a pre-rendered "most viewed" fragment.
    pub fn render_landing_page(&self, config: &Config, most_viewed_html: &str) -> Vec<u8> {
        let speed = &config.throttle.default_speed;
        let speed_name = if speed == "none" { "unlimited".to_string() } else { speed.clone() };

        let custom_text = if config.header_bar.custom_text.is_empty() {
            String::new()
        } else {
            format!(r#"<p class="custom-text">{}</p>"#, config.header_bar.custom_text)
        };

        let speed_info = if speed != "none" {
            format!(r#"<p class="speed-info">Connection speed: <span>{speed_name}</span></p>"#)
        } else {
            String::new()
        };

        let mut vars = HashMap::new();
        vars.insert("date", config.wayback.target_date.clone());
        vars.insert("most_viewed", most_viewed_html.to_string());
        vars.insert("custom_text", custom_text);
        vars.insert("speed_info", speed_info);
        vars.insert("speed", speed_name);

        let template = self.landing_template.as_deref().unwrap_or(FALLBACK_LANDING_TEMPLATE);
        safe_substitute(template, &vars).into_bytes()
    }

    /// Render the header bar snippet for injection into HTML responses.
    /// Returns an empty string if no header bar template was loaded.
    pub fn render_header_bar(
        &self,
        cfg: &HeaderBarConfig,
        allow_user_override: bool,
        cookie_name: &str,
        wayback_url: &str,
        wayback_date: &str,
        speed: &str,
    ) -> String {
        let Some(template) = self.header_bar_template.as_deref() else {
            return String::new();
        };

        let is_top = cfg.position == "top";
        let speed_name = if speed == "none" { "unlimited".to_string() } else { speed.to_string() };

        let (speed_display, speed_selector) = if cfg.show_speed_selector && allow_user_override {
            let options: String = throttle::speed_tiers()
                .iter()
                .map(|(name, _)| {
                    let selected = if *name == speed { " selected" } else { "" };
                    let label = if *name == "none" { "unlimited" } else { name };
                    format!(r#"<option value="{name}"{selected}>{label}</option>"#)
                })
                .collect();

            let display = format!(
                r#"Speed: <select id="wbSpeedSel" style="font-family:Courier New,monospace;font-size:11px;background:#12122a;color:#e0e0e0;border:1px solid #505070">{options}</select>"#
            );

            let selector = format!(
                "var sel=document.getElementById(\"wbSpeedSel\");\n\
                 if(sel){{\n\
                 \u{20}\u{20}sel.onchange=function(){{\n\
                 \u{20}\u{20}\u{20}\u{20}var v=sel.options[sel.selectedIndex].value;\n\
                 \u{20}\u{20}\u{20}\u{20}document.cookie=\"{cookie_name}=\"+v+\";path=/\";\n\
                 \u{20}\u{20}\u{20}\u{20}location.reload();\n\
                 \u{20}\u{20}}};\n\
                 }}\n"
            );

            (display, selector)
        } else {
            (format!("Speed: {speed_name}"), String::new())
        };

        let mut vars = HashMap::new();
        vars.insert("position_css", if is_top { "top:0".to_string() } else { "bottom:0".to_string() });
        vars.insert("border_edge", if is_top { "bottom".to_string() } else { "top".to_string() });
        vars.insert(
            "padding_prop",
            if is_top { "paddingTop".to_string() } else { "paddingBottom".to_string() },
        );
        vars.insert("custom_css", cfg.custom_css.clone());
        vars.insert("custom_text", cfg.custom_text.clone());
        vars.insert("wayback_url", wayback_url.to_string());
        vars.insert("wayback_date", wayback_date.to_string());
        vars.insert("speed_name", speed_name);
        vars.insert("speed_display", speed_display);
        vars.insert("speed_selector", speed_selector);

        safe_substitute(template, &vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_substitute_replaces_known_vars_and_leaves_unknown() {
        let mut vars = HashMap::new();
        vars.insert("name", "world".to_string());
        let out = safe_substitute("hello $name, $missing stays", &vars);
        assert_eq!(out, "hello world, $missing stays");
    }

    #[test]
    fn braced_placeholder_is_supported() {
        let mut vars = HashMap::new();
        vars.insert("code", "404".to_string());
        let out = safe_substitute("status ${code}!", &vars);
        assert_eq!(out, "status 404!");
    }

    #[test]
    fn fallback_error_template_renders_without_disk_templates() {
        let templates = Templates {
            error_templates: HashMap::new(),
            default_error_template: None,
            landing_template: None,
            header_bar_template: None,
        };
        let body = templates.render_error_page(404, "Not Found", "http://example.com/", "20010101");
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("404 Not Found"));
        assert!(body.contains("http://example.com/"));
    }

    #[test]
    fn header_bar_is_empty_without_template() {
        let templates = Templates {
            error_templates: HashMap::new(),
            default_error_template: None,
            landing_template: None,
            header_bar_template: None,
        };
        let cfg = HeaderBarConfig::default();
        let out = templates.render_header_bar(&cfg, false, "wayback_speed", "http://x/", "20010101", "none");
        assert!(out.is_empty());
    }
}
