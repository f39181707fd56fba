//! Request classification.
//!
//! Decides, per request, whether the caching layer handles it at all.
//! Classification is total: rule construction can fail on a bad pattern, but
//! `is_cacheable` itself has no side effects, always terminates, and never
//! errors.

use axum::http::Method;
use regex::Regex;
use thiserror::Error;
use url::Url;

use super::config::CacheConfig;

/// Path suffixes that are always cache-eligible, independent of configured
/// asset lists.
const STATIC_SUFFIXES: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg",
];

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("invalid platform asset pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A single cacheability rule, evaluated uniformly over the request URL.
#[derive(Debug)]
pub enum AssetRule {
    /// Critical-asset entry: matches when the URL contains or ends with it.
    Literal(String),
    /// Case-insensitive suffix match against the URL path.
    Suffix(&'static str),
    /// Regex match against the full URL.
    Pattern(Regex),
}

impl AssetRule {
    fn matches(&self, url: &Url) -> bool {
        match self {
            AssetRule::Literal(asset) => {
                let raw = url.as_str();
                raw.contains(asset.as_str()) || raw.ends_with(asset.as_str())
            }
            AssetRule::Suffix(suffix) => {
                let path = url.path();
                path.len() >= suffix.len()
                    && path[path.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            }
            AssetRule::Pattern(pattern) => pattern.is_match(url.as_str()),
        }
    }
}

/// The pure cacheability decision: GET + http(s) + any rule match.
#[derive(Debug)]
pub struct Classifier {
    rules: Vec<AssetRule>,
}

impl Classifier {
    /// Compile rules from configuration. Literal rules come first, then the
    /// platform patterns, then the built-in static suffixes, mirroring the
    /// order the rules are usually hit.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ClassifyError> {
        let mut rules = Vec::with_capacity(
            config.critical_assets.len() + config.platform_patterns.len() + STATIC_SUFFIXES.len(),
        );

        for asset in &config.critical_assets {
            rules.push(AssetRule::Literal(asset.clone()));
        }

        for pattern in &config.platform_patterns {
            let compiled = Regex::new(pattern).map_err(|source| ClassifyError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            rules.push(AssetRule::Pattern(compiled));
        }

        for suffix in STATIC_SUFFIXES {
            rules.push(AssetRule::Suffix(suffix));
        }

        Ok(Self { rules })
    }

    /// Whether this request is cache-eligible.
    pub fn is_cacheable(&self, method: &Method, url: &Url) -> bool {
        if method != Method::GET {
            return false;
        }
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        self.rules.iter().any(|rule| rule.matches(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier_with(critical: &[&str], patterns: &[&str]) -> Classifier {
        let config = CacheConfig {
            critical_assets: critical.iter().map(|s| s.to_string()).collect(),
            platform_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            ..CacheConfig::default()
        };
        Classifier::from_config(&config).expect("rules should compile")
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("test URL should parse")
    }

    #[test]
    fn only_get_is_cacheable() {
        let classifier = classifier_with(&[], &[]);
        let target = url("https://example.com/app.js");

        assert!(classifier.is_cacheable(&Method::GET, &target));
        assert!(!classifier.is_cacheable(&Method::POST, &target));
        assert!(!classifier.is_cacheable(&Method::HEAD, &target));
        assert!(!classifier.is_cacheable(&Method::PUT, &target));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let classifier = classifier_with(&[], &[]);
        assert!(!classifier.is_cacheable(&Method::GET, &url("ftp://example.com/app.js")));
        assert!(classifier.is_cacheable(&Method::GET, &url("http://example.com/app.js")));
        assert!(classifier.is_cacheable(&Method::GET, &url("https://example.com/app.js")));
    }

    #[test]
    fn static_suffixes_match_case_insensitively() {
        let classifier = classifier_with(&[], &[]);

        for path in [
            "/a.js", "/a.css", "/a.png", "/a.JPG", "/a.jpeg", "/a.gif", "/a.webp", "/a.SVG",
        ] {
            let target = url(&format!("https://example.com{path}"));
            assert!(
                classifier.is_cacheable(&Method::GET, &target),
                "expected {path} to classify"
            );
        }

        assert!(!classifier.is_cacheable(&Method::GET, &url("https://example.com/page.html")));
        assert!(!classifier.is_cacheable(&Method::GET, &url("https://example.com/api/data")));
    }

    #[test]
    fn query_strings_do_not_defeat_suffix_rules() {
        let classifier = classifier_with(&[], &[]);
        assert!(classifier.is_cacheable(&Method::GET, &url("https://example.com/a.js?v=3")));
    }

    #[test]
    fn literal_rules_match_substring_or_suffix() {
        let classifier = classifier_with(&["/dist/hero-critical.iife.txt"], &[]);

        assert!(classifier.is_cacheable(
            &Method::GET,
            &url("https://example.com/dist/hero-critical.iife.txt")
        ));
        assert!(classifier.is_cacheable(
            &Method::GET,
            &url("https://cdn.example.com/v2/dist/hero-critical.iife.txt?x=1")
        ));
        assert!(!classifier.is_cacheable(&Method::GET, &url("https://example.com/other.txt")));
    }

    #[test]
    fn platform_patterns_match_the_full_url() {
        let classifier = classifier_with(&[], &[r".*\.webflow\.json$"]);

        assert!(classifier.is_cacheable(
            &Method::GET,
            &url("https://assets.example.com/site.webflow.json")
        ));
        assert!(!classifier.is_cacheable(&Method::GET, &url("https://example.com/site.json")));
    }

    #[test]
    fn invalid_pattern_fails_construction_not_classification() {
        let config = CacheConfig {
            platform_patterns: vec!["[unclosed".to_string()],
            ..CacheConfig::default()
        };
        let error = Classifier::from_config(&config).expect_err("pattern should be rejected");
        assert!(matches!(error, ClassifyError::Pattern { .. }));
    }
}
