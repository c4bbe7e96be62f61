//! Eventing service URL bookkeeping.
//!
//! Only the lookup table lives here: a default URL and an ordered list of
//! path patterns, each fully matched against a resource path. The first
//! matching pattern wins.

use std::sync::{PoisonError, RwLock};

use regex::Regex;

use carrel_core::{EventingConfig, RegistryResult, ValidationError};

#[derive(Debug, Clone)]
struct PatternUrl {
    pattern: String,
    matcher: Regex,
    url: String,
}

#[derive(Debug, Default)]
pub struct EventingUrls {
    default_url: RwLock<Option<String>>,
    patterns: RwLock<Vec<PatternUrl>>,
}

fn compile(pattern: &str) -> RegistryResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
        ValidationError::InvalidValue {
            field: "eventing.pattern".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

impl EventingUrls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EventingConfig) -> RegistryResult<Self> {
        let urls = Self::new();
        urls.set(None, config.default_url.clone())?;
        for p in &config.patterns {
            urls.set(Some(&p.pattern), Some(p.url.clone()))?;
        }
        Ok(urls)
    }

    /// URL for `path`; the default URL when `path` is `None` or unmatched.
    pub fn get(&self, path: Option<&str>) -> Option<String> {
        if let Some(path) = path {
            let patterns = self.patterns.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = patterns.iter().find(|p| p.matcher.is_match(path)) {
                return Some(hit.url.clone());
            }
        }
        self.default_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the URL for `pattern`, or the default URL when `pattern` is
    /// `None`. Replacing a pattern keeps its position.
    pub fn set(&self, pattern: Option<&str>, url: Option<String>) -> RegistryResult<()> {
        let Some(pattern) = pattern else {
            *self.default_url.write().unwrap_or_else(PoisonError::into_inner) = url;
            return Ok(());
        };
        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        let existing = patterns.iter().position(|p| p.pattern == pattern);
        match (existing, url) {
            (Some(idx), Some(url)) => patterns[idx].url = url,
            (Some(idx), None) => {
                patterns.remove(idx);
            }
            (None, Some(url)) => patterns.push(PatternUrl {
                pattern: pattern.to_string(),
                matcher: compile(pattern)?,
                url,
            }),
            (None, None) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrel_core::EventingPattern;

    #[test]
    fn test_first_matching_pattern_wins() {
        let urls = EventingUrls::from_config(&EventingConfig {
            default_url: Some("http://default".to_string()),
            patterns: vec![
                EventingPattern {
                    pattern: "/a/.*".to_string(),
                    url: "http://a".to_string(),
                },
                EventingPattern {
                    pattern: "/a/b/.*".to_string(),
                    url: "http://ab".to_string(),
                },
            ],
        })
        .unwrap();

        assert_eq!(urls.get(Some("/a/b/c")).as_deref(), Some("http://a"));
        assert_eq!(urls.get(Some("/z")).as_deref(), Some("http://default"));
        assert_eq!(urls.get(None).as_deref(), Some("http://default"));
    }

    #[test]
    fn test_patterns_are_anchored() {
        let urls = EventingUrls::new();
        urls.set(Some("/a"), Some("http://a".to_string())).unwrap();
        assert_eq!(urls.get(Some("/a")).as_deref(), Some("http://a"));
        assert_eq!(urls.get(Some("/ab")), None);
    }

    #[test]
    fn test_replace_and_remove() {
        let urls = EventingUrls::new();
        urls.set(Some("/a"), Some("http://one".to_string())).unwrap();
        urls.set(Some("/a"), Some("http://two".to_string())).unwrap();
        assert_eq!(urls.get(Some("/a")).as_deref(), Some("http://two"));
        urls.set(Some("/a"), None).unwrap();
        assert_eq!(urls.get(Some("/a")), None);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(EventingUrls::new().set(Some("("), Some("x".to_string())).is_err());
    }
}
