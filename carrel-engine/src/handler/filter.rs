//! Filters deciding whether a registered handler sees a request.

use regex::Regex;

use carrel_core::{RegistryResult, ResourcePath, ValidationError};
use carrel_storage::StorageEngine;

use crate::context::RequestContext;

pub trait Filter: Send + Sync {
    fn matches(&self, ctx: &RequestContext, storage: &dyn StorageEngine) -> RegistryResult<bool>;
}

/// Matches every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAll;

impl Filter for MatchAll {
    fn matches(&self, _ctx: &RequestContext, _storage: &dyn StorageEngine) -> RegistryResult<bool> {
        Ok(true)
    }
}

/// Matches requests whose path, or source path, fully matches a regex.
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    pattern: Regex,
}

impl UrlMatcher {
    pub fn new(pattern: &str) -> RegistryResult<Self> {
        let pattern = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            ValidationError::InvalidValue {
                field: "pattern".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { pattern })
    }

    /// Matches `path` itself and everything beneath it.
    pub fn prefix(path: &str) -> RegistryResult<Self> {
        if carrel_core::path::is_root(path) {
            return Self::new("/.*");
        }
        Self::new(&format!("{}(?:/.*)?", regex::escape(path)))
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.pattern.is_match(ResourcePath::parse(path).path())
    }
}

impl Filter for UrlMatcher {
    fn matches(&self, ctx: &RequestContext, _storage: &dyn StorageEngine) -> RegistryResult<bool> {
        Ok(self.is_match(&ctx.path)
            || ctx.source_path.as_deref().is_some_and(|p| self.is_match(p)))
    }
}

/// Matches requests on resources of one media type.
///
/// The media type is taken from the resource carried by the request, else
/// from the stored resource.
#[derive(Debug, Clone)]
pub struct MediaTypeMatcher {
    media_type: String,
}

impl MediaTypeMatcher {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
        }
    }
}

impl Filter for MediaTypeMatcher {
    fn matches(&self, ctx: &RequestContext, storage: &dyn StorageEngine) -> RegistryResult<bool> {
        if let Some(resource) = &ctx.resource {
            return Ok(resource.media_type.as_deref() == Some(self.media_type.as_str()));
        }
        Ok(storage
            .get_meta_data(&ctx.path)?
            .and_then(|r| r.media_type)
            .is_some_and(|m| m == self.media_type))
    }
}
