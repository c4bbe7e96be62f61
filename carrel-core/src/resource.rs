//! Resources and collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{properties, ANONYMOUS_USER};

/// Resource payload. A collection is a resource whose content is the
/// ordered list of its child paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    Bytes(Vec<u8>),
    Children(Vec<String>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Bytes(Vec::new())
    }
}

/// A node in the registry hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Absolute path of this resource (set by storage on write)
    pub path: String,
    pub uuid: Uuid,
    pub media_type: Option<String>,
    pub author: String,
    pub last_updater: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Multi-valued property bag
    pub properties: BTreeMap<String, Vec<String>>,
    /// Incremented by storage on every write
    pub version_number: u64,
    /// Names of aspects associated with this resource
    pub aspects: Vec<String>,
    pub content: Content,
    /// Total number of children for a (possibly paged) collection
    pub child_count: usize,
}

impl Resource {
    /// An empty, non-collection resource.
    pub fn new(path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            uuid: Uuid::now_v7(),
            media_type: None,
            author: ANONYMOUS_USER.to_string(),
            last_updater: ANONYMOUS_USER.to_string(),
            description: None,
            created_at: now,
            last_modified: now,
            properties: BTreeMap::new(),
            version_number: 0,
            aspects: Vec::new(),
            content: Content::default(),
            child_count: 0,
        }
    }

    /// An empty collection.
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            content: Content::Children(Vec::new()),
            ..Self::new(path)
        }
    }

    pub fn with_content(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.content = Content::Bytes(bytes.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        let author = author.into();
        self.last_updater = author.clone();
        self.author = author;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.content, Content::Children(_))
    }

    pub fn children(&self) -> Option<&[String]> {
        match &self.content {
            Content::Children(children) => Some(children),
            Content::Bytes(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            Content::Bytes(bytes) => Some(bytes),
            Content::Children(_) => None,
        }
    }

    // === Properties ===

    /// First value of a property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a property.
    pub fn property_values(&self, key: &str) -> &[String] {
        self.properties.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Replace all values of a property with a single value.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), vec![value.into()]);
    }

    /// Append a value to a property.
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Vec<String>> {
        self.properties.remove(key)
    }

    // === Links ===

    /// Carries the symbolic link marker.
    pub fn is_link(&self) -> bool {
        self.has_property(properties::LINK)
    }

    /// Carries the remote mount marker.
    pub fn is_mount(&self) -> bool {
        self.has_property(properties::MOUNT)
    }
}
