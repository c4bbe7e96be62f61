//! Community entities (tags, comments, ratings), associations and the
//! activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::path::COMMENTS_PARAMETER;

// ============================================================================
// TAGS
// ============================================================================

/// One user's application of a tag to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tagging {
    pub path: String,
    pub name: String,
    pub user: String,
    pub tagged_at: DateTime<Utc>,
}

/// A tag on a resource with the number of users who applied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub count: usize,
}

/// A resource carrying a given tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedResourcePath {
    pub path: String,
    /// Tag name to tagging count for this resource
    pub tag_counts: BTreeMap<String, usize>,
}

// ============================================================================
// COMMENTS & RATINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    /// Path of the commented resource
    pub resource_path: String,
    pub text: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Comment {
    /// Addressable path of this comment, `<resource>;comments:<id>`.
    pub fn comment_path(&self) -> String {
        format!("{};{}:{}", self.resource_path, COMMENTS_PARAMETER, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub path: String,
    pub user: String,
    /// 1..=5
    pub rating: u8,
    pub rated_at: DateTime<Utc>,
}

// ============================================================================
// ASSOCIATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Association {
    pub source: String,
    pub destination: String,
    pub association_type: String,
}

impl Association {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        association_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            association_type: association_type.into(),
        }
    }

    pub fn involves(&self, path: &str) -> bool {
        self.source == path || self.destination == path
    }
}

// ============================================================================
// ACTIVITY LOG
// ============================================================================

/// Kind of a logged activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Add,
    Update,
    Delete,
    Rename,
    Move,
    Copy,
    RestoreVersion,
    Tag,
    RemoveTag,
    Comment,
    EditComment,
    RemoveComment,
    Rate,
    Associate,
    RemoveAssociation,
    AssociateAspect,
    CreateSymbolicLink,
    CreateRemoteLink,
    RemoveLink,
    Import,
    Restore,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityKind::Add => "add",
            ActivityKind::Update => "update",
            ActivityKind::Delete => "delete",
            ActivityKind::Rename => "rename",
            ActivityKind::Move => "move",
            ActivityKind::Copy => "copy",
            ActivityKind::RestoreVersion => "restore_version",
            ActivityKind::Tag => "tag",
            ActivityKind::RemoveTag => "remove_tag",
            ActivityKind::Comment => "comment",
            ActivityKind::EditComment => "edit_comment",
            ActivityKind::RemoveComment => "remove_comment",
            ActivityKind::Rate => "rate",
            ActivityKind::Associate => "associate",
            ActivityKind::RemoveAssociation => "remove_association",
            ActivityKind::AssociateAspect => "associate_aspect",
            ActivityKind::CreateSymbolicLink => "create_symbolic_link",
            ActivityKind::CreateRemoteLink => "create_remote_link",
            ActivityKind::RemoveLink => "remove_link",
            ActivityKind::Import => "import",
            ActivityKind::Restore => "restore",
        };
        f.write_str(s)
    }
}

/// An activity log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub user: String,
    pub path: String,
    pub kind: ActivityKind,
    pub at: DateTime<Utc>,
    /// Operation-specific detail (tag name, rating, target path...)
    pub detail: Option<String>,
}

/// Filter over the activity log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub path: Option<String>,
    pub user: Option<String>,
    pub kind: Option<ActivityKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Newest first when set
    pub recent_first: bool,
}

impl LogFilter {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_kind(mut self, kind: ActivityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, activity: &Activity) -> bool {
        self.path.as_ref().map_or(true, |p| *p == activity.path)
            && self.user.as_ref().map_or(true, |u| *u == activity.user)
            && self.kind.map_or(true, |k| k == activity.kind)
            && self.from.map_or(true, |from| activity.at >= from)
            && self.to.map_or(true, |to| activity.at <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(path: &str, user: &str, kind: ActivityKind) -> Activity {
        Activity {
            user: user.to_string(),
            path: path.to_string(),
            kind,
            at: Utc::now(),
            detail: None,
        }
    }

    #[test]
    fn test_comment_path() {
        let now = Utc::now();
        let c = Comment {
            id: 7,
            resource_path: "/a/b".to_string(),
            text: "hi".to_string(),
            user: "u".to_string(),
            created_at: now,
            last_modified: now,
        };
        assert_eq!(c.comment_path(), "/a/b;comments:7");
    }

    #[test]
    fn test_log_filter_matches() {
        let a = activity("/a", "alice", ActivityKind::Add);
        assert!(LogFilter::default().matches(&a));
        assert!(LogFilter::for_path("/a").matches(&a));
        assert!(!LogFilter::for_path("/b").matches(&a));
        assert!(LogFilter::for_path("/a").with_user("alice").matches(&a));
        assert!(!LogFilter::default().with_kind(ActivityKind::Delete).matches(&a));
    }

    #[test]
    fn test_association_involves() {
        let assoc = Association::new("/a", "/b", "depends");
        assert!(assoc.involves("/a"));
        assert!(assoc.involves("/b"));
        assert!(!assoc.involves("/c"));
    }

    #[test]
    fn test_activity_kind_display() {
        assert_eq!(ActivityKind::CreateSymbolicLink.to_string(), "create_symbolic_link");
    }
}
