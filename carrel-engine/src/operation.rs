//! Operation kinds dispatched through the handler pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use carrel_core::Action;

/// Every operation a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Get,
    GetCollection,
    ResourceExists,
    Put,
    PutChild,
    Import,
    ImportChild,
    Delete,
    Rename,
    Move,
    Copy,
    CreateVersion,
    GetVersions,
    RestoreVersion,
    RemoveVersionHistory,
    AddAssociation,
    RemoveAssociation,
    GetAllAssociations,
    GetAssociations,
    ApplyTag,
    GetTags,
    GetResourcePathsWithTag,
    RemoveTag,
    AddComment,
    EditComment,
    RemoveComment,
    GetComments,
    RateResource,
    GetAverageRating,
    GetRating,
    AssociateAspect,
    InvokeAspect,
    CreateLink,
    RemoveLink,
    Dump,
    Restore,
}

impl Operation {
    pub const ALL: &'static [Operation] = &[
        Operation::Get,
        Operation::GetCollection,
        Operation::ResourceExists,
        Operation::Put,
        Operation::PutChild,
        Operation::Import,
        Operation::ImportChild,
        Operation::Delete,
        Operation::Rename,
        Operation::Move,
        Operation::Copy,
        Operation::CreateVersion,
        Operation::GetVersions,
        Operation::RestoreVersion,
        Operation::RemoveVersionHistory,
        Operation::AddAssociation,
        Operation::RemoveAssociation,
        Operation::GetAllAssociations,
        Operation::GetAssociations,
        Operation::ApplyTag,
        Operation::GetTags,
        Operation::GetResourcePathsWithTag,
        Operation::RemoveTag,
        Operation::AddComment,
        Operation::EditComment,
        Operation::RemoveComment,
        Operation::GetComments,
        Operation::RateResource,
        Operation::GetAverageRating,
        Operation::GetRating,
        Operation::AssociateAspect,
        Operation::InvokeAspect,
        Operation::CreateLink,
        Operation::RemoveLink,
        Operation::Dump,
        Operation::Restore,
    ];

    /// Operations that only read.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Operation::Get
                | Operation::GetCollection
                | Operation::ResourceExists
                | Operation::GetVersions
                | Operation::GetAllAssociations
                | Operation::GetAssociations
                | Operation::GetTags
                | Operation::GetResourcePathsWithTag
                | Operation::GetComments
                | Operation::GetAverageRating
                | Operation::GetRating
                | Operation::Dump
        )
    }

    pub fn is_mutating(&self) -> bool {
        !self.is_read()
    }

    /// Operations that must target the current version of a resource.
    pub fn requires_current_version(&self) -> bool {
        matches!(
            self,
            Operation::ApplyTag
                | Operation::AddComment
                | Operation::RateResource
                | Operation::AssociateAspect
                | Operation::InvokeAspect
        )
    }

    /// Permission needed on the primary path.
    pub fn action(&self) -> Action {
        match self {
            Operation::Delete | Operation::RemoveLink => Action::Delete,
            op if op.is_read() => Action::Get,
            Operation::ApplyTag
            | Operation::RemoveTag
            | Operation::AddComment
            | Operation::EditComment
            | Operation::RemoveComment
            | Operation::RateResource => Action::Get,
            _ => Action::Put,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::GetCollection => "get_collection",
            Operation::ResourceExists => "resource_exists",
            Operation::Put => "put",
            Operation::PutChild => "put_child",
            Operation::Import => "import",
            Operation::ImportChild => "import_child",
            Operation::Delete => "delete",
            Operation::Rename => "rename",
            Operation::Move => "move",
            Operation::Copy => "copy",
            Operation::CreateVersion => "create_version",
            Operation::GetVersions => "get_versions",
            Operation::RestoreVersion => "restore_version",
            Operation::RemoveVersionHistory => "remove_version_history",
            Operation::AddAssociation => "add_association",
            Operation::RemoveAssociation => "remove_association",
            Operation::GetAllAssociations => "get_all_associations",
            Operation::GetAssociations => "get_associations",
            Operation::ApplyTag => "apply_tag",
            Operation::GetTags => "get_tags",
            Operation::GetResourcePathsWithTag => "get_resource_paths_with_tag",
            Operation::RemoveTag => "remove_tag",
            Operation::AddComment => "add_comment",
            Operation::EditComment => "edit_comment",
            Operation::RemoveComment => "remove_comment",
            Operation::GetComments => "get_comments",
            Operation::RateResource => "rate_resource",
            Operation::GetAverageRating => "get_average_rating",
            Operation::GetRating => "get_rating",
            Operation::AssociateAspect => "associate_aspect",
            Operation::InvokeAspect => "invoke_aspect",
            Operation::CreateLink => "create_link",
            Operation::RemoveLink => "remove_link",
            Operation::Dump => "dump",
            Operation::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
