//! Per-request state threaded through the handler phases.
//!
//! A [`RequestContext`] is created by the registry for one operation, handed
//! mutably to every handler in turn and then to the default storage call. It
//! is never shared between threads. The typed fields cover everything the
//! built-in operations read or write; `properties` is the one open map left
//! for handler-specific extensions.

use std::collections::HashMap;

use chrono::Utc;

use carrel_core::{
    Activity, ActivityKind, Association, Comment, ContextTenant, CurrentSession, Resource,
    ResourcePath, Tag, TaggedResourcePath, TenantId,
};

use crate::operation::Operation;

// ============================================================================
// OPERATION OUTPUT
// ============================================================================

/// A value a handler produced in place of the default storage call.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Unit,
    Resource(Resource),
    Exists(bool),
    Path(String),
    Paths(Vec<String>),
    Associations(Vec<Association>),
    Tags(Vec<Tag>),
    TaggedPaths(Vec<TaggedResourcePath>),
    Comments(Vec<Comment>),
    AverageRating(f32),
    UserRating(u8),
    Dump(Vec<u8>),
}

/// Conversion from a handler output into an operation's return type.
pub trait FromOutput: Sized {
    fn from_output(output: OperationOutput) -> Option<Self>;
}

impl FromOutput for () {
    fn from_output(_output: OperationOutput) -> Option<Self> {
        Some(())
    }
}

impl From<()> for OperationOutput {
    fn from(_: ()) -> Self {
        OperationOutput::Unit
    }
}

macro_rules! impl_output {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromOutput for $ty {
                fn from_output(output: OperationOutput) -> Option<Self> {
                    match output {
                        OperationOutput::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for OperationOutput {
                fn from(value: $ty) -> Self {
                    OperationOutput::$variant(value)
                }
            }
        )*
    };
}

impl_output! {
    Resource => Resource,
    bool => Exists,
    String => Path,
    Vec<String> => Paths,
    Vec<Association> => Associations,
    Vec<Tag> => Tags,
    Vec<TaggedResourcePath> => TaggedPaths,
    Vec<Comment> => Comments,
    f32 => AverageRating,
    u8 => UserRating,
    Vec<u8> => Dump,
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RequestContext {
    operation: Operation,

    /// Primary path, possibly carrying `;version:N` or other parameters
    pub path: String,
    /// Path the caller asked for before a handler re-addressed the request
    pub original_path: Option<String>,
    pub parent_path: Option<String>,
    pub source_path: Option<String>,
    pub target_path: Option<String>,
    pub source_url: Option<String>,

    pub resource: Option<Resource>,
    /// Resource as stored before a put
    pub old_resource: Option<Resource>,

    pub start: usize,
    pub page_size: usize,

    pub version_path: Option<String>,
    pub snapshot_id: Option<u64>,

    pub tag: Option<String>,
    pub comment: Option<String>,
    pub comment_id: Option<u64>,
    pub rating: Option<u8>,
    pub association: Option<Association>,
    pub association_type: Option<String>,

    pub aspect_name: Option<String>,
    pub action: Option<String>,

    pub dump: Option<Vec<u8>>,

    pub user: String,
    pub tenant_id: TenantId,

    /// Extension point for values no typed field covers
    pub properties: HashMap<String, serde_json::Value>,

    simulation: bool,
    processing_complete: bool,
    logging_activity: bool,
    output: Option<OperationOutput>,
    activities: Vec<Activity>,
    child: Option<Box<RequestContext>>,
}

impl RequestContext {
    /// Context for `operation` on `path`, bound to the calling thread's
    /// session user and tenant.
    pub fn new(operation: Operation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            original_path: None,
            parent_path: None,
            source_path: None,
            target_path: None,
            source_url: None,
            resource: None,
            old_resource: None,
            start: 0,
            page_size: 0,
            version_path: None,
            snapshot_id: None,
            tag: None,
            comment: None,
            comment_id: None,
            rating: None,
            association: None,
            association_type: None,
            aspect_name: None,
            action: None,
            dump: None,
            user: CurrentSession::user_or_anonymous(),
            tenant_id: CurrentSession::tenant_id().unwrap_or_else(ContextTenant::current),
            properties: HashMap::new(),
            simulation: false,
            processing_complete: false,
            logging_activity: true,
            output: None,
            activities: Vec::new(),
            child: None,
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_source_and_target(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.source_path = Some(source.into());
        self.target_path = Some(target.into());
        self
    }

    pub fn with_paging(mut self, start: usize, page_size: usize) -> Self {
        self.start = start;
        self.page_size = page_size;
        self
    }

    /// Attach a child context that sees EXECUTE before this one.
    pub fn with_child(mut self, child: RequestContext) -> Self {
        self.child = Some(Box::new(child));
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The resource path without parameters.
    pub fn resource_path(&self) -> String {
        ResourcePath::parse(&self.path).path().to_string()
    }

    pub fn child(&self) -> Option<&RequestContext> {
        self.child.as_deref()
    }

    pub fn child_mut(&mut self) -> Option<&mut RequestContext> {
        self.child.as_deref_mut()
    }

    // === Flags ===

    /// Dry run: the operation computes but nothing is persisted.
    pub fn set_simulation(&mut self, simulation: bool) {
        self.simulation = simulation;
    }

    pub fn is_simulation(&self) -> bool {
        self.simulation
    }

    /// Suppress the default storage call. Later handlers still run.
    pub fn set_processing_complete(&mut self, complete: bool) {
        self.processing_complete = complete;
    }

    pub fn is_processing_complete(&self) -> bool {
        self.processing_complete
    }

    pub fn set_logging_activity(&mut self, logging: bool) {
        self.logging_activity = logging;
    }

    pub fn is_logging_activity(&self) -> bool {
        self.logging_activity
    }

    // === Output ===

    pub fn set_output(&mut self, output: impl Into<OperationOutput>) {
        self.output = Some(output.into());
    }

    pub fn output(&self) -> Option<&OperationOutput> {
        self.output.as_ref()
    }

    pub fn take_output(&mut self) -> Option<OperationOutput> {
        self.output.take()
    }

    // === Activities ===

    /// Buffer an activity for the current path; flushed on success only.
    pub fn record_activity(&mut self, kind: ActivityKind, detail: Option<String>) {
        let path = self.resource_path();
        self.record_activity_at(path, kind, detail);
    }

    pub fn record_activity_at(
        &mut self,
        path: impl Into<String>,
        kind: ActivityKind,
        detail: Option<String>,
    ) {
        self.activities.push(Activity {
            user: self.user.clone(),
            path: path.into(),
            kind,
            at: Utc::now(),
            detail,
        });
    }

    pub fn pending_activities(&self) -> &[Activity] {
        &self.activities
    }

    pub fn take_activities(&mut self) -> Vec<Activity> {
        std::mem::take(&mut self.activities)
    }
}
