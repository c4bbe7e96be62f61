//! Authorization collaborators.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::RegistryResult;

/// Permission checked against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Get,
    Put,
    Delete,
    Authorize,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Get => "get",
            Action::Put => "put",
            Action::Delete => "delete",
            Action::Authorize => "authorize",
        };
        f.write_str(s)
    }
}

/// Decides whether a user may perform an action on a path.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, user: &str, path: &str, action: Action) -> RegistryResult<bool>;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _user: &str, _path: &str, _action: Action) -> RegistryResult<bool> {
        Ok(true)
    }
}

/// User store consulted for admin decisions.
pub trait UserRealm: Send + Sync {
    /// Fails with a session error when the realm cannot be reached.
    fn is_admin(&self, user: &str) -> RegistryResult<bool>;
}

/// Realm with a fixed set of administrators.
#[derive(Debug, Clone, Default)]
pub struct StaticRealm {
    admins: HashSet<String>,
}

impl StaticRealm {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }
}

impl UserRealm for StaticRealm {
    fn is_admin(&self, user: &str) -> RegistryResult<bool> {
        Ok(self.admins.contains(user))
    }
}
