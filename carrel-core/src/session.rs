//! Thread-scoped session and request context.
//!
//! Operations run synchronously on the calling thread, so the calling user
//! and tenant are carried in thread-locals. [`CurrentSession`] is a stack:
//! entering a session returns a guard that restores the previous one on drop.
//! [`ContextTenant`] is the request-scoped fallback tenant used when no
//! session is active.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use crate::{TenantId, ANONYMOUS_USER};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionInfo {
    user: String,
    tenant_id: TenantId,
}

thread_local! {
    static SESSIONS: RefCell<Vec<SessionInfo>> = const { RefCell::new(Vec::new()) };
    static CONTEXT_TENANT: Cell<Option<TenantId>> = const { Cell::new(None) };
}

/// Accessors for the session active on this thread.
pub struct CurrentSession;

impl CurrentSession {
    /// Push a session for the current thread.
    pub fn enter(user: impl Into<String>, tenant_id: TenantId) -> SessionGuard {
        SESSIONS.with(|s| {
            s.borrow_mut().push(SessionInfo {
                user: user.into(),
                tenant_id,
            })
        });
        SessionGuard {
            _not_send: PhantomData,
        }
    }

    pub fn user() -> Option<String> {
        SESSIONS.with(|s| s.borrow().last().map(|i| i.user.clone()))
    }

    pub fn tenant_id() -> Option<TenantId> {
        SESSIONS.with(|s| s.borrow().last().map(|i| i.tenant_id))
    }

    /// The session user, or the anonymous user outside a session.
    pub fn user_or_anonymous() -> String {
        Self::user().unwrap_or_else(|| ANONYMOUS_USER.to_string())
    }

    pub fn is_active() -> bool {
        SESSIONS.with(|s| !s.borrow().is_empty())
    }
}

/// Pops the session on drop. Not `Send`: a session belongs to one thread.
#[must_use = "the session ends when the guard is dropped"]
pub struct SessionGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSIONS.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// Request-scoped default tenant.
pub struct ContextTenant;

impl ContextTenant {
    pub fn set(tenant_id: TenantId) -> ContextGuard {
        let previous = CONTEXT_TENANT.with(|c| c.replace(Some(tenant_id)));
        ContextGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The context tenant, or [`TenantId::SUPER`] when none was set.
    pub fn current() -> TenantId {
        CONTEXT_TENANT.with(|c| c.get()).unwrap_or(TenantId::SUPER)
    }
}

#[must_use = "the context tenant resets when the guard is dropped"]
pub struct ContextGuard {
    previous: Option<TenantId>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_TENANT.with(|c| c.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_session() {
        assert!(!CurrentSession::is_active());
        assert_eq!(CurrentSession::user(), None);
        assert_eq!(CurrentSession::user_or_anonymous(), ANONYMOUS_USER);
    }

    #[test]
    fn test_nested_sessions_restore() {
        let _outer = CurrentSession::enter("alice", TenantId(1));
        {
            let _inner = CurrentSession::enter("bob", TenantId(2));
            assert_eq!(CurrentSession::user().as_deref(), Some("bob"));
            assert_eq!(CurrentSession::tenant_id(), Some(TenantId(2)));
        }
        assert_eq!(CurrentSession::user().as_deref(), Some("alice"));
        assert_eq!(CurrentSession::tenant_id(), Some(TenantId(1)));
    }

    #[test]
    fn test_context_tenant_default_and_restore() {
        assert_eq!(ContextTenant::current(), TenantId::SUPER);
        {
            let _g = ContextTenant::set(TenantId(9));
            assert_eq!(ContextTenant::current(), TenantId(9));
        }
        assert_eq!(ContextTenant::current(), TenantId::SUPER);
    }

    #[test]
    fn test_sessions_are_thread_local() {
        let _g = CurrentSession::enter("alice", TenantId(1));
        let seen = std::thread::spawn(CurrentSession::user).join().unwrap();
        assert_eq!(seen, None);
    }
}
