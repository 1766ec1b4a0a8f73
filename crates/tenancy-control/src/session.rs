//! Technical session scoping
//!
//! Every lifecycle operation runs under a technical session bound to the
//! tenant. [`SessionScope::run`] installs such a session for the duration of
//! the work and restores whatever session was current before, on success,
//! on error and on panic.
//!
//! The current session is task-local: overlapping scopes on different tasks
//! never see each other's session, and nested scopes restore the outer one
//! when they end. Tasks spawned from inside a scope start without a current
//! session.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tenancy_types::{SessionId, TenantId};
use tracing::{debug, warn};

use crate::error::TenancyResult;
use crate::ports::SessionStore;

/// Identity a session is opened for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    /// Internal identity used by the runtime itself
    Technical { name: String },
    /// Human or API user
    User { user_id: String },
}

impl Principal {
    pub fn technical(name: impl Into<String>) -> Self {
        Self::Technical { name: name.into() }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    pub fn is_technical(&self) -> bool {
        matches!(self, Self::Technical { .. })
    }

    pub fn id(&self) -> String {
        match self {
            Self::Technical { name } => format!("technical:{}", name),
            Self::User { user_id } => format!("user:{}", user_id),
        }
    }
}

/// The session installed as the current execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentSession {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
}

tokio::task_local! {
    static CURRENT_SESSION: CurrentSession;
}

/// Session current on the calling task, if any
pub fn current_session() -> Option<CurrentSession> {
    CURRENT_SESSION.try_with(|current| *current).ok()
}

/// Run `work` with `session` as the current session of the task
pub async fn with_current_session<Fut>(session: CurrentSession, work: Fut) -> Fut::Output
where
    Fut: Future,
{
    CURRENT_SESSION.scope(session, work).await
}

/// Handle to the technical session of a running scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
}

/// Runs work under a fresh technical session for one tenant
#[derive(Clone)]
pub struct SessionScope {
    tenant_id: TenantId,
    technical_user: String,
    store: Arc<dyn SessionStore>,
}

impl SessionScope {
    pub fn new(
        tenant_id: TenantId,
        technical_user: impl Into<String>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            tenant_id,
            technical_user: technical_user.into(),
            store,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Run `work` under a technical session.
    ///
    /// The technical session is deleted and the previous session restored on
    /// every exit path. A panic inside `work` is resumed after cleanup.
    /// The error of `work` wins over a cleanup error.
    pub async fn run<F, Fut, T>(&self, work: F) -> TenancyResult<T>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = TenancyResult<T>>,
    {
        let previous = current_session();
        let session_id = self
            .store
            .create_session(self.tenant_id, Principal::technical(&self.technical_user))
            .await?;
        debug!(
            tenant_id = %self.tenant_id,
            session = %session_id,
            previous = ?previous.map(|p| p.session_id),
            "Technical session opened"
        );

        let handle = SessionHandle {
            session_id,
            tenant_id: self.tenant_id,
        };
        let current = CurrentSession {
            session_id,
            tenant_id: self.tenant_id,
        };
        let outcome = AssertUnwindSafe(with_current_session(current, async move {
            work(handle).await
        }))
        .catch_unwind()
        .await;

        let released = self.release(session_id).await;

        match outcome {
            Ok(Ok(value)) => released.map(|_| value),
            Ok(Err(e)) => Err(e),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn release(&self, session_id: SessionId) -> TenancyResult<()> {
        let deleted = self.store.delete_session(session_id).await;
        if let Err(e) = &deleted {
            warn!(tenant_id = %self.tenant_id, session = %session_id, error = %e, "Failed to delete technical session");
        }
        debug!(tenant_id = %self.tenant_id, session = %session_id, "Technical session closed");
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TenancyError;
    use crate::memory::{InMemorySessionStore, SessionCall};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_scope_installs_and_removes_technical_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let scope = SessionScope::new(TenantId::new(42), "tenancy-system", store.clone());

        let (handle, current) = scope
            .run(|handle| async move { Ok((handle, current_session())) })
            .await
            .unwrap();

        assert_eq!(current.map(|c| c.session_id), Some(handle.session_id));
        assert_eq!(handle.tenant_id, TenantId::new(42));

        assert_eq!(current_session(), None);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_work_restores_previous_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let tenant = TenantId::new(42);
        let user_session = store
            .create_session(tenant, Principal::user("walter"))
            .await
            .unwrap();
        store.clear_calls();
        let user = CurrentSession {
            session_id: user_session,
            tenant_id: tenant,
        };

        let scope = SessionScope::new(tenant, "tenancy-system", store.clone());
        let (result, after) = with_current_session(user, async {
            let result: TenancyResult<()> = scope
                .run(|_| async { Err(TenancyError::Scheduler("scheduler down".into())) })
                .await;
            (result, current_session())
        })
        .await;

        assert!(matches!(result, Err(TenancyError::Scheduler(_))));
        assert_eq!(after, Some(user));

        let calls = store.calls();
        let created = calls
            .iter()
            .find_map(|c| match c {
                SessionCall::Create { session_id, principal, .. } if principal.is_technical() => {
                    Some(*session_id)
                }
                _ => None,
            })
            .expect("technical session created");
        assert_eq!(
            calls.last(),
            Some(&SessionCall::Delete {
                session_id: created
            })
        );
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_nested_scope_restores_outer_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let outer = SessionScope::new(TenantId::new(1), "tenancy-system", store.clone());
        let inner = SessionScope::new(TenantId::new(2), "tenancy-system", store.clone());

        let (outer_id, inner_seen, restored) = outer
            .run(|handle| async move {
                let inner_seen = inner
                    .run(|_| async { Ok(current_session().map(|c| c.tenant_id)) })
                    .await?;
                Ok((handle.session_id, inner_seen, current_session()))
            })
            .await
            .unwrap();

        assert_eq!(inner_seen, Some(TenantId::new(2)));
        assert_eq!(restored.map(|c| c.session_id), Some(outer_id));
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_scopes_keep_their_own_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let first = SessionScope::new(TenantId::new(1), "tenancy-system", store.clone());
        let second = SessionScope::new(TenantId::new(2), "tenancy-system", store.clone());

        let (first_open_tx, first_open_rx) = oneshot::channel::<()>();
        let (second_open_tx, second_open_rx) = oneshot::channel::<()>();
        let (first_done_tx, first_done_rx) = oneshot::channel::<()>();

        // first opens, second opens, first closes, then second closes
        let first_run = async {
            let seen = first
                .run(move |handle| async move {
                    let _ = first_open_tx.send(());
                    let _ = second_open_rx.await;
                    Ok(current_session() == Some(CurrentSession {
                        session_id: handle.session_id,
                        tenant_id: TenantId::new(1),
                    }))
                })
                .await;
            let _ = first_done_tx.send(());
            seen
        };
        let second_run = async {
            let _ = first_open_rx.await;
            second
                .run(move |handle| async move {
                    let _ = second_open_tx.send(());
                    let _ = first_done_rx.await;
                    Ok(current_session() == Some(CurrentSession {
                        session_id: handle.session_id,
                        tenant_id: TenantId::new(2),
                    }))
                })
                .await
        };

        let (first_seen, second_seen) = tokio::join!(first_run, second_run);

        assert!(first_seen.unwrap());
        assert!(second_seen.unwrap());
        assert_eq!(current_session(), None);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_work_still_releases_session() {
        let store = Arc::new(InMemorySessionStore::new());
        let scope = SessionScope::new(TenantId::new(9), "tenancy-system", store.clone());

        let joined = tokio::spawn({
            let scope = scope.clone();
            async move {
                let _: TenancyResult<()> = scope
                    .run(|_| async {
                        if true {
                            panic!("service exploded");
                        }
                        Ok(())
                    })
                    .await;
            }
        })
        .await;

        assert!(joined.is_err());
        assert_eq!(store.session_count(), 0);
        assert_eq!(current_session(), None);
    }

    #[test]
    fn test_principal_ids() {
        assert_eq!(Principal::technical("sys").id(), "technical:sys");
        assert_eq!(Principal::user("alice").id(), "user:alice");
        assert!(!Principal::user("alice").is_technical());
    }
}
