//! Unit of work with explicit after-commit hooks
//!
//! A [`UnitOfWork`] wraps one transaction of the [`TransactionManager`] and is
//! passed explicitly to every step that must be part of it. Work that may only
//! happen once the transaction is durable (notifying peers, spawning recovery,
//! resuming jobs) is registered with [`UnitOfWork::after_commit`] and runs in
//! registration order after a successful commit. A rollback discards the hooks.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TenancyResult;
use crate::ports::TransactionManager;

/// Transaction identifier issued by the transaction manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

type AfterCommitHook = Box<dyn FnOnce() -> BoxFuture<'static, TenancyResult<()>> + Send + Sync>;

/// An open transaction plus the work deferred until it commits
pub struct UnitOfWork {
    id: TransactionId,
    manager: Arc<dyn TransactionManager>,
    after_commit: Vec<(String, AfterCommitHook)>,
    finished: bool,
}

impl UnitOfWork {
    /// Begin a new transaction
    pub async fn begin(manager: Arc<dyn TransactionManager>) -> TenancyResult<Self> {
        let id = manager.begin().await?;
        debug!(tx = %id, "Unit of work started");
        Ok(Self {
            id,
            manager,
            after_commit: Vec::new(),
            finished: false,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Number of hooks waiting for the commit
    pub fn pending_hooks(&self) -> usize {
        self.after_commit.len()
    }

    /// Register work to run once the transaction has committed
    pub fn after_commit<F, Fut>(&mut self, label: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TenancyResult<()>> + Send + 'static,
    {
        self.after_commit
            .push((label.into(), Box::new(move || hook().boxed())));
    }

    /// Commit, then run every after-commit hook.
    ///
    /// All hooks run even when one fails; the first hook failure is returned.
    /// If the commit itself fails no hook runs.
    pub async fn commit(self) -> TenancyResult<()> {
        self.commit_detached().await?.run().await
    }

    /// Commit and hand back the hooks without running them, so the caller
    /// can record the committed change before the hooks report failures.
    pub async fn commit_detached(mut self) -> TenancyResult<CommitHooks> {
        self.finished = true;
        self.manager.commit(self.id).await?;
        debug!(tx = %self.id, hooks = self.after_commit.len(), "Unit of work committed");
        Ok(CommitHooks {
            tx: self.id,
            hooks: std::mem::take(&mut self.after_commit),
        })
    }

    /// Roll back and discard the after-commit hooks
    pub async fn rollback(mut self) -> TenancyResult<()> {
        self.finished = true;
        let discarded = std::mem::take(&mut self.after_commit).len();
        debug!(tx = %self.id, discarded, "Unit of work rolled back");
        self.manager.rollback(self.id).await
    }

    /// Commit when `result` is `Ok`, roll back otherwise
    pub async fn complete<T>(self, result: TenancyResult<T>) -> TenancyResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let id = self.id;
                if let Err(rollback_err) = self.rollback().await {
                    warn!(tx = %id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            warn!(tx = %self.id, "Unit of work dropped without commit or rollback");
        }
    }
}

/// After-commit hooks of a committed unit of work
#[must_use = "after-commit hooks do nothing unless run"]
pub struct CommitHooks {
    tx: TransactionId,
    hooks: Vec<(String, AfterCommitHook)>,
}

impl CommitHooks {
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the hooks in registration order, returning the first failure
    pub async fn run(self) -> TenancyResult<()> {
        let mut first_error = None;
        for (label, hook) in self.hooks {
            if let Err(e) = hook().await {
                warn!(tx = %self.tx, hook = %label, error = %e, "After-commit hook failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
