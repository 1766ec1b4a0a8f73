//! In-memory implementations of the boundary contracts
//!
//! Used by tests and by the demonstration node. The recording variants keep
//! a log of every call so tests can assert on side effects.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tenancy_types::{ClusterTask, NodeId, ServiceAction, SessionId, TenantId, TenantStatus};

use crate::error::{TenancyError, TenancyResult};
use crate::ports::{
    JobScheduler, PeerClient, PlatformState, RecoveryHandler, SessionStore, TenantService,
    TenantStore, TransactionManager,
};
use crate::session::Principal;
use crate::transaction::TransactionId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========== Tenant store ==========

/// Tenant status store with per-transaction staging.
///
/// Writes are staged per transaction and become visible on commit; the last
/// commit wins.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    committed: DashMap<TenantId, TenantStatus>,
    staged: DashMap<TransactionId, HashMap<TenantId, TenantStatus>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(tenant_id: TenantId, status: TenantStatus) -> Self {
        let store = Self::new();
        store.insert_tenant(tenant_id, status);
        store
    }

    /// Create or overwrite a tenant outside any transaction
    pub fn insert_tenant(&self, tenant_id: TenantId, status: TenantStatus) {
        self.committed.insert(tenant_id, status);
    }

    pub fn committed_status(&self, tenant_id: TenantId) -> Option<TenantStatus> {
        self.committed.get(&tenant_id).map(|s| *s)
    }

    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.committed.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Transactions begun but neither committed nor rolled back
    pub fn open_transactions(&self) -> usize {
        self.staged.len()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn status(&self, tx: TransactionId, tenant_id: TenantId) -> TenancyResult<TenantStatus> {
        let staged = self
            .staged
            .get(&tx)
            .ok_or_else(|| TenancyError::Persistence(format!("Unknown transaction {}", tx)))?
            .get(&tenant_id)
            .copied();

        staged
            .or_else(|| self.committed_status(tenant_id))
            .ok_or_else(|| TenancyError::Persistence(format!("Tenant {} not found", tenant_id)))
    }

    async fn set_status(
        &self,
        tx: TransactionId,
        tenant_id: TenantId,
        status: TenantStatus,
    ) -> TenancyResult<()> {
        let mut staged = self
            .staged
            .get_mut(&tx)
            .ok_or_else(|| TenancyError::Persistence(format!("Unknown transaction {}", tx)))?;
        staged.insert(tenant_id, status);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryTenantStore {
    async fn begin(&self) -> TenancyResult<TransactionId> {
        let tx = TransactionId::generate();
        self.staged.insert(tx, HashMap::new());
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionId) -> TenancyResult<()> {
        let (_, writes) = self
            .staged
            .remove(&tx)
            .ok_or_else(|| TenancyError::Persistence(format!("Unknown transaction {}", tx)))?;
        for (tenant_id, status) in writes {
            self.committed.insert(tenant_id, status);
        }
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> TenancyResult<()> {
        self.staged.remove(&tx);
        Ok(())
    }
}

// ========== Sessions ==========

/// A stored session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub principal: Principal,
    pub created_at: DateTime<Utc>,
}

/// A mutating call made on [`InMemorySessionStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Create {
        session_id: SessionId,
        tenant_id: TenantId,
        principal: Principal,
    },
    Delete {
        session_id: SessionId,
    },
    DeleteTenantSessions {
        tenant_id: TenantId,
        keep_technical: bool,
    },
}

/// Session store recording every mutating call
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
    calls: Mutex<Vec<SessionCall>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_for(&self, tenant_id: TenantId) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: SessionCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        tenant_id: TenantId,
        principal: Principal,
    ) -> TenancyResult<SessionId> {
        let session_id = SessionId::generate();
        self.sessions.insert(
            session_id,
            Session {
                id: session_id,
                tenant_id,
                principal: principal.clone(),
                created_at: Utc::now(),
            },
        );
        self.record(SessionCall::Create {
            session_id,
            tenant_id,
            principal,
        });
        Ok(session_id)
    }

    async fn delete_session(&self, session_id: SessionId) -> TenancyResult<()> {
        self.sessions.remove(&session_id);
        self.record(SessionCall::Delete { session_id });
        Ok(())
    }

    async fn delete_sessions(
        &self,
        tenant_id: TenantId,
        keep_technical: bool,
    ) -> TenancyResult<usize> {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep =
                session.tenant_id != tenant_id || (keep_technical && session.principal.is_technical());
            if !keep {
                removed += 1;
            }
            keep
        });
        self.record(SessionCall::DeleteTenantSessions {
            tenant_id,
            keep_technical,
        });
        Ok(removed)
    }
}

// ========== Job scheduler ==========

/// A call made on [`InMemoryJobScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCall {
    Pause(TenantId),
    Resume(TenantId),
}

/// Scheduler tracking which tenants have their jobs paused
#[derive(Debug, Default)]
pub struct InMemoryJobScheduler {
    paused: Mutex<HashSet<TenantId>>,
    calls: Mutex<Vec<JobCall>>,
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self, tenant_id: TenantId) -> bool {
        lock(&self.paused).contains(&tenant_id)
    }

    pub fn calls(&self) -> Vec<JobCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, call: JobCall) -> usize {
        lock(&self.calls).iter().filter(|c| **c == call).count()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn pause_jobs(&self, tenant_id: TenantId) -> TenancyResult<()> {
        lock(&self.paused).insert(tenant_id);
        lock(&self.calls).push(JobCall::Pause(tenant_id));
        Ok(())
    }

    async fn resume_jobs(&self, tenant_id: TenantId) -> TenancyResult<()> {
        lock(&self.paused).remove(&tenant_id);
        lock(&self.calls).push(JobCall::Resume(tenant_id));
        Ok(())
    }
}

// ========== Tenant services ==========

/// Shared log of service calls, in call order
#[derive(Debug, Clone, Default)]
pub struct ServiceCallLog {
    entries: Arc<Mutex<Vec<(String, ServiceAction)>>>,
}

impl ServiceCallLog {
    pub fn entries(&self) -> Vec<(String, ServiceAction)> {
        lock(&self.entries).clone()
    }

    pub fn names_for(&self, action: ServiceAction) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|(_, a)| *a == action)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, name: &str, action: ServiceAction) {
        lock(&self.entries).push((name.to_string(), action));
    }
}

/// Tenant service that logs every call and can be told to fail one action
#[derive(Debug)]
pub struct RecordingTenantService {
    name: String,
    log: ServiceCallLog,
    fail_on: Option<ServiceAction>,
}

impl RecordingTenantService {
    pub fn new(name: impl Into<String>, log: ServiceCallLog) -> Self {
        Self {
            name: name.into(),
            log,
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, action: ServiceAction) -> Self {
        self.fail_on = Some(action);
        self
    }

    fn call(&self, action: ServiceAction) -> TenancyResult<()> {
        self.log.push(&self.name, action);
        if self.fail_on == Some(action) {
            return Err(TenancyError::service(&self.name, action, "simulated failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantService for RecordingTenantService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, _tenant_id: TenantId) -> TenancyResult<()> {
        self.call(ServiceAction::Start)
    }

    async fn stop(&self, _tenant_id: TenantId) -> TenancyResult<()> {
        self.call(ServiceAction::Stop)
    }

    async fn pause(&self, _tenant_id: TenantId) -> TenancyResult<()> {
        self.call(ServiceAction::Pause)
    }

    async fn resume(&self, _tenant_id: TenantId) -> TenancyResult<()> {
        self.call(ServiceAction::Resume)
    }
}

// ========== Recovery handlers ==========

/// Recovery handler counting its invocations
#[derive(Debug)]
pub struct RecordingRecoveryHandler {
    name: String,
    before: AtomicUsize,
    after: AtomicUsize,
    fail_before: bool,
    fail_after: bool,
    panic_after: bool,
}

impl RecordingRecoveryHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
            fail_before: false,
            fail_after: false,
            panic_after: false,
        }
    }

    pub fn failing_before(mut self) -> Self {
        self.fail_before = true;
        self
    }

    pub fn failing_after(mut self) -> Self {
        self.fail_after = true;
        self
    }

    pub fn panicking_after(mut self) -> Self {
        self.panic_after = true;
        self
    }

    pub fn before_calls(&self) -> usize {
        self.before.load(Ordering::SeqCst)
    }

    pub fn after_calls(&self) -> usize {
        self.after.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecoveryHandler for RecordingRecoveryHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_services_start(&self, tenant_id: TenantId) -> TenancyResult<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        if self.fail_before {
            return Err(TenancyError::Persistence(format!(
                "unreadable flow nodes for tenant {}",
                tenant_id
            )));
        }
        Ok(())
    }

    async fn after_services_start(&self, tenant_id: TenantId) -> TenancyResult<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        if self.panic_after {
            panic!("recovery of tenant {} panicked", tenant_id);
        }
        if self.fail_after {
            return Err(TenancyError::Persistence(format!(
                "could not resume flow nodes of tenant {}",
                tenant_id
            )));
        }
        Ok(())
    }
}

// ========== Peers ==========

#[derive(Debug, Clone)]
enum PeerBehaviour {
    Succeed,
    Fail(String),
    Delay(Duration),
}

/// Peer client with a fixed answer, recording the tasks it receives
#[derive(Debug)]
pub struct ScriptedPeer {
    node_id: NodeId,
    behaviour: PeerBehaviour,
    received: Mutex<Vec<ClusterTask>>,
}

impl ScriptedPeer {
    fn new(node_id: impl Into<String>, behaviour: PeerBehaviour) -> Self {
        Self {
            node_id: NodeId::new(node_id),
            behaviour,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(node_id: impl Into<String>) -> Self {
        Self::new(node_id, PeerBehaviour::Succeed)
    }

    pub fn failing(node_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::new(node_id, PeerBehaviour::Fail(cause.into()))
    }

    /// Succeeds after `delay`
    pub fn delayed(node_id: impl Into<String>, delay: Duration) -> Self {
        Self::new(node_id, PeerBehaviour::Delay(delay))
    }

    pub fn received(&self) -> Vec<ClusterTask> {
        lock(&self.received).clone()
    }
}

#[async_trait]
impl PeerClient for ScriptedPeer {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn execute(&self, task: ClusterTask) -> TenancyResult<()> {
        lock(&self.received).push(task);
        match &self.behaviour {
            PeerBehaviour::Succeed => Ok(()),
            PeerBehaviour::Fail(cause) => Err(TenancyError::Transport(cause.clone())),
            PeerBehaviour::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
        }
    }
}

// ========== Platform ==========

/// Platform state switched by hand
#[derive(Debug, Default)]
pub struct ManualPlatformState {
    started: AtomicBool,
}

impl ManualPlatformState {
    pub fn new(started: bool) -> Self {
        Self {
            started: AtomicBool::new(started),
        }
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }
}

impl PlatformState for ManualPlatformState {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}
