//! Suspend/resume around screens that need a human.
//!
//! Each blocked screen opens an [`AssistanceSession`]. The caller gets a
//! oneshot receiver that is fulfilled exactly once, by whichever comes
//! first: the operator completing or cancelling, or the background timeout
//! scanner expiring the session.
//!
//! ```text
//! pending ──▶ in_progress ──▶ completed
//!    │             │
//!    └─────────────┴────────▶ timeout | cancelled
//! ```
//!
//! Terminal sessions move from the active set to the archive.

pub mod operator;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use operator::{ConsoleOperator, HeadlessOperator, Operator, OperatorResponse};

/// Unique identifier for an assistance session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AssistanceId(pub String);

impl AssistanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AssistanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AssistanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the operator is asked to do.
#[derive(Debug, Clone, Serialize)]
pub struct AssistanceRequest {
    pub reason: String,
    pub expected_action: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub required_data: BTreeMap<String, String>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl AssistanceRequest {
    pub fn new(reason: impl Into<String>, expected_action: impl Into<String>, timeout: Duration) -> Self {
        Self {
            reason: reason.into(),
            expected_action: expected_action.into(),
            required_data: BTreeMap::new(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceState {
    Pending,
    InProgress,
    Completed,
    Timeout,
    Cancelled,
}

impl AssistanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssistanceState::Completed | AssistanceState::Timeout | AssistanceState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistanceSession {
    pub id: AssistanceId,
    pub request: AssistanceRequest,
    pub created_at: DateTime<Utc>,
    pub state: AssistanceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Final answer delivered to the waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistanceOutcome {
    pub state: AssistanceState,
    pub result: Option<serde_json::Value>,
}

impl AssistanceOutcome {
    pub fn success(&self) -> bool {
        self.state == AssistanceState::Completed
    }
}

/// Active session as listed by [`AssistanceCoordinator::pending_requests`].
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    pub id: AssistanceId,
    pub reason: String,
    pub state: AssistanceState,
    pub elapsed_secs: u64,
}

struct ActiveEntry {
    session: AssistanceSession,
    opened: Instant,
    waiter: Option<oneshot::Sender<AssistanceOutcome>>,
}

#[derive(Default)]
struct Sessions {
    active: HashMap<AssistanceId, ActiveEntry>,
    archive: Vec<AssistanceSession>,
}

/// Default interval between timeout scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Owns every assistance session of a run.
///
/// All state sits behind one lock; the timeout scanner and the resolving
/// caller never touch it without holding that lock.
pub struct AssistanceCoordinator {
    sessions: RwLock<Sessions>,
    scan_interval: Duration,
    scanner_started: AtomicBool,
}

impl Default for AssistanceCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_INTERVAL)
    }
}

impl AssistanceCoordinator {
    pub fn new(scan_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            scan_interval,
            scanner_started: AtomicBool::new(false),
        }
    }

    /// Open a pending session. The receiver resolves when the session ends.
    pub async fn open(
        &self,
        request: AssistanceRequest,
    ) -> (AssistanceId, oneshot::Receiver<AssistanceOutcome>) {
        let (tx, rx) = oneshot::channel();
        let id = AssistanceId::new();
        let session = AssistanceSession {
            id: id.clone(),
            request,
            created_at: Utc::now(),
            state: AssistanceState::Pending,
            result: None,
            resolved_at: None,
        };
        info!(id = %id, reason = %session.request.reason, "Assistance requested");

        let mut sessions = self.sessions.write().await;
        sessions.active.insert(
            id.clone(),
            ActiveEntry {
                session,
                opened: Instant::now(),
                waiter: Some(tx),
            },
        );
        (id, rx)
    }

    /// Move a pending session to in-progress. False if it is no longer active.
    pub async fn mark_in_progress(&self, id: &AssistanceId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.active.get_mut(id) {
            Some(entry) if entry.session.state == AssistanceState::Pending => {
                entry.session.state = AssistanceState::InProgress;
                true
            }
            _ => false,
        }
    }

    pub async fn complete(&self, id: &AssistanceId, result: Option<serde_json::Value>) -> bool {
        self.finish(id, AssistanceState::Completed, result).await
    }

    pub async fn cancel(&self, id: &AssistanceId) -> bool {
        self.finish(id, AssistanceState::Cancelled, None).await
    }

    /// End an active session and notify its waiter. False if already ended.
    async fn finish(
        &self,
        id: &AssistanceId,
        state: AssistanceState,
        result: Option<serde_json::Value>,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.active.remove(id) else {
            return false;
        };
        let session = close(entry, state, result);
        sessions.archive.push(session);
        true
    }

    /// Time out every active session past its deadline. Returns how many expired.
    pub async fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let overdue: Vec<AssistanceId> = sessions
            .active
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.opened) >= entry.session.request.timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &overdue {
            if let Some(entry) = sessions.active.remove(id) {
                warn!(id = %id, reason = %entry.session.request.reason, "Assistance timed out");
                let session = close(entry, AssistanceState::Timeout, None);
                sessions.archive.push(session);
            }
        }
        overdue.len()
    }

    /// Spawn the background scanner that expires overdue sessions.
    ///
    /// Holds only a weak reference, so it exits once the coordinator is
    /// dropped. Calling this more than once has no effect.
    pub fn spawn_timeout_scanner(self: &Arc<Self>) {
        if self.scanner_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak_self = Arc::downgrade(self);
        let interval = self.scan_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(coordinator) = weak_self.upgrade() else {
                    debug!("AssistanceCoordinator dropped, timeout scanner exiting");
                    break;
                };
                let expired = coordinator.expire_overdue().await;
                if expired > 0 {
                    debug!(expired, "Timeout scan expired sessions");
                }
            }
        });
    }

    /// Ask `operator` to resolve `request` and wait for the outcome.
    ///
    /// Returns as soon as the operator answers or the session times out,
    /// whichever is first.
    pub async fn resolve(
        self: &Arc<Self>,
        request: AssistanceRequest,
        operator: &dyn Operator,
    ) -> AssistanceOutcome {
        self.spawn_timeout_scanner();
        let (id, mut rx) = self.open(request.clone()).await;
        self.mark_in_progress(&id).await;

        let received = tokio::select! {
            response = operator.handle(&id, &request) => {
                match response {
                    OperatorResponse::Confirmed(result) => self.complete(&id, result).await,
                    OperatorResponse::Declined => self.cancel(&id).await,
                };
                None
            }
            received = &mut rx => received.ok(),
        };

        // Once the operator has answered the session is closed, so the
        // channel already holds the outcome (a timeout if the scanner won).
        let outcome = match received {
            Some(outcome) => Some(outcome),
            None => rx.await.ok(),
        };
        let outcome = outcome.unwrap_or(AssistanceOutcome {
            state: AssistanceState::Cancelled,
            result: None,
        });
        debug_assert!(outcome.state.is_terminal());
        outcome
    }

    /// Sessions still waiting for an answer, oldest first.
    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        let sessions = self.sessions.read().await;
        let mut pending: Vec<(Instant, PendingRequest)> = sessions
            .active
            .values()
            .map(|entry| {
                (
                    entry.opened,
                    PendingRequest {
                        id: entry.session.id.clone(),
                        reason: entry.session.request.reason.clone(),
                        state: entry.session.state,
                        elapsed_secs: entry.opened.elapsed().as_secs(),
                    },
                )
            })
            .collect();
        pending.sort_by_key(|(opened, _)| *opened);
        pending.into_iter().map(|(_, p)| p).collect()
    }

    /// Terminal sessions in the order they ended.
    pub async fn archived(&self) -> Vec<AssistanceSession> {
        self.sessions.read().await.archive.clone()
    }
}

fn close(
    mut entry: ActiveEntry,
    state: AssistanceState,
    result: Option<serde_json::Value>,
) -> AssistanceSession {
    entry.session.state = state;
    entry.session.result = result;
    entry.session.resolved_at = Some(Utc::now());
    if let Some(waiter) = entry.waiter.take() {
        // The receiver may be gone if the caller stopped waiting.
        let _ = waiter.send(AssistanceOutcome {
            state,
            result: entry.session.result.clone(),
        });
    }
    debug!(id = %entry.session.id, ?state, "Assistance session closed");
    entry.session
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedOperator;

    fn request(timeout_ms: u64) -> AssistanceRequest {
        AssistanceRequest::new(
            "verification code",
            "Enter the code",
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn complete_fulfils_waiter_and_archives() {
        let coordinator = AssistanceCoordinator::default();
        let (id, rx) = coordinator.open(request(60_000)).await;
        assert!(coordinator.mark_in_progress(&id).await);
        assert!(coordinator
            .complete(&id, Some(serde_json::json!({"code": "1234"})))
            .await);

        let outcome = rx.await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.result.unwrap()["code"], "1234");
        assert!(coordinator.pending_requests().await.is_empty());
        assert_eq!(coordinator.archived().await.len(), 1);

        // Second completion is a no-op.
        assert!(!coordinator.complete(&id, None).await);
        assert!(!coordinator.mark_in_progress(&id).await);
    }

    #[tokio::test]
    async fn cancel_reports_cancelled() {
        let coordinator = AssistanceCoordinator::default();
        let (id, rx) = coordinator.open(request(60_000)).await;
        assert!(coordinator.cancel(&id).await);
        let outcome = rx.await.unwrap();
        assert_eq!(outcome.state, AssistanceState::Cancelled);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn expire_overdue_only_touches_late_sessions() {
        let coordinator = AssistanceCoordinator::default();
        let (_late, late_rx) = coordinator.open(request(1)).await;
        let (_fresh, _fresh_rx) = coordinator.open(request(60_000)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(coordinator.expire_overdue().await, 1);
        assert_eq!(late_rx.await.unwrap().state, AssistanceState::Timeout);

        let pending = coordinator.pending_requests().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, AssistanceState::Pending);
        assert!(!pending[0].state.is_terminal());
    }

    #[tokio::test]
    async fn scanner_releases_blocked_waiter() {
        let coordinator = Arc::new(AssistanceCoordinator::new(Duration::from_millis(10)));
        let operator = ScriptedOperator::silent();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.resolve(request(50), &operator),
        )
        .await
        .expect("scanner should time the session out");

        assert_eq!(outcome.state, AssistanceState::Timeout);
        let archived = coordinator.archived().await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].state, AssistanceState::Timeout);
        assert!(archived[0].state.is_terminal());
        assert!(archived[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn resolve_uses_operator_answer() {
        let coordinator = Arc::new(AssistanceCoordinator::new(Duration::from_millis(10)));
        let operator = ScriptedOperator::new(vec![
            OperatorResponse::Confirmed(None),
            OperatorResponse::Declined,
        ]);

        let first = coordinator.resolve(request(60_000), &operator).await;
        assert!(first.success());
        let second = coordinator.resolve(request(60_000), &operator).await;
        assert_eq!(second.state, AssistanceState::Cancelled);
        assert_eq!(operator.seen().len(), 2);
    }

    #[tokio::test]
    async fn scanner_exits_when_coordinator_dropped() {
        let coordinator = Arc::new(AssistanceCoordinator::new(Duration::from_millis(5)));
        coordinator.spawn_timeout_scanner();
        let weak = Arc::downgrade(&coordinator);
        drop(coordinator);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(weak.upgrade().is_none());
    }
}
