//! In-memory correlation state for in-flight login and enrollment attempts.
//!
//! Every entry is keyed by a random flow id handed to the client as a
//! cookie. Entries live at most `ttl` and are purged lazily on access, so
//! an abandoned flow simply ages out. Terminal transitions go through
//! [`FlowStore::take_login`] / [`FlowStore::take_enrollment`], which remove
//! the entry under the lock: two concurrent "approved" observations can
//! never both act on the same pending attempt.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A credential-checked login waiting for push approval.
#[derive(Clone, Debug)]
pub struct PendingLogin {
    pub user_id: Uuid,
    pub username: String,
    pub enrollment_id: String,
    pub remember: bool,
    pub push: PushState,
}

/// Progress of the push prompt for a pending login. At most one prompt is
/// ever sent per flow: the send slot is reserved before the provider call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PushState {
    NotRequested,
    /// A caller holds the send slot; the provider call is in flight.
    Requested,
    Sent(String),
}

struct LoginEntry {
    pending: PendingLogin,
    created_at: Instant,
}

struct EnrollmentEntry {
    token: String,
    created_at: Instant,
}

/// Outcome of reserving the push send slot for a pending login.
#[derive(Debug, Eq, PartialEq)]
pub enum BeginPush {
    /// The caller won the slot and must send the prompt (or abort).
    Begun,
    /// Another caller is sending right now; do not send again.
    InFlight,
    /// A prompt was already sent; its correlation id is reused.
    AlreadySent(String),
    /// No pending login for this flow id.
    Missing,
}

/// Outcome of attaching a push correlation id to a pending login.
#[derive(Debug, Eq, PartialEq)]
pub enum AttachOutcome {
    Attached,
    /// A push id was already recorded; it is returned for re-use.
    AlreadySet(String),
    /// No pending login for this flow id.
    Missing,
}

pub struct FlowStore {
    ttl: Duration,
    logins: Mutex<HashMap<Uuid, LoginEntry>>,
    enrollments: Mutex<HashMap<Uuid, EnrollmentEntry>>,
}

impl FlowStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            logins: Mutex::new(HashMap::new()),
            enrollments: Mutex::new(HashMap::new()),
        }
    }

    /// Park a credential-checked login until its push approval resolves.
    pub async fn insert_login(
        &self,
        user_id: Uuid,
        username: String,
        enrollment_id: String,
        remember: bool,
    ) -> Uuid {
        let flow_id = Uuid::new_v4();
        let mut logins = self.logins.lock().await;
        logins.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        logins.insert(
            flow_id,
            LoginEntry {
                pending: PendingLogin {
                    user_id,
                    username,
                    enrollment_id,
                    remember,
                    push: PushState::NotRequested,
                },
                created_at: Instant::now(),
            },
        );
        flow_id
    }

    /// Non-consuming read used by the poll handlers.
    pub async fn login_snapshot(&self, flow_id: Uuid) -> Option<PendingLogin> {
        let logins = self.logins.lock().await;
        logins
            .get(&flow_id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.pending.clone())
    }

    /// Reserve the push send slot. Exactly one caller per flow ever gets
    /// `Begun`; everyone else observes the reservation or the sent prompt.
    pub async fn begin_push(&self, flow_id: Uuid) -> BeginPush {
        let mut logins = self.logins.lock().await;
        let entry = match logins.get_mut(&flow_id) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => entry,
            _ => return BeginPush::Missing,
        };
        match &entry.pending.push {
            PushState::NotRequested => {
                entry.pending.push = PushState::Requested;
                BeginPush::Begun
            }
            PushState::Requested => BeginPush::InFlight,
            PushState::Sent(existing) => BeginPush::AlreadySent(existing.clone()),
        }
    }

    /// Record the provider's push correlation id, at most once per login.
    pub async fn attach_push(&self, flow_id: Uuid, push_correlation_id: String) -> AttachOutcome {
        let mut logins = self.logins.lock().await;
        let entry = match logins.get_mut(&flow_id) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => entry,
            _ => return AttachOutcome::Missing,
        };
        match &entry.pending.push {
            PushState::Sent(existing) => AttachOutcome::AlreadySet(existing.clone()),
            PushState::NotRequested | PushState::Requested => {
                entry.pending.push = PushState::Sent(push_correlation_id);
                AttachOutcome::Attached
            }
        }
    }

    /// Release a reserved send slot after a failed provider call so a
    /// later challenge can try again.
    pub async fn abort_push(&self, flow_id: Uuid) {
        let mut logins = self.logins.lock().await;
        if let Some(entry) = logins.get_mut(&flow_id) {
            if entry.pending.push == PushState::Requested {
                entry.pending.push = PushState::NotRequested;
            }
        }
    }

    /// Consume a pending login. Returns `None` when it was never created,
    /// expired, or was already consumed by a concurrent caller.
    pub async fn take_login(&self, flow_id: Uuid) -> Option<PendingLogin> {
        let mut logins = self.logins.lock().await;
        let entry = logins.remove(&flow_id)?;
        if entry.created_at.elapsed() < self.ttl {
            Some(entry.pending)
        } else {
            None
        }
    }

    /// Number of parked logins, expired entries included until next purge.
    pub async fn pending_login_count(&self) -> usize {
        self.logins.lock().await.len()
    }

    /// Drop a pending login without acting on it (terminal error path).
    pub async fn remove_login(&self, flow_id: Uuid) {
        let mut logins = self.logins.lock().await;
        logins.remove(&flow_id);
    }

    /// Park a freshly issued enrollment token for one artifact render.
    pub async fn insert_enrollment(&self, token: String) -> Uuid {
        let flow_id = Uuid::new_v4();
        let mut enrollments = self.enrollments.lock().await;
        enrollments.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        enrollments.insert(
            flow_id,
            EnrollmentEntry {
                token,
                created_at: Instant::now(),
            },
        );
        flow_id
    }

    /// Consume the stored token reference. The token itself stays valid at
    /// the provider until its embedded expiry; only the single render use
    /// is spent here.
    pub async fn take_enrollment(&self, flow_id: Uuid) -> Option<String> {
        let mut enrollments = self.enrollments.lock().await;
        let entry = enrollments.remove(&flow_id)?;
        if entry.created_at.elapsed() < self.ttl {
            Some(entry.token)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FlowStore {
        FlowStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn login_is_consumed_exactly_once() {
        let store = store();
        let flow_id = store
            .insert_login(Uuid::new_v4(), "alice".to_string(), "42".to_string(), true)
            .await;

        let pending = store.take_login(flow_id).await.unwrap();
        assert_eq!(pending.username, "alice");
        assert!(pending.remember);

        // A second take must observe nothing; the first caller owns the
        // terminal transition.
        assert!(store.take_login(flow_id).await.is_none());
        assert!(store.login_snapshot(flow_id).await.is_none());
    }

    #[tokio::test]
    async fn push_id_attaches_at_most_once() {
        let store = store();
        let flow_id = store
            .insert_login(Uuid::new_v4(), "alice".to_string(), "42".to_string(), false)
            .await;

        assert_eq!(store.begin_push(flow_id).await, BeginPush::Begun);
        assert_eq!(
            store.attach_push(flow_id, "uuid-1".to_string()).await,
            AttachOutcome::Attached
        );
        assert_eq!(
            store.attach_push(flow_id, "uuid-2".to_string()).await,
            AttachOutcome::AlreadySet("uuid-1".to_string())
        );

        let pending = store.login_snapshot(flow_id).await.unwrap();
        assert_eq!(pending.push, PushState::Sent("uuid-1".to_string()));
    }

    #[tokio::test]
    async fn only_one_caller_wins_the_send_slot() {
        let store = store();
        let flow_id = store
            .insert_login(Uuid::new_v4(), "alice".to_string(), "42".to_string(), false)
            .await;

        // Two racing challenge requests: the loser must not send a
        // second prompt while the winner's provider call is in flight.
        assert_eq!(store.begin_push(flow_id).await, BeginPush::Begun);
        assert_eq!(store.begin_push(flow_id).await, BeginPush::InFlight);

        store.attach_push(flow_id, "uuid-1".to_string()).await;
        assert_eq!(
            store.begin_push(flow_id).await,
            BeginPush::AlreadySent("uuid-1".to_string())
        );
    }

    #[tokio::test]
    async fn aborted_send_slot_can_be_retried() {
        let store = store();
        let flow_id = store
            .insert_login(Uuid::new_v4(), "alice".to_string(), "42".to_string(), false)
            .await;

        assert_eq!(store.begin_push(flow_id).await, BeginPush::Begun);
        store.abort_push(flow_id).await;
        assert_eq!(store.begin_push(flow_id).await, BeginPush::Begun);
    }

    #[tokio::test]
    async fn attach_on_unknown_flow_is_missing() {
        let store = store();
        assert_eq!(
            store.attach_push(Uuid::new_v4(), "uuid".to_string()).await,
            AttachOutcome::Missing
        );
        assert_eq!(store.begin_push(Uuid::new_v4()).await, BeginPush::Missing);
    }

    #[tokio::test]
    async fn expired_login_is_gone() {
        let store = FlowStore::new(Duration::ZERO);
        let flow_id = store
            .insert_login(Uuid::new_v4(), "alice".to_string(), "42".to_string(), false)
            .await;

        assert!(store.login_snapshot(flow_id).await.is_none());
        assert!(store.take_login(flow_id).await.is_none());
    }

    #[tokio::test]
    async fn enrollment_token_reference_is_single_use() {
        let store = store();
        let flow_id = store.insert_enrollment("jwt".to_string()).await;

        assert_eq!(store.take_enrollment(flow_id).await.as_deref(), Some("jwt"));
        assert!(store.take_enrollment(flow_id).await.is_none());
    }

    #[tokio::test]
    async fn remove_login_clears_state() {
        let store = store();
        let flow_id = store
            .insert_login(Uuid::new_v4(), "alice".to_string(), "42".to_string(), false)
            .await;

        store.remove_login(flow_id).await;
        assert!(store.take_login(flow_id).await.is_none());
    }
}
