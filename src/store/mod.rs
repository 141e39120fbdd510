//! Persistent mirror of hub state.
//!
//! The hub never awaits these calls directly: plain writes go through the
//! [`Writer`] queue, and account lookups run in spawned tasks that report
//! back with an event.

mod sqlite;
mod writer;

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    error::StoreError,
    moderation::ModerationRecord,
    protocol::ChatMessage,
    session::{Role, Session},
};

pub use sqlite::SqliteStore;
pub use writer::{Write, Writer, WRITE_QUEUE_CAPACITY};

pub const STORE_ATTEMPTS: u32 = 3;
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

/// Row mirrored into `connected_users` for every live session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub username: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub page: String,
    pub fingerprint: String,
    pub connect_time: OffsetDateTime,
    pub last_activity: OffsetDateTime,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        SessionSnapshot {
            id: session.id.clone(),
            username: session.username.clone(),
            ip: session.address.clone(),
            user_agent: session.user_agent.clone(),
            page: session.page.clone(),
            fingerprint: session.fingerprint.clone(),
            connect_time: session.connected_at,
            last_activity: session.last_activity,
        }
    }
}

/// One `system_logs` row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: &'static str,
    pub details: Option<String>,
    pub username: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub fingerprint: Option<String>,
    pub at: OffsetDateTime,
}

impl AuditEntry {
    /// An entry attributed to the acting session.
    pub fn by(session: &Session, action: &'static str, details: impl Into<String>, at: OffsetDateTime) -> Self {
        AuditEntry {
            action,
            details: Some(details.into()),
            username: session.username.clone(),
            ip: Some(session.address.clone()),
            user_agent: Some(session.user_agent.clone()),
            fingerprint: Some(session.fingerprint.clone()),
            at,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_session(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError>;
    async fn remove_session(&self, id: &str) -> Result<(), StoreError>;
    /// Empties `connected_users`; run at startup since no session survives a
    /// restart.
    async fn clear_sessions(&self) -> Result<(), StoreError>;

    /// Active account by username.
    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError>;
    /// Fails with [`StoreError::Duplicate`] when the username is taken.
    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;
    async fn record_login(&self, account_id: &str, at: OffsetDateTime) -> Result<(), StoreError>;

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), StoreError>;
    async fn delete_message(&self, id: &str) -> Result<(), StoreError>;

    async fn insert_moderation(&self, record: &ModerationRecord) -> Result<(), StoreError>;
    async fn expire_bans(&self, fingerprint: &str, address: Option<&str>, at: OffsetDateTime) -> Result<u64, StoreError>;
    async fn expire_mutes(&self, fingerprint: &str, at: OffsetDateTime) -> Result<u64, StoreError>;
    async fn delete_expired_mutes(&self, before: OffsetDateTime) -> Result<u64, StoreError>;
    /// Active bans and every stored mute, oldest first.
    async fn load_moderation(&self, now: OffsetDateTime) -> Result<Vec<ModerationRecord>, StoreError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// Runs a store call with a per-attempt timeout, retrying transient failures
/// with a linear backoff.
pub async fn with_retry<T, F, Fut>(op: &'static str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(STORE_TIMEOUT, call()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(STORE_TIMEOUT)),
        };

        match result {
            Err(error) if error.is_transient() && attempt < STORE_ATTEMPTS => {
                debug!(op, attempt, %error, "retrying store call");
                tokio::time::sleep(BACKOFF_STEP * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

impl StoreError {
    /// Worth another attempt: timeouts and driver errors, not constraint
    /// violations or hashing failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Sqlx(_))
    }
}
