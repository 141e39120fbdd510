use async_trait::async_trait;
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    Executor,
};
use time::OffsetDateTime;

use crate::{
    error::StoreError,
    moderation::{ModerationKind, ModerationRecord},
    protocol::ChatMessage,
    session::Role,
};

use super::{Account, AuditEntry, SessionSnapshot, Store};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connected_users (
    id TEXT PRIMARY KEY,
    username TEXT,
    ip TEXT NOT NULL,
    user_agent TEXT,
    connect_time TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    page TEXT,
    fingerprint TEXT
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'viewer',
    created_at TEXT NOT NULL,
    last_login TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    role TEXT NOT NULL,
    is_system BOOLEAN NOT NULL DEFAULT 0,
    color TEXT,
    ip TEXT,
    fingerprint TEXT,
    stream_key TEXT
);

CREATE TABLE IF NOT EXISTS banned_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    ip TEXT,
    username TEXT,
    banned_at INTEGER NOT NULL,
    ban_end_time INTEGER,
    reason TEXT,
    banned_by TEXT,
    is_permanent BOOLEAN NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS muted_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    ip TEXT,
    username TEXT,
    muted_at INTEGER NOT NULL,
    mute_end_time INTEGER,
    reason TEXT,
    muted_by TEXT,
    mute_count INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS system_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    details TEXT,
    timestamp TEXT NOT NULL,
    username TEXT,
    ip TEXT,
    user_agent TEXT,
    fingerprint TEXT
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_stream ON chat_messages (stream_key, timestamp);
CREATE INDEX IF NOT EXISTS idx_banned_users_fingerprint ON banned_users (fingerprint);
CREATE INDEX IF NOT EXISTS idx_muted_users_fingerprint ON muted_users (fingerprint);
"#;

type AccountRow = (String, String, String, String, bool, OffsetDateTime, Option<OffsetDateTime>);

/// Moderation times are unix milliseconds so the expiry filters compare
/// numbers.
type ModerationRow = (String, Option<String>, Option<String>, i64, Option<i64>, Option<String>, Option<String>, i64);

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the pool and creates missing tables.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqlitePoolOptions::new();
        // every connection to `:memory:` is its own database
        let options = if url.contains(":memory:") {
            options.max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            options.max_connections(16)
        };

        let pool = options.connect(url).await?;
        pool.execute(SCHEMA).await?;
        Ok(SqliteStore { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn account_from_row((id, username, password_hash, role, is_active, created_at, last_login): AccountRow) -> Account {
    Account {
        id,
        username,
        password_hash,
        role: Role::from_stored(&role),
        is_active,
        created_at,
        last_login,
    }
}

fn millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos().div_euclid(1_000_000)).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|_| StoreError::Timestamp(ms))
}

fn record_from_row(
    kind: ModerationKind,
    (fingerprint, address, username, created_at, expires_at, reason, actor, count): ModerationRow,
) -> Result<ModerationRecord, StoreError> {
    Ok(ModerationRecord {
        kind,
        fingerprint,
        address,
        username,
        reason,
        actor,
        created_at: from_millis(created_at)?,
        expires_at: expires_at.map(from_millis).transpose()?,
        infraction: u32::try_from(count).unwrap_or(0),
    })
}

fn unique_violation(error: sqlx::Error, what: &'static str) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what),
        _ => StoreError::Sqlx(error),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_session(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO connected_users (id,username,ip,user_agent,connect_time,last_activity,page,fingerprint)
             VALUES (?,?,?,?,?,?,?,?)
             ON CONFLICT(id) DO UPDATE SET
                username=excluded.username,
                last_activity=excluded.last_activity,
                page=excluded.page",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.username)
        .bind(&snapshot.ip)
        .bind(&snapshot.user_agent)
        .bind(snapshot.connect_time)
        .bind(snapshot.last_activity)
        .bind(&snapshot.page)
        .bind(&snapshot.fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_session(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM connected_users WHERE id=?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_sessions(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM connected_users").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id,username,password_hash,role,is_active,created_at,last_login
             FROM users WHERE username=? AND is_active=1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(account_from_row))
    }

    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id,username,password_hash,role,created_at,last_login,is_active)
             VALUES (?,?,?,?,?,?,?)",
        )
        .bind(&account.id)
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.created_at)
        .bind(account.last_login)
        .bind(account.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "username"))?;
        Ok(())
    }

    async fn record_login(&self, account_id: &str, at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login=? WHERE id=?")
            .bind(at)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chat_messages (id,username,message,timestamp,role,is_system,color,ip,fingerprint,stream_key)
             VALUES (?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&message.id)
        .bind(&message.username)
        .bind(&message.message)
        .bind(message.timestamp)
        .bind(message.role.as_str())
        .bind(message.is_system)
        .bind(&message.color)
        .bind(&message.ip)
        .bind(&message.fingerprint)
        .bind(&message.stream_key)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "message id"))?;
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chat_messages WHERE id=?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_moderation(&self, record: &ModerationRecord) -> Result<(), StoreError> {
        let query = match record.kind {
            ModerationKind::Ban => sqlx::query(
                "INSERT INTO banned_users (fingerprint,ip,username,banned_at,ban_end_time,reason,banned_by,is_permanent)
                 VALUES (?,?,?,?,?,?,?,?)",
            ),
            ModerationKind::Mute => sqlx::query(
                "INSERT INTO muted_users (fingerprint,ip,username,muted_at,mute_end_time,reason,muted_by,mute_count)
                 VALUES (?,?,?,?,?,?,?,?)",
            ),
        };
        let last = match record.kind {
            ModerationKind::Ban => i64::from(record.is_permanent()),
            ModerationKind::Mute => i64::from(record.infraction),
        };

        query
            .bind(&record.fingerprint)
            .bind(&record.address)
            .bind(&record.username)
            .bind(millis(record.created_at))
            .bind(record.expires_at.map(millis))
            .bind(&record.reason)
            .bind(&record.actor)
            .bind(last)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expire_bans(&self, fingerprint: &str, address: Option<&str>, at: OffsetDateTime) -> Result<u64, StoreError> {
        let at = millis(at);
        let result = sqlx::query(
            "UPDATE banned_users SET ban_end_time=?
             WHERE (fingerprint=? OR (? IS NOT NULL AND ip=?))
               AND (ban_end_time IS NULL OR ban_end_time > ?)",
        )
        .bind(at)
        .bind(fingerprint)
        .bind(address)
        .bind(address)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_mutes(&self, fingerprint: &str, at: OffsetDateTime) -> Result<u64, StoreError> {
        let at = millis(at);
        let result = sqlx::query(
            "UPDATE muted_users SET mute_end_time=?
             WHERE fingerprint=? AND (mute_end_time IS NULL OR mute_end_time > ?)",
        )
        .bind(at)
        .bind(fingerprint)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_mutes(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM muted_users WHERE mute_end_time IS NOT NULL AND mute_end_time <= ?")
            .bind(millis(before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn load_moderation(&self, now: OffsetDateTime) -> Result<Vec<ModerationRecord>, StoreError> {
        let bans: Vec<ModerationRow> = sqlx::query_as(
            "SELECT fingerprint,ip,username,banned_at,ban_end_time,reason,banned_by,0
             FROM banned_users
             WHERE ban_end_time IS NULL OR ban_end_time > ?
             ORDER BY banned_at, id",
        )
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;

        let mutes: Vec<ModerationRow> = sqlx::query_as(
            "SELECT fingerprint,ip,username,muted_at,mute_end_time,reason,muted_by,mute_count
             FROM muted_users
             ORDER BY muted_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        bans.into_iter()
            .map(|row| record_from_row(ModerationKind::Ban, row))
            .chain(mutes.into_iter().map(|row| record_from_row(ModerationKind::Mute, row)))
            .collect()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_logs (action,details,timestamp,username,ip,user_agent,fingerprint)
             VALUES (?,?,?,?,?,?,?)",
        )
        .bind(entry.action)
        .bind(&entry.details)
        .bind(entry.at)
        .bind(&entry.username)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(&entry.fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ModerationStore;
    use time::{macros::datetime, Duration};

    const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn account(username: &str) -> Account {
        Account {
            id: format!("id-{username}"),
            username: username.into(),
            password_hash: "$argon2id$stub".into(),
            role: Role::Viewer,
            is_active: true,
            created_at: NOW,
            last_login: None,
        }
    }

    #[tokio::test]
    async fn accounts_round_trip_and_reject_duplicates() {
        let store = store().await;
        store.create_account(&account("alice")).await.unwrap();
        let found = store.find_account("alice").await.unwrap().unwrap();
        assert_eq!(found, account("alice"));

        let err = store.create_account(&Account { id: "other".into(), ..account("alice") }).await;
        assert!(matches!(err, Err(StoreError::Duplicate("username"))));
        assert!(store.find_account("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_login_sets_last_login() {
        let store = store().await;
        store.create_account(&account("alice")).await.unwrap();
        store.record_login("id-alice", NOW).await.unwrap();
        let found = store.find_account("alice").await.unwrap().unwrap();
        assert_eq!(found.last_login, Some(NOW));
    }

    #[tokio::test]
    async fn moderation_reloads_active_bans_and_all_mutes() {
        let store = store().await;
        let mut moderation = ModerationStore::new();
        let (first, _) = moderation.mute("fp1", None, None, None, None, NOW);
        let (second, _) = moderation.mute("fp1", None, None, None, None, NOW + Duration::hours(1));
        let lifted = moderation.ban("fp2", None, Some("6.6.6.6"), None, None, None, NOW);
        let kept = moderation.ban("fp3", None, None, None, None, None, NOW);
        for record in [&first, &second, &lifted, &kept] {
            store.insert_moderation(record).await.unwrap();
        }

        let later = NOW + Duration::hours(2);
        assert_eq!(store.expire_bans("nope", Some("6.6.6.6"), later).await.unwrap(), 1);

        let records = store.load_moderation(later).await.unwrap();
        let restored = ModerationStore::from_records(records);
        assert!(restored.is_banned("fp3", "", later).is_some());
        assert!(restored.is_banned("fp2", "6.6.6.6", later).is_none());
        assert_eq!(restored.infractions("fp1"), 2);
    }

    #[tokio::test]
    async fn expired_mutes_are_deleted() {
        let store = store().await;
        let mut moderation = ModerationStore::new();
        let (mute, _) = moderation.mute("fp1", None, None, None, None, NOW);
        store.insert_moderation(&mute).await.unwrap();

        assert_eq!(store.delete_expired_mutes(NOW + Duration::minutes(1)).await.unwrap(), 0);
        assert_eq!(store.delete_expired_mutes(NOW + Duration::minutes(5)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mute_expiry_compares_below_one_second() {
        let store = store().await;
        let mut moderation = ModerationStore::new();
        let (mute, _) = moderation.mute("fp1", None, None, None, None, NOW);
        let expires = NOW + Duration::milliseconds(500);
        store.insert_moderation(&ModerationRecord { expires_at: Some(expires), ..mute }).await.unwrap();

        assert_eq!(store.delete_expired_mutes(expires - Duration::milliseconds(1)).await.unwrap(), 0);
        assert_eq!(store.delete_expired_mutes(expires + Duration::microseconds(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn moderation_times_survive_a_reload() {
        let store = store().await;
        let mut moderation = ModerationStore::new();
        let at = NOW + Duration::milliseconds(250);
        let ban = moderation.ban("fp1", None, None, None, None, Some(at + Duration::hours(1)), at);
        store.insert_moderation(&ban).await.unwrap();

        let records = store.load_moderation(NOW).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].created_at, at);
        assert_eq!(records[0].expires_at, Some(at + Duration::hours(1)));
    }

    #[tokio::test]
    async fn messages_and_sessions_are_written() {
        let store = store().await;
        let message = ChatMessage {
            id: "m1".into(),
            username: "alice".into(),
            message: "hi".into(),
            timestamp: NOW,
            role: Role::Viewer,
            is_system: false,
            color: None,
            ip: "10.0.0.1".into(),
            fingerprint: "fp".into(),
            stream_key: Some("abc".into()),
        };
        store.insert_message(&message).await.unwrap();
        store.delete_message("m1").await.unwrap();

        let snapshot = SessionSnapshot {
            id: "s1".into(),
            username: None,
            ip: "10.0.0.1".into(),
            user_agent: "ua".into(),
            page: "home".into(),
            fingerprint: "fp".into(),
            connect_time: NOW,
            last_activity: NOW,
        };
        store.upsert_session(&snapshot).await.unwrap();
        store.upsert_session(&SessionSnapshot { page: "streams".into(), ..snapshot }).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM connected_users")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
        store.clear_sessions().await.unwrap();
    }
}
