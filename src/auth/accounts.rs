use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::StoreError,
    session::Role,
    store::{with_retry, Account, Store},
};

use super::{hash_password, verify_password};

/// Result of an account lookup, posted back to the hub.
#[derive(Debug)]
pub enum AccountResolution {
    /// `Ok(None)` means the credentials did not match.
    Login(Result<Option<Account>, StoreError>),
    /// `Ok(None)` means the username is taken.
    Register(Result<Option<Account>, StoreError>),
}

async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Hash(e.to_string()))?
}

pub async fn login(store: &dyn Store, username: &str, password: &str, now: OffsetDateTime) -> AccountResolution {
    AccountResolution::Login(check_login(store, username, password, now).await)
}

async fn check_login(
    store: &dyn Store,
    username: &str,
    password: &str,
    now: OffsetDateTime,
) -> Result<Option<Account>, StoreError> {
    let Some(account) = with_retry("find_account", || store.find_account(username)).await? else {
        return Ok(None);
    };

    let (password, hash) = (password.to_owned(), account.password_hash.clone());
    if !blocking(move || verify_password(&password, &hash)).await? {
        return Ok(None);
    }

    if let Err(error) = with_retry("record_login", || store.record_login(&account.id, now)).await {
        warn!(username, %error, "failed to record last login");
    }
    Ok(Some(Account { last_login: Some(now), ..account }))
}

pub async fn register(store: &dyn Store, username: &str, password: &str, now: OffsetDateTime) -> AccountResolution {
    AccountResolution::Register(create(store, username, password, now).await)
}

async fn create(
    store: &dyn Store,
    username: &str,
    password: &str,
    now: OffsetDateTime,
) -> Result<Option<Account>, StoreError> {
    if with_retry("find_account", || store.find_account(username)).await?.is_some() {
        return Ok(None);
    }

    let password = password.to_owned();
    let account = Account {
        id: Uuid::now_v7().to_string(),
        username: username.to_owned(),
        password_hash: blocking(move || hash_password(&password)).await?,
        role: Role::Viewer,
        is_active: true,
        created_at: now,
        last_login: None,
    };

    match with_retry("create_account", || store.create_account(&account)).await {
        Ok(()) => Ok(Some(account)),
        Err(StoreError::Duplicate(_)) => Ok(None),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-01 12:00 UTC);

    #[tokio::test]
    async fn register_then_login() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

        let AccountResolution::Register(Ok(Some(account))) = register(&store, "alice", "pw", NOW).await else {
            panic!("registration failed");
        };
        assert_eq!(account.role, Role::Viewer);

        let AccountResolution::Login(Ok(Some(logged_in))) = login(&store, "alice", "pw", NOW).await else {
            panic!("login failed");
        };
        assert_eq!(logged_in.id, account.id);
        assert_eq!(logged_in.last_login, Some(NOW));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_fail_alike() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        register(&store, "alice", "pw", NOW).await;

        assert!(matches!(login(&store, "alice", "nope", NOW).await, AccountResolution::Login(Ok(None))));
        assert!(matches!(login(&store, "bob", "pw", NOW).await, AccountResolution::Login(Ok(None))));
    }

    #[tokio::test]
    async fn duplicate_username_is_refused() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        register(&store, "alice", "pw", NOW).await;
        assert!(matches!(register(&store, "alice", "other", NOW).await, AccountResolution::Register(Ok(None))));
    }
}
