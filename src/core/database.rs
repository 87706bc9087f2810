//! User persistence.
//!
//! [`UserStore`] is the capability the proxy needs from persistence: look a
//! user up by credential or by name, and count usage. Two implementations are
//! provided: [`SqliteUserStore`] for durable storage and [`MemoryUserStore`]
//! for tests and config-only deployments.
//!
//! Credentials are stored as SHA-256 digests, never in plain text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::core::config::UserConfig;

/// Errors raised by a [`UserStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("credential already assigned to another user")]
    DuplicateCredential,
}

/// Hash a credential using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// A persisted user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// SHA-256 hex digest of the bearer token
    pub token_hash: String,
    pub can_use_gpt4: bool,
    pub enabled: bool,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find the user owning `token`, enabled or not.
    async fn find_by_credential(&self, token: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_name(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Atomically add one to the user's usage counter.
    async fn increment_usage(&self, username: &str) -> Result<(), StoreError>;

    /// Enable or disable a user.
    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), StoreError>;

    /// Insert missing users and update credential, capability and status of existing ones.
    async fn sync_users(&self, users: &[UserConfig]) -> Result<(), StoreError>;
}

/// Open the store described by `url`: `memory` for [`MemoryUserStore`],
/// anything else is treated as a SQLite URL.
pub async fn connect_store(url: &str) -> Result<Arc<dyn UserStore>, StoreError> {
    if url == "memory" {
        return Ok(Arc::new(MemoryUserStore::new()));
    }
    Ok(Arc::new(SqliteUserStore::connect(url).await?))
}

// ============================================================================
// SQLite
// ============================================================================

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    username     TEXT    NOT NULL UNIQUE,
    token_hash   TEXT    NOT NULL UNIQUE,
    can_use_gpt4 BOOLEAN NOT NULL DEFAULT 1,
    enabled      BOOLEAN NOT NULL DEFAULT 1,
    usage_count  INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL
)
"#;

const USER_COLUMNS: &str =
    "id, username, token_hash, can_use_gpt4, enabled, usage_count, created_at, updated_at";

/// SQLite-backed user store.
#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    /// Connect (creating the file if needed) and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(url = %url, "User store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_USERS_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.message().contains("users.token_hash") => {
            StoreError::DuplicateCredential
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_by_credential(&self, token: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE token_hash = ?",
            USER_COLUMNS
        ))
        .bind(hash_key(token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn increment_usage(&self, username: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET usage_count = usage_count + 1, updated_at = ? WHERE username = ?",
        )
        .bind(Utc::now())
        .bind(username)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET enabled = ?, updated_at = ? WHERE username = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(username)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn sync_users(&self, users: &[UserConfig]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for user in users {
            let token_hash = hash_key(&user.password);
            let existing: Option<(String, bool, bool)> = sqlx::query_as(
                "SELECT token_hash, can_use_gpt4, enabled FROM users WHERE username = ?",
            )
            .bind(&user.username)
            .fetch_optional(&mut *tx)
            .await?;

            match existing {
                Some(current) if current == (token_hash.clone(), user.can_use_gpt4, user.enabled) => {}
                Some(_) => {
                    sqlx::query(
                        "UPDATE users SET token_hash = ?, can_use_gpt4 = ?, enabled = ?, updated_at = ? WHERE username = ?",
                    )
                    .bind(&token_hash)
                    .bind(user.can_use_gpt4)
                    .bind(user.enabled)
                    .bind(now)
                    .bind(&user.username)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_unique_violation)?;
                    tracing::info!(username = %user.username, "Updated user from config");
                }
                None => {
                    sqlx::query(
                        "INSERT INTO users (username, token_hash, can_use_gpt4, enabled, usage_count, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?)",
                    )
                    .bind(&user.username)
                    .bind(&token_hash)
                    .bind(user.can_use_gpt4)
                    .bind(user.enabled)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_unique_violation)?;
                    tracing::info!(username = %user.username, "Provisioned user from config");
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-process user store keyed by username.
///
/// Increments happen under the shard write lock, so concurrent calls never
/// lose updates.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
    next_id: std::sync::atomic::AtomicI64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_credential(&self, token: &str) -> Result<Option<User>, StoreError> {
        let token_hash = hash_key(token);
        Ok(self
            .users
            .iter()
            .find(|entry| entry.token_hash == token_hash)
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(username).map(|u| u.value().clone()))
    }

    async fn increment_usage(&self, username: &str) -> Result<(), StoreError> {
        let mut user = self
            .users
            .get_mut(username)
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;
        user.usage_count += 1;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<(), StoreError> {
        let mut user = self
            .users
            .get_mut(username)
            .ok_or_else(|| StoreError::UserNotFound(username.to_string()))?;
        user.enabled = enabled;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn sync_users(&self, users: &[UserConfig]) -> Result<(), StoreError> {
        let now = Utc::now();
        for config in users {
            let token_hash = hash_key(&config.password);
            let taken = self
                .users
                .iter()
                .any(|u| u.token_hash == token_hash && u.username != config.username);
            if taken {
                return Err(StoreError::DuplicateCredential);
            }

            self.users
                .entry(config.username.clone())
                .and_modify(|user| {
                    user.token_hash = token_hash.clone();
                    user.can_use_gpt4 = config.can_use_gpt4;
                    user.enabled = config.enabled;
                    user.updated_at = now;
                })
                .or_insert_with(|| User {
                    id: self
                        .next_id
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                        + 1,
                    username: config.username.clone(),
                    token_hash: token_hash.clone(),
                    can_use_gpt4: config.can_use_gpt4,
                    enabled: config.enabled,
                    usage_count: 0,
                    created_at: now,
                    updated_at: now,
                });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(name: &str, password: &str) -> UserConfig {
        UserConfig {
            username: name.to_string(),
            password: password.to_string(),
            can_use_gpt4: true,
            enabled: true,
        }
    }

    async fn sqlite_store(dir: &TempDir) -> SqliteUserStore {
        let url = format!("sqlite://{}", dir.path().join("users.db").display());
        SqliteUserStore::connect(&url).await.unwrap()
    }

    #[test]
    fn test_hash_key() {
        let hash = hash_key("sk-test-key-123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_key("sk-test-key-123"));
        assert_ne!(hash, hash_key("different-key"));
    }

    async fn exercise_store(store: &dyn UserStore) {
        store
            .sync_users(&[user("alice", "sk-alice"), user("bob", "sk-bob")])
            .await
            .unwrap();

        let alice = store.find_by_credential("sk-alice").await.unwrap().unwrap();
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.token_hash, hash_key("sk-alice"));
        assert_eq!(alice.usage_count, 0);
        assert!(store.find_by_credential("sk-nobody").await.unwrap().is_none());

        store.increment_usage("alice").await.unwrap();
        store.increment_usage("alice").await.unwrap();
        let alice = store.find_by_name("alice").await.unwrap().unwrap();
        assert_eq!(alice.usage_count, 2);

        assert!(matches!(
            store.increment_usage("nobody").await,
            Err(StoreError::UserNotFound(_))
        ));

        store.set_enabled("bob", false).await.unwrap();
        let bob = store.find_by_credential("sk-bob").await.unwrap().unwrap();
        assert!(!bob.enabled);

        // Re-sync rotates the credential and flags but keeps the counter.
        let mut rotated = user("alice", "sk-alice-2");
        rotated.can_use_gpt4 = false;
        store.sync_users(&[rotated]).await.unwrap();
        assert!(store.find_by_credential("sk-alice").await.unwrap().is_none());
        let alice = store.find_by_credential("sk-alice-2").await.unwrap().unwrap();
        assert!(!alice.can_use_gpt4);
        assert_eq!(alice.usage_count, 2);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(&MemoryUserStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let dir = TempDir::new().unwrap();
        exercise_store(&sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_credential_rejected() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        let result = store
            .sync_users(&[user("alice", "shared"), user("bob", "shared")])
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateCredential)));
    }

    #[tokio::test]
    async fn test_memory_duplicate_credential_rejected() {
        let store = MemoryUserStore::new();
        let result = store
            .sync_users(&[user("alice", "shared"), user("bob", "shared")])
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateCredential)));
    }

    #[tokio::test]
    async fn test_sqlite_concurrent_increments_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(sqlite_store(&dir).await);
        store.sync_users(&[user("alice", "sk-alice")]).await.unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_usage("alice").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let alice = store.find_by_name("alice").await.unwrap().unwrap();
        assert_eq!(alice.usage_count, 50);
    }

    #[tokio::test]
    async fn test_memory_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryUserStore::new());
        store.sync_users(&[user("alice", "sk-alice")]).await.unwrap();

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_usage("alice").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let alice = store.find_by_name("alice").await.unwrap().unwrap();
        assert_eq!(alice.usage_count, 200);
    }

    #[tokio::test]
    async fn test_connect_store_memory() {
        let store = connect_store("memory").await.unwrap();
        store.sync_users(&[user("alice", "sk-alice")]).await.unwrap();
        assert!(store.find_by_name("alice").await.unwrap().is_some());
    }
}
