use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::password::{hash_password, verify_against_dummy, verify_password};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential for user {0}")]
    UnknownUser(String),

    #[error("credential for user {0} already exists")]
    AlreadyExists(String),

    #[error("credential store unavailable")]
    Unavailable,

    #[error("credential database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The external system holding usernames and secrets. It shares no
/// transaction with the member store; callers order their writes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn exists(&self, username: &str) -> Result<bool, CredentialError>;

    async fn add_user(&self, username: &str, password: &str) -> Result<(), CredentialError>;

    async fn change_password(&self, username: &str, password: &str)
    -> Result<(), CredentialError>;

    /// False for both a wrong password and an unknown user.
    async fn check_password(&self, username: &str, password: &str)
    -> Result<bool, CredentialError>;

    /// Change the password if the user exists, otherwise create the user
    /// when `allow_create` is set.
    async fn set_password(
        &self,
        username: &str,
        password: &str,
        allow_create: bool,
    ) -> Result<(), CredentialError> {
        if self.exists(username).await? {
            self.change_password(username, password).await
        } else if allow_create {
            self.add_user(username, password).await
        } else {
            Err(CredentialError::UnknownUser(username.to_owned()))
        }
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Credentials kept in their own table, reached through a dedicated pool so
/// they never join a member-store transaction.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique(err: sqlx::Error, username: &str) -> CredentialError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.code().as_deref() == Some("23505")
    {
        return CredentialError::AlreadyExists(username.to_owned());
    }
    CredentialError::Db(err)
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn exists(&self, username: &str) -> Result<bool, CredentialError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM credentials WHERE lower(username) = lower($1))",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    #[tracing::instrument(skip(self, password), err)]
    async fn add_user(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        let hash = hash_password(password)?;
        sqlx::query("INSERT INTO credentials (username, password_hash) VALUES ($1, $2)")
            .bind(username)
            .bind(&hash)
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique(e, username))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, password), err)]
    async fn change_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        let hash = hash_password(password)?;
        let result = sqlx::query(
            "UPDATE credentials SET password_hash = $2, updated_at = now()
             WHERE lower(username) = lower($1)",
        )
        .bind(username)
        .bind(&hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CredentialError::UnknownUser(username.to_owned()));
        }
        Ok(())
    }

    async fn check_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, CredentialError> {
        let hash: Option<String> = sqlx::query_scalar(
            "SELECT password_hash FROM credentials WHERE lower(username) = lower($1)",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        match hash {
            Some(hash) => Ok(verify_password(password, &hash)?),
            None => Ok(verify_against_dummy(password)),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local credential store for tests and single-node development.
#[derive(Default)]
pub struct LocalCredentialStore {
    users: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl LocalCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`CredentialError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    fn ensure_available(&self) -> Result<(), CredentialError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CredentialError::Unavailable);
        }
        Ok(())
    }
}

fn key(username: &str) -> String {
    username.to_lowercase()
}

#[async_trait]
impl CredentialStore for LocalCredentialStore {
    async fn exists(&self, username: &str) -> Result<bool, CredentialError> {
        self.ensure_available()?;
        Ok(self.users.read().await.contains_key(&key(username)))
    }

    async fn add_user(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        self.ensure_available()?;
        let hash = hash_password(password)?;
        let mut users = self.users.write().await;
        if users.contains_key(&key(username)) {
            return Err(CredentialError::AlreadyExists(username.to_owned()));
        }
        users.insert(key(username), hash);
        Ok(())
    }

    async fn change_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), CredentialError> {
        self.ensure_available()?;
        let hash = hash_password(password)?;
        let mut users = self.users.write().await;
        let slot = users
            .get_mut(&key(username))
            .ok_or_else(|| CredentialError::UnknownUser(username.to_owned()))?;
        *slot = hash;
        Ok(())
    }

    async fn check_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, CredentialError> {
        self.ensure_available()?;
        let hash = self.users.read().await.get(&key(username)).cloned();
        match hash {
            Some(hash) => Ok(verify_password(password, &hash)?),
            None => Ok(verify_against_dummy(password)),
        }
    }
}
