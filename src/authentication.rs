use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::watch;

use crate::{
    entities::{Credentials, Identity},
    error::AuthError,
};

/// Issues and ends sessions. Creating an account or signing in makes that
/// identity current; signing out publishes `None`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// New receiver positioned on the current identity.
    fn subscribe(&self) -> watch::Receiver<Option<Identity>>;
}

/// Current identity shared with every subscriber.
#[derive(Debug)]
pub struct IdentityState {
    sender: watch::Sender<Option<Identity>>,
}

impl Default for IdentityState {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityState {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn current(&self) -> Option<Identity> {
        self.sender.borrow().clone()
    }

    pub fn set(&self, identity: Option<Identity>) {
        match &identity {
            Some(identity) => tracing::info!(uid = %identity.uid, "identity signed in"),
            None => tracing::info!("identity signed out"),
        }
        // send_replace publishes even while nobody is subscribed
        self.sender.send_replace(identity);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Identity provider backed by the local `users` table.
#[derive(Debug)]
pub struct SqliteAuthBackend {
    pub sqlite_pool: sqlx::SqlitePool,
    state: IdentityState,
}

impl SqliteAuthBackend {
    pub fn new(sqlite_pool: sqlx::SqlitePool) -> Self {
        Self {
            sqlite_pool,
            state: IdentityState::new(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.listener_count()
    }
}

#[async_trait]
impl IdentityProvider for SqliteAuthBackend {
    async fn create_account(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let password = credentials.password.clone();
        // `password_auth::generate_hash()` is blocking, hence using `tokio::task::spawn_blocking()`
        let password_hash =
            tokio::task::spawn_blocking(move || password_auth::generate_hash(password)).await?;

        let uid = uuid::Uuid::new_v4().simple().to_string();
        let inserted = sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&uid)
        .bind(&credentials.email)
        .bind(&password_hash)
        .bind(chrono::Utc::now())
        .execute(&self.sqlite_pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(AuthError::rejected(
                    "email-already-in-use",
                    "The email address is already in use by another account.",
                ));
            }
            Err(err) => return Err(err.into()),
        }

        let identity = Identity {
            uid,
            email: Some(credentials.email.clone()),
        };
        self.state.set(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let row = sqlx::query("SELECT id, email, password_hash FROM users WHERE email = ?")
            .bind(&credentials.email)
            .fetch_optional(&self.sqlite_pool)
            .await?;

        let Some(row) = row else {
            return Err(invalid_credential());
        };
        let uid: String = row.try_get("id")?;
        let email: String = row.try_get("email")?;
        let password_hash: String = row.try_get("password_hash")?;

        let password = credentials.password.clone();
        // compares form input with argon2 password hash
        let verified = tokio::task::spawn_blocking(move || {
            password_auth::verify_password(password, &password_hash).is_ok()
        })
        .await?;

        if !verified {
            return Err(invalid_credential());
        }

        let identity = Identity {
            uid,
            email: Some(email),
        };
        self.state.set(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state.set(None);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

fn invalid_credential() -> AuthError {
    AuthError::rejected("invalid-credential", "The email or password is incorrect.")
}
