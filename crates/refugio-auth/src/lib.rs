use std::collections::HashMap;
use std::sync::Mutex;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use refugio_store::{Identity, Watch};

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("email already registered")]
    EmailTaken,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("password must be at least 8 characters")]
    WeakPassword,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("password hashing: {0}")]
    Hash(String),
}

struct Account {
    uid: Uuid,
    email: String,
    password_hash: String,
}

/// Local identity provider: an account registry with Argon2id password
/// hashing. Implements the [`Identity`] capability the chat core
/// consumes; the sign-in/up/out operations live here, on the concrete
/// provider.
pub struct LocalIdentity {
    // Keyed by lowercased email.
    accounts: Mutex<HashMap<String, Account>>,
    state: watch::Sender<Option<Uuid>>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            state,
        }
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new account and sign it in. The uid is fresh and
    /// immutable for the lifetime of the account.
    pub fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidEmail);
        }
        if password.len() < 8 {
            return Err(AuthError::WeakPassword);
        }

        let mut accounts = self.accounts.lock().expect("account registry lock poisoned");
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailTaken);
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hash(e.to_string()))?
            .to_string();

        let uid = Uuid::new_v4();
        accounts.insert(
            email.clone(),
            Account {
                uid,
                email: email.clone(),
                password_hash,
            },
        );
        drop(accounts);

        info!(%uid, "account registered");
        self.state.send_replace(Some(uid));
        Ok(uid)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<Uuid, AuthError> {
        let email = email.trim().to_lowercase();
        let accounts = self.accounts.lock().expect("account registry lock poisoned");
        let account = accounts.get(&email).ok_or(AuthError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&account.password_hash)
            .map_err(|e| AuthError::Hash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let uid = account.uid;
        drop(accounts);

        info!(%uid, "signed in");
        self.state.send_replace(Some(uid));
        Ok(uid)
    }

    pub fn sign_out(&self) {
        if self.state.send_replace(None).is_some() {
            info!("signed out");
        }
    }
}

impl Identity for LocalIdentity {
    fn current_uid(&self) -> Option<Uuid> {
        *self.state.borrow()
    }

    fn current_email(&self) -> Option<String> {
        let uid = (*self.state.borrow())?;
        let accounts = self.accounts.lock().expect("account registry lock poisoned");
        accounts
            .values()
            .find(|a| a.uid == uid)
            .map(|a| a.email.clone())
    }

    fn watch(&self) -> Watch<Option<Uuid>> {
        Watch::from_channel(self.state.subscribe())
    }
}
