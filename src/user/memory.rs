//! In-memory storage, used when no PostgreSQL instance is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Result, ServerError};
use crate::user::{
    Confirmation, EmailConfirmation, NewUser, Repository, Session, User,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    confirmations: Vec<EmailConfirmation>,
    sessions: HashMap<String, Session>,
    last_id: i64,
}

/// [`Repository`] keeping every table in process memory.
///
/// Uniqueness rules match the SQL schema: `email` and `login` are unique
/// among users, `login` and `code` are unique among confirmations.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    /// Create an empty [`MemoryRepository`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored users.
    pub async fn users(&self) -> Vec<User> {
        self.tables.read().await.users.clone()
    }

    /// Snapshot of pending confirmations.
    pub async fn confirmations(&self) -> Vec<EmailConfirmation> {
        self.tables.read().await.confirmations.clone()
    }

    /// Number of stored sessions.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    /// Remove a user, leaving its pending confirmation behind.
    pub async fn remove_user(&self, login: &str) {
        self.tables.write().await.users.retain(|u| u.login != login);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn register(
        &self,
        user: NewUser,
        confirmation: &EmailConfirmation,
    ) -> Result<User> {
        let mut tables = self.tables.write().await;

        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(ServerError::Conflict { field: "email" });
        }
        if tables.users.iter().any(|u| u.login == user.login)
            || tables
                .confirmations
                .iter()
                .any(|c| c.login == confirmation.login)
        {
            return Err(ServerError::Conflict { field: "login" });
        }
        if tables
            .confirmations
            .iter()
            .any(|c| c.code == confirmation.code)
        {
            return Err(ServerError::Internal {
                details: "confirmation code collision".into(),
                source: None,
            });
        }

        tables.last_id += 1;
        let user = User {
            id: tables.last_id,
            email: user.email,
            login: user.login,
            password: user.password,
            email_confirm: false,
            created_at: Utc::now(),
        };

        tables.users.push(user.clone());
        tables.confirmations.push(confirmation.clone());

        Ok(user)
    }

    async fn confirm(&self, code: &str) -> Result<Confirmation> {
        let mut tables = self.tables.write().await;

        let Some(index) =
            tables.confirmations.iter().position(|c| c.code == code)
        else {
            return Ok(Confirmation::Unknown);
        };
        let login = tables.confirmations.remove(index).login;

        match tables.users.iter_mut().find(|u| u.login == login) {
            Some(user) => {
                user.email_confirm = true;
                Ok(Confirmation::Confirmed { login })
            },
            None => Ok(Confirmation::Orphaned { login }),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut tables = self.tables.write().await;

        if !tables.users.iter().any(|u| u.id == session.user_id) {
            return Err(ServerError::Internal {
                details: format!("no user with id {}", session.user_id),
                source: None,
            });
        }
        tables
            .sessions
            .insert(session.token.clone(), session.clone());

        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        self.tables.write().await.sessions.remove(token);
        Ok(())
    }

    async fn prune_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, session| !session.is_expired(now));

        Ok((before - tables.sessions.len()) as u64)
    }
}
