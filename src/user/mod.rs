mod memory;
mod repository;
mod service;

pub use memory::*;
pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub login: String,
    /// Argon2id PHC string.
    #[serde(skip)]
    pub password: String,
    pub email_confirm: bool,
    pub created_at: DateTime<Utc>,
}

/// User about to be inserted. `password` is already hashed.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub email: String,
    pub login: String,
    pub password: String,
}

/// Pending confirmation of the email of `login`.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct EmailConfirmation {
    pub login: String,
    pub code: String,
}

/// Login session, identified by the token stored in the browser cookie.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session can no longer be used at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}
