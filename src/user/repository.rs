//! Handle database requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::user::{EmailConfirmation, NewUser, Session, User};

const USER_COLUMNS: &str =
    "id, email, login, password, email_confirm, created_at";

/// Outcome of consuming a confirmation code.
#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation {
    /// The user behind `login` is now confirmed.
    Confirmed { login: String },
    /// No pending confirmation carries this code.
    Unknown,
    /// The code existed but no user has this `login` anymore.
    Orphaned { login: String },
}

impl Confirmation {
    /// Metric label of the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Confirmation::Confirmed { .. } => "confirmed",
            Confirmation::Unknown => "unknown",
            Confirmation::Orphaned { .. } => "orphaned",
        }
    }
}

/// Persistence of users, pending confirmations and sessions.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert `user` and its pending `confirmation` in one transaction.
    async fn register(
        &self,
        user: NewUser,
        confirmation: &EmailConfirmation,
    ) -> Result<User>;

    /// Consume the confirmation carrying `code` and flag its user as
    /// confirmed.
    async fn confirm(&self, code: &str) -> Result<Confirmation>;

    /// Find a user using `id` field.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Find a user using `email` field.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert a new login session.
    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// Find a session by its token, expired or not.
    async fn find_session(&self, token: &str) -> Result<Option<Session>>;

    /// Delete a session. Unknown tokens are ignored.
    async fn delete_session(&self, token: &str) -> Result<()>;

    /// Delete every session expired at `now`, returning how many were
    /// removed.
    async fn prune_sessions(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// PostgreSQL implementation of [`Repository`].
#[derive(Clone)]
pub struct PostgresRepository {
    pool: Pool<Postgres>,
}

impl PostgresRepository {
    /// Create a new [`PostgresRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Map unique constraint violations to the field they protect.
fn unique_violation(err: sqlx::Error) -> ServerError {
    let field = match err.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => {
            match db_err.constraint() {
                Some("users_email_key") => Some("email"),
                Some("users_login_key" | "email_confirmations_login_key") => {
                    Some("login")
                },
                _ => None,
            }
        },
        _ => None,
    };

    match field {
        Some(field) => ServerError::Conflict { field },
        None => ServerError::Sql(err),
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn register(
        &self,
        user: NewUser,
        confirmation: &EmailConfirmation,
    ) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, login, password) VALUES ($1, $2, $3)
                RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.login)
        .bind(&user.password)
        .fetch_one(&mut *tx)
        .await
        .map_err(unique_violation)?;

        sqlx::query(
            "INSERT INTO email_confirmations (login, code) VALUES ($1, $2)",
        )
        .bind(&confirmation.login)
        .bind(&confirmation.code)
        .execute(&mut *tx)
        .await
        .map_err(unique_violation)?;

        tx.commit().await?;

        Ok(user)
    }

    async fn confirm(&self, code: &str) -> Result<Confirmation> {
        let mut tx = self.pool.begin().await?;

        let login: Option<String> = sqlx::query_scalar(
            "DELETE FROM email_confirmations WHERE code = $1 RETURNING login",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(login) = login else {
            tx.rollback().await?;
            return Ok(Confirmation::Unknown);
        };

        let updated = sqlx::query(
            "UPDATE users SET email_confirm = TRUE WHERE login = $1",
        )
        .bind(&login)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if updated.rows_affected() == 0 {
            Ok(Confirmation::Orphaned { login })
        } else {
            Ok(Confirmation::Confirmed { login })
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expire_at)
                VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expire_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT token, user_id, created_at, expire_at FROM sessions
                WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn prune_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM sessions WHERE expire_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn new_user(email: &str, login: &str) -> NewUser {
        NewUser {
            email: email.into(),
            login: login.into(),
            password: "$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA".into(),
        }
    }

    fn confirmation(login: &str, code: &str) -> EmailConfirmation {
        EmailConfirmation {
            login: login.into(),
            code: code.into(),
        }
    }

    async fn register(
        repo: &PostgresRepository,
        email: &str,
        login: &str,
        code: &str,
    ) -> Result<User> {
        repo.register(new_user(email, login), &confirmation(login, code))
            .await
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_register_and_confirm(pool: Pool<Postgres>) {
        let repo = PostgresRepository::new(pool);

        let user = register(&repo, "test@example.com", "tester", "code")
            .await
            .unwrap();
        assert!(!user.email_confirm);

        assert_eq!(
            repo.confirm("code").await.unwrap(),
            Confirmation::Confirmed { login: "tester".into() }
        );
        assert_eq!(repo.confirm("code").await.unwrap(), Confirmation::Unknown);

        let user = repo.find_by_email("test@example.com").await.unwrap();
        let user = user.unwrap();
        assert!(user.email_confirm);
        assert_eq!(repo.find_by_id(user.id).await.unwrap(), Some(user));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_register_conflicts(pool: Pool<Postgres>) {
        let repo = PostgresRepository::new(pool);

        register(&repo, "test@example.com", "tester", "a")
            .await
            .unwrap();

        let err = register(&repo, "test@example.com", "other", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict { field: "email" }));

        let err = register(&repo, "other@example.com", "tester", "c")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict { field: "login" }));

        // Failed registrations leave no pending confirmation behind.
        assert_eq!(repo.confirm("b").await.unwrap(), Confirmation::Unknown);
        assert_eq!(repo.confirm("c").await.unwrap(), Confirmation::Unknown);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_orphaned_confirmation(pool: Pool<Postgres>) {
        sqlx::query(
            "INSERT INTO email_confirmations (login, code)
                VALUES ('ghost', 'code')",
        )
        .execute(&pool)
        .await
        .unwrap();
        let repo = PostgresRepository::new(pool);

        assert_eq!(
            repo.confirm("code").await.unwrap(),
            Confirmation::Orphaned { login: "ghost".into() }
        );
        assert_eq!(repo.confirm("code").await.unwrap(), Confirmation::Unknown);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_sessions(pool: Pool<Postgres>) {
        let repo = PostgresRepository::new(pool);
        let user = register(&repo, "test@example.com", "tester", "code")
            .await
            .unwrap();

        let now = Utc::now();
        let session = Session {
            token: "token".into(),
            user_id: user.id,
            created_at: now,
            expire_at: now + Duration::hours(1),
        };
        repo.insert_session(&session).await.unwrap();

        let found = repo.find_session("token").await.unwrap().unwrap();
        assert_eq!(found.user_id, user.id);
        assert!(!found.is_expired(now));

        repo.delete_session("token").await.unwrap();
        assert!(repo.find_session("token").await.unwrap().is_none());
        repo.delete_session("token").await.unwrap();
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_prune_sessions(pool: Pool<Postgres>) {
        let repo = PostgresRepository::new(pool);
        let user = register(&repo, "test@example.com", "tester", "code")
            .await
            .unwrap();

        let now = Utc::now();
        for (token, expire_at) in [
            ("expired", now - Duration::hours(1)),
            ("live", now + Duration::hours(1)),
        ] {
            let session = Session {
                token: token.into(),
                user_id: user.id,
                created_at: now - Duration::hours(2),
                expire_at,
            };
            repo.insert_session(&session).await.unwrap();
        }

        assert_eq!(repo.prune_sessions(now).await.unwrap(), 1);
        assert!(repo.find_session("expired").await.unwrap().is_none());
        assert!(repo.find_session("live").await.unwrap().is_some());
    }
}
