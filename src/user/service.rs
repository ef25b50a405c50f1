use std::sync::Arc;

use axum::extract::FromRef;
use chrono::{Duration, Utc};
use url::Url;

use crate::AppState;
use crate::config::Configuration;
use crate::crypto::{PasswordManager, confirmation_code, session_token};
use crate::error::Result;
use crate::mail::{Mailer, Message};
use crate::telemetry;
use crate::user::{
    Confirmation, EmailConfirmation, NewUser, Repository, Session, User,
};

pub const CONFIRMATION_SUBJECT: &str = "Email confirmation";
const CONFIRMATION_PATH: &str = "email-confirm/";

/// Result of a login attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum LoginOutcome {
    /// Credentials matched a confirmed user.
    Established(Session),
    /// Unknown email, wrong password or unconfirmed email.
    Rejected,
}

impl LoginOutcome {
    /// Metric label of the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            LoginOutcome::Established(_) => "established",
            LoginOutcome::Rejected => "rejected",
        }
    }
}

/// Account manager.
///
/// Every collaborator is passed in, see [`FromRef`] on [`AppState`].
#[derive(Clone)]
pub struct AccountService {
    pub repo: Arc<dyn Repository>,
    pub pwd: Arc<PasswordManager>,
    pub mail: Arc<dyn Mailer>,
    pub config: Arc<Configuration>,
}

impl FromRef<AppState> for AccountService {
    fn from_ref(state: &AppState) -> AccountService {
        AccountService {
            repo: Arc::clone(&state.repo),
            pwd: Arc::clone(&state.crypto),
            mail: Arc::clone(&state.mail),
            config: Arc::clone(&state.config),
        }
    }
}

impl AccountService {
    /// Link which consumes `code` when visited.
    ///
    /// The configured URL may carry a path prefix, which is kept.
    pub fn confirmation_link(&self, code: &str) -> Result<Url> {
        let mut base = Url::parse(&self.config.url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(base.join(CONFIRMATION_PATH)?.join(code)?)
    }

    /// Create an unconfirmed user and mail its confirmation link.
    ///
    /// The user and its pending confirmation are committed together before
    /// the email is sent. A mail failure leaves both rows in place.
    pub async fn register(
        &self,
        email: &str,
        login: &str,
        password: &str,
    ) -> Result<User> {
        let user = NewUser {
            email: email.to_owned(),
            login: login.to_owned(),
            password: self.pwd.hash_password(password)?,
        };
        let confirmation = EmailConfirmation {
            login: login.to_owned(),
            code: confirmation_code(),
        };

        let user = self.repo.register(user, &confirmation).await?;
        telemetry::record_registration();

        let link = self.confirmation_link(&confirmation.code)?;
        let message = Message {
            to: user.email.clone(),
            subject: CONFIRMATION_SUBJECT.to_owned(),
            body: format!("Email confirmation link: {link}"),
        };
        self.mail.send(&message).await?;

        tracing::info!(
            user_id = user.id,
            login = %user.login,
            "user registered"
        );

        Ok(user)
    }

    /// Consume a confirmation code.
    pub async fn confirm_email(&self, code: &str) -> Result<Confirmation> {
        let confirmation = self.repo.confirm(code).await?;
        telemetry::record_confirmation(confirmation.outcome());

        match &confirmation {
            Confirmation::Confirmed { login } => {
                tracing::info!(%login, "email confirmed")
            },
            Confirmation::Unknown => {
                tracing::debug!("unknown confirmation code")
            },
            Confirmation::Orphaned { login } => {
                tracing::warn!(
                    %login,
                    "confirmation code without user consumed"
                )
            },
        }

        Ok(confirmation)
    }

    /// Check credentials and open a session for confirmed users.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        let outcome = match self.authenticate(email, password).await? {
            Some(user) => {
                LoginOutcome::Established(self.open_session(&user).await?)
            },
            None => LoginOutcome::Rejected,
        };
        telemetry::record_login(outcome.outcome());

        Ok(outcome)
    }

    /// Confirmed user matching the credentials, if any.
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>> {
        let Some(user) = self.repo.find_by_email(email).await? else {
            tracing::debug!("login rejected: unknown email");
            return Ok(None);
        };

        if !self.pwd.verify_password(password, &user.password) {
            tracing::debug!(
                user_id = user.id,
                "login rejected: wrong password"
            );
            return Ok(None);
        }

        if !user.email_confirm {
            tracing::debug!(
                user_id = user.id,
                "login rejected: email not confirmed"
            );
            return Ok(None);
        }

        Ok(Some(user))
    }

    /// Store a new session for `user`.
    ///
    /// Expired sessions of every user are swept first, so abandoned ones do
    /// not pile up.
    async fn open_session(&self, user: &User) -> Result<Session> {
        let now = Utc::now();

        let pruned = self.repo.prune_sessions(now).await?;
        if pruned > 0 {
            tracing::debug!(pruned, "expired sessions deleted");
        }

        let lifetime = Duration::hours(self.config.session.lifetime_hours);
        let session = Session {
            token: session_token(),
            user_id: user.id,
            created_at: now,
            expire_at: now + lifetime,
        };
        self.repo.insert_session(&session).await?;

        tracing::info!(user_id = user.id, "user logged in");

        Ok(session)
    }

    /// Load the user owning a live session.
    ///
    /// Expired sessions are deleted on sight.
    pub async fn current_user(&self, token: &str) -> Result<Option<User>> {
        let Some(session) = self.repo.find_session(token).await? else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) {
            self.repo.delete_session(token).await?;
            return Ok(None);
        }

        self.repo.find_by_id(session.user_id).await
    }

    /// Close a session.
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.repo.delete_session(token).await
    }
}
