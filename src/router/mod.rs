pub mod confirm;
pub mod login;
pub mod register;
pub mod session;
pub mod status;

use std::sync::LazyLock;

use axum::Form;
use axum::extract::{FromRequest, Request};
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::ServerError;

/// Where every unauthenticated flow ends up.
pub const REGISTER_ROUTE: &str = "/register";
/// Landing page of logged-in users.
pub const HOME_ROUTE: &str = "/home";

static LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+$").expect("login pattern is valid")
});

/// Logins are made of ASCII letters, digits and underscores.
pub fn validate_login(login: &str) -> Result<(), ValidationError> {
    if !LOGIN.is_match(login) {
        return Err(ValidationError::new("login"));
    }

    Ok(())
}

/// Form extractor running [`Validate`] rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Form(value) = Form::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// State backed by in-memory collaborators.
#[cfg(test)]
pub fn state_with(
    repo: std::sync::Arc<dyn crate::user::Repository>,
    mail: std::sync::Arc<dyn crate::mail::Mailer>,
) -> crate::AppState {
    use std::sync::Arc;

    let crypto = crate::crypto::PasswordManager::new(Some(
        crate::config::Argon2 {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        },
    ))
    .expect("valid argon2 parameters");

    crate::AppState {
        config: Arc::new(crate::config::Configuration::default()),
        repo,
        crypto: Arc::new(crypto),
        mail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_login() {
        assert!(validate_login("user_42").is_ok());
        assert!(validate_login("user-42").is_err());
        assert!(validate_login("юзер").is_err());
        assert!(validate_login("").is_err());
    }
}
