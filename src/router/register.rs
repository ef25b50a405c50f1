//! Account registration.

use axum::extract::State;
use axum::response::{Html, Redirect};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::Result;
use crate::router::{REGISTER_ROUTE, Valid};
use crate::user::AccountService;

const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Register</title></head>
<body>
<h1>Register</h1>
<form method="post" action="/register">
  <input type="email" name="email" placeholder="Email" maxlength="48" required>
  <input type="text" name="login" placeholder="Login" maxlength="32" required>
  <input type="password" name="password" placeholder="Password" required>
  <button type="submit">Register</button>
</form>
<h1>Log in</h1>
<form method="post" action="/login">
  <input type="email" name="email" placeholder="Email" required>
  <input type="password" name="password" placeholder="Password" required>
  <button type="submit">Log in</button>
</form>
</body>
</html>
"#;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(
        email(message = "Email must be formatted."),
        length(max = 48, message = "Email must not exceed 48 characters.")
    )]
    pub email: String,
    #[validate(
        length(
            min = 3,
            max = 32,
            message = "Login must contain between 3 and 32 characters."
        ),
        custom(
            function = "crate::router::validate_login",
            message = "Login must be alphanumeric."
        )
    )]
    pub login: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
}

impl Body {
    /// Passwords equal to the login, ignoring case, are refused.
    fn check_password(&self) -> std::result::Result<(), ValidationErrors> {
        if self.password.to_lowercase() != self.login.to_lowercase() {
            return Ok(());
        }

        let mut errors = ValidationErrors::new();
        errors.add(
            "password",
            ValidationError::new("password")
                .with_message("Password must differ from login.".into()),
        );
        Err(errors)
    }
}

/// Registration form.
pub async fn page() -> Html<&'static str> {
    Html(PAGE)
}

/// Handler to create user.
pub async fn handler(
    State(accounts): State<AccountService>,
    Valid(body): Valid<Body>,
) -> Result<Redirect> {
    body.check_password()?;

    accounts
        .register(&body.email, &body.login, &body.password)
        .await?;

    Ok(Redirect::to(&format!("{REGISTER_ROUTE}?registered=true")))
}
