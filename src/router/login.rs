//! Log in with email and password.

use axum::extract::State;
use axum::response::Redirect;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::Result;
use crate::router::session::session_cookie;
use crate::router::{HOME_ROUTE, REGISTER_ROUTE, Valid};
use crate::user::{AccountService, LoginOutcome};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(length(max = 48))]
    pub email: String,
    #[validate(length(max = 255))]
    pub password: String,
}

/// Handler opening a session.
///
/// Wrong credentials and unconfirmed emails get the same redirect.
pub async fn handler(
    State(accounts): State<AccountService>,
    jar: CookieJar,
    Valid(body): Valid<Body>,
) -> Result<(CookieJar, Redirect)> {
    match accounts.login(&body.email, &body.password).await? {
        LoginOutcome::Established(session) => {
            let cookie = session_cookie(
                accounts.config.session.cookie_name.clone(),
                session.token,
                accounts.config.session.lifetime_hours,
            );
            Ok((jar.add(cookie), Redirect::to(HOME_ROUTE)))
        },
        LoginOutcome::Rejected => Ok((
            jar,
            Redirect::to(&format!("{REGISTER_ROUTE}?login=failed")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::mail::MemoryMailer;
    use crate::user::{AccountService, MemoryRepository};
    use crate::*;
    use axum::extract::FromRef;
    use axum::http::{Method, StatusCode, header};
    use std::sync::Arc;

    const LOGIN_FORM: &str =
        "email=test%40example.com&password=P%24soW%25920%24n%26";
    const FAILED: &str = "/register?login=failed";

    async fn registered(confirm: bool) -> (AppState, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let state =
            router::state_with(repo.clone(), Arc::new(MemoryMailer::default()));
        let accounts = AccountService::from_ref(&state);
        accounts
            .register("test@example.com", "tester", "P$soW%920$n&")
            .await
            .unwrap();

        if confirm {
            let code = repo.confirmations().await[0].code.clone();
            accounts.confirm_email(&code).await.unwrap();
        }

        (state, repo)
    }

    async fn login(
        state: &AppState,
        form: &str,
    ) -> axum::http::Response<axum::body::Body> {
        make_request(app(state.clone()), Method::POST, "/login", form, None)
            .await
    }

    #[tokio::test]
    async fn test_login_unconfirmed() {
        let (state, repo) = registered(false).await;

        let response = login(&state, LOGIN_FORM).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], FAILED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(repo.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_login_confirmed() {
        let (state, repo) = registered(true).await;

        let response = login(&state, LOGIN_FORM).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/home");

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=604800"));
        assert_eq!(repo.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_login_wrong_credentials() {
        let (state, repo) = registered(true).await;

        for form in [
            "email=test%40example.com&password=wrongpassword",
            "email=other%40example.com&password=P%24soW%25920%24n%26",
        ] {
            let response = login(&state, form).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()[header::LOCATION], FAILED);
        }
        assert_eq!(repo.session_count().await, 0);
    }
}
