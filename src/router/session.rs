//! Landing page and logout, both driven by the session cookie.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use cookie::time::Duration;

use crate::error::Result;
use crate::router::REGISTER_ROUTE;
use crate::user::AccountService;

/// Cookie carrying a session token, living as long as the session.
pub fn session_cookie(
    name: String,
    token: String,
    lifetime_hours: i64,
) -> Cookie<'static> {
    Cookie::build((name, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::hours(lifetime_hours))
        .build()
}

/// Landing page: the logged-in user.
pub async fn home(
    State(accounts): State<AccountService>,
    jar: CookieJar,
) -> Result<Response> {
    let user = match jar.get(&accounts.config.session.cookie_name) {
        Some(cookie) => accounts.current_user(cookie.value()).await?,
        None => None,
    };

    Ok(match user {
        Some(user) => Json(user).into_response(),
        None => Redirect::to(REGISTER_ROUTE).into_response(),
    })
}

/// Close the current session, if any.
pub async fn logout(
    State(accounts): State<AccountService>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let name = accounts.config.session.cookie_name.clone();

    let jar = match jar.get(&name).map(|c| c.value().to_owned()) {
        Some(token) => {
            accounts.logout(&token).await?;
            jar.remove(Cookie::build((name, "")).path("/"))
        },
        None => jar,
    };

    Ok((jar, Redirect::to(REGISTER_ROUTE)))
}

#[cfg(test)]
mod tests {
    use crate::mail::MemoryMailer;
    use crate::user::{AccountService, LoginOutcome, MemoryRepository};
    use crate::*;
    use axum::extract::FromRef;
    use axum::http::{Method, StatusCode, header};
    use http_body_util::BodyExt;
    use std::sync::Arc;

    async fn logged_in() -> (AppState, Arc<MemoryRepository>, String) {
        let repo = Arc::new(MemoryRepository::new());
        let state =
            router::state_with(repo.clone(), Arc::new(MemoryMailer::default()));
        let accounts = AccountService::from_ref(&state);
        accounts
            .register("test@example.com", "tester", "P$soW%920$n&")
            .await
            .unwrap();
        let code = repo.confirmations().await[0].code.clone();
        accounts.confirm_email(&code).await.unwrap();

        let LoginOutcome::Established(session) = accounts
            .login("test@example.com", "P$soW%920$n&")
            .await
            .unwrap()
        else {
            panic!("confirmed user must log in");
        };

        (state, repo, format!("session={}", session.token))
    }

    async fn send(
        state: &AppState,
        method: Method,
        path: &str,
        cookie: Option<&str>,
    ) -> axum::http::Response<axum::body::Body> {
        make_request(app(state.clone()), method, path, "", cookie).await
    }

    #[tokio::test]
    async fn test_home_with_session() {
        let (state, _, cookie) = logged_in().await;

        let response = send(&state, Method::GET, "/home", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["login"], "tester");
        assert_eq!(body["email_confirm"], true);
        assert!(body.get("password").is_none());
    }

    #[tokio::test]
    async fn test_home_without_session() {
        let (state, _, _) = logged_in().await;

        let response = send(&state, Method::GET, "/home", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/register");

        let response =
            send(&state, Method::GET, "/home", Some("session=forged")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_logout() {
        let (state, repo, cookie) = logged_in().await;

        let response =
            send(&state, Method::POST, "/logout", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/register");
        assert!(response.headers().get(header::SET_COOKIE).is_some());
        assert_eq!(repo.session_count().await, 0);

        let response = send(&state, Method::GET, "/home", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
