//! mailconfirm registers accounts, confirms their email address through a
//! mailed link and opens cookie sessions for confirmed users.

#![forbid(unsafe_code)]
pub mod config;
mod crypto;
mod database;
pub mod error;
mod mail;
mod router;
pub mod telemetry;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::ServerError;
pub use mail::{MailManager, Mailer, Message};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: &str,
    cookie: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(
        request
            .body(axum::body::Body::from(body.to_owned()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub repo: Arc<dyn user::Repository>,
    pub crypto: Arc<crypto::PasswordManager>,
    pub mail: Arc<dyn Mailer>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /` and `GET /register` render both forms.
        .route(
            "/",
            get(router::register::page).post(router::register::handler),
        )
        .route(
            router::REGISTER_ROUTE,
            get(router::register::page).post(router::register::handler),
        )
        .route("/login", post(router::login::handler))
        .route("/email-confirm/{code}", get(router::confirm::handler))
        .route(router::HOME_ROUTE, get(router::session::home))
        .route("/logout", post(router::session::logout))
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state()
-> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    // read configuration file. let it in memory.
    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => config::Configuration::default().path(path.into()),
        Err(_) => config::Configuration::default(),
    }
    .read()?;

    let repo: Arc<dyn user::Repository> = match config.postgres {
        Some(ref postgres) => {
            let pool = database::connect(postgres).await?;
            Arc::new(user::PostgresRepository::new(pool))
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, accounts are kept in memory"
            );
            Arc::new(user::MemoryRepository::new())
        },
    };

    let crypto = Arc::new(crypto::PasswordManager::new(config.argon2.clone())?);

    // handle mail sender.
    let mail: Arc<dyn Mailer> = match &config.mail {
        Some(cfg) => Arc::new(MailManager::new(cfg).await?),
        None => {
            tracing::warn!(
                "missing `mail` entry on `config.yaml` file, confirmation links are only logged"
            );
            Arc::new(MailManager::default())
        },
    };

    Ok(AppState {
        config,
        repo,
        crypto,
        mail,
    })
}
