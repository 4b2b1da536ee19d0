//! HTTP surface — axum router, shared state, and the server loop.
//!
//! ## URL layout
//!
//! ```text
//! GET       /                → banner
//! GET       /gmail/login     → 302 to provider consent URL
//! GET       /oauth2callback  → 302 to frontend (400 on state problems)
//! GET|POST  /gmail/fetch     → sync cycle for the logged-in user
//! POST      /email/ask       → retrieval-augmented answer
//! GET       /email/ask       → usage hint
//! GET       /user/profile    → logged-in user's email
//! GET|POST  /gmail/logout    → clears session + credential
//! GET       /favicon.ico     → 204
//! ```

pub mod api;
pub mod error;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::AuthClient;
use crate::auth::credentials::CredentialStore;
use crate::auth::session::SessionStore;
use crate::config::Config;
use crate::error::AppError;
use crate::gmail::GmailClient;
use crate::qa::QaChain;
use crate::sync::SyncEngine;
use crate::users::UserStore;

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone — all fields are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthClient,
    pub gmail: GmailClient,
    pub sessions: Arc<SessionStore>,
    pub credentials: Arc<CredentialStore>,
    pub users: UserStore,
    pub sync: Arc<SyncEngine<GmailClient>>,
    pub qa: Arc<QaChain>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::root))
        .route("/gmail/login", get(api::login))
        .route("/oauth2callback", get(api::oauth_callback))
        .route("/gmail/fetch", get(api::fetch).post(api::fetch))
        .route("/email/ask", get(api::ask_usage).post(api::ask))
        .route("/user/profile", get(api::profile))
        .route("/gmail/logout", get(api::logout).post(api::logout))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(
    state: AppState,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(state);

    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "http server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("http server shut down");
    Ok(())
}
