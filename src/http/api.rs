//! Axum handlers for the mailsense endpoints.
//!
//! Each handler receives [`AppState`] via [`axum::extract::State`]. The
//! session cookie is the only thing the browser holds; user ids, credentials
//! and pending OAuth state all live server-side behind it.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::session::{PendingLogin, SESSION_COOKIE, SessionStore};
use crate::qa::QaOutcome;
use crate::sync::SyncOutcome;

use super::AppState;
use super::error::ApiError;

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct AskRequest {
    #[serde(default)]
    question: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct CallbackParams {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ── Session helpers ───────────────────────────────────────────────────────────

fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Reuse the caller's session cookie or mint a fresh one.
fn ensure_session(jar: CookieJar) -> (CookieJar, String) {
    if let Some(sid) = session_id(&jar) {
        return (jar, sid);
    }
    let sid = SessionStore::new_session_id();
    let cookie = Cookie::build((SESSION_COOKIE, sid.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    (jar.add(cookie), sid)
}

fn current_user(state: &AppState, jar: &CookieJar) -> Option<i64> {
    session_id(jar).and_then(|sid| state.sessions.user_for(&sid))
}

/// Plain `302 Found` — what browsers and the frontend expect from the
/// login/callback hops.
fn redirect_found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
pub(super) async fn root() -> &'static str {
    "Welcome to Mailsense!"
}

/// GET /gmail/login — 302 to the provider consent screen.
pub(super) async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Response), ApiError> {
    let (jar, sid) = ensure_session(jar);
    let ticket = state.auth.begin_login()?;
    state.sessions.set_pending(
        &sid,
        PendingLogin {
            state: ticket.state,
            pkce_verifier: ticket.pkce_verifier,
        },
    );
    Ok((jar, redirect_found(&ticket.auth_url)))
}

/// GET /oauth2callback — validate state, exchange the code, establish the
/// local login, then 302 to the frontend.
pub(super) async fn oauth_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Response), ApiError> {
    let sid = session_id(&jar)
        .ok_or_else(|| ApiError::BadRequest("Missing OAuth state in session".into()))?;
    let pending = state
        .sessions
        .take_pending(&sid)
        .ok_or_else(|| ApiError::BadRequest("Missing OAuth state in session".into()))?;

    if let Some(err) = params.error {
        return Err(ApiError::BadRequest(format!("authorization failed: {err}")));
    }
    let returned_state = params
        .state
        .ok_or_else(|| ApiError::BadRequest("missing state parameter".into()))?;
    if returned_state != pending.state {
        return Err(ApiError::BadRequest("OAuth state mismatch".into()));
    }
    let code = params
        .code
        .ok_or_else(|| ApiError::BadRequest("missing authorization code".into()))?;

    let credential = state.auth.exchange_code(&code, &pending.pkce_verifier).await?;
    let email = state.gmail.get_profile_email(&credential.access_token).await?;
    let user = state.users.upsert_by_email(&email)?;

    state.sessions.login(&sid, user.id);
    state.credentials.put(user.id, credential);
    info!(user_id = user.id, "login complete");

    Ok((
        jar,
        redirect_found(&state.config.server.frontend_redirect_url),
    ))
}

/// GET/POST /gmail/fetch — run a sync cycle for the logged-in user.
pub(super) async fn fetch(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let user_id =
        current_user(&state, &jar).ok_or_else(|| ApiError::Auth("Unauthenticated".into()))?;
    let mut credential = state
        .credentials
        .get(user_id)
        .ok_or_else(|| ApiError::Auth("No Gmail credentials found".into()))?;

    // Access tokens are short-lived; refresh up front when we can. A failed
    // refresh is not fatal — the current token may still be valid.
    if credential.refresh_token.is_some() {
        match state.auth.refresh(&credential).await {
            Ok(fresh) => {
                state.credentials.put(user_id, fresh.clone());
                credential = fresh;
            }
            Err(e) => {
                warn!(user_id, error = %e, "token refresh failed, using existing access token")
            }
        }
    }

    match state.sync.run(user_id, &credential.access_token).await? {
        SyncOutcome::Report(report) => Ok(Json(report).into_response()),
        SyncOutcome::NothingToEmbed => {
            Ok(Json(json!({ "message": "No valid content to embed." })).into_response())
        }
    }
}

/// POST /email/ask — answer a question over the user's indexed mail.
///
/// The question is validated before authentication so a malformed request is
/// always a 400, never a 401.
pub(super) async fn ask(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<AskRequest>>,
) -> Result<Json<crate::qa::AskAnswer>, ApiError> {
    let question = body
        .and_then(|Json(req)| req.question)
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Please provide a question.".into()))?;

    let user_id =
        current_user(&state, &jar).ok_or_else(|| ApiError::Auth("Unauthenticated".into()))?;
    state
        .credentials
        .get(user_id)
        .ok_or_else(|| ApiError::Auth("No Gmail credentials found".into()))?;

    match state.qa.answer(user_id, &question).await? {
        QaOutcome::Answer(answer) => Ok(Json(answer)),
        QaOutcome::NoIndexedMail => Err(ApiError::NotFound(
            "no indexed mail for this account; fetch the inbox first".into(),
        )),
    }
}

/// GET /email/ask — usage hint.
pub(super) async fn ask_usage() -> Json<serde_json::Value> {
    Json(json!({ "message": "POST a JSON body with a 'question' field." }))
}

/// GET /user/profile
pub(super) async fn profile(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id =
        current_user(&state, &jar).ok_or_else(|| ApiError::Auth("User not logged in".into()))?;
    let user = state
        .users
        .get(user_id)?
        .ok_or_else(|| ApiError::NotFound("Email not found".into()))?;
    Ok(Json(json!({ "email": user.email })))
}

/// GET/POST /gmail/logout — clears the session and the user's credential.
pub(super) async fn logout(State(state): State<AppState>, jar: CookieJar) -> Json<serde_json::Value> {
    if let Some(sid) = session_id(&jar) {
        if let Some(user_id) = state.sessions.logout(&sid) {
            state.credentials.remove(user_id);
            info!(user_id, "logged out");
        }
    }
    Json(json!({ "message": "Logged out successfully." }))
}
