//! Endpoint tests via `tower::ServiceExt::oneshot` — no listener, no network.
//!
//! The Gmail/LLM api bases point at a closed local port, so any handler that
//! wrongly reached upstream would surface as a 500 instead of the asserted
//! 4xx — the auth/validation ordering is exercised for real.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tempfile::TempDir;
use tower::ServiceExt;

use mailsense::auth::AuthClient;
use mailsense::auth::credentials::{Credential, CredentialStore};
use mailsense::auth::session::SessionStore;
use mailsense::config::{
    Config, EmbeddingsConfig, GMAIL_SCOPE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GmailConfig,
    IndexingConfig, LlmConfig, OauthConfig, RetrievalConfig, ServerConfig,
};
use mailsense::gmail::GmailClient;
use mailsense::http::{AppState, build_router};
use mailsense::index::Indexer;
use mailsense::index::cache::ProcessedIdCache;
use mailsense::index::chunker::Chunker;
use mailsense::index::store::VectorStore;
use mailsense::llm::{embeddings, providers};
use mailsense::qa::QaChain;
use mailsense::sync::SyncEngine;
use mailsense::users::UserStore;

// ── setup ─────────────────────────────────────────────────────────────────────

fn test_config(temp: &TempDir) -> Config {
    Config {
        log_level: "info".to_string(),
        data_dir: temp.path().to_path_buf(),
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            frontend_redirect_url: "http://localhost:3000/".to_string(),
        },
        oauth: OauthConfig {
            redirect_uri: "http://localhost:8000/oauth2callback".to_string(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        },
        gmail: GmailConfig {
            // closed port — an unexpected outbound call fails loudly
            api_base: "http://127.0.0.1:9/gmail/v1/users/me".to_string(),
            max_results: 100,
            query: "category:primary".to_string(),
            timeout_seconds: 2,
        },
        indexing: IndexingConfig {
            chunk_size: 500,
            chunk_overlap: 100,
        },
        retrieval: RetrievalConfig {
            top_k: 3,
            candidate_pool: 10,
            mmr_lambda: 0.7,
        },
        llm: LlmConfig {
            provider: "dummy".to_string(),
            api_base_url: String::new(),
            model: String::new(),
            temperature: 0.0,
            timeout_seconds: 2,
        },
        embeddings: EmbeddingsConfig {
            provider: "hash".to_string(),
            api_base_url: String::new(),
            model: String::new(),
            dimensions: 64,
            timeout_seconds: 2,
        },
        google_client_id: Some("client-123".to_string()),
        google_client_secret: Some("secret-456".to_string()),
        llm_api_key: None,
    }
}

fn test_app(temp: &TempDir) -> (Router, AppState) {
    let config = test_config(temp);

    let cache = ProcessedIdCache::open(&config.cache_dir()).expect("cache");
    let users = UserStore::open(&config.users_db_path()).expect("users");
    let store = VectorStore::open(&config.vectors_db_path()).expect("store");
    let auth = AuthClient::new(&config).expect("auth client");
    let gmail =
        GmailClient::new(config.gmail.api_base.clone(), config.gmail.timeout_seconds).expect("gmail");
    let llm = providers::build(&config.llm, None).expect("llm");
    let embedder = embeddings::build(&config.embeddings, None).expect("embedder");

    let indexer = Indexer::new(
        Chunker::new(config.indexing.chunk_size, config.indexing.chunk_overlap).expect("chunker"),
        embedder.clone(),
        store.clone(),
    );
    let sync = SyncEngine::new(
        gmail.clone(),
        cache,
        store.clone(),
        indexer,
        config.gmail.max_results,
        config.gmail.query.clone(),
    );
    let qa = QaChain::new(store, embedder, llm, config.retrieval.clone());

    let state = AppState {
        config: Arc::new(config),
        auth,
        gmail,
        sessions: Arc::new(SessionStore::new()),
        credentials: Arc::new(CredentialStore::new()),
        users,
        sync: Arc::new(sync),
        qa: Arc::new(qa),
    };

    (build_router(state.clone()), state)
}

fn seed_login(state: &AppState, email: &str) -> (String, i64) {
    let user = state.users.upsert_by_email(email).expect("upsert user");
    let sid = SessionStore::new_session_id();
    state.sessions.login(&sid, user.id);
    (sid, user.id)
}

fn seed_credential(state: &AppState, user_id: i64) {
    state.credentials.put(
        user_id,
        Credential {
            access_token: "test-token".to_string(),
            refresh_token: None,
            token_uri: GOOGLE_TOKEN_URL.to_string(),
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            scopes: vec![GMAIL_SCOPE.to_string()],
        },
    );
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_cookie(uri: &str, sid: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, format!("mailsense_sid={sid}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &str, sid: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(sid) = sid {
        builder = builder.header(header::COOKIE, format!("mailsense_sid={sid}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn root_serves_banner() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("Welcome"));
}

#[tokio::test]
async fn ask_without_question_is_400_even_unauthenticated() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router
        .clone()
        .oneshot(post_json("/email/ask", "{}", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(post_json("/email/ask", r#"{"question": "   "}"#, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "bad_request");

    // No body at all is still a 400, not a content-type rejection.
    let response = router
        .oneshot(
            Request::builder()
                .uri("/email/ask")
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ask_unauthenticated_is_401() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router
        .oneshot(post_json("/email/ask", r#"{"question": "anything?"}"#, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ask_without_provider_credentials_is_401() {
    let temp = TempDir::new().unwrap();
    let (router, state) = test_app(&temp);
    let (sid, _user_id) = seed_login(&state, "a@example.com");

    let response = router
        .oneshot(post_json("/email/ask", r#"{"question": "anything?"}"#, Some(&sid)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("credentials"));
}

#[tokio::test]
async fn ask_with_empty_collection_is_404() {
    let temp = TempDir::new().unwrap();
    let (router, state) = test_app(&temp);
    let (sid, user_id) = seed_login(&state, "a@example.com");
    seed_credential(&state, user_id);

    let response = router
        .oneshot(post_json("/email/ask", r#"{"question": "anything?"}"#, Some(&sid)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn ask_get_returns_usage_hint() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router.oneshot(get("/email/ask")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("question"));
}

#[tokio::test]
async fn fetch_unauthenticated_is_401() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router.oneshot(get("/gmail/fetch")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn fetch_without_provider_credentials_is_401() {
    let temp = TempDir::new().unwrap();
    let (router, state) = test_app(&temp);
    let (sid, _user_id) = seed_login(&state, "a@example.com");

    let response = router.oneshot(get_with_cookie("/gmail/fetch", &sid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_unauthenticated_is_401() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router.oneshot(get("/user/profile")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_returns_logged_in_email() {
    let temp = TempDir::new().unwrap();
    let (router, state) = test_app(&temp);
    let (sid, _user_id) = seed_login(&state, "a@example.com");

    let response = router.oneshot(get_with_cookie("/user/profile", &sid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["email"], "a@example.com");
}

#[tokio::test]
async fn login_redirects_to_consent_url_with_session_cookie() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router.oneshot(get("/gmail/login")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie set")
        .to_str()
        .unwrap();
    assert!(set_cookie.contains("mailsense_sid="));

    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("redirect location")
        .to_str()
        .unwrap();
    assert!(location.starts_with("https://accounts.google.com/"));
    assert!(location.contains("access_type=offline"));
    assert!(location.contains("prompt=consent"));
    assert!(location.contains("state="));
    assert!(location.contains("code_challenge_method=S256"));
}

#[tokio::test]
async fn callback_without_session_is_400() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);

    let response = router
        .oneshot(get("/oauth2callback?state=abc&code=def"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("state"));
}

#[tokio::test]
async fn callback_with_session_but_no_pending_login_is_400() {
    let temp = TempDir::new().unwrap();
    let (router, state) = test_app(&temp);
    let (sid, _user_id) = seed_login(&state, "a@example.com");

    let response = router
        .oneshot(get_with_cookie("/oauth2callback?state=abc&code=def", &sid))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_clears_session_and_credential() {
    let temp = TempDir::new().unwrap();
    let (router, state) = test_app(&temp);
    let (sid, user_id) = seed_login(&state, "a@example.com");
    seed_credential(&state, user_id);

    let response = router
        .clone()
        .oneshot(post_json("/gmail/logout", "{}", Some(&sid)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Logged out"));

    assert!(state.sessions.user_for(&sid).is_none());
    assert!(state.credentials.get(user_id).is_none());

    // Profile is 401 again after logout.
    let response = router.oneshot(get_with_cookie("/user/profile", &sid)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn favicon_is_no_content() {
    let temp = TempDir::new().unwrap();
    let (router, _state) = test_app(&temp);
    let response = router.oneshot(get("/favicon.ico")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
