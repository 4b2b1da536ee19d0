//! Configuration loading with env-var overrides.
//!
//! Reads a TOML file (default `config/default.toml`), falls back to built-in
//! defaults when absent, and applies `MAILSENSE_DATA_DIR` and
//! `MAILSENSE_LOG_LEVEL` env overrides. Secrets (`GOOGLE_CLIENT_ID`,
//! `GOOGLE_CLIENT_SECRET`, `LLM_API_KEY`) come from the environment only,
//! never from TOML.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

// ── Resolved config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Root for all persisted state: users db, dedup cache, vector db.
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub oauth: OauthConfig,
    pub gmail: GmailConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub llm_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Where the callback handler sends the browser after a successful login.
    pub frontend_redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct OauthConfig {
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub api_base: String,
    pub max_results: u32,
    pub query: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct IndexingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Cosine candidates fetched before MMR selection.
    pub candidate_pool: usize,
    pub mmr_lambda: f32,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    /// Vector width of the hash fallback embedder.
    pub dimensions: usize,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("email_cache")
    }

    pub fn users_db_path(&self) -> PathBuf {
        self.data_dir.join("users.db")
    }

    pub fn vectors_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }
}

// ── Raw TOML layer ────────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_data_dir() -> String {
    "~/.mailsense".to_string()
}
fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_frontend_redirect_url() -> String {
    "http://localhost:3000/".to_string()
}
fn default_redirect_uri() -> String {
    "http://localhost:8000/oauth2callback".to_string()
}
fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}
fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}
fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".to_string()
}
fn default_max_results() -> u32 {
    100
}
fn default_gmail_query() -> String {
    "category:primary".to_string()
}
fn default_gmail_timeout() -> u64 {
    30
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_top_k() -> usize {
    5
}
fn default_candidate_pool() -> usize {
    20
}
fn default_mmr_lambda() -> f32 {
    0.7
}
fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_api_base() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_embeddings_provider() -> String {
    "openai".to_string()
}
fn default_embeddings_api_base() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embeddings_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimensions() -> usize {
    256
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    service: RawService,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    oauth: RawOauth,
    #[serde(default)]
    gmail: RawGmail,
    #[serde(default)]
    indexing: RawIndexing,
    #[serde(default)]
    retrieval: RawRetrieval,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    embeddings: RawEmbeddings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawService {
    log_level: String,
    data_dir: String,
}

impl Default for RawService {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawServer {
    bind: String,
    frontend_redirect_url: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            frontend_redirect_url: default_frontend_redirect_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawOauth {
    redirect_uri: String,
    auth_url: String,
    token_url: String,
}

impl Default for RawOauth {
    fn default() -> Self {
        Self {
            redirect_uri: default_redirect_uri(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawGmail {
    api_base: String,
    max_results: u32,
    query: String,
    timeout_seconds: u64,
}

impl Default for RawGmail {
    fn default() -> Self {
        Self {
            api_base: default_gmail_api_base(),
            max_results: default_max_results(),
            query: default_gmail_query(),
            timeout_seconds: default_gmail_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawIndexing {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for RawIndexing {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRetrieval {
    top_k: usize,
    candidate_pool: usize,
    mmr_lambda: f32,
}

impl Default for RawRetrieval {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_pool: default_candidate_pool(),
            mmr_lambda: default_mmr_lambda(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLlm {
    provider: String,
    api_base_url: String,
    model: String,
    temperature: f32,
    timeout_seconds: u64,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_base_url: default_llm_api_base(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawEmbeddings {
    provider: String,
    api_base_url: String,
    model: String,
    dimensions: usize,
    timeout_seconds: u64,
}

impl Default for RawEmbeddings {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            api_base_url: default_embeddings_api_base(),
            model: default_embeddings_model(),
            dimensions: default_embedding_dimensions(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from the given path, or `config/default.toml`, then apply
/// env-var overrides. If no path is given and `config/default.toml` does not
/// exist, built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let data_dir_override = env::var("MAILSENSE_DATA_DIR").ok();
    let log_level_override = env::var("MAILSENSE_LOG_LEVEL").ok();

    let raw = if let Some(path) = config_path {
        parse_file(Path::new(path))?
    } else {
        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            parse_file(default_path)?
        } else {
            RawConfig::default()
        }
    };

    resolve(
        raw,
        data_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    resolve(parse_file(path)?, data_dir_override, log_level_override)
}

fn parse_file(path: &Path) -> Result<RawConfig, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))
}

fn resolve(
    raw: RawConfig,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let data_dir_str = data_dir_override.unwrap_or(&raw.service.data_dir).to_string();
    let log_level = log_level_override
        .unwrap_or(&raw.service.log_level)
        .to_string();

    if raw.indexing.chunk_size == 0 {
        return Err(AppError::Config("indexing.chunk_size must be > 0".into()));
    }
    if raw.indexing.chunk_overlap >= raw.indexing.chunk_size {
        return Err(AppError::Config(
            "indexing.chunk_overlap must be smaller than chunk_size".into(),
        ));
    }
    if raw.retrieval.top_k == 0 {
        return Err(AppError::Config("retrieval.top_k must be > 0".into()));
    }

    Ok(Config {
        log_level,
        data_dir: expand_home(&data_dir_str),
        server: ServerConfig {
            bind: raw.server.bind,
            frontend_redirect_url: raw.server.frontend_redirect_url,
        },
        oauth: OauthConfig {
            redirect_uri: raw.oauth.redirect_uri,
            auth_url: raw.oauth.auth_url,
            token_url: raw.oauth.token_url,
        },
        gmail: GmailConfig {
            api_base: raw.gmail.api_base,
            max_results: raw.gmail.max_results.clamp(1, 500),
            query: raw.gmail.query,
            timeout_seconds: raw.gmail.timeout_seconds,
        },
        indexing: IndexingConfig {
            chunk_size: raw.indexing.chunk_size,
            chunk_overlap: raw.indexing.chunk_overlap,
        },
        retrieval: RetrievalConfig {
            top_k: raw.retrieval.top_k,
            candidate_pool: raw.retrieval.candidate_pool.max(raw.retrieval.top_k),
            mmr_lambda: raw.retrieval.mmr_lambda.clamp(0.0, 1.0),
        },
        llm: LlmConfig {
            provider: raw.llm.provider,
            api_base_url: raw.llm.api_base_url,
            model: raw.llm.model,
            temperature: raw.llm.temperature,
            timeout_seconds: raw.llm.timeout_seconds,
        },
        embeddings: EmbeddingsConfig {
            provider: raw.embeddings.provider,
            api_base_url: raw.embeddings.api_base_url,
            model: raw.embeddings.model,
            dimensions: raw.embeddings.dimensions.max(16),
            timeout_seconds: raw.embeddings.timeout_seconds,
        },
        google_client_id: env::var("GOOGLE_CLIENT_ID").ok(),
        google_client_secret: env::var("GOOGLE_CLIENT_SECRET").ok(),
        llm_api_key: env::var("LLM_API_KEY").ok(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
