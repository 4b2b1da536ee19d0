//! Mailsense — server entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Create data directories and open the stores (explicit, never
//!      import-time side effects)
//!   6. Build the OAuth/Gmail/LLM clients and the sync + QA engines
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Serve HTTP until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mailsense::auth::AuthClient;
use mailsense::auth::credentials::CredentialStore;
use mailsense::auth::session::SessionStore;
use mailsense::config;
use mailsense::error::AppError;
use mailsense::gmail::GmailClient;
use mailsense::http::{self, AppState};
use mailsense::index::Indexer;
use mailsense::index::cache::ProcessedIdCache;
use mailsense::index::chunker::Chunker;
use mailsense::index::store::VectorStore;
use mailsense::llm::{embeddings, providers};
use mailsense::logger;
use mailsense::qa::QaChain;
use mailsense::sync::SyncEngine;
use mailsense::users::UserStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level)?;

    info!(
        data_dir = %config.data_dir.display(),
        bind = %config.server.bind,
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    // Explicit one-time initialisation of everything that touches disk.
    std::fs::create_dir_all(&config.data_dir)?;
    let cache = ProcessedIdCache::open(&config.cache_dir())?;
    let users = UserStore::open(&config.users_db_path())?;
    let store = VectorStore::open(&config.vectors_db_path())?;

    let auth = AuthClient::new(&config)?;
    let gmail = GmailClient::new(config.gmail.api_base.clone(), config.gmail.timeout_seconds)?;
    let llm = providers::build(&config.llm, config.llm_api_key.clone())?;
    let embedder = embeddings::build(&config.embeddings, config.llm_api_key.clone())?;

    let chunker = Chunker::new(config.indexing.chunk_size, config.indexing.chunk_overlap)?;
    let indexer = Indexer::new(chunker, embedder.clone(), store.clone());
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
        config: Arc::new(config.clone()),
        auth,
        gmail,
        sessions: Arc::new(SessionStore::new()),
        credentials: Arc::new(CredentialStore::new()),
        users,
        sync: Arc::new(sync),
        qa: Arc::new(qa),
    };

    // Shared shutdown token — Ctrl-C cancels it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    http::serve(state, &config.server.bind, shutdown).await
}

struct CliArgs {
    config_path: Option<String>,
    log_level: Option<&'static str>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: mailsense [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help            Print help");
                println!("  -f, --config <PATH>   Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv         Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    let log_level = match verbosity {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs {
        config_path,
        log_level,
    }
}
