//! Fetch/index orchestration: read cache → list → dedup → fetch → index →
//! write cache, under a per-user lock.
//!
//! The cache write happens strictly after the vector-store write succeeds,
//! so an id is never marked processed while its content is missing from the
//! collection. Overlapping syncs for the same user serialise on a keyed
//! async mutex; different users never contend.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::error::AppError;
use crate::gmail::{FetchOutcome, GmailClient, MailDocument, MessageId};
use crate::index::Indexer;
use crate::index::cache::ProcessedIdCache;
use crate::index::store::{VectorStore, collection_name};
use crate::text::{escape_html, truncate_chars};

/// Snippet bound in grouped thread responses.
const SNIPPET_CHARS: usize = 300;
/// How many stored chunks an existing-threads listing may return.
const EXISTING_LIST_LIMIT: usize = 200;

// ── Mail source seam ──────────────────────────────────────────────────────────

/// The two provider calls the sync cycle needs. `GmailClient` is the real
/// implementation; tests substitute an in-memory source.
pub trait MailSource: Send + Sync {
    fn list_message_ids(
        &self,
        access_token: &str,
        max_results: u32,
        query: &str,
    ) -> impl Future<Output = Result<Vec<MessageId>, AppError>> + Send;

    fn fetch_documents(
        &self,
        access_token: &str,
        ids: &[MessageId],
    ) -> impl Future<Output = Result<FetchOutcome, AppError>> + Send;
}

impl MailSource for GmailClient {
    async fn list_message_ids(
        &self,
        access_token: &str,
        max_results: u32,
        query: &str,
    ) -> Result<Vec<MessageId>, AppError> {
        GmailClient::list_message_ids(self, access_token, max_results, query).await
    }

    async fn fetch_documents(
        &self,
        access_token: &str,
        ids: &[MessageId],
    ) -> Result<FetchOutcome, AppError> {
        GmailClient::fetch_documents(self, access_token, ids).await
    }
}

// ── Per-user locking ──────────────────────────────────────────────────────────

/// Keyed async mutex table. Entries are created on first use and kept for
/// the process lifetime — the user population is small and bounded.
#[derive(Debug, Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.inner.lock().expect("user lock table poisoned");
            table
                .entry(user_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ── Response shapes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadEmail {
    pub subject: String,
    pub from: String,
    pub snippet: String,
    pub full_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadGroup {
    pub thread_id: String,
    pub emails: Vec<ThreadEmail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub stored: usize,
    pub collection: String,
    pub vector_db_path: String,
    pub threads: Vec<ThreadGroup>,
}

/// Outcome of a sync cycle. `NothingToEmbed` covers the case where new
/// messages existed but none had usable text.
#[derive(Debug)]
pub enum SyncOutcome {
    Report(FetchReport),
    NothingToEmbed,
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct SyncEngine<S> {
    source: S,
    cache: ProcessedIdCache,
    store: VectorStore,
    indexer: Indexer,
    locks: UserLocks,
    max_results: u32,
    query: String,
}

impl<S: MailSource> SyncEngine<S> {
    pub fn new(
        source: S,
        cache: ProcessedIdCache,
        store: VectorStore,
        indexer: Indexer,
        max_results: u32,
        query: String,
    ) -> Self {
        Self {
            source,
            cache,
            store,
            indexer,
            locks: UserLocks::new(),
            max_results,
            query,
        }
    }

    /// One full fetch/index cycle for `user_id`, serialised per user.
    pub async fn run(&self, user_id: i64, access_token: &str) -> Result<SyncOutcome, AppError> {
        let _guard = self.locks.acquire(user_id).await;

        let all_ids = self
            .source
            .list_message_ids(access_token, self.max_results, &self.query)
            .await?;
        if all_ids.is_empty() {
            return self.existing_report(user_id);
        }

        let cached = self.cache.load(user_id);
        let new_ids: Vec<MessageId> = all_ids
            .into_iter()
            .filter(|m| !cached.contains(&m.id))
            .collect();
        if new_ids.is_empty() {
            return self.existing_report(user_id);
        }

        let outcome = self.source.fetch_documents(access_token, &new_ids).await?;
        if outcome.failed > 0 {
            warn!(
                user_id,
                failed = outcome.failed,
                "some messages failed to fetch; they will be retried next cycle"
            );
        }

        if outcome.documents.is_empty() {
            // Nothing embeddable. Fetched-but-empty ids are still marked
            // processed so they are not refetched every cycle.
            if !outcome.processed_ids.is_empty() {
                let mut updated = cached;
                updated.extend(outcome.processed_ids);
                self.cache.save(user_id, &updated)?;
            }
            return Ok(SyncOutcome::NothingToEmbed);
        }

        let stored = outcome.documents.len();
        self.indexer.index(&outcome.documents, user_id).await?;

        // Store write succeeded — only now may the cache claim these ids.
        let mut updated = cached;
        updated.extend(outcome.processed_ids);
        self.cache.save(user_id, &updated)?;

        info!(user_id, stored, "sync cycle indexed new messages");

        Ok(SyncOutcome::Report(FetchReport {
            stored,
            collection: collection_name(user_id),
            vector_db_path: self.vector_db_path(),
            threads: group_documents(&outcome.documents),
        }))
    }

    /// No new mail: answer with what the collection already holds.
    fn existing_report(&self, user_id: i64) -> Result<SyncOutcome, AppError> {
        let collection = collection_name(user_id);
        let chunks = self.store.list(&collection, EXISTING_LIST_LIMIT)?;
        let items: Vec<GroupItem> = chunks
            .into_iter()
            .map(|chunk| GroupItem {
                thread_id: chunk.metadata.thread_id,
                subject: chunk.metadata.subject,
                from: chunk.metadata.from,
                text: chunk.text,
            })
            .collect();

        Ok(SyncOutcome::Report(FetchReport {
            stored: 0,
            collection,
            vector_db_path: self.vector_db_path(),
            threads: group_items(items),
        }))
    }

    fn vector_db_path(&self) -> String {
        let path = self.store.db_path();
        std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string()
    }
}

// ── Thread grouping ───────────────────────────────────────────────────────────

struct GroupItem {
    thread_id: String,
    subject: String,
    from: String,
    text: String,
}

/// Group freshly fetched documents by thread id.
pub fn group_documents(documents: &[MailDocument]) -> Vec<ThreadGroup> {
    let items = documents
        .iter()
        .map(|doc| GroupItem {
            thread_id: doc.thread_id.clone(),
            subject: doc.subject.clone(),
            from: doc.from.clone(),
            text: doc.combined_text(),
        })
        .collect();
    group_items(items)
}

/// Items without a thread id are skipped. Threads come back sorted by id and
/// emails sorted by subject, so identical inputs produce identical output.
fn group_items(items: Vec<GroupItem>) -> Vec<ThreadGroup> {
    let mut map: BTreeMap<String, Vec<ThreadEmail>> = BTreeMap::new();

    for item in items {
        if item.thread_id.is_empty() {
            continue;
        }
        let rendered_body = escape_html(&item.text).replace('\n', "<br>");
        let snippet = escape_html(&truncate_chars(&item.text, SNIPPET_CHARS)).replace('\n', "<br>");
        map.entry(item.thread_id).or_default().push(ThreadEmail {
            subject: item.subject,
            from: item.from,
            snippet,
            full_body: rendered_body,
        });
    }

    map.into_iter()
        .map(|(thread_id, mut emails)| {
            emails.sort_by(|a, b| a.subject.cmp(&b.subject));
            ThreadGroup { thread_id, emails }
        })
        .collect()
}
