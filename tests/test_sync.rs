//! Integration tests for the fetch/index sync cycle.
//!
//! Uses an in-memory mail source, the hash embedder and tempdir-backed
//! stores — no network anywhere.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use mailsense::error::AppError;
use mailsense::gmail::{FetchOutcome, MailDocument, MessageId};
use mailsense::index::Indexer;
use mailsense::index::cache::ProcessedIdCache;
use mailsense::index::chunker::Chunker;
use mailsense::index::store::{VectorStore, collection_name};
use mailsense::llm::embeddings::{Embedder, HashEmbedder};
use mailsense::sync::{MailSource, SyncEngine, SyncOutcome};

// ── fake mail source ──────────────────────────────────────────────────────────

#[derive(Clone)]
struct FakeMessage {
    id: &'static str,
    thread_id: &'static str,
    subject: &'static str,
    body: &'static str,
}

/// Cloneable handle over shared state, so tests can mutate the mailbox
/// after the engine takes ownership of its copy.
#[derive(Clone)]
struct FakeSource {
    messages: Arc<Mutex<Vec<FakeMessage>>>,
    fail_ids: Arc<Mutex<HashSet<String>>>,
}

impl FakeSource {
    fn new(messages: Vec<FakeMessage>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(messages)),
            fail_ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn set_messages(&self, messages: Vec<FakeMessage>) {
        *self.messages.lock().unwrap() = messages;
    }

    fn fail(&self, id: &str) {
        self.fail_ids.lock().unwrap().insert(id.to_string());
    }

    fn heal(&self, id: &str) {
        self.fail_ids.lock().unwrap().remove(id);
    }
}

impl MailSource for FakeSource {
    async fn list_message_ids(
        &self,
        _access_token: &str,
        max_results: u32,
        _query: &str,
    ) -> Result<Vec<MessageId>, AppError> {
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .take(max_results as usize)
            .map(|m| MessageId {
                id: m.id.to_string(),
                thread_id: m.thread_id.to_string(),
            })
            .collect())
    }

    async fn fetch_documents(
        &self,
        _access_token: &str,
        ids: &[MessageId],
    ) -> Result<FetchOutcome, AppError> {
        let messages = self.messages.lock().unwrap();
        let fail_ids = self.fail_ids.lock().unwrap();

        let mut outcome = FetchOutcome::default();
        for id in ids {
            if fail_ids.contains(&id.id) {
                outcome.failed += 1;
                continue;
            }
            let Some(msg) = messages.iter().find(|m| m.id == id.id) else {
                outcome.failed += 1;
                continue;
            };
            outcome.processed_ids.push(msg.id.to_string());
            if !msg.body.is_empty() {
                outcome.documents.push(MailDocument {
                    id: msg.id.to_string(),
                    thread_id: msg.thread_id.to_string(),
                    subject: msg.subject.to_string(),
                    from: "sender@example.com".to_string(),
                    body: msg.body.to_string(),
                });
            }
        }
        Ok(outcome)
    }
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn make_engine(
    temp: &TempDir,
    source: FakeSource,
) -> (SyncEngine<FakeSource>, VectorStore, ProcessedIdCache) {
    let cache = ProcessedIdCache::open(&temp.path().join("email_cache")).expect("open cache");
    let store = VectorStore::open(&temp.path().join("vectors.db")).expect("open store");
    let indexer = Indexer::new(
        Chunker::new(500, 100).expect("chunker"),
        Embedder::Hash(HashEmbedder::new(64)),
        store.clone(),
    );
    let engine = SyncEngine::new(
        source,
        cache.clone(),
        store.clone(),
        indexer,
        100,
        "category:primary".to_string(),
    );
    (engine, store, cache)
}

fn msg(
    id: &'static str,
    thread: &'static str,
    subject: &'static str,
    body: &'static str,
) -> FakeMessage {
    FakeMessage {
        id,
        thread_id: thread,
        subject,
        body,
    }
}

fn expect_report(outcome: SyncOutcome) -> mailsense::sync::FetchReport {
    match outcome {
        SyncOutcome::Report(report) => report,
        SyncOutcome::NothingToEmbed => panic!("expected a report, got NothingToEmbed"),
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_sync_indexes_and_groups_by_thread() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![
        msg("m1", "t1", "Budget", "the budget moved to friday"),
        msg("m2", "t1", "Re: Budget", "works for me"),
        msg("m3", "t2", "Lunch", "pizza on thursday"),
    ]);
    let (engine, store, cache) = make_engine(&temp, source);

    let report = expect_report(engine.run(1, "token").await.unwrap());

    assert_eq!(report.stored, 3);
    assert_eq!(report.collection, collection_name(1));
    assert_eq!(report.threads.len(), 2);
    assert_eq!(report.threads[0].thread_id, "t1");
    assert_eq!(report.threads[0].emails.len(), 2);
    assert_eq!(report.threads[1].thread_id, "t2");

    // Vector content exists for everything the cache claims.
    let expected: HashSet<String> = ["m1", "m2", "m3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(cache.load(1), expected);
    assert_eq!(store.count(&collection_name(1)).unwrap(), 3);
}

#[tokio::test]
async fn second_sync_with_same_ids_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![
        msg("m1", "t1", "Budget", "the budget moved to friday"),
        msg("m2", "t2", "Lunch", "pizza on thursday"),
    ]);
    let (engine, store, _cache) = make_engine(&temp, source);

    let first = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(first.stored, 2);

    let second = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(second.stored, 0);
    assert_eq!(second.threads, first.threads);
    assert_eq!(second.collection, first.collection);

    // Nothing was double-indexed.
    assert_eq!(store.count(&collection_name(1)).unwrap(), 2);
}

#[tokio::test]
async fn cache_is_superset_of_stored_ids_after_every_cycle() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![msg("m1", "t1", "One", "first body")]);
    let mailbox = source.clone();
    let (engine, store, cache) = make_engine(&temp, source);

    expect_report(engine.run(1, "token").await.unwrap());
    assert!(cache.load(1).contains("m1"));

    mailbox.set_messages(vec![
        msg("m1", "t1", "One", "first body"),
        msg("m2", "t2", "Two", "second body"),
    ]);

    let report = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(report.stored, 1);

    let cached = cache.load(1);
    assert!(cached.contains("m1"));
    assert!(cached.contains("m2"));
    assert_eq!(store.count(&collection_name(1)).unwrap(), 2);
}

#[tokio::test]
async fn failed_message_is_skipped_and_retried_next_cycle() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![
        msg("ok", "t1", "Fine", "this one works"),
        msg("bad", "t2", "Broken", "this one errors"),
    ]);
    source.fail("bad");
    let mailbox = source.clone();
    let (engine, _store, cache) = make_engine(&temp, source);

    let report = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(report.stored, 1);
    assert!(cache.load(1).contains("ok"));
    assert!(!cache.load(1).contains("bad"), "failed id must not be cached");

    mailbox.heal("bad");
    let retry = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(retry.stored, 1);
    assert_eq!(retry.threads[0].thread_id, "t2");
    assert!(cache.load(1).contains("bad"));
}

#[tokio::test]
async fn all_empty_bodies_reports_nothing_to_embed() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![msg("m1", "t1", "Empty", "")]);
    let (engine, store, cache) = make_engine(&temp, source);

    match engine.run(1, "token").await.unwrap() {
        SyncOutcome::NothingToEmbed => {}
        SyncOutcome::Report(r) => panic!("expected NothingToEmbed, got stored={}", r.stored),
    }

    // The bodyless id is still marked processed so it is not refetched,
    // and nothing was written to the collection.
    assert!(cache.load(1).contains("m1"));
    assert!(store.is_empty(&collection_name(1)).unwrap());

    // The next cycle sees no new ids and reports the (empty) existing state.
    let report = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(report.stored, 0);
    assert!(report.threads.is_empty());
}

#[tokio::test]
async fn empty_provider_listing_reports_existing_state() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![]);
    let (engine, _store, cache) = make_engine(&temp, source);

    let report = expect_report(engine.run(1, "token").await.unwrap());
    assert_eq!(report.stored, 0);
    assert!(report.threads.is_empty());
    assert!(cache.load(1).is_empty());
}

#[tokio::test]
async fn users_get_separate_collections_and_caches() {
    let temp = TempDir::new().unwrap();
    let source = FakeSource::new(vec![msg("m1", "t1", "Mine", "user one mail")]);
    let (engine, store, cache) = make_engine(&temp, source);

    expect_report(engine.run(1, "token-one").await.unwrap());
    let report_two = expect_report(engine.run(2, "token-two").await.unwrap());

    // User 2 fetched the same provider ids but into their own partition.
    assert_eq!(report_two.stored, 1);
    assert_eq!(store.count(&collection_name(1)).unwrap(), 1);
    assert_eq!(store.count(&collection_name(2)).unwrap(), 1);
    assert!(cache.load(1).contains("m1"));
    assert!(cache.load(2).contains("m1"));
}
