//! Gmail REST client: list message ids, fetch full messages, resolve the
//! account profile. Wire types follow the `users.messages` resource shapes.
//!
//! All calls carry the caller's bearer token, run against a configurable API
//! base (tests point it at a local mock), use an explicit timeout, and retry
//! once on transport errors. A failed individual message fetch is skipped and
//! logged — it never aborts the batch.

pub mod extract;

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::AppError;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MessageId {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Option<Vec<MessageId>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

/// One node of the (possibly nested) MIME tree. The top-level `payload` is
/// itself a part.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Option<Vec<Header>>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

// ── Fetch output ──────────────────────────────────────────────────────────────

/// A fetched message reduced to what the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailDocument {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub body: String,
}

impl MailDocument {
    /// The text that gets chunked and embedded — headers folded in so
    /// retrieval can match on sender and subject too.
    pub fn combined_text(&self) -> String {
        format!("From: {}\nSubject: {}\n\n{}", self.from, self.subject, self.body)
    }
}

/// Result of fetching a batch of message ids.
///
/// `processed_ids` contains every id that was fetched successfully —
/// including messages dropped for having no usable text — so callers can
/// mark them done. Ids that failed with a transport/API error are absent
/// and will be retried on the next cycle.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub documents: Vec<MailDocument>,
    pub processed_ids: Vec<String>,
    pub failed: usize,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GmailClient {
    http: Client,
    api_base: String,
}

impl GmailClient {
    pub fn new(api_base: String, timeout_seconds: u64) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Gmail(format!("failed building HTTP client: {e}")))?;
        Ok(Self { http, api_base })
    }

    /// One `users.messages.list` call — first page only, bounded size.
    pub async fn list_message_ids(
        &self,
        access_token: &str,
        max_results: u32,
        query: &str,
    ) -> Result<Vec<MessageId>, AppError> {
        let bounded_max = max_results.clamp(1, 500);
        let mut params: Vec<(&str, String)> = vec![("maxResults", bounded_max.to_string())];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }

        let url = format!("{}/messages", self.api_base);
        let list: ListMessagesResponse = self
            .get_json("gmail list", || {
                self.http.get(&url).bearer_auth(access_token).query(&params)
            })
            .await?;

        let ids = list.messages.unwrap_or_default();
        debug!(count = ids.len(), %query, "gmail: listed message ids");
        Ok(ids)
    }

    /// Fetch one message with its full MIME payload.
    pub async fn get_message(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<MessageResponse, AppError> {
        let url = format!("{}/messages/{id}", self.api_base);
        self.get_json("gmail get", || {
            self.http
                .get(&url)
                .bearer_auth(access_token)
                .query(&[("format", "full")])
        })
        .await
    }

    /// Resolve the authenticated account's email address.
    pub async fn get_profile_email(&self, access_token: &str) -> Result<String, AppError> {
        let url = format!("{}/profile", self.api_base);
        let profile: Profile = self
            .get_json("gmail profile", || {
                self.http.get(&url).bearer_auth(access_token)
            })
            .await?;
        Ok(profile.email_address)
    }

    /// Fetch each id, extract and clean its body, and drop messages without
    /// usable text. Per-message failures are logged and skipped.
    pub async fn fetch_documents(
        &self,
        access_token: &str,
        ids: &[MessageId],
    ) -> Result<FetchOutcome, AppError> {
        let mut outcome = FetchOutcome::default();

        for msg_id in ids {
            match self.get_message(access_token, &msg_id.id).await {
                Ok(msg) => {
                    outcome.processed_ids.push(msg.id.clone());
                    match extract::document_from(&msg) {
                        Some(doc) => outcome.documents.push(doc),
                        None => {
                            debug!(message_id = %msg.id, "gmail: no usable text, dropping")
                        }
                    }
                }
                Err(e) => {
                    warn!(message_id = %msg_id.id, error = %e, "gmail: message fetch failed, skipping");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// GET + JSON decode with one retry on transport errors.
    async fn get_json<T: DeserializeOwned>(
        &self,
        what: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, AppError> {
        let mut attempt = 0;
        let res = loop {
            attempt += 1;
            match build().send().await {
                Ok(res) => break res,
                Err(e) if attempt == 1 => {
                    warn!(%what, error = %e, "transport error, retrying once");
                }
                Err(e) => return Err(AppError::Gmail(format!("{what} request failed: {e}"))),
            }
        };

        if !res.status().is_success() {
            let status = res.status();
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AppError::Gmail(format!("{what} failed: HTTP {status}: {body}")));
        }

        res.json::<T>()
            .await
            .map_err(|e| AppError::Gmail(format!("{what} parse failed: {e}")))
    }
}

/// First header matching `key`, case-insensitive; empty string when absent.
pub fn header_value(headers: &[Header], key: &str) -> String {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(key))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}
