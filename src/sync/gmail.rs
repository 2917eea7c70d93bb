//! Gmail mirror
//!
//! Full ("nuclear") sync lists every message id and fetches each message; incremental sync
//! replays `users/me/history` from the stored `historyId`. Both upsert on
//! (user_id, google_message_id).

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use regex::Regex;
use sea_orm::Set;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::connectors::{GmailClient, ProviderError};
use crate::connectors::gmail::GmailMessage;
use crate::models::email;
use crate::models::embedding_queue::ContentType;
use crate::repositories::sync_run::{MODE_FULL, MODE_INCREMENTAL};
use crate::repositories::{
    EmailRepository, EmbeddingQueueRepository, IntegrationRepository, SyncRunRepository,
};
use crate::token_refresh::ResolvedToken;

use super::{
    Chunk, EmbeddingCandidate, RecordSink, RecordSource, SyncError, SyncOptions, SyncOutcome,
    run_recorded,
};

const SOURCE: &str = "gmail";
/// Messages fetched concurrently within one chunk
const FETCH_CONCURRENCY: usize = 10;
const MAX_EMBEDDING_CONTENT: usize = 2000;
const MAX_EMBEDDING_TEXT: usize = 8000;
const SNIPPET_LEN: usize = 200;

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)\s*<(.+)>$").expect("address pattern is valid"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

/// A parsed mailbox such as `"Ana Diaz" <ana@example.com>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub email: String,
}

pub fn parse_mailbox(raw: &str) -> Mailbox {
    let raw = raw.trim();
    match address_re().captures(raw) {
        Some(caps) => {
            let name = caps[1].replace('"', "").trim().to_string();
            Mailbox {
                name: (!name.is_empty()).then_some(name),
                email: caps[2].trim().to_lowercase(),
            }
        }
        None => Mailbox {
            name: None,
            email: raw.to_lowercase(),
        },
    }
}

/// Comma-separated address header, keeping entries that look like addresses
pub fn parse_mailbox_list(header: Option<&str>) -> Vec<Mailbox> {
    header
        .unwrap_or_default()
        .split(',')
        .map(parse_mailbox)
        .filter(|m| m.email.contains('@'))
        .collect()
}

pub fn strip_html(html: &str) -> String {
    tag_re().replace_all(html, "").into_owned()
}

fn mailboxes_json(list: &[Mailbox]) -> Value {
    Value::Array(
        list.iter()
            .map(|m| json!({ "email": m.email, "name": m.name.clone().unwrap_or_default() }))
            .collect(),
    )
}

fn received_at(message: &GmailMessage) -> Option<DateTime<Utc>> {
    message
        .header("Date")
        .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
        .map(|d| d.with_timezone(&Utc))
        .or_else(|| {
            message
                .internal_date
                .as_deref()
                .and_then(|ms| ms.parse::<i64>().ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis)
        })
}

/// Maps a Gmail message to an email row for `user_id`.
pub fn email_row(user_id: Uuid, message: &GmailMessage) -> email::ActiveModel {
    let subject = message.header("Subject").map(str::to_string);
    let sender = message.header("From").map(parse_mailbox);
    let recipients = parse_mailbox_list(message.header("To"));
    let cc = parse_mailbox_list(message.header("Cc"));

    let html = message.body_of_type("text/html");
    let content = message
        .body_of_type("text/plain")
        .or_else(|| html.as_deref().map(strip_html))
        .unwrap_or_default();
    let snippet = message
        .snippet
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| content.chars().take(SNIPPET_LEN).collect());

    let mut parts: Vec<String> = Vec::new();
    parts.extend(subject.clone());
    parts.push(content.chars().take(MAX_EMBEDDING_CONTENT).collect());
    if let Some(sender) = &sender {
        parts.push(sender.email.clone());
        parts.extend(sender.name.clone());
    }
    parts.push(
        recipients
            .iter()
            .chain(cc.iter())
            .map(|m| format!("{} {}", m.name.as_deref().unwrap_or_default(), m.email))
            .collect::<Vec<_>>()
            .join(" "),
    );
    let embedding_text: String = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_EMBEDDING_TEXT)
        .collect();

    let now = Utc::now().fixed_offset();
    email::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        google_message_id: Set(message.id.clone()),
        thread_id: Set(message.thread_id.clone()),
        subject: Set(subject),
        sender_email: Set(sender.as_ref().map(|s| s.email.clone())),
        sender_name: Set(sender.and_then(|s| s.name)),
        recipients: Set(mailboxes_json(&recipients)),
        cc: Set(mailboxes_json(&cc)),
        content: Set((!content.is_empty()).then_some(content)),
        html_content: Set(html),
        snippet: Set(Some(snippet)),
        labels: Set(json!(message.label_ids)),
        is_read: Set(!message.has_label("UNREAD")),
        is_starred: Set(message.has_label("STARRED")),
        is_important: Set(message.has_label("IMPORTANT")),
        is_trash: Set(message.has_label("TRASH")),
        received_at: Set(received_at(message).map(|d| d.fixed_offset())),
        embedding_text: Set((!embedding_text.is_empty()).then_some(embedding_text)),
        embedding: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

enum Listing {
    /// Page through `users/me/messages`
    Mailbox,
    /// Fetch a known id list; the cursor is an offset into it
    Ids(Vec<String>),
}

/// Lists message ids and fetches each message in full
pub struct GmailSource {
    client: GmailClient,
    access_token: String,
    listing: Listing,
}

impl GmailSource {
    pub fn mailbox(client: GmailClient, access_token: String) -> Self {
        Self {
            client,
            access_token,
            listing: Listing::Mailbox,
        }
    }

    pub fn ids(client: GmailClient, access_token: String, ids: Vec<String>) -> Self {
        Self {
            client,
            access_token,
            listing: Listing::Ids(ids),
        }
    }

    async fn fetch_all(&self, ids: Vec<String>) -> (Vec<GmailMessage>, u64) {
        let results: Vec<Result<GmailMessage, ProviderError>> = stream::iter(ids)
            .map(|id| async move { self.client.get_message(&self.access_token, &id).await })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut messages = Vec::with_capacity(results.len());
        let mut skipped = 0;
        for result in results {
            match result {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(error = %e, "Skipping Gmail message that could not be fetched");
                    skipped += 1;
                }
            }
        }
        (messages, skipped)
    }
}

#[async_trait]
impl RecordSource for GmailSource {
    type Record = GmailMessage;

    fn name(&self) -> &str {
        SOURCE
    }

    async fn next_chunk(
        &mut self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Chunk<GmailMessage>, SyncError> {
        let (ids, next_cursor) = match &self.listing {
            Listing::Mailbox => {
                let page = self
                    .client
                    .list_message_ids(&self.access_token, cursor, page_size)
                    .await?;
                (page.ids, page.next_page_token)
            }
            Listing::Ids(all) => {
                let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
                let end = (start + page_size).min(all.len());
                let ids = all.get(start..end).map(<[String]>::to_vec).unwrap_or_default();
                (ids, (end < all.len()).then(|| end.to_string()))
            }
        };

        let (records, skipped) = self.fetch_all(ids).await;
        Ok(Chunk {
            records,
            skipped,
            next_cursor,
        })
    }
}

pub struct EmailSink {
    emails: EmailRepository,
    user_id: Uuid,
}

impl EmailSink {
    pub fn new(emails: EmailRepository, user_id: Uuid) -> Self {
        Self { emails, user_id }
    }
}

#[async_trait]
impl RecordSink<GmailMessage> for EmailSink {
    async fn upsert(
        &self,
        records: Vec<GmailMessage>,
    ) -> Result<Vec<EmbeddingCandidate>, SyncError> {
        let rows = records
            .iter()
            .map(|m| email_row(self.user_id, m))
            .collect();
        let saved = self.emails.upsert_many(self.user_id, rows).await?;
        Ok(saved
            .into_iter()
            .filter_map(|row| {
                row.embedding_text.map(|text| EmbeddingCandidate {
                    content_type: ContentType::Email,
                    content_id: row.id,
                    text,
                })
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GmailSyncReport {
    pub mode: String,
    pub outcome: SyncOutcome,
    /// Messages marked deleted from history records
    pub deleted: u64,
    pub history_id: Option<String>,
}

pub struct GmailSync {
    client: GmailClient,
    emails: EmailRepository,
    integrations: IntegrationRepository,
    runs: SyncRunRepository,
    queue: EmbeddingQueueRepository,
    tuning: SyncConfig,
}

impl GmailSync {
    pub fn new(
        client: GmailClient,
        emails: EmailRepository,
        integrations: IntegrationRepository,
        runs: SyncRunRepository,
        queue: EmbeddingQueueRepository,
        tuning: SyncConfig,
    ) -> Self {
        Self {
            client,
            emails,
            integrations,
            runs,
            queue,
            tuning,
        }
    }

    fn options(&self, enable_embeddings: bool) -> SyncOptions {
        SyncOptions {
            page_size: self.tuning.gmail_chunk_size,
            max_records: self.tuning.max_messages,
            chunk_delay: Duration::from_millis(self.tuning.chunk_delay_ms),
            enqueue_embeddings: enable_embeddings,
            start_cursor: None,
        }
    }

    /// Refetches the whole mailbox, ignoring any stored `historyId`.
    #[instrument(skip(self, token), fields(user_id = %user_id))]
    pub async fn nuclear(
        &self,
        user_id: Uuid,
        token: &ResolvedToken,
        enable_embeddings: bool,
    ) -> Result<GmailSyncReport, SyncError> {
        let mut source = GmailSource::mailbox(self.client.clone(), token.access_token.clone());
        let sink = EmailSink::new(self.emails.clone(), user_id);
        let mut outcome = run_recorded(
            &self.runs,
            Some(user_id),
            MODE_FULL,
            &mut source,
            &sink,
            Some(&self.queue),
            &self.options(enable_embeddings),
        )
        .await?;

        // Only a clean run may move the watermark
        let mut history_id = None;
        if outcome.is_ok() {
            match self.client.get_profile(&token.access_token).await {
                Ok(profile) => history_id = Some(profile.history_id),
                Err(e) => {
                    warn!(error = %e, "Could not read Gmail profile after full sync");
                    outcome.errors.push(e.to_string());
                }
            }
        }
        let mut patch = json!({
            "lastFullSyncAt": Utc::now().to_rfc3339(),
            "totalMessagesSynced": outcome.saved,
        });
        if let Some(history_id) = &history_id {
            patch["historyId"] = json!(history_id);
        }
        self.integrations
            .record_sync(token.integration.id, patch)
            .await?;

        info!(saved = outcome.saved, skipped = outcome.skipped, "Gmail full sync finished");
        Ok(GmailSyncReport {
            mode: MODE_FULL.to_string(),
            outcome,
            deleted: 0,
            history_id,
        })
    }

    /// Replays history since the stored `historyId`; falls back to a full sync without one.
    #[instrument(skip(self, token), fields(user_id = %user_id))]
    pub async fn incremental(
        &self,
        user_id: Uuid,
        token: &ResolvedToken,
        enable_embeddings: bool,
    ) -> Result<GmailSyncReport, SyncError> {
        let stored = token
            .integration
            .metadata
            .as_ref()
            .and_then(|m| m.get("historyId"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
        let Some(start_history_id) = stored else {
            info!("No Gmail historyId stored; running full sync");
            return self.nuclear(user_id, token, enable_embeddings).await;
        };

        let mut added = BTreeSet::new();
        let mut deleted = BTreeSet::new();
        let mut latest_history_id = start_history_id.clone();
        let mut page_token: Option<String> = None;
        loop {
            let page = match self
                .client
                .list_history(&token.access_token, &start_history_id, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(ProviderError::NotFound { .. }) => {
                    warn!("Gmail historyId expired; running full sync");
                    return self.nuclear(user_id, token, enable_embeddings).await;
                }
                Err(e) => return Err(e.into()),
            };
            for record in page.history {
                added.extend(record.messages_added.into_iter().map(|c| c.message.id));
                deleted.extend(record.messages_deleted.into_iter().map(|c| c.message.id));
            }
            if let Some(id) = page.history_id {
                latest_history_id = id;
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        let to_fetch: Vec<String> = added.difference(&deleted).cloned().collect();
        let deleted: Vec<String> = deleted.into_iter().collect();

        let mut source =
            GmailSource::ids(self.client.clone(), token.access_token.clone(), to_fetch);
        let sink = EmailSink::new(self.emails.clone(), user_id);
        let outcome = run_recorded(
            &self.runs,
            Some(user_id),
            MODE_INCREMENTAL,
            &mut source,
            &sink,
            Some(&self.queue),
            &self.options(enable_embeddings),
        )
        .await?;
        let marked = self.emails.mark_deleted(user_id, &deleted).await?;

        let history_id = outcome.is_ok().then_some(latest_history_id);
        let mut patch = json!({ "lastIncrementalSyncAt": Utc::now().to_rfc3339() });
        if let Some(history_id) = &history_id {
            patch["historyId"] = json!(history_id);
        }
        self.integrations
            .record_sync(token.integration.id, patch)
            .await?;

        info!(saved = outcome.saved, deleted = marked, "Gmail incremental sync finished");
        Ok(GmailSyncReport {
            mode: MODE_INCREMENTAL.to_string(),
            outcome,
            deleted: marked,
            history_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(value: Value) -> GmailMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_named_and_bare_addresses() {
        assert_eq!(
            parse_mailbox("\"Diaz, Ana\" <Ana@Example.com>"),
            Mailbox {
                name: Some("Diaz, Ana".into()),
                email: "ana@example.com".into()
            }
        );
        assert_eq!(
            parse_mailbox(" bob@example.com "),
            Mailbox {
                name: None,
                email: "bob@example.com".into()
            }
        );
        let list = parse_mailbox_list(Some("a@x.io, Carol <carol@x.io>, undisclosed-recipients:;"));
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].name.as_deref(), Some("Carol"));
    }

    #[test]
    fn html_only_message_gets_stripped_content() {
        let html = base64_url::encode("<p>Hello <b>there</b></p>");
        let row = email_row(
            Uuid::new_v4(),
            &message(json!({
                "id": "m1",
                "threadId": "t1",
                "labelIds": ["INBOX", "STARRED"],
                "internalDate": "1735689600000",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [
                        { "name": "Subject", "value": "Quarterly review" },
                        { "name": "From", "value": "Ana <ana@example.com>" },
                        { "name": "To", "value": "ops@example.com" }
                    ],
                    "parts": [{ "mimeType": "text/html", "body": { "data": html } }]
                }
            })),
        );

        assert_eq!(row.content.clone().unwrap().as_deref(), Some("Hello there"));
        assert_eq!(row.snippet.clone().unwrap().as_deref(), Some("Hello there"));
        assert!(row.is_read.clone().unwrap());
        assert!(row.is_starred.clone().unwrap());
        assert_eq!(row.sender_name.clone().unwrap().as_deref(), Some("Ana"));
        assert_eq!(
            row.received_at.clone().unwrap().map(|d| d.timestamp()),
            Some(1_735_689_600)
        );
        let text = row.embedding_text.clone().unwrap().unwrap();
        assert!(text.starts_with("Quarterly review Hello there ana@example.com Ana"));
        assert!(text.contains("ops@example.com"));
    }

    #[test]
    fn date_header_wins_over_internal_date() {
        let m = message(json!({
            "id": "m2",
            "labelIds": ["UNREAD"],
            "internalDate": "0",
            "payload": {
                "mimeType": "text/plain",
                "headers": [{ "name": "Date", "value": "Tue, 1 Jul 2025 10:00:00 +0200" }],
                "body": { "data": base64_url::encode("plain body") }
            }
        }));
        let row = email_row(Uuid::new_v4(), &m);
        assert!(!row.is_read.clone().unwrap());
        assert_eq!(row.content.clone().unwrap().as_deref(), Some("plain body"));
        let received = row.received_at.clone().unwrap().unwrap();
        assert_eq!(received.to_rfc3339(), "2025-07-01T08:00:00+00:00");
    }
}
