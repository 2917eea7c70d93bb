//! Google Calendar mirror
//!
//! Every calendar on the user's list is paged independently. A full sync skips cancelled
//! events; an incremental sync replays changes from the calendar's stored `syncToken` and marks
//! cancelled events. A calendar whose token expired (HTTP 410) is fully resynced. One calendar's
//! failure is recorded in its result entry and never stops the others.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::Set;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::connectors::CalendarClient;
use crate::connectors::google_calendar::{
    CalendarListEntry, EventResource, EventsQuery, MAX_EVENTS_PAGE,
};
use crate::models::calendar_event;
use crate::models::embedding_queue::ContentType;
use crate::repositories::sync_run::{MODE_FULL, MODE_INCREMENTAL};
use crate::repositories::{
    CalendarEventRepository, EmbeddingQueueRepository, IntegrationRepository, SyncRunRepository,
};
use crate::token_refresh::ResolvedToken;

use super::{
    Chunk, EmbeddingCandidate, RecordSink, RecordSource, SyncError, SyncOptions, SyncOutcome,
    run_recorded,
};

const SOURCE: &str = "google_calendar";
const MAX_EMBEDDING_DESCRIPTION: usize = 1000;
const MAX_EMBEDDING_TEXT: usize = 4000;
const SYNC_TOKENS_KEY: &str = "calendarSyncTokens";

fn attendee_label(attendee: &Value) -> Option<String> {
    let email = attendee.get("email").and_then(Value::as_str).unwrap_or_default();
    let name = attendee
        .get("displayName")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let label = format!("{} {}", name, email).trim().to_string();
    (!label.is_empty()).then_some(label)
}

/// Maps an event to a row; `None` when the event has no usable start.
pub fn event_row(
    user_id: Uuid,
    calendar_id: &str,
    calendar_name: Option<&str>,
    event: &EventResource,
) -> Option<calendar_event::ActiveModel> {
    let start = event.start.as_ref()?;
    let start_time = start.resolve()?;
    let end_time = event.end.as_ref().and_then(|e| e.resolve());

    let mut parts: Vec<String> = Vec::new();
    parts.extend(event.summary.clone());
    parts.extend(
        event
            .description
            .as_deref()
            .map(|d| d.chars().take(MAX_EMBEDDING_DESCRIPTION).collect()),
    );
    parts.extend(event.location.clone());
    parts.push(
        event
            .attendees
            .iter()
            .filter_map(attendee_label)
            .collect::<Vec<_>>()
            .join(" "),
    );
    parts.extend(calendar_name.map(str::to_string));
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
    Some(calendar_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        google_event_id: Set(event.id.clone()),
        calendar_id: Set(calendar_id.to_string()),
        calendar_name: Set(calendar_name.map(str::to_string)),
        summary: Set(event.summary.clone()),
        description: Set(event.description.clone()),
        location: Set(event.location.clone()),
        start_time: Set(start_time),
        end_time: Set(end_time),
        is_all_day: Set(start.is_all_day()),
        event_type: Set(event.event_type.clone()),
        attendees: Set(Value::Array(event.attendees.clone())),
        organizer: Set(event.organizer.clone()),
        status: Set(event.status.clone()),
        visibility: Set(event.visibility.clone()),
        conference_data: Set(event.conference_data.clone()),
        recurring_event_id: Set(event.recurring_event_id.clone()),
        ical_uid: Set(event.ical_uid.clone()),
        sequence: Set(event.sequence),
        embedding_text: Set((!embedding_text.is_empty()).then_some(embedding_text)),
        embedding: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    })
}

/// Pages one calendar's events
pub struct CalendarSource {
    client: CalendarClient,
    access_token: String,
    calendar_id: String,
    sync_token: Option<String>,
    /// Token returned on the last page
    pub next_sync_token: Option<String>,
    /// Ids of events reported cancelled during an incremental pass
    pub cancelled: Vec<String>,
    /// The stored sync token was rejected with 410
    pub token_expired: bool,
}

impl CalendarSource {
    pub fn new(
        client: CalendarClient,
        access_token: String,
        calendar_id: String,
        sync_token: Option<String>,
    ) -> Self {
        Self {
            client,
            access_token,
            calendar_id,
            sync_token,
            next_sync_token: None,
            cancelled: Vec::new(),
            token_expired: false,
        }
    }
}

#[async_trait]
impl RecordSource for CalendarSource {
    type Record = EventResource;

    fn name(&self) -> &str {
        SOURCE
    }

    async fn next_chunk(
        &mut self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Chunk<EventResource>, SyncError> {
        let query = EventsQuery {
            page_token: cursor,
            sync_token: self.sync_token.as_deref(),
            max_results: page_size.min(MAX_EVENTS_PAGE as usize) as u32,
        };
        let page = match self
            .client
            .list_events(&self.access_token, &self.calendar_id, &query)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.token_expired = e.is_gone() && self.sync_token.is_some();
                return Err(e.into());
            }
        };

        let mut records = Vec::with_capacity(page.items.len());
        let mut skipped = 0;
        for event in page.items {
            if event.is_cancelled() {
                if self.sync_token.is_some() {
                    self.cancelled.push(event.id);
                } else {
                    skipped += 1;
                }
            } else if event.start.is_none() {
                skipped += 1;
            } else {
                records.push(event);
            }
        }
        if page.next_sync_token.is_some() {
            self.next_sync_token = page.next_sync_token;
        }
        Ok(Chunk {
            records,
            skipped,
            next_cursor: page.next_page_token,
        })
    }
}

pub struct CalendarEventSink {
    events: CalendarEventRepository,
    user_id: Uuid,
    calendar_id: String,
    calendar_name: Option<String>,
}

#[async_trait]
impl RecordSink<EventResource> for CalendarEventSink {
    async fn upsert(
        &self,
        records: Vec<EventResource>,
    ) -> Result<Vec<EmbeddingCandidate>, SyncError> {
        let rows = records
            .iter()
            .filter_map(|e| {
                event_row(
                    self.user_id,
                    &self.calendar_id,
                    self.calendar_name.as_deref(),
                    e,
                )
            })
            .collect();
        let saved = self.events.upsert_many(self.user_id, rows).await?;
        Ok(saved
            .into_iter()
            .filter_map(|row| {
                row.embedding_text.map(|text| EmbeddingCandidate {
                    content_type: ContentType::CalendarEvent,
                    content_id: row.id,
                    text,
                })
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalendarResult {
    pub calendar_id: String,
    pub calendar_name: Option<String>,
    pub mode: String,
    pub outcome: Option<SyncOutcome>,
    pub cancelled: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSyncReport {
    pub calendars: Vec<CalendarResult>,
    pub total_saved: u64,
    pub errors: Vec<String>,
}

pub struct CalendarSync {
    client: CalendarClient,
    events: CalendarEventRepository,
    integrations: IntegrationRepository,
    runs: SyncRunRepository,
    queue: EmbeddingQueueRepository,
    tuning: SyncConfig,
}

impl CalendarSync {
    pub fn new(
        client: CalendarClient,
        events: CalendarEventRepository,
        integrations: IntegrationRepository,
        runs: SyncRunRepository,
        queue: EmbeddingQueueRepository,
        tuning: SyncConfig,
    ) -> Self {
        Self {
            client,
            events,
            integrations,
            runs,
            queue,
            tuning,
        }
    }

    /// Full resync of every calendar.
    #[instrument(skip(self, token), fields(user_id = %user_id))]
    pub async fn nuclear(
        &self,
        user_id: Uuid,
        token: &ResolvedToken,
        enable_embeddings: bool,
    ) -> Result<CalendarSyncReport, SyncError> {
        self.sync_all(user_id, token, enable_embeddings, BTreeMap::new())
            .await
    }

    /// Replays changes from stored sync tokens; calendars without one get a full sync.
    #[instrument(skip(self, token), fields(user_id = %user_id))]
    pub async fn incremental(
        &self,
        user_id: Uuid,
        token: &ResolvedToken,
        enable_embeddings: bool,
    ) -> Result<CalendarSyncReport, SyncError> {
        let stored = stored_sync_tokens(token.integration.metadata.as_ref());
        self.sync_all(user_id, token, enable_embeddings, stored).await
    }

    async fn sync_all(
        &self,
        user_id: Uuid,
        token: &ResolvedToken,
        enable_embeddings: bool,
        stored_tokens: BTreeMap<String, String>,
    ) -> Result<CalendarSyncReport, SyncError> {
        let calendars = self.client.list_calendars(&token.access_token).await?;
        info!(calendars = calendars.len(), "Syncing calendars");

        let mut report = CalendarSyncReport::default();
        let mut new_tokens = BTreeMap::new();
        for calendar in &calendars {
            let stored = stored_tokens.get(&calendar.id).cloned();
            let (result, next_token) = self
                .sync_calendar(user_id, token, calendar, stored, enable_embeddings)
                .await;

            if let Some(outcome) = &result.outcome {
                report.total_saved += outcome.saved;
                report
                    .errors
                    .extend(outcome.errors.iter().map(|e| format!("{}: {}", calendar.id, e)));
            }
            if let Some(error) = &result.error {
                report.errors.push(format!("{}: {}", calendar.id, error));
            }
            match next_token {
                Some(next) => {
                    new_tokens.insert(calendar.id.clone(), next);
                }
                // keep the old token so the next pass retries from the same point
                None => {
                    if let Some(old) = stored_tokens.get(&calendar.id) {
                        new_tokens.insert(calendar.id.clone(), old.clone());
                    }
                }
            }
            report.calendars.push(result);
        }

        let mut patch = json!({ SYNC_TOKENS_KEY: new_tokens });
        let stamp_key = if stored_tokens.is_empty() {
            "lastFullSyncAt"
        } else {
            "lastIncrementalSyncAt"
        };
        patch[stamp_key] = json!(Utc::now().to_rfc3339());
        self.integrations
            .record_sync(token.integration.id, patch)
            .await?;

        info!(
            total_saved = report.total_saved,
            errors = report.errors.len(),
            "Calendar sync finished"
        );
        Ok(report)
    }

    /// Syncs one calendar; never fails, errors land in the result entry.
    async fn sync_calendar(
        &self,
        user_id: Uuid,
        token: &ResolvedToken,
        calendar: &CalendarListEntry,
        sync_token: Option<String>,
        enable_embeddings: bool,
    ) -> (CalendarResult, Option<String>) {
        let mut result = CalendarResult {
            calendar_id: calendar.id.clone(),
            calendar_name: calendar.summary.clone(),
            mode: if sync_token.is_some() {
                MODE_INCREMENTAL
            } else {
                MODE_FULL
            }
            .to_string(),
            outcome: None,
            cancelled: 0,
            error: None,
        };

        let mut attempt = sync_token;
        loop {
            let incremental = attempt.is_some();
            let mut source = CalendarSource::new(
                self.client.clone(),
                token.access_token.clone(),
                calendar.id.clone(),
                attempt.take(),
            );
            let sink = CalendarEventSink {
                events: self.events.clone(),
                user_id,
                calendar_id: calendar.id.clone(),
                calendar_name: calendar.summary.clone(),
            };
            let options = SyncOptions {
                page_size: MAX_EVENTS_PAGE as usize,
                max_records: self.tuning.max_events,
                chunk_delay: Duration::from_millis(self.tuning.chunk_delay_ms),
                enqueue_embeddings: enable_embeddings,
                start_cursor: None,
            };
            let mode = if incremental { MODE_INCREMENTAL } else { MODE_FULL };

            let outcome = match run_recorded(
                &self.runs,
                Some(user_id),
                mode,
                &mut source,
                &sink,
                Some(&self.queue),
                &options,
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    result.error = Some(e.to_string());
                    return (result, None);
                }
            };

            if source.token_expired {
                warn!(calendar_id = %calendar.id, "Calendar sync token expired; resyncing");
                result.mode = MODE_FULL.to_string();
                continue;
            }

            match self.events.mark_cancelled(user_id, &source.cancelled).await {
                Ok(marked) => result.cancelled = marked,
                Err(e) => result.error = Some(e.to_string()),
            }
            let next_token = if outcome.is_ok() {
                source.next_sync_token.take()
            } else {
                None
            };
            result.outcome = Some(outcome);
            return (result, next_token);
        }
    }
}

fn stored_sync_tokens(metadata: Option<&Value>) -> BTreeMap<String, String> {
    metadata
        .and_then(|m| m.get(SYNC_TOKENS_KEY))
        .and_then(Value::as_object)
        .map(|tokens| {
            tokens
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|t| (k.clone(), t.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(value: Value) -> EventResource {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn all_day_event_maps_to_midnight_utc() {
        let row = event_row(
            Uuid::new_v4(),
            "primary",
            Some("Work"),
            &event(json!({
                "id": "e1",
                "summary": "Offsite",
                "start": { "date": "2025-05-01" },
                "end": { "date": "2025-05-02" },
                "attendees": [{ "email": "ana@example.com", "displayName": "Ana" }]
            })),
        )
        .unwrap();

        assert!(row.is_all_day.clone().unwrap());
        assert_eq!(
            row.start_time.clone().unwrap().to_rfc3339(),
            "2025-05-01T00:00:00+00:00"
        );
        assert_eq!(
            row.embedding_text.clone().unwrap().as_deref(),
            Some("Offsite Ana ana@example.com Work")
        );
    }

    #[test]
    fn event_without_start_is_dropped() {
        assert!(event_row(Uuid::new_v4(), "primary", None, &event(json!({ "id": "e2" }))).is_none());
    }

    #[test]
    fn stored_tokens_ignore_non_string_values() {
        let tokens = stored_sync_tokens(Some(&json!({
            "calendarSyncTokens": { "primary": "tok-1", "broken": 5 }
        })));
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens["primary"], "tok-1");
        assert!(stored_sync_tokens(None).is_empty());
    }
}
