//! Google Calendar v3 client

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "google_calendar";

/// Largest page the events endpoint accepts
pub const MAX_EVENTS_PAGE: u32 = 2500;

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: Option<DateTime<FixedOffset>>,
    /// All-day events carry `YYYY-MM-DD` instead of a timestamp
    pub date: Option<String>,
}

impl EventDateTime {
    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }

    /// Instant of this boundary; all-day dates resolve to UTC midnight.
    pub fn resolve(&self) -> Option<DateTime<FixedOffset>> {
        if let Some(dt) = self.date_time {
            return Some(dt);
        }
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        let midnight = date.and_hms_opt(0, 0, 0)?;
        Some(Utc.from_utc_datetime(&midnight).fixed_offset())
    }
}

/// Event resource as returned by `events.list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResource {
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventDateTime>,
    pub end: Option<EventDateTime>,
    #[serde(default)]
    pub attendees: Vec<Value>,
    pub organizer: Option<Value>,
    pub visibility: Option<String>,
    pub conference_data: Option<Value>,
    pub recurring_event_id: Option<String>,
    #[serde(rename = "iCalUID")]
    pub ical_uid: Option<String>,
    pub sequence: Option<i32>,
    pub event_type: Option<String>,
}

impl EventResource {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }
}

/// Page of events plus either a page token or, on the last page, the sync token
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    #[serde(default)]
    pub items: Vec<EventResource>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

/// Paging input for `events.list`
#[derive(Debug, Clone, Default)]
pub struct EventsQuery<'a> {
    pub page_token: Option<&'a str>,
    pub sync_token: Option<&'a str>,
    pub max_results: u32,
}

#[derive(Debug, Clone)]
pub struct CalendarClient {
    http: Client,
    base_url: String,
}

impl CalendarClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn events_url(&self, calendar_id: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ProviderError::decode(PROVIDER, e))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::decode(PROVIDER, "calendar base URL cannot be a base"))?
            .pop_if_empty()
            .extend(["calendars", calendar_id, "events"]);
        Ok(url)
    }

    /// Lists every calendar on the user's calendar list.
    pub async fn list_calendars(
        &self,
        access_token: &str,
    ) -> Result<Vec<CalendarListEntry>, ProviderError> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::network(PROVIDER, e))?;
            let body: CalendarListResponse = read_json(PROVIDER, response).await?;

            calendars.extend(body.items);
            match body.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(calendars)
    }

    /// Lists one page of expanded (single) events.
    ///
    /// With a sync token only changes since that token are returned, including cancellations;
    /// an expired token yields [`ProviderError::Gone`].
    pub async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        query: &EventsQuery<'_>,
    ) -> Result<EventsPage, ProviderError> {
        let url = self.events_url(calendar_id)?;
        let max_results = query.max_results.clamp(1, MAX_EVENTS_PAGE).to_string();

        let mut request = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("singleEvents", "true"), ("maxResults", max_results.as_str())]);
        if let Some(token) = query.page_token {
            request = request.query(&[("pageToken", token)]);
        }
        if let Some(token) = query.sync_token {
            request = request.query(&[("syncToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn all_day_dates_resolve_to_utc_midnight() {
        let boundary = EventDateTime {
            date_time: None,
            date: Some("2025-02-14".to_string()),
        };
        assert!(boundary.is_all_day());
        assert_eq!(
            boundary.resolve().unwrap().to_rfc3339(),
            "2025-02-14T00:00:00+00:00"
        );
    }

    #[test]
    fn event_resource_parses_google_field_names() {
        let event: EventResource = serde_json::from_value(json!({
            "id": "e1",
            "status": "confirmed",
            "iCalUID": "e1@google.com",
            "start": { "dateTime": "2025-02-14T09:00:00-05:00" },
            "end": { "dateTime": "2025-02-14T10:00:00-05:00" },
            "attendees": [{ "email": "a@example.com" }]
        }))
        .unwrap();
        assert_eq!(event.ical_uid.as_deref(), Some("e1@google.com"));
        assert!(!event.start.unwrap().is_all_day());
        assert_eq!(event.attendees.len(), 1);
    }

    #[tokio::test]
    async fn calendar_ids_are_path_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/en.usa%23holiday@group.v.calendar.google.com/events"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("maxResults", "2500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": "e1", "start": { "date": "2025-01-01" } }],
                "nextSyncToken": "sync-1"
            })))
            .mount(&server)
            .await;

        let client = CalendarClient::new(server.uri());
        let page = client
            .list_events(
                "token",
                "en.usa#holiday@group.v.calendar.google.com",
                &EventsQuery {
                    max_results: MAX_EVENTS_PAGE,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_sync_token.as_deref(), Some("sync-1"));
    }

    #[tokio::test]
    async fn expired_sync_token_is_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(410).set_body_string("fullSyncRequired"))
            .mount(&server)
            .await;

        let client = CalendarClient::new(server.uri());
        let err = client
            .list_events(
                "token",
                "primary",
                &EventsQuery {
                    sync_token: Some("stale"),
                    max_results: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_gone());
    }
}
