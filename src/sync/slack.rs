//! Slack channel import

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::connectors::SlackClient;
use crate::connectors::slack::{HISTORY_PAGE_LIMIT, SlackMessage};
use crate::models::conversation;
use crate::repositories::sync_run::MODE_FULL;
use crate::repositories::{MessageRepository, SyncRunRepository};

use super::conversation::{ChatMessage, ConversationSink};
use super::periskope::ImportResult;
use super::{Chunk, RecordSource, SyncError, SyncOptions, run_recorded};

const SOURCE: &str = "slack";

/// Slack `ts` values are `<seconds>.<microseconds>`
pub fn parse_ts(ts: &str) -> Option<DateTimeWithTimeZone> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs = secs.parse::<i64>().ok()?;
    let micros = format!("{:0<6}", frac).get(..6)?.parse::<u32>().ok()?;
    DateTime::from_timestamp(secs, micros * 1000).map(|dt| dt.fixed_offset())
}

pub fn chat_message(channel: &str, message: &SlackMessage) -> ChatMessage {
    ChatMessage {
        // ts is only unique within a channel
        platform_message_id: format!("{}:{}", channel, message.ts),
        content: message.text.clone(),
        sender_id: message.user.clone().or_else(|| message.bot_id.clone()),
        is_from_me: false,
        timestamp: parse_ts(&message.ts),
        metadata: Some(json!({
            "channel": channel,
            "ts": message.ts,
            "subtype": message.subtype,
            "threadTs": message.thread_ts,
        })),
    }
}

pub struct SlackSource {
    client: SlackClient,
    token: Option<String>,
    channel: String,
}

impl SlackSource {
    pub fn new(client: SlackClient, token: Option<String>, channel: String) -> Self {
        Self {
            client,
            token,
            channel,
        }
    }
}

#[async_trait]
impl RecordSource for SlackSource {
    type Record = ChatMessage;

    fn name(&self) -> &str {
        SOURCE
    }

    async fn next_chunk(
        &mut self,
        cursor: Option<&str>,
        _page_size: usize,
    ) -> Result<Chunk<ChatMessage>, SyncError> {
        let page = self
            .client
            .conversation_history(self.token.as_deref(), &self.channel, cursor)
            .await?;
        Ok(Chunk {
            records: page
                .messages
                .iter()
                .map(|m| chat_message(&self.channel, m))
                .collect(),
            skipped: 0,
            next_cursor: page.next_cursor.filter(|c| !c.is_empty()),
        })
    }
}

pub struct SlackImport {
    client: SlackClient,
    messages: MessageRepository,
    runs: SyncRunRepository,
    tuning: SyncConfig,
}

impl SlackImport {
    pub fn new(
        client: SlackClient,
        messages: MessageRepository,
        runs: SyncRunRepository,
        tuning: SyncConfig,
    ) -> Self {
        Self {
            client,
            messages,
            runs,
            tuning,
        }
    }

    #[instrument(skip(self, token, conversation), fields(channel = %conversation.external_chat_id))]
    pub async fn import(
        &self,
        user_id: Uuid,
        conversation: &conversation::Model,
        token: Option<String>,
    ) -> Result<ImportResult, SyncError> {
        let mut source = SlackSource::new(
            self.client.clone(),
            token,
            conversation.external_chat_id.clone(),
        );
        let sink = ConversationSink::new(
            self.messages.clone(),
            user_id,
            conversation.id,
            &conversation.platform_type,
        );
        let options = SyncOptions {
            page_size: HISTORY_PAGE_LIMIT as usize,
            max_records: self.tuning.max_messages,
            chunk_delay: Duration::from_millis(self.tuning.chunk_delay_ms),
            enqueue_embeddings: false,
            start_cursor: None,
        };
        let outcome = run_recorded(
            &self.runs,
            Some(user_id),
            MODE_FULL,
            &mut source,
            &sink,
            None,
            &options,
        )
        .await?;

        info!(saved = outcome.saved, "Slack import finished");
        Ok(ImportResult {
            imported_count: outcome.saved,
            fetched: outcome.fetched,
            skipped: outcome.skipped,
            conversation_id: conversation.id,
            errors: outcome.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slack_timestamps() {
        let ts = parse_ts("1700000000.000100").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_micros(), 100);
        assert_eq!(parse_ts("1700000000").unwrap().timestamp(), 1_700_000_000);
        assert!(parse_ts("not-a-ts").is_none());
    }

    #[test]
    fn message_ids_are_scoped_to_the_channel() {
        let message: SlackMessage = serde_json::from_value(json!({
            "ts": "1700000000.000100",
            "bot_id": "B1",
            "text": "deploy finished"
        }))
        .unwrap();
        let chat = chat_message("C42", &message);
        assert_eq!(chat.platform_message_id, "C42:1700000000.000100");
        assert_eq!(chat.sender_id.as_deref(), Some("B1"));
    }
}
