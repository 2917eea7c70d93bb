//! WhatsApp import through Periskope
//!
//! Pages a chat with offset/limit and upserts into `messages` keyed on
//! (user_id, platform_type, platform_message_id).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::connectors::PeriskopeClient;
use crate::connectors::periskope::{PAGE_LIMIT, PeriskopeMessage};
use crate::models::conversation;
use crate::repositories::sync_run::MODE_FULL;
use crate::repositories::{MessageRepository, SyncRunRepository};

use super::conversation::{ChatMessage, ConversationSink};
use super::{Chunk, RecordSource, SyncError, SyncOptions, run_recorded};

const SOURCE: &str = "periskope";

/// Maps a Periskope message; `None` when it has no usable id.
pub fn chat_message(message: &PeriskopeMessage) -> Option<ChatMessage> {
    let id = message.platform_id()?;
    Some(ChatMessage {
        platform_message_id: id.to_string(),
        content: message.body.clone().unwrap_or_default(),
        sender_id: message.sender_phone.clone(),
        is_from_me: message.from_me,
        timestamp: message.timestamp,
        metadata: Some(json!({
            "chatId": message.chat_id,
            "messageType": message.message_type,
            "orgId": message.org_id,
            "uniqueId": message.unique_id,
            "ack": message.ack,
        })),
    })
}

pub struct PeriskopeSource {
    client: PeriskopeClient,
    api_key: String,
    chat_id: String,
}

impl PeriskopeSource {
    pub fn new(client: PeriskopeClient, api_key: String, chat_id: String) -> Self {
        Self {
            client,
            api_key,
            chat_id,
        }
    }
}

#[async_trait]
impl RecordSource for PeriskopeSource {
    type Record = ChatMessage;

    fn name(&self) -> &str {
        SOURCE
    }

    async fn next_chunk(
        &mut self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Chunk<ChatMessage>, SyncError> {
        let offset = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
        let limit = (page_size as u32).clamp(1, PAGE_LIMIT);
        let page = self
            .client
            .list_messages(&self.api_key, &self.chat_id, offset, limit)
            .await?;

        let listed = page.messages.len() as u64;
        let records: Vec<ChatMessage> = page.messages.iter().filter_map(chat_message).collect();
        let skipped = listed - records.len() as u64;
        if skipped > 0 {
            warn!(chat_id = %self.chat_id, skipped, "Skipping Periskope messages without id");
        }

        let next_offset = offset + listed;
        let more = match page.count {
            Some(total) => next_offset < total,
            None => listed == u64::from(limit),
        };
        Ok(Chunk {
            records,
            skipped,
            next_cursor: (more && listed > 0).then(|| next_offset.to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub imported_count: u64,
    pub fetched: u64,
    pub skipped: u64,
    pub conversation_id: Uuid,
    pub errors: Vec<String>,
}

pub struct PeriskopeImport {
    client: PeriskopeClient,
    messages: MessageRepository,
    runs: SyncRunRepository,
    tuning: SyncConfig,
}

impl PeriskopeImport {
    pub fn new(
        client: PeriskopeClient,
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

    #[instrument(skip(self, api_key, conversation), fields(conversation_id = %conversation.id))]
    pub async fn import(
        &self,
        user_id: Uuid,
        conversation: &conversation::Model,
        api_key: &str,
    ) -> Result<ImportResult, SyncError> {
        let mut source = PeriskopeSource::new(
            self.client.clone(),
            api_key.to_string(),
            conversation.external_chat_id.clone(),
        );
        let sink = ConversationSink::new(
            self.messages.clone(),
            user_id,
            conversation.id,
            &conversation.platform_type,
        );
        let options = SyncOptions {
            page_size: PAGE_LIMIT as usize,
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

        info!(saved = outcome.saved, fetched = outcome.fetched, "WhatsApp import finished");
        Ok(ImportResult {
            imported_count: outcome.saved,
            fetched: outcome.fetched,
            skipped: outcome.skipped,
            conversation_id: conversation.id,
            errors: outcome.errors,
        })
    }
}
