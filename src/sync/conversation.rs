//! Shared sink for chat imports (WhatsApp and Slack)

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::Set;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value;
use uuid::Uuid;

use crate::models::message;
use crate::repositories::MessageRepository;

use super::{EmbeddingCandidate, RecordSink, SyncError};

pub const PLATFORM_WHATSAPP: &str = "whatsapp";
pub const PLATFORM_SLACK: &str = "slack";

/// A provider message normalized for the `messages` table
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub platform_message_id: String,
    pub content: String,
    pub sender_id: Option<String>,
    pub is_from_me: bool,
    pub timestamp: Option<DateTimeWithTimeZone>,
    pub metadata: Option<Value>,
}

/// Upserts into one conversation and moves its `last_message_at` forward
pub struct ConversationSink {
    messages: MessageRepository,
    user_id: Uuid,
    conversation_id: Uuid,
    platform_type: String,
}

impl ConversationSink {
    pub fn new(
        messages: MessageRepository,
        user_id: Uuid,
        conversation_id: Uuid,
        platform_type: &str,
    ) -> Self {
        Self {
            messages,
            user_id,
            conversation_id,
            platform_type: platform_type.to_string(),
        }
    }

    fn row(&self, chat: ChatMessage) -> message::ActiveModel {
        let now = Utc::now().fixed_offset();
        message::ActiveModel {
            id: Set(Uuid::new_v4()),
            conversation_id: Set(self.conversation_id),
            user_id: Set(self.user_id),
            platform_type: Set(self.platform_type.clone()),
            platform_message_id: Set(chat.platform_message_id),
            content: Set(chat.content),
            sender_id: Set(chat.sender_id),
            is_from_me: Set(chat.is_from_me),
            metadata: Set(chat.metadata),
            platform_timestamp: Set(chat.timestamp),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }
}

#[async_trait]
impl RecordSink<ChatMessage> for ConversationSink {
    async fn upsert(&self, records: Vec<ChatMessage>) -> Result<Vec<EmbeddingCandidate>, SyncError> {
        let latest = records.iter().filter_map(|m| m.timestamp).max();
        let rows = records.into_iter().map(|m| self.row(m)).collect();
        self.messages.upsert_messages(rows).await?;
        if let Some(latest) = latest {
            self.messages
                .touch_conversation(self.conversation_id, latest)
                .await?;
        }
        Ok(Vec::new())
    }
}
