//! API request/response models for conversations and messages.

use super::pagination::Pagination;
use crate::db::models::chat::{ConversationDBResponse, MessageDBResponse};
use crate::types::{ConversationId, MessageId, UserId};
use crate::validation::{Validate, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationCreate {
    #[schema(value_type = String, format = "uuid")]
    pub participant_id: UserId,
}

impl Validate for ConversationCreate {
    fn validate(&self, _v: &mut Validator) {}
}

/// One entry in the caller's contact list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ConversationId,
    #[schema(value_type = String, format = "uuid")]
    pub participant_id: UserId,
    pub participant_username: String,
    pub participant_display_name: Option<String>,
    pub participant_avatar_url: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ConversationDBResponse> for ConversationResponse {
    fn from(db: ConversationDBResponse) -> Self {
        Self {
            id: db.id,
            participant_id: db.participant_id,
            participant_username: db.participant_username,
            participant_display_name: db.participant_display_name,
            participant_avatar_url: db.participant_avatar_url,
            last_message_at: db.last_message_at,
            last_message_preview: db.last_message_preview,
            unread_count: db.unread_count,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageCreate {
    pub content: String,
}

impl MessageCreate {
    pub fn trimmed(&self) -> &str {
        self.content.trim()
    }
}

impl Validate for MessageCreate {
    fn validate(&self, v: &mut Validator) {
        v.text("content", &self.content, 1, MAX_MESSAGE_CHARS);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MessageId,
    #[schema(value_type = String, format = "uuid")]
    pub conversation_id: ConversationId,
    #[schema(value_type = String, format = "uuid")]
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<MessageDBResponse> for MessageResponse {
    fn from(db: MessageDBResponse) -> Self {
        Self {
            id: db.id,
            conversation_id: db.conversation_id,
            sender_id: db.sender_id,
            content: db.content,
            created_at: db.created_at,
            read_at: db.read_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListMessagesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    /// Only messages strictly older than this instant
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadReceiptResponse {
    /// Messages newly marked as read
    pub marked_read: u64,
}

/// Shortened message body stored on the conversation for contact lists.
pub fn preview(content: &str) -> String {
    const PREVIEW_CHARS: usize = 100;
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() { format!("{head}…") } else { head }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_bounds() {
        for (content, ok) in [
            ("   ", false),
            ("Chào anh, phòng còn trống không?", true),
            (&"a".repeat(MAX_MESSAGE_CHARS + 1), false),
        ] {
            let message = MessageCreate {
                content: content.to_string(),
            };
            assert_eq!(message.validate_request().is_ok(), ok, "{}", content.len());
        }
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("xin chào"), "xin chào");
        let long = "ư".repeat(150);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 101);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn test_before_cursor_parses_rfc3339() {
        let query: ListMessagesQuery =
            serde_urlencoded::from_str("before=2026-05-01T10:00:00Z&limit=30").unwrap();
        assert!(query.before.is_some());
        assert_eq!(query.pagination.limit(), 30);
    }
}
