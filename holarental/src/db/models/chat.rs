//! Database models for conversations and messages.

use crate::types::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationDBResponse {
    pub id: ConversationId,
    pub participant_a: UserId,
    pub participant_b: UserId,
    /// The participant who is not the viewer
    pub participant_id: UserId,
    pub participant_username: String,
    pub participant_display_name: Option<String>,
    pub participant_avatar_url: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ConversationDBResponse {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageDBResponse {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Participants in storage order: the smaller id first.
pub fn ordered_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a < b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ordered_pair_is_symmetric() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
        let (first, second) = ordered_pair(a, b);
        assert!(first < second);
    }
}
