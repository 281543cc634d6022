//! Database repository for chat conversations and messages.
//!
//! A conversation is one row per pair of users, stored with the smaller id in `participant_a`.
//! Reads are always made from one participant's point of view: the `participant_*` columns of
//! [`ConversationDBResponse`] describe the other user.

use crate::db::{
    errors::{DbError, Result},
    models::chat::{ConversationDBResponse, MessageDBResponse, ordered_pair},
};
use crate::types::{ConversationId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

const CONVERSATION_VIEW: &str = r#"
    SELECT
        c.id, c.participant_a, c.participant_b,
        u.id AS participant_id,
        u.username AS participant_username,
        u.display_name AS participant_display_name,
        u.avatar_url AS participant_avatar_url,
        c.last_message_at, c.last_message_preview,
        (SELECT COUNT(*) FROM messages m
            WHERE m.conversation_id = c.id AND m.sender_id <> $1 AND m.read_at IS NULL) AS unread_count,
        c.created_at
    FROM conversations c
    JOIN users u ON u.id = CASE WHEN c.participant_a = $1 THEN c.participant_b ELSE c.participant_a END
    WHERE (c.participant_a = $1 OR c.participant_b = $1)
"#;

pub struct Conversations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Conversations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Open the conversation between two users, or return the existing one.
    #[instrument(skip(self), fields(viewer = %abbrev_uuid(&viewer), other = %abbrev_uuid(&other)), err)]
    pub async fn open(&mut self, viewer: UserId, other: UserId) -> Result<ConversationDBResponse> {
        let (a, b) = ordered_pair(viewer, other);
        let id: ConversationId = sqlx::query_scalar(
            r#"
            INSERT INTO conversations (id, participant_a, participant_b)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT conversations_pair_unique
            DO UPDATE SET participant_a = EXCLUDED.participant_a
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(a)
        .bind(b)
        .fetch_one(&mut *self.db)
        .await?;

        self.get_for_user(id, viewer).await?.ok_or(DbError::NotFound)
    }

    /// The conversation, if `viewer` takes part in it.
    #[instrument(skip(self), fields(conversation_id = %abbrev_uuid(&id), viewer = %abbrev_uuid(&viewer)), err)]
    pub async fn get_for_user(&mut self, id: ConversationId, viewer: UserId) -> Result<Option<ConversationDBResponse>> {
        let conversation =
            sqlx::query_as::<_, ConversationDBResponse>(&format!("{CONVERSATION_VIEW} AND c.id = $2"))
                .bind(viewer)
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(conversation)
    }

    /// The viewer's contact list, most recent activity first.
    #[instrument(skip(self), fields(viewer = %abbrev_uuid(&viewer)), err)]
    pub async fn list_for_user(&mut self, viewer: UserId, skip: i64, limit: i64) -> Result<Vec<ConversationDBResponse>> {
        let conversations = sqlx::query_as::<_, ConversationDBResponse>(&format!(
            "{CONVERSATION_VIEW} ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id LIMIT $2 OFFSET $3"
        ))
        .bind(viewer)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(conversations)
    }

    #[instrument(skip(self), fields(viewer = %abbrev_uuid(&viewer)), err)]
    pub async fn count_for_user(&mut self, viewer: UserId) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE participant_a = $1 OR participant_b = $1")
                .bind(viewer)
                .fetch_one(&mut *self.db)
                .await?;
        Ok(count)
    }

    /// Messages newest first, optionally only those created before `before`.
    #[instrument(skip(self), fields(conversation_id = %abbrev_uuid(&id)), err)]
    pub async fn list_messages(
        &mut self,
        id: ConversationId,
        before: Option<DateTime<Utc>>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<MessageDBResponse>> {
        let messages = sqlx::query_as::<_, MessageDBResponse>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at < $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(id)
        .bind(before)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(messages)
    }

    #[instrument(skip(self), fields(conversation_id = %abbrev_uuid(&id)), err)]
    pub async fn count_messages(&mut self, id: ConversationId, before: Option<DateTime<Utc>>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at < $2)",
        )
        .bind(id)
        .bind(before)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }

    /// Store a message and bump the conversation's last activity together.
    #[instrument(skip(self, content, preview), fields(conversation_id = %abbrev_uuid(&id), sender = %abbrev_uuid(&sender_id)), err)]
    pub async fn insert_message(
        &mut self,
        id: ConversationId,
        sender_id: UserId,
        content: &str,
        preview: &str,
    ) -> Result<MessageDBResponse> {
        let mut tx = self.db.begin().await?;

        let message = sqlx::query_as::<_, MessageDBResponse>(
            "INSERT INTO messages (id, conversation_id, sender_id, content) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_at = $2, last_message_preview = $3 WHERE id = $1")
            .bind(id)
            .bind(message.created_at)
            .bind(preview)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Mark everything the other participant sent as read by `reader`.
    #[instrument(skip(self), fields(conversation_id = %abbrev_uuid(&id), reader = %abbrev_uuid(&reader)), err)]
    pub async fn mark_read(&mut self, id: ConversationId, reader: UserId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET read_at = NOW() WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(id)
        .bind(reader)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_open_is_one_conversation_per_pair(pool: PgPool) {
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let landlord = create_test_user(&pool, &[Role::Landlord]).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Conversations::new(&mut conn);

        let from_tenant = repo.open(tenant.id, landlord.id).await.unwrap();
        let from_landlord = repo.open(landlord.id, tenant.id).await.unwrap();
        let again = repo.open(tenant.id, landlord.id).await.unwrap();

        assert_eq!(from_tenant.id, from_landlord.id);
        assert_eq!(from_tenant.id, again.id);
        // Each side sees the other participant
        assert_eq!(from_tenant.participant_id, landlord.id);
        assert_eq!(from_tenant.participant_username, landlord.username);
        assert_eq!(from_landlord.participant_id, tenant.id);
        assert!(from_tenant.participant_a < from_tenant.participant_b);
        assert_eq!(repo.count_for_user(tenant.id).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unread_counts_follow_the_reader(pool: PgPool) {
        let tenant = create_test_user(&pool, &[Role::Tenant]).await;
        let landlord = create_test_user(&pool, &[Role::Landlord]).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Conversations::new(&mut conn);
        let conversation = repo.open(tenant.id, landlord.id).await.unwrap();

        repo.insert_message(conversation.id, tenant.id, "Phòng còn trống không ạ?", "Phòng còn trống không ạ?")
            .await
            .unwrap();
        repo.insert_message(conversation.id, tenant.id, "Em muốn xem phòng cuối tuần", "Em muốn xem phòng cuối tuần")
            .await
            .unwrap();

        let landlord_view = repo.get_for_user(conversation.id, landlord.id).await.unwrap().unwrap();
        assert_eq!(landlord_view.unread_count, 2);
        assert_eq!(landlord_view.last_message_preview.as_deref(), Some("Em muốn xem phòng cuối tuần"));
        let tenant_view = repo.get_for_user(conversation.id, tenant.id).await.unwrap().unwrap();
        assert_eq!(tenant_view.unread_count, 0);

        // The sender reading changes nothing; the landlord reading clears both
        assert_eq!(repo.mark_read(conversation.id, tenant.id).await.unwrap(), 0);
        assert_eq!(repo.mark_read(conversation.id, landlord.id).await.unwrap(), 2);
        let landlord_view = repo.get_for_user(conversation.id, landlord.id).await.unwrap().unwrap();
        assert_eq!(landlord_view.unread_count, 0);
    }
}
