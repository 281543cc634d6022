//! HTTP handlers for chat between users.
//!
//! Messages are stored first and then published to the in-process [`ChatHub`]; the
//! `/chat/stream` endpoint relays the caller's share of that feed as server-sent events.
//!
//! [`ChatHub`]: crate::realtime::ChatHub

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        Json,
        sse::{Event, KeepAlive, Sse},
    },
};
use tokio_stream::{Stream, StreamExt};

use crate::{
    AppState,
    api::models::{
        chat::{
            ConversationCreate, ConversationResponse, ListMessagesQuery, MessageCreate, MessageResponse,
            ReadReceiptResponse, preview,
        },
        pagination::{PaginatedResponse, Pagination},
        users::CurrentUser,
    },
    auth::permissions::{RequiresPermission, operation, resource},
    db::{
        handlers::{Conversations, Repository, Users},
        models::chat::ConversationDBResponse,
    },
    errors::{Error, Result},
    realtime::ChatEvent,
    types::{ConversationId, abbrev_uuid},
    validation::ValidatedJson,
};

async fn load_conversation(
    conn: &mut sqlx::PgConnection,
    id: ConversationId,
    user: &CurrentUser,
) -> Result<ConversationDBResponse> {
    Conversations::new(conn)
        .get_for_user(id, user.id)
        .await?
        .ok_or_else(|| Error::not_found("Conversation", id))
}

#[utoipa::path(
    post,
    path = "/chat/conversations",
    tag = "chat",
    summary = "Open conversation",
    description = "Open the conversation with another user, or return the existing one",
    request_body = ConversationCreate,
    responses(
        (status = 200, description = "Conversation", body = ConversationResponse),
        (status = 400, description = "Cannot open a conversation with yourself"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn open_conversation(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Conversations, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<ConversationCreate>,
) -> Result<Json<ConversationResponse>> {
    if request.participant_id == current_user.id {
        return Err(Error::bad_request("You cannot open a conversation with yourself"));
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Users::new(&mut pool_conn)
        .get_by_id(request.participant_id)
        .await?
        .ok_or_else(|| Error::not_found("User", request.participant_id))?;

    let conversation = Conversations::new(&mut pool_conn)
        .open(current_user.id, request.participant_id)
        .await?;
    Ok(Json(ConversationResponse::from(conversation)))
}

#[utoipa::path(
    get,
    path = "/chat/conversations",
    tag = "chat",
    summary = "List conversations",
    description = "The caller's contacts, most recent activity first, with unread counts",
    params(Pagination),
    responses(
        (status = 200, description = "Conversations", body = PaginatedResponse<ConversationResponse>),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    _: RequiresPermission<resource::Conversations, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<ConversationResponse>>> {
    let (skip, limit) = pagination.params();

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Conversations::new(&mut pool_conn);
    let conversations = repo.list_for_user(current_user.id, skip, limit).await?;
    let total_count = repo.count_for_user(current_user.id).await?;

    Ok(Json(PaginatedResponse::new(
        conversations.into_iter().map(ConversationResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/chat/conversations/{id}/messages",
    tag = "chat",
    summary = "List messages",
    description = "Messages newest first. Pass `before` to page back from a timestamp.",
    params(
        ("id" = uuid::Uuid, Path, description = "Conversation ID"),
        ListMessagesQuery,
    ),
    responses(
        (status = 200, description = "Messages", body = PaginatedResponse<MessageResponse>),
        (status = 404, description = "Not found or not a participant"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(conversation_id = %id))]
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Query(query): Query<ListMessagesQuery>,
    _: RequiresPermission<resource::Conversations, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<MessageResponse>>> {
    let (skip, limit) = query.pagination.params();

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    load_conversation(&mut pool_conn, id, &current_user).await?;

    let mut repo = Conversations::new(&mut pool_conn);
    let messages = repo.list_messages(id, query.before, skip, limit).await?;
    let total_count = repo.count_messages(id, query.before).await?;

    Ok(Json(PaginatedResponse::new(
        messages.into_iter().map(MessageResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/chat/conversations/{id}/messages",
    tag = "chat",
    summary = "Send message",
    params(
        ("id" = uuid::Uuid, Path, description = "Conversation ID"),
    ),
    request_body = MessageCreate,
    responses(
        (status = 201, description = "Message sent", body = MessageResponse),
        (status = 400, description = "Empty or oversized message"),
        (status = 404, description = "Not found or not a participant"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(conversation_id = %id))]
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    _: RequiresPermission<resource::Conversations, operation::CreateOwn>,
    current_user: CurrentUser,
    ValidatedJson(request): ValidatedJson<MessageCreate>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let content = request.trimmed();

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let conversation = load_conversation(&mut pool_conn, id, &current_user).await?;
    let message = Conversations::new(&mut pool_conn)
        .insert_message(id, current_user.id, content, &preview(content))
        .await?;

    let response = MessageResponse::from(message);
    let listeners = state.chat_hub.publish(ChatEvent {
        participants: (conversation.participant_a, conversation.participant_b),
        message: response.clone(),
    });
    tracing::debug!(message_id = %abbrev_uuid(&response.id), listeners, "Message published");

    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/chat/conversations/{id}/read",
    tag = "chat",
    summary = "Mark conversation read",
    description = "Mark every message from the other participant as read",
    params(
        ("id" = uuid::Uuid, Path, description = "Conversation ID"),
    ),
    responses(
        (status = 200, description = "Number of messages marked read", body = ReadReceiptResponse),
        (status = 404, description = "Not found or not a participant"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(conversation_id = %id))]
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    _: RequiresPermission<resource::Conversations, operation::UpdateOwn>,
    current_user: CurrentUser,
) -> Result<Json<ReadReceiptResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    load_conversation(&mut pool_conn, id, &current_user).await?;
    let marked_read = Conversations::new(&mut pool_conn).mark_read(id, current_user.id).await?;
    Ok(Json(ReadReceiptResponse { marked_read }))
}

#[utoipa::path(
    get,
    path = "/chat/stream",
    tag = "chat",
    summary = "Stream new messages",
    description = "Server-sent events carrying every new message in the caller's conversations. Events are named \
                   `message` and carry a MessageResponse. A client that falls behind skips missed events and should \
                   reload the messages endpoint.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 401, description = "Not authenticated"),
    ),
    security(
        ("session_token" = []),
        ("bearer_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn stream_messages(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Conversations, operation::ReadOwn>,
    current_user: CurrentUser,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    tracing::info!(user_id = %abbrev_uuid(&current_user.id), "Chat stream opened");

    let stream = state.chat_hub.subscribe(current_user.id).filter_map(|event| {
        match Event::default().event("message").json_data(&event.message) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(e) => {
                tracing::warn!("Failed to encode chat event: {e}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
