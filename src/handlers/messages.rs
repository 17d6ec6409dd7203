use super::{non_empty, Pagination};
use crate::errors::{ApiError, ApiResult};
use crate::middleware::{auth::auth_middleware, roles::counselor_only};
use crate::models::auth::AuthUser;
use crate::models::message::{Conversation, Message, SendMessageRequest};
use crate::realtime::hub::conversation_room;
use crate::realtime::ServerEvent;
use crate::services::messaging::{
    append_message, find_conversation, find_or_create_conversation, mark_conversation_read, MessageView,
};
use crate::services::participants::{load_participants, ParticipantSummary};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post, put, Router},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: i64 = 50;

pub fn message_routes() -> Router {
    Router::new()
        .route("/api/messages/conversations", get(list_conversations))
        .route("/api/messages/conversations/:id", get(get_or_create_conversation))
        .route("/api/messages/conversations/:id/messages", get(list_messages))
        .route("/api/messages/conversations/:id/read", put(mark_read))
        .route("/api/messages/send", post(send_message))
        .layer(from_fn(counselor_only))
        .layer(from_fn(auth_middleware))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationView {
    #[serde(flatten)]
    conversation: Conversation,
    patient_details: Option<ParticipantSummary>,
    last_message: Option<Message>,
    unread_count: i32,
}

#[derive(Debug, Deserialize)]
struct ConversationSearch {
    search: Option<String>,
}

async fn patient_exists(pool: &PgPool, patient_id: i32) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND role = 'patient')")
        .bind(patient_id)
        .fetch_one(pool)
        .await
}

/// Loads a conversation the counselor is part of: 404 when missing, 403
/// when it belongs to someone else.
async fn owned_conversation(pool: &PgPool, conversation_id: i32, counselor_id: i32) -> ApiResult<Conversation> {
    let mut conn = pool.acquire().await?;
    let conversation = find_conversation(&mut conn, conversation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    if conversation.counselor_id != counselor_id {
        return Err(ApiError::forbidden("You do not have access to this conversation"));
    }
    Ok(conversation)
}

async fn message_views(pool: &PgPool, messages: Vec<Message>) -> Result<Vec<MessageView>, sqlx::Error> {
    let ids: Vec<i32> = messages.iter().flat_map(|m| [m.sender_id, m.receiver_id]).collect();
    let people = load_participants(pool, &ids).await?;
    Ok(messages.into_iter().map(|m| MessageView::new(m, &people)).collect())
}

async fn list_conversations(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ConversationSearch>,
) -> ApiResult<Json<Value>> {
    let pattern = non_empty(query.search.as_deref()).map(|s| format!("%{}%", s));

    let conversations = sqlx::query_as::<_, Conversation>(
        r#"
        SELECT c.*
        FROM conversations c
        JOIN users u ON u.id = c.patient_id
        LEFT JOIN profiles p ON p.user_id = u.id
        WHERE c.counselor_id = $1
          AND ($2::TEXT IS NULL OR u.email ILIKE $2 OR p.first_name ILIKE $2 OR p.last_name ILIKE $2)
        ORDER BY c.last_message_at DESC
        "#,
    )
    .bind(auth.id)
    .bind(pattern)
    .fetch_all(&state.db_pool)
    .await?;

    let last_ids: Vec<i32> = conversations.iter().filter_map(|c| c.last_message_id).collect();
    let mut last_messages: HashMap<i32, Message> = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ANY($1)")
        .bind(&last_ids)
        .fetch_all(&state.db_pool)
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    let patient_ids: Vec<i32> = conversations.iter().map(|c| c.patient_id).collect();
    let people = load_participants(&state.db_pool, &patient_ids).await?;

    let views: Vec<ConversationView> = conversations
        .into_iter()
        .map(|conversation| ConversationView {
            patient_details: people.get(&conversation.patient_id).cloned(),
            last_message: conversation.last_message_id.and_then(|id| last_messages.remove(&id)),
            unread_count: conversation.unread_for(auth.id),
            conversation,
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": views.len(),
        "data": views,
    })))
}

async fn get_or_create_conversation(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    if !patient_exists(&state.db_pool, patient_id).await? {
        return Err(ApiError::not_found("Patient not found"));
    }

    let mut conn = state.db_pool.acquire().await?;
    let conversation = find_or_create_conversation(&mut conn, auth.id, patient_id).await?;
    drop(conn);

    let people = load_participants(&state.db_pool, &[patient_id]).await?;

    Ok(Json(json!({
        "success": true,
        "data": ConversationView {
            patient_details: people.get(&patient_id).cloned(),
            last_message: None,
            unread_count: conversation.unread_for(auth.id),
            conversation,
        }
    })))
}

async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(conversation_id): Path<i32>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let conversation = owned_conversation(&state.db_pool, conversation_id, auth.id).await?;

    let mut messages = sqlx::query_as::<_, Message>(
        r#"
        SELECT * FROM messages
        WHERE conversation_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(conversation.id)
    .bind(pagination.limit(DEFAULT_PAGE_SIZE))
    .bind(pagination.offset(DEFAULT_PAGE_SIZE))
    .fetch_all(&state.db_pool)
    .await?;
    messages.reverse();

    let mut conn = state.db_pool.acquire().await?;
    let marked = mark_conversation_read(&mut conn, &conversation, auth.id).await?;
    drop(conn);

    if marked > 0 {
        let event = ServerEvent::MessagesRead {
            conversation_id: conversation.id,
            user_id: auth.id,
        };
        state.hub.emit_to(&conversation_room(conversation.id), &event).await;
    }

    let messages = message_views(&state.db_pool, messages).await?;
    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "data": messages,
    })))
}

async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let content = non_empty(payload.content.as_deref());
    let content = match (content, payload.conversation_id, payload.patient_id) {
        (Some(content), Some(_), _) | (Some(content), None, Some(_)) => content,
        _ => {
            return Err(ApiError::bad_request(
                "Content and either conversationId or patientId are required",
            ))
        }
    };

    let conversation = match payload.conversation_id {
        Some(conversation_id) => {
            let mut conn = state.db_pool.acquire().await?;
            find_conversation(&mut conn, conversation_id)
                .await?
                .filter(|c| c.counselor_id == auth.id)
                .ok_or_else(|| ApiError::not_found("Conversation not found"))?
        }
        None => {
            let patient_id = payload.patient_id.unwrap_or_default();
            if !patient_exists(&state.db_pool, patient_id).await? {
                return Err(ApiError::not_found("Patient not found"));
            }
            let mut conn = state.db_pool.acquire().await?;
            find_or_create_conversation(&mut conn, auth.id, patient_id).await?
        }
    };

    let mut tx = state.db_pool.begin().await?;
    let (message, conversation) = append_message(&mut tx, &conversation, auth.id, &content).await?;
    tx.commit().await?;

    let view = message_views(&state.db_pool, vec![message])
        .await?
        .pop()
        .ok_or_else(|| ApiError::Internal {
            context: "Error sending message".to_string(),
            detail: "stored message could not be reloaded".to_string(),
        })?;

    tracing::debug!(conversation_id = conversation.id, sender = auth.id, "message sent over REST");
    state.hub.deliver_message(view.clone(), conversation).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Message sent successfully",
            "data": view,
        })),
    ))
}

async fn mark_read(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(conversation_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let conversation = owned_conversation(&state.db_pool, conversation_id, auth.id)
        .await
        .map_err(|err| match err {
            ApiError::Forbidden(_) => ApiError::not_found("Conversation not found"),
            other => other,
        })?;

    let mut conn = state.db_pool.acquire().await?;
    let marked = mark_conversation_read(&mut conn, &conversation, auth.id).await?;
    drop(conn);

    let event = ServerEvent::MessagesRead {
        conversation_id: conversation.id,
        user_id: auth.id,
    };
    state.hub.emit_to(&conversation_room(conversation.id), &event).await;

    Ok(Json(json!({
        "success": true,
        "message": "Messages marked as read",
        "count": marked,
    })))
}
