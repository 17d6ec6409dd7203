// src/handlers/socket.rs
use super::non_empty;
use crate::errors::{ApiError, ApiResult};
use crate::middleware::auth::{authenticate, bearer_token};
use crate::models::auth::{AuthUser, Role};
use crate::models::message::Conversation;
use crate::realtime::events::OutgoingMessage;
use crate::realtime::hub::{conversation_room, role_room, user_room, ConnectionId};
use crate::realtime::{ClientEvent, ServerEvent};
use crate::services::messaging::{
    append_message, find_conversation, find_or_create_conversation, mark_conversation_read, MessageView,
};
use crate::services::participants::load_participants;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn socket_routes() -> Router {
    Router::new().route("/ws", get(socket_handler))
}

#[derive(Deserialize)]
struct SocketQuery {
    token: Option<String>,
}

/// Authenticates before upgrading; a bad token never gets a socket.
async fn socket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketQuery>,
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Response> {
    let token = match non_empty(params.token.as_deref()) {
        Some(token) => token,
        None => bearer_token(&headers)
            .map_err(|_| ApiError::Unauthorized("Authentication error".to_string()))?
            .to_string(),
    };
    let user = authenticate(&state, &token).await?;
    let auth = AuthUser::from(&user);

    Ok(ws.on_upgrade(move |socket| run_socket(socket, state, auth)))
}

async fn run_socket(stream: WebSocket, state: Arc<AppState>, auth: AuthUser) {
    let (mut sender, mut receiver) = stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection = state.hub.register(tx).await;
    state.hub.join(connection, user_room(auth.id)).await;
    if let Some(room) = role_room(auth.role) {
        state.hub.join(connection, room).await;
    }
    tracing::info!(user_id = auth.id, role = %auth.role, connection = %connection, "socket connected");

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(frame) => {
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let result = match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => handle_event(&state, connection, &auth, event).await,
                        Err(e) => {
                            tracing::debug!(user_id = auth.id, "unparseable socket frame: {}", e);
                            Err(ApiError::bad_request("Invalid event payload"))
                        }
                    };
                    if let Err(err) = result {
                        state.hub.send_direct(connection, &ServerEvent::error(client_message(&err))).await;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unregister(connection).await;
    tracing::info!(user_id = auth.id, connection = %connection, "socket disconnected");
}

/// Text sent back in an `error` frame. Storage failures stay generic.
fn client_message(err: &ApiError) -> String {
    match err {
        ApiError::Database(e) => {
            tracing::error!("socket event failed: {}", e);
            "Internal server error".to_string()
        }
        ApiError::Internal { context, detail } => {
            tracing::error!("{}: {}", context, detail);
            context.clone()
        }
        other => other.to_string(),
    }
}

async fn handle_event(state: &AppState, connection: ConnectionId, auth: &AuthUser, event: ClientEvent) -> ApiResult<()> {
    match event {
        ClientEvent::JoinConversation(target) => {
            let conversation = participant_conversation(state, target.id(), auth.id).await?;
            state.hub.join(connection, conversation_room(conversation.id)).await;
        }
        ClientEvent::LeaveConversation(target) => {
            state.hub.leave(connection, &conversation_room(target.id())).await;
        }
        ClientEvent::SendMessage(outgoing) => send_message(state, auth, outgoing).await?,
        ClientEvent::Typing(target) => {
            let conversation = participant_conversation(state, target.id(), auth.id).await?;
            let event = ServerEvent::UserTyping {
                user_id: auth.id,
                conversation_id: conversation.id,
            };
            state.hub.emit_except(&conversation_room(conversation.id), connection, &event).await;
        }
        ClientEvent::StopTyping(target) => {
            let conversation = participant_conversation(state, target.id(), auth.id).await?;
            let event = ServerEvent::UserStopTyping {
                user_id: auth.id,
                conversation_id: conversation.id,
            };
            state.hub.emit_except(&conversation_room(conversation.id), connection, &event).await;
        }
        ClientEvent::MarkRead(target) => {
            let conversation = participant_conversation(state, target.id(), auth.id).await?;
            let mut conn = state.db_pool.acquire().await?;
            mark_conversation_read(&mut conn, &conversation, auth.id).await?;
            drop(conn);

            let event = ServerEvent::MessagesRead {
                conversation_id: conversation.id,
                user_id: auth.id,
            };
            state.hub.emit_to(&conversation_room(conversation.id), &event).await;
        }
    }
    Ok(())
}

async fn participant_conversation(state: &AppState, conversation_id: i32, user_id: i32) -> ApiResult<Conversation> {
    let mut conn = state.db_pool.acquire().await?;
    let conversation = find_conversation(&mut conn, conversation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    if !conversation.includes(user_id) {
        return Err(ApiError::forbidden("You are not a participant in this conversation"));
    }
    Ok(conversation)
}

/// Orders a sender/receiver pair as `(counselor_id, patient_id)`.
fn conversation_pair(sender: (Role, i32), receiver: (Role, i32)) -> ApiResult<(i32, i32)> {
    match (sender, receiver) {
        ((Role::Counselor, counselor), (Role::Patient, patient))
        | ((Role::Patient, patient), (Role::Counselor, counselor)) => Ok((counselor, patient)),
        _ => Err(ApiError::bad_request(
            "Messages can only be exchanged between a counselor and a patient",
        )),
    }
}

async fn send_message(state: &AppState, auth: &AuthUser, outgoing: OutgoingMessage) -> ApiResult<()> {
    let content = non_empty(outgoing.content.as_deref())
        .ok_or_else(|| ApiError::bad_request("Message content is required"))?;

    let conversation = match (outgoing.conversation_id, outgoing.receiver_id) {
        (Some(conversation_id), _) => participant_conversation(state, conversation_id.0, auth.id).await?,
        (None, Some(receiver_id)) => {
            let receiver_role = sqlx::query_scalar::<_, Role>("SELECT role FROM users WHERE id = $1 AND is_active = true")
                .bind(receiver_id.0)
                .fetch_optional(&state.db_pool)
                .await?
                .ok_or_else(|| ApiError::not_found("Receiver not found"))?;

            let (counselor_id, patient_id) = conversation_pair((auth.role, auth.id), (receiver_role, receiver_id.0))?;
            let mut conn = state.db_pool.acquire().await?;
            find_or_create_conversation(&mut conn, counselor_id, patient_id).await?
        }
        (None, None) => return Err(ApiError::bad_request("conversationId or receiverId is required")),
    };

    let mut tx = state.db_pool.begin().await?;
    let (message, conversation) = append_message(&mut tx, &conversation, auth.id, &content).await?;
    tx.commit().await?;

    let people = load_participants(&state.db_pool, &[message.sender_id, message.receiver_id]).await?;
    let view = MessageView::new(message, &people);

    tracing::debug!(conversation_id = conversation.id, sender = auth.id, "message sent over socket");
    state.hub.deliver_message(view, conversation).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_pair_orders_roles() {
        assert_eq!(
            conversation_pair((Role::Counselor, 1), (Role::Patient, 2)).unwrap(),
            (1, 2)
        );
        assert_eq!(
            conversation_pair((Role::Patient, 2), (Role::Counselor, 1)).unwrap(),
            (1, 2)
        );
        assert!(conversation_pair((Role::Patient, 2), (Role::Patient, 3)).is_err());
        assert!(conversation_pair((Role::Admin, 9), (Role::Patient, 3)).is_err());
    }

    #[test]
    fn test_client_message_hides_storage_errors() {
        let err = ApiError::Database(sqlx::Error::RowNotFound);
        assert_eq!(client_message(&err), "Internal server error");
        assert_eq!(
            client_message(&ApiError::forbidden("You are not a participant in this conversation")),
            "You are not a participant in this conversation"
        );
    }
}
