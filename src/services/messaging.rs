// src/services/messaging.rs
use serde::Serialize;
use sqlx::PgConnection;
use std::collections::HashMap;

use super::participants::ParticipantSummary;
use crate::models::message::{Conversation, Message};

/// Returns the conversation for the pair, creating it on first contact.
pub async fn find_or_create_conversation(
    conn: &mut PgConnection,
    counselor_id: i32,
    patient_id: i32,
) -> Result<Conversation, sqlx::Error> {
    sqlx::query_as::<_, Conversation>(
        r#"
        INSERT INTO conversations (counselor_id, patient_id)
        VALUES ($1, $2)
        ON CONFLICT (counselor_id, patient_id)
        DO UPDATE SET counselor_id = EXCLUDED.counselor_id
        RETURNING *
        "#,
    )
    .bind(counselor_id)
    .bind(patient_id)
    .fetch_one(conn)
    .await
}

pub async fn find_conversation(
    conn: &mut PgConnection,
    conversation_id: i32,
) -> Result<Option<Conversation>, sqlx::Error> {
    sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
        .bind(conversation_id)
        .fetch_optional(conn)
        .await
}

/// Stores a message from `sender_id` and bumps the receiver's unread counter.
/// Returns the message and the updated conversation.
pub async fn append_message(
    conn: &mut PgConnection,
    conversation: &Conversation,
    sender_id: i32,
    content: &str,
) -> Result<(Message, Conversation), sqlx::Error> {
    let receiver_id = if sender_id == conversation.counselor_id {
        conversation.patient_id
    } else {
        conversation.counselor_id
    };

    let message = sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (conversation_id, sender_id, receiver_id, content)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(conversation.id)
    .bind(sender_id)
    .bind(receiver_id)
    .bind(content.trim())
    .fetch_one(&mut *conn)
    .await?;

    let updated = sqlx::query_as::<_, Conversation>(
        r#"
        UPDATE conversations
        SET last_message_id = $2,
            last_message_at = NOW(),
            unread_counselor = unread_counselor + CASE WHEN counselor_id = $3 THEN 1 ELSE 0 END,
            unread_patient = unread_patient + CASE WHEN patient_id = $3 THEN 1 ELSE 0 END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(conversation.id)
    .bind(message.id)
    .bind(receiver_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((message, updated))
}

/// Marks everything addressed to `reader_id` as read and clears their
/// unread counter. Returns the number of messages updated.
pub async fn mark_conversation_read(
    conn: &mut PgConnection,
    conversation: &Conversation,
    reader_id: i32,
) -> Result<u64, sqlx::Error> {
    let updated = sqlx::query(
        r#"
        UPDATE messages
        SET is_read = true, read_at = NOW(), updated_at = NOW()
        WHERE conversation_id = $1 AND receiver_id = $2 AND is_read = false
        "#,
    )
    .bind(conversation.id)
    .bind(reader_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query(
        r#"
        UPDATE conversations
        SET unread_counselor = CASE WHEN counselor_id = $2 THEN 0 ELSE unread_counselor END,
            unread_patient = CASE WHEN patient_id = $2 THEN 0 ELSE unread_patient END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(conversation.id)
    .bind(reader_id)
    .execute(&mut *conn)
    .await?;

    Ok(updated)
}

/// A message with sender and receiver cards attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_details: Option<ParticipantSummary>,
    pub receiver_details: Option<ParticipantSummary>,
}

impl MessageView {
    pub fn new(message: Message, people: &HashMap<i32, ParticipantSummary>) -> Self {
        MessageView {
            sender_details: people.get(&message.sender_id).cloned(),
            receiver_details: people.get(&message.receiver_id).cloned(),
            message,
        }
    }
}
