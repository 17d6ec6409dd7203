use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::auth::Role;

string_enum! {
    pub enum MessageType {
        Text => "text",
        Image => "image",
        Document => "document",
        System => "system",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i32,
    #[serde(rename = "counselor")]
    pub counselor_id: i32,
    #[serde(rename = "patient")]
    pub patient_id: i32,
    pub last_message_id: Option<i32>,
    pub last_message_at: DateTime<Utc>,
    pub unread_counselor: i32,
    pub unread_patient: i32,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn includes(&self, user_id: i32) -> bool {
        self.counselor_id == user_id || self.patient_id == user_id
    }

    /// The other side of the conversation for a sender with `role`.
    pub fn counterpart_of(&self, role: Role) -> i32 {
        if role == Role::Counselor {
            self.patient_id
        } else {
            self.counselor_id
        }
    }

    /// Unread counter as seen by `user_id`.
    pub fn unread_for(&self, user_id: i32) -> i32 {
        if self.counselor_id == user_id {
            self.unread_counselor
        } else {
            self.unread_patient
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i32,
    #[serde(rename = "conversation")]
    pub conversation_id: i32,
    #[serde(rename = "sender")]
    pub sender_id: i32,
    #[serde(rename = "receiver")]
    pub receiver_id: i32,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: Option<i32>,
    pub patient_id: Option<i32>,
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        let now = Utc::now();
        Conversation {
            id: 1,
            counselor_id: 10,
            patient_id: 20,
            last_message_id: None,
            last_message_at: now,
            unread_counselor: 3,
            unread_patient: 5,
            is_archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_counterpart_and_unread() {
        let conv = conversation();
        assert_eq!(conv.counterpart_of(Role::Counselor), 20);
        assert_eq!(conv.counterpart_of(Role::Patient), 10);
        assert_eq!(conv.unread_for(10), 3);
        assert_eq!(conv.unread_for(20), 5);
        assert!(conv.includes(20));
        assert!(!conv.includes(30));
    }
}
