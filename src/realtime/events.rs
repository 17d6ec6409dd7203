// src/realtime/events.rs
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::models::message::Conversation;
use crate::services::messaging::MessageView;

/// Frames pushed to clients as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "new-message")]
    NewMessage {
        message: MessageView,
        conversation: Conversation,
    },
    #[serde(rename = "message-notification")]
    MessageNotification {
        conversation_id: i32,
        message: MessageView,
        unread_count: i32,
    },
    #[serde(rename = "user-typing")]
    UserTyping { user_id: i32, conversation_id: i32 },
    #[serde(rename = "user-stop-typing")]
    UserStopTyping { user_id: i32, conversation_id: i32 },
    #[serde(rename = "messages-read")]
    MessagesRead { conversation_id: i32, user_id: i32 },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "community:new-post")]
    CommunityNewPost { post: Value },
    #[serde(rename = "community:post-updated")]
    CommunityPostUpdated { post_id: i32, is_pinned: bool },
    #[serde(rename = "community:post-reacted")]
    CommunityPostReacted {
        post_id: i32,
        reaction_summary: Value,
        reacted_by: i32,
        user_reaction: Option<String>,
    },
    #[serde(rename = "community:new-comment")]
    CommunityNewComment { post_id: i32, comment: Value, comment_count: i32 },
    #[serde(rename = "community:post-deleted")]
    CommunityPostDeleted { post_id: i32 },
    #[serde(rename = "community:comment-deleted")]
    CommunityCommentDeleted {
        post_id: i32,
        comment_id: i32,
        comment_count: i32,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::MessageNotification { .. } => "message-notification",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::UserStopTyping { .. } => "user-stop-typing",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::Error { .. } => "error",
            ServerEvent::CommunityNewPost { .. } => "community:new-post",
            ServerEvent::CommunityPostUpdated { .. } => "community:post-updated",
            ServerEvent::CommunityPostReacted { .. } => "community:post-reacted",
            ServerEvent::CommunityNewComment { .. } => "community:new-comment",
            ServerEvent::CommunityPostDeleted { .. } => "community:post-deleted",
            ServerEvent::CommunityCommentDeleted { .. } => "community:comment-deleted",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An id sent either as a JSON number or as a numeric string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexibleId(pub i32);

impl<'de> Deserialize<'de> for FlexibleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        let id = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => i32::try_from(n).ok(),
            Raw::Text(s) => s.trim().parse::<i32>().ok(),
        };
        id.filter(|id| *id > 0)
            .map(FlexibleId)
            .ok_or_else(|| serde::de::Error::custom("invalid id"))
    }
}

/// `join-conversation` and friends accept the bare id or `{conversationId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ConversationRef {
    Bare(FlexibleId),
    Wrapped {
        #[serde(rename = "conversationId")]
        conversation_id: FlexibleId,
    },
}

impl ConversationRef {
    pub fn id(&self) -> i32 {
        match self {
            ConversationRef::Bare(id) => id.0,
            ConversationRef::Wrapped { conversation_id } => conversation_id.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub conversation_id: Option<FlexibleId>,
    pub receiver_id: Option<FlexibleId>,
    pub content: Option<String>,
}

/// Frames accepted from clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinConversation(ConversationRef),
    LeaveConversation(ConversationRef),
    SendMessage(OutgoingMessage),
    Typing(ConversationRef),
    StopTyping(ConversationRef),
    MarkRead(ConversationRef),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_events_parse() {
        let join: ClientEvent = serde_json::from_str(r#"{"event":"join-conversation","data":"12"}"#).unwrap();
        assert!(matches!(join, ClientEvent::JoinConversation(r) if r.id() == 12));

        let typing: ClientEvent =
            serde_json::from_str(r#"{"event":"typing","data":{"conversationId":7}}"#).unwrap();
        assert!(matches!(typing, ClientEvent::Typing(r) if r.id() == 7));

        let send: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"receiverId":"4","content":" hi "}}"#,
        )
        .unwrap();
        match send {
            ClientEvent::SendMessage(msg) => {
                assert_eq!(msg.receiver_id, Some(FlexibleId(4)));
                assert!(msg.conversation_id.is_none());
                assert_eq!(msg.content.as_deref(), Some(" hi "));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_client_events_reject_garbage() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"explode","data":1}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"mark-read","data":"abc"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"mark-read","data":-3}"#).is_err());
    }

    #[test]
    fn test_server_event_frame_shape() {
        let frame = ServerEvent::UserTyping {
            user_id: 3,
            conversation_id: 9,
        }
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "user-typing");
        assert_eq!(value["data"]["userId"], 3);
        assert_eq!(value["data"]["conversationId"], 9);

        let deleted = ServerEvent::CommunityPostDeleted { post_id: 5 };
        let value: Value = serde_json::from_str(&deleted.to_frame().unwrap()).unwrap();
        assert_eq!(value["event"], deleted.name());
        assert_eq!(value["data"]["postId"], 5);
    }
}
