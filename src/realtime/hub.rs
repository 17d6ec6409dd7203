// src/realtime/hub.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;
use crate::models::auth::Role;
use crate::models::community::Audience;
use crate::models::message::Conversation;
use crate::services::messaging::MessageView;

pub type ConnectionId = Uuid;

pub const COUNSELORS_ROOM: &str = "counselors";
pub const PATIENTS_ROOM: &str = "patients";

pub fn user_room(user_id: i32) -> String {
    format!("user:{}", user_id)
}

pub fn conversation_room(conversation_id: i32) -> String {
    format!("conversation:{}", conversation_id)
}

/// Shared room a role joins on connect. Admins only get their user room.
pub fn role_room(role: Role) -> Option<&'static str> {
    match role {
        Role::Counselor => Some(COUNSELORS_ROOM),
        Role::Patient => Some(PATIENTS_ROOM),
        Role::Admin => None,
    }
}

/// Rooms that receive a community event: the audience rooms plus the
/// author's own user room.
pub fn community_targets(audience: Audience, author_id: i32) -> Vec<String> {
    let mut rooms: Vec<String> = match audience {
        Audience::Patients => vec![PATIENTS_ROOM.to_string()],
        Audience::Counselors => vec![COUNSELORS_ROOM.to_string()],
        Audience::All => vec![PATIENTS_ROOM.to_string(), COUNSELORS_ROOM.to_string()],
    };
    rooms.push(user_room(author_id));
    rooms
}

/// In-process room registry for WebSocket connections. Each connection owns
/// an unbounded channel drained by its socket task; emits never block.
#[derive(Default)]
pub struct RoomHub {
    connections: Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>>,
    rooms: Arc<RwLock<HashMap<String, HashSet<ConnectionId>>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sender: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.write().await.insert(id, sender);
        tracing::debug!(connection = %id, "registered realtime connection");
        id
    }

    /// Drops the connection and removes it from every room.
    pub async fn unregister(&self, id: ConnectionId) {
        self.connections.write().await.remove(&id);
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        tracing::debug!(connection = %id, "unregistered realtime connection");
    }

    pub async fn join(&self, id: ConnectionId, room: impl Into<String>) {
        self.rooms.write().await.entry(room.into()).or_default().insert(id);
    }

    pub async fn leave(&self, id: ConnectionId, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map(HashSet::len).unwrap_or(0)
    }

    /// Sends `event` once to every connection in any of `rooms`.
    /// Returns how many connections accepted the frame.
    pub async fn emit(&self, rooms: &[String], event: &ServerEvent) -> usize {
        self.emit_filtered(rooms, None, event).await
    }

    pub async fn emit_to(&self, room: &str, event: &ServerEvent) -> usize {
        self.emit_filtered(&[room.to_string()], None, event).await
    }

    /// Like `emit_to`, skipping the originating connection.
    pub async fn emit_except(&self, room: &str, except: ConnectionId, event: &ServerEvent) -> usize {
        self.emit_filtered(&[room.to_string()], Some(except), event).await
    }

    /// Sends straight to one connection, bypassing rooms.
    pub async fn send_direct(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = event.name(), "failed to encode realtime event: {}", e);
                return false;
            }
        };
        let connections = self.connections.read().await;
        connections
            .get(&id)
            .map(|sender| sender.send(frame).is_ok())
            .unwrap_or(false)
    }

    /// Fans a stored message out: `new-message` to the conversation room,
    /// `message-notification` to the receiver's user room.
    pub async fn deliver_message(&self, message: MessageView, conversation: Conversation) {
        let receiver_id = message.message.receiver_id;
        let notification = ServerEvent::MessageNotification {
            conversation_id: conversation.id,
            unread_count: conversation.unread_for(receiver_id),
            message: message.clone(),
        };
        let room = conversation_room(conversation.id);

        self.emit_to(&room, &ServerEvent::NewMessage { message, conversation }).await;
        self.emit_to(&user_room(receiver_id), &notification).await;
    }

    async fn emit_filtered(
        &self,
        rooms: &[String],
        except: Option<ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = event.name(), "failed to encode realtime event: {}", e);
                return 0;
            }
        };

        let targets: HashSet<ConnectionId> = {
            let registry = self.rooms.read().await;
            rooms
                .iter()
                .filter_map(|room| registry.get(room))
                .flatten()
                .copied()
                .filter(|id| Some(*id) != except)
                .collect()
        };

        let connections = self.connections.read().await;
        let mut delivered = 0;
        for id in targets {
            match connections.get(&id) {
                Some(sender) if sender.send(frame.clone()).is_ok() => delivered += 1,
                Some(_) => tracing::warn!(connection = %id, event = event.name(), "realtime receiver dropped"),
                None => {}
            }
        }

        tracing::debug!(event = event.name(), delivered, "emitted realtime event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(hub: &RoomHub) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.register(tx).await, rx)
    }

    #[tokio::test]
    async fn test_emit_reaches_room_members_once() {
        let hub = RoomHub::new();
        let (patient, mut patient_rx) = connect(&hub).await;
        let (counselor, mut counselor_rx) = connect(&hub).await;

        hub.join(patient, PATIENTS_ROOM).await;
        hub.join(patient, user_room(1)).await;
        hub.join(counselor, COUNSELORS_ROOM).await;

        let event = ServerEvent::CommunityPostDeleted { post_id: 3 };
        let delivered = hub.emit(&community_targets(Audience::Patients, 1), &event).await;

        assert_eq!(delivered, 1);
        assert!(patient_rx.try_recv().unwrap().contains("community:post-deleted"));
        assert!(patient_rx.try_recv().is_err());
        assert!(counselor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_except_skips_sender() {
        let hub = RoomHub::new();
        let (a, mut a_rx) = connect(&hub).await;
        let (b, mut b_rx) = connect(&hub).await;
        let room = conversation_room(42);
        hub.join(a, room.clone()).await;
        hub.join(b, room.clone()).await;

        let event = ServerEvent::UserTyping {
            user_id: 1,
            conversation_id: 42,
        };
        assert_eq!(hub.emit_except(&room, a, &event).await, 1);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unregister_cleans_rooms() {
        let hub = RoomHub::new();
        let (a, _a_rx) = connect(&hub).await;
        hub.join(a, COUNSELORS_ROOM).await;
        hub.join(a, conversation_room(1)).await;
        assert_eq!(hub.room_size(COUNSELORS_ROOM).await, 1);

        hub.leave(a, &conversation_room(1)).await;
        assert_eq!(hub.room_size(&conversation_room(1)).await, 0);

        hub.unregister(a).await;
        assert_eq!(hub.room_size(COUNSELORS_ROOM).await, 0);
        let event = ServerEvent::error("gone");
        assert_eq!(hub.emit_to(COUNSELORS_ROOM, &event).await, 0);
        assert!(!hub.send_direct(a, &event).await);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_skipped() {
        let hub = RoomHub::new();
        let (a, a_rx) = connect(&hub).await;
        hub.join(a, user_room(9)).await;
        drop(a_rx);

        let event = ServerEvent::error("nobody listening");
        assert_eq!(hub.emit_to(&user_room(9), &event).await, 0);
    }

    #[test]
    fn test_room_names() {
        assert_eq!(user_room(5), "user:5");
        assert_eq!(conversation_room(8), "conversation:8");
        assert_eq!(role_room(Role::Admin), None);
        assert_eq!(
            community_targets(Audience::All, 2),
            vec!["patients".to_string(), "counselors".to_string(), "user:2".to_string()]
        );
    }
}
