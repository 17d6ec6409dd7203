// src/realtime/mod.rs
pub mod events;
pub mod hub;

pub use events::{ClientEvent, ServerEvent};
pub use hub::RoomHub;
