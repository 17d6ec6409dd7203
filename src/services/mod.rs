// src/services/mod.rs
pub mod analytics;
pub mod availability;
pub mod messaging;
pub mod participants;
pub mod scheduling;
