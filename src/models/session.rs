use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

string_enum! {
    pub enum SessionStatus {
        Requested => "requested",
        Scheduled => "scheduled",
        InProgress => "in-progress",
        Completed => "completed",
        Cancelled => "cancelled",
        Rescheduled => "rescheduled",
    }
}

impl SessionStatus {
    /// Statuses that hold a counselor's slot.
    pub const ACTIVE: [SessionStatus; 3] = [
        SessionStatus::Requested,
        SessionStatus::Scheduled,
        SessionStatus::InProgress,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Rescheduled
        )
    }

    /// requested → scheduled → in-progress → completed/cancelled/rescheduled.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (current, next) if *current == next => true,
            (Requested, Scheduled) | (Requested, Cancelled) => true,
            (Scheduled, InProgress)
            | (Scheduled, Completed)
            | (Scheduled, Cancelled)
            | (Scheduled, Rescheduled) => true,
            (InProgress, Completed) | (InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

string_enum! {
    pub enum SessionType {
        Individual => "individual",
        Group => "group",
        Family => "family",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: SessionStatus,
    pub changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_by: Option<i32>,
}

impl StatusHistoryEntry {
    pub fn now(status: SessionStatus, changed_by: Option<i32>) -> Self {
        StatusHistoryEntry {
            status,
            changed_at: Utc::now(),
            changed_by,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i32,
    #[serde(rename = "counselor")]
    pub counselor_id: i32,
    #[serde(rename = "patient")]
    pub patient_id: i32,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: String,
    pub duration: i32,
    pub status: SessionStatus,
    pub session_type: SessionType,
    pub notes: String,
    pub session_summary: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub requested_by: Option<i32>,
    pub confirmed_by: Option<i32>,
    pub requested_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub request_notes: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: String,
    pub rescheduled_from: Option<i32>,
    pub rescheduled_to: Option<i32>,
    pub status_history: Json<Vec<StatusHistoryEntry>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub patient_id: Option<i32>,
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub duration: Option<i32>,
    pub session_type: Option<SessionType>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSessionRequest {
    pub counselor_id: Option<i32>,
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub duration: Option<i32>,
    pub session_type: Option<SessionType>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub duration: Option<i32>,
    pub status: Option<SessionStatus>,
    pub notes: Option<String>,
    pub session_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub duration: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSessionRequest {
    pub cancellation_reason: Option<String>,
}

string_enum! {
    pub enum RequestDecision {
        Accept => "accept",
        Decline => "decline",
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondToRequest {
    pub action: RequestDecision,
    pub notes: Option<String>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::SessionStatus::*;

    #[test]
    fn test_active_statuses() {
        assert!(Requested.is_active());
        assert!(Scheduled.is_active());
        assert!(InProgress.is_active());
        assert!(!Completed.is_active());
        assert!(!Rescheduled.is_active());
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Requested.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Rescheduled));

        assert!(!Requested.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Scheduled));
        assert!(!Cancelled.can_transition_to(Requested));
        assert!(!InProgress.can_transition_to(Rescheduled));
    }
}
