use crate::errors::{ApiError, ApiResult};
use crate::middleware::{
    auth::auth_middleware,
    roles::{counselor_only, patient_only},
};
use crate::models::auth::AuthUser;
use crate::models::session::*;
use crate::services::participants::{load_participants, ParticipantSummary};
use crate::services::scheduling::{ensure_bookable, parse_slot_request, SlotRequest};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post, put, Router},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json as Jsonb;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_DURATION: i32 = 60;
const MAX_DURATION: i32 = 480;
const PAST_SESSIONS_LIMIT: i64 = 50;

pub fn session_routes() -> Router {
    let counselor = Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/counselor", get(list_sessions).post(create_session))
        .route("/api/sessions/counselor/:id", get(get_session))
        .route("/api/sessions/requests/:id/respond", put(respond_to_request))
        .route("/api/sessions/:id", get(get_session).put(update_session))
        .route("/api/sessions/:id/reschedule", put(reschedule_session))
        .route("/api/sessions/:id/cancel", put(cancel_session))
        .route("/api/sessions/:id/start", put(start_session))
        .layer(from_fn(counselor_only))
        .layer(from_fn(auth_middleware));

    let patient = Router::new()
        .route("/api/sessions/patient", get(list_patient_sessions))
        .route("/api/sessions/patient/request", post(request_session))
        .route("/api/sessions/patient/:id", get(get_patient_session))
        .route("/api/sessions/patient/:id/cancel", put(cancel_patient_session))
        .layer(from_fn(patient_only))
        .layer(from_fn(auth_middleware));

    counselor.merge(patient)
}

/// A session with both participants' cards attached.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub patient_details: Option<ParticipantSummary>,
    pub counselor_details: Option<ParticipantSummary>,
}

async fn with_participants(pool: &PgPool, sessions: Vec<Session>) -> Result<Vec<SessionView>, sqlx::Error> {
    let ids: Vec<i32> = sessions
        .iter()
        .flat_map(|s| [s.counselor_id, s.patient_id])
        .collect();
    let people: HashMap<i32, ParticipantSummary> = load_participants(pool, &ids).await?;

    Ok(sessions
        .into_iter()
        .map(|session| SessionView {
            patient_details: people.get(&session.patient_id).cloned(),
            counselor_details: people.get(&session.counselor_id).cloned(),
            session,
        })
        .collect())
}

async fn single_view(pool: &PgPool, session: Session) -> Result<Option<SessionView>, sqlx::Error> {
    Ok(with_participants(pool, vec![session]).await?.pop())
}

fn validate_duration(duration: Option<i32>, fallback: i32) -> ApiResult<i32> {
    let duration = duration.unwrap_or(fallback);
    if duration <= 0 || duration > MAX_DURATION {
        return Err(ApiError::bad_request(format!(
            "duration must be between 1 and {} minutes",
            MAX_DURATION
        )));
    }
    Ok(duration)
}

/// Moves `session` to `next`, stamping lifecycle timestamps and recording
/// the change in its status history.
fn apply_status(session: &mut Session, next: SessionStatus, actor: i32) -> ApiResult<()> {
    if session.status == next {
        return Ok(());
    }
    if !session.status.can_transition_to(next) {
        return Err(ApiError::bad_request(format!(
            "Cannot change session status from {} to {}",
            session.status, next
        )));
    }

    let now = Utc::now();
    match next {
        SessionStatus::Scheduled => {
            session.confirmed_by = Some(actor);
            session.confirmed_at = Some(now);
        }
        SessionStatus::InProgress => session.started_at = Some(now),
        SessionStatus::Completed => {
            session.ended_at = Some(now);
            session.completed_at = Some(now);
        }
        SessionStatus::Cancelled => session.cancelled_at = Some(now),
        SessionStatus::Requested | SessionStatus::Rescheduled => {}
    }

    session.status = next;
    session.status_history.0.push(StatusHistoryEntry::now(next, Some(actor)));
    Ok(())
}

async fn save_session(conn: &mut PgConnection, session: &Session) -> Result<Session, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        UPDATE sessions
        SET scheduled_date = $2, scheduled_time = $3, duration = $4, status = $5, notes = $6,
            session_summary = $7, completed_at = $8, confirmed_by = $9, confirmed_at = $10,
            started_at = $11, ended_at = $12, cancelled_at = $13, cancellation_reason = $14,
            rescheduled_to = $15, status_history = $16, request_notes = $17, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(session.id)
    .bind(session.scheduled_date)
    .bind(&session.scheduled_time)
    .bind(session.duration)
    .bind(session.status)
    .bind(&session.notes)
    .bind(&session.session_summary)
    .bind(session.completed_at)
    .bind(session.confirmed_by)
    .bind(session.confirmed_at)
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(session.cancelled_at)
    .bind(&session.cancellation_reason)
    .bind(session.rescheduled_to)
    .bind(&session.status_history)
    .bind(&session.request_notes)
    .fetch_one(conn)
    .await
}

struct NewSession {
    counselor_id: i32,
    patient_id: i32,
    slot: SlotRequest,
    duration: i32,
    session_type: SessionType,
    status: SessionStatus,
    notes: String,
    actor: i32,
    rescheduled_from: Option<i32>,
}

async fn insert_session(conn: &mut PgConnection, new: NewSession) -> Result<Session, sqlx::Error> {
    let now: DateTime<Utc> = Utc::now();
    let requested = new.status == SessionStatus::Requested;
    let (notes, request_notes) = if requested {
        (String::new(), new.notes)
    } else {
        (new.notes, String::new())
    };
    let history = vec![StatusHistoryEntry::now(new.status, Some(new.actor))];

    sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions (
            counselor_id, patient_id, scheduled_date, scheduled_time, duration, session_type,
            status, notes, request_notes, requested_by, requested_at, confirmed_by, confirmed_at,
            rescheduled_from, status_history
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING *
        "#,
    )
    .bind(new.counselor_id)
    .bind(new.patient_id)
    .bind(new.slot.date)
    .bind(&new.slot.time)
    .bind(new.duration)
    .bind(new.session_type)
    .bind(new.status)
    .bind(notes)
    .bind(request_notes)
    .bind(requested.then_some(new.actor))
    .bind(requested.then_some(now))
    .bind((!requested).then_some(new.actor))
    .bind((!requested).then_some(now))
    .bind(new.rescheduled_from)
    .bind(Jsonb(history))
    .fetch_one(conn)
    .await
}

async fn lock_counselor_session(conn: &mut PgConnection, session_id: i32, counselor_id: i32) -> ApiResult<Session> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 AND counselor_id = $2 FOR UPDATE")
        .bind(session_id)
        .bind(counselor_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

async fn lock_patient_session(conn: &mut PgConnection, session_id: i32, patient_id: i32) -> ApiResult<Session> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 AND patient_id = $2 FOR UPDATE")
        .bind(session_id)
        .bind(patient_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

fn session_response(message: &str, view: Option<SessionView>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": message,
        "data": view,
    }))
}

#[derive(Debug, Deserialize)]
struct SessionFilter {
    status: Option<SessionStatus>,
    #[serde(rename = "type")]
    session_type: Option<SessionType>,
}

async fn list_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<SessionFilter>,
) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;

    let Some(status) = filter.status else {
        let today = Utc::now().date_naive();
        let upcoming = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE counselor_id = $1 AND status = 'scheduled' AND scheduled_date >= $2
            ORDER BY scheduled_date ASC, scheduled_time ASC
            "#,
        )
        .bind(auth.id)
        .bind(today)
        .fetch_all(pool)
        .await?;

        let past = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE counselor_id = $1
              AND (status IN ('completed', 'cancelled') OR scheduled_date < $2)
            ORDER BY scheduled_date DESC, scheduled_time DESC
            LIMIT $3
            "#,
        )
        .bind(auth.id)
        .bind(today)
        .bind(PAST_SESSIONS_LIMIT)
        .fetch_all(pool)
        .await?;

        let requests = sqlx::query_as::<_, Session>(
            r#"
            SELECT * FROM sessions
            WHERE counselor_id = $1 AND status = 'requested'
            ORDER BY scheduled_date ASC, scheduled_time ASC
            "#,
        )
        .bind(auth.id)
        .fetch_all(pool)
        .await?;

        return Ok(Json(json!({
            "success": true,
            "data": {
                "upcoming": with_participants(pool, upcoming).await?,
                "past": with_participants(pool, past).await?,
                "requests": with_participants(pool, requests).await?,
            }
        })));
    };

    let ascending = status == SessionStatus::Scheduled || status == SessionStatus::Requested;
    let sessions = sqlx::query_as::<_, Session>(&format!(
        r#"
        SELECT * FROM sessions
        WHERE counselor_id = $1 AND status = $2 AND ($3::TEXT IS NULL OR session_type = $3)
        ORDER BY scheduled_date {order}, scheduled_time {order}
        "#,
        order = if ascending { "ASC" } else { "DESC" }
    ))
    .bind(auth.id)
    .bind(status)
    .bind(filter.session_type)
    .fetch_all(pool)
    .await?;

    let sessions = with_participants(pool, sessions).await?;
    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "data": sessions,
    })))
}

async fn get_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 AND counselor_id = $2")
        .bind(session_id)
        .bind(auth.id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    Ok(Json(json!({
        "success": true,
        "data": single_view(&state.db_pool, session).await?,
    })))
}

async fn create_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let patient_id = payload
        .patient_id
        .ok_or_else(|| ApiError::bad_request("Patient ID, scheduled date, and time are required"))?;
    let slot = parse_slot_request(payload.scheduled_date.as_deref(), payload.scheduled_time.as_deref())?;
    let duration = validate_duration(payload.duration, DEFAULT_DURATION)?;

    let patient_exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND role = 'patient')",
    )
    .bind(patient_id)
    .fetch_one(&state.db_pool)
    .await?;
    if !patient_exists {
        return Err(ApiError::not_found("Patient not found"));
    }

    let mut tx = state.db_pool.begin().await?;
    ensure_bookable(&mut tx, auth.id, &slot, None).await?;
    let session = insert_session(
        &mut tx,
        NewSession {
            counselor_id: auth.id,
            patient_id,
            slot,
            duration,
            session_type: payload.session_type.unwrap_or(SessionType::Individual),
            status: SessionStatus::Scheduled,
            notes: payload.notes.unwrap_or_default(),
            actor: auth.id,
            rescheduled_from: None,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(session_id = session.id, counselor_id = auth.id, patient_id, "session scheduled");

    let view = single_view(&state.db_pool, session).await?;
    Ok((StatusCode::CREATED, session_response("Session created successfully", view)))
}

async fn respond_to_request(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
    Json(payload): Json<RespondToRequest>,
) -> ApiResult<Json<Value>> {
    let mut tx = state.db_pool.begin().await?;
    let mut session = lock_counselor_session(&mut tx, session_id, auth.id).await?;

    if session.status != SessionStatus::Requested {
        return Err(ApiError::bad_request("Only pending session requests can be answered"));
    }

    let message = match payload.action {
        RequestDecision::Accept => {
            apply_status(&mut session, SessionStatus::Scheduled, auth.id)?;
            if let Some(notes) = super::non_empty(payload.notes.as_deref()) {
                session.notes = notes;
            }
            "Session request accepted"
        }
        RequestDecision::Decline => {
            apply_status(&mut session, SessionStatus::Cancelled, auth.id)?;
            session.cancellation_reason = super::non_empty(payload.reason.as_deref())
                .unwrap_or_else(|| "Declined by counselor".to_string());
            "Session request declined"
        }
    };

    let session = save_session(&mut tx, &session).await?;
    tx.commit().await?;

    tracing::info!(session_id, counselor_id = auth.id, action = %payload.action, "session request answered");

    let view = single_view(&state.db_pool, session).await?;
    Ok(session_response(message, view))
}

async fn update_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
    Json(payload): Json<UpdateSessionRequest>,
) -> ApiResult<Json<Value>> {
    let mut tx = state.db_pool.begin().await?;
    let mut session = lock_counselor_session(&mut tx, session_id, auth.id).await?;

    let moves_slot = payload.scheduled_date.is_some() || payload.scheduled_time.is_some();
    if moves_slot {
        let current_date = session.scheduled_date.to_string();
        let slot = parse_slot_request(
            Some(payload.scheduled_date.as_deref().unwrap_or(&current_date)),
            Some(payload.scheduled_time.as_deref().unwrap_or(&session.scheduled_time)),
        )?;
        let target_status = payload.status.unwrap_or(session.status);
        if target_status.is_active() {
            ensure_bookable(&mut tx, auth.id, &slot, Some(session.id)).await?;
        }
        session.scheduled_date = slot.date;
        session.scheduled_time = slot.time;
    }

    if payload.duration.is_some() {
        session.duration = validate_duration(payload.duration, session.duration)?;
    }
    if let Some(status) = payload.status {
        apply_status(&mut session, status, auth.id)?;
    }
    if let Some(notes) = payload.notes {
        session.notes = notes;
    }
    if let Some(summary) = payload.session_summary {
        session.session_summary = summary;
    }

    let session = save_session(&mut tx, &session).await?;
    tx.commit().await?;

    let view = single_view(&state.db_pool, session).await?;
    Ok(session_response("Session updated successfully", view))
}

async fn reschedule_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
    Json(payload): Json<RescheduleRequest>,
) -> ApiResult<Json<Value>> {
    if payload.scheduled_date.is_none() || payload.scheduled_time.is_none() {
        return Err(ApiError::bad_request("New scheduled date and time are required"));
    }
    let slot = parse_slot_request(payload.scheduled_date.as_deref(), payload.scheduled_time.as_deref())?;

    let mut tx = state.db_pool.begin().await?;
    let mut old = lock_counselor_session(&mut tx, session_id, auth.id).await?;
    let duration = validate_duration(payload.duration, old.duration)?;

    // Release the old slot first so moving within the same slot is not a conflict.
    mark_rescheduled(&mut old, auth.id)?;
    let old = save_session(&mut tx, &old).await?;

    ensure_bookable(&mut tx, auth.id, &slot, None).await?;
    let new_session = insert_session(
        &mut tx,
        NewSession {
            counselor_id: old.counselor_id,
            patient_id: old.patient_id,
            slot,
            duration,
            session_type: old.session_type,
            status: SessionStatus::Scheduled,
            notes: old.notes.clone(),
            actor: auth.id,
            rescheduled_from: Some(old.id),
        },
    )
    .await?;

    sqlx::query("UPDATE sessions SET rescheduled_to = $2, updated_at = NOW() WHERE id = $1")
        .bind(old.id)
        .bind(new_session.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(old_session = old.id, new_session = new_session.id, "session rescheduled");

    let view = single_view(&state.db_pool, new_session).await?;
    Ok(session_response("Session rescheduled successfully", view))
}

/// Only active sessions can be moved; a rescheduled row already points at
/// its replacement.
fn mark_rescheduled(session: &mut Session, actor: i32) -> ApiResult<()> {
    if !session.status.is_active() {
        return Err(ApiError::bad_request(format!(
            "Cannot reschedule a session with status {}",
            session.status
        )));
    }
    apply_status(session, SessionStatus::Rescheduled, actor)
}

fn cancel(session: &mut Session, reason: Option<String>, actor: i32) -> ApiResult<()> {
    if session.status.is_terminal() {
        return Err(ApiError::bad_request(
            "Cannot cancel a session that is already completed or cancelled",
        ));
    }
    apply_status(session, SessionStatus::Cancelled, actor)?;
    session.cancellation_reason = reason.unwrap_or_default();
    Ok(())
}

async fn cancel_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
    payload: Option<Json<CancelSessionRequest>>,
) -> ApiResult<Json<Value>> {
    let reason = payload.and_then(|Json(body)| body.cancellation_reason);

    let mut tx = state.db_pool.begin().await?;
    let mut session = lock_counselor_session(&mut tx, session_id, auth.id).await?;
    cancel(&mut session, reason, auth.id)?;
    let session = save_session(&mut tx, &session).await?;
    tx.commit().await?;

    let view = single_view(&state.db_pool, session).await?;
    Ok(session_response("Session cancelled successfully", view))
}

async fn start_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let mut tx = state.db_pool.begin().await?;
    let mut session = lock_counselor_session(&mut tx, session_id, auth.id).await?;
    if session.status != SessionStatus::Scheduled {
        return Err(ApiError::not_found("Session not found or cannot be started"));
    }

    apply_status(&mut session, SessionStatus::InProgress, auth.id)?;
    let session = save_session(&mut tx, &session).await?;
    tx.commit().await?;

    let view = single_view(&state.db_pool, session).await?;
    Ok(session_response("Session started successfully", view))
}

#[derive(Debug, Deserialize)]
struct PatientSessionFilter {
    status: Option<SessionStatus>,
}

async fn list_patient_sessions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<PatientSessionFilter>,
) -> ApiResult<Json<Value>> {
    let sessions = sqlx::query_as::<_, Session>(
        r#"
        SELECT * FROM sessions
        WHERE patient_id = $1 AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY scheduled_date DESC, scheduled_time DESC
        "#,
    )
    .bind(auth.id)
    .bind(filter.status)
    .fetch_all(&state.db_pool)
    .await?;

    let sessions = with_participants(&state.db_pool, sessions).await?;
    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "data": sessions,
    })))
}

async fn get_patient_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 AND patient_id = $2")
        .bind(session_id)
        .bind(auth.id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    Ok(Json(json!({
        "success": true,
        "data": single_view(&state.db_pool, session).await?,
    })))
}

async fn request_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<RequestSessionRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let counselor_id = payload
        .counselor_id
        .ok_or_else(|| ApiError::bad_request("Counselor ID, scheduled date, and time are required"))?;
    let slot = parse_slot_request(payload.scheduled_date.as_deref(), payload.scheduled_time.as_deref())?;
    let duration = validate_duration(payload.duration, DEFAULT_DURATION)?;

    let mut tx = state.db_pool.begin().await?;
    ensure_bookable(&mut tx, counselor_id, &slot, None).await?;
    let session = insert_session(
        &mut tx,
        NewSession {
            counselor_id,
            patient_id: auth.id,
            slot,
            duration,
            session_type: payload.session_type.unwrap_or(SessionType::Individual),
            status: SessionStatus::Requested,
            notes: payload.notes.unwrap_or_default(),
            actor: auth.id,
            rescheduled_from: None,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(session_id = session.id, counselor_id, patient_id = auth.id, "session requested");

    let view = single_view(&state.db_pool, session).await?;
    Ok((StatusCode::CREATED, session_response("Session request sent", view)))
}

async fn cancel_patient_session(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(session_id): Path<i32>,
    payload: Option<Json<CancelSessionRequest>>,
) -> ApiResult<Json<Value>> {
    let reason = payload.and_then(|Json(body)| body.cancellation_reason);

    let mut tx = state.db_pool.begin().await?;
    let mut session = lock_patient_session(&mut tx, session_id, auth.id).await?;
    cancel(&mut session, reason, auth.id)?;
    let session = save_session(&mut tx, &session).await?;
    tx.commit().await?;

    let view = single_view(&state.db_pool, session).await?;
    Ok(session_response("Session cancelled successfully", view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn session(status: SessionStatus) -> Session {
        let now = Utc::now();
        Session {
            id: 1,
            counselor_id: 2,
            patient_id: 3,
            scheduled_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            scheduled_time: "09:00".to_string(),
            duration: 60,
            status,
            session_type: SessionType::Individual,
            notes: String::new(),
            session_summary: String::new(),
            completed_at: None,
            requested_by: None,
            confirmed_by: None,
            requested_at: None,
            confirmed_at: None,
            request_notes: String::new(),
            started_at: None,
            ended_at: None,
            cancelled_at: None,
            cancellation_reason: String::new(),
            rescheduled_from: None,
            rescheduled_to: None,
            status_history: Jsonb(Vec::new()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_apply_status_records_history() {
        let mut s = session(SessionStatus::Requested);
        apply_status(&mut s, SessionStatus::Scheduled, 2).unwrap();
        apply_status(&mut s, SessionStatus::InProgress, 2).unwrap();
        apply_status(&mut s, SessionStatus::Completed, 2).unwrap();

        assert_eq!(s.confirmed_by, Some(2));
        assert!(s.started_at.is_some());
        assert!(s.completed_at.is_some());
        let statuses: Vec<SessionStatus> = s.status_history.0.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![SessionStatus::Scheduled, SessionStatus::InProgress, SessionStatus::Completed]
        );
    }

    #[test]
    fn test_apply_status_rejects_invalid_transition() {
        let mut s = session(SessionStatus::Completed);
        assert!(matches!(
            apply_status(&mut s, SessionStatus::Scheduled, 2),
            Err(ApiError::BadRequest(_))
        ));
        assert!(s.status_history.0.is_empty());
    }

    #[test]
    fn test_apply_same_status_is_noop() {
        let mut s = session(SessionStatus::Scheduled);
        apply_status(&mut s, SessionStatus::Scheduled, 2).unwrap();
        assert!(s.status_history.0.is_empty());
    }

    #[test]
    fn test_cancel_rejects_terminal_sessions() {
        let mut done = session(SessionStatus::Completed);
        assert!(cancel(&mut done, None, 2).is_err());

        let mut upcoming = session(SessionStatus::Scheduled);
        cancel(&mut upcoming, Some("Patient unwell".to_string()), 3).unwrap();
        assert_eq!(upcoming.status, SessionStatus::Cancelled);
        assert_eq!(upcoming.cancellation_reason, "Patient unwell");
        assert!(upcoming.cancelled_at.is_some());
    }

    #[test]
    fn test_reschedule_requires_active_session() {
        for status in [SessionStatus::Rescheduled, SessionStatus::Cancelled, SessionStatus::Completed] {
            let mut s = session(status);
            assert!(matches!(mark_rescheduled(&mut s, 2), Err(ApiError::BadRequest(_))), "{}", status);
            assert_eq!(s.status, status);
            assert!(s.status_history.0.is_empty());
        }

        let mut s = session(SessionStatus::Scheduled);
        mark_rescheduled(&mut s, 2).unwrap();
        assert_eq!(s.status, SessionStatus::Rescheduled);
        assert_eq!(s.status_history.0.len(), 1);
    }

    #[test]
    fn test_validate_duration() {
        assert_eq!(validate_duration(None, 60).unwrap(), 60);
        assert_eq!(validate_duration(Some(45), 60).unwrap(), 45);
        assert!(validate_duration(Some(0), 60).is_err());
        assert!(validate_duration(Some(MAX_DURATION + 1), 60).is_err());
    }
}
