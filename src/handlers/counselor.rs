use super::{attach_profiles, non_empty, Pagination, UserWithProfile};
use crate::errors::{ApiError, ApiResult};
use crate::middleware::{auth::auth_middleware, roles::counselor_only};
use crate::models::auth::{AuthUser, User, UserResponse};
use crate::models::profile::{Availability, Profile, ServiceMode, UpdateAvailabilityRequest};
use crate::models::session::{Session, SessionStatus};
use crate::services::availability::{next_available_slot, open_slots, validate_weekly_schedule};
use crate::services::scheduling::load_counselor_schedule;
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    middleware::from_fn,
    response::Json,
    routing::{get, put, Router},
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json as Jsonb;
use sqlx::FromRow;
use std::sync::Arc;

const DEFAULT_AVAILABILITY_DAYS: u32 = 14;
const MAX_AVAILABILITY_DAYS: u32 = 60;
const NEXT_SLOT_HORIZON_DAYS: u32 = 30;

pub fn counselor_routes() -> Router {
    let directory = Router::new()
        .route("/api/counselor/directory", get(search_counselors))
        .route("/api/counselor/directory/:id", get(counselor_details))
        .route("/api/counselor/directory/:id/availability", get(counselor_availability))
        .layer(from_fn(auth_middleware));

    let counselor = Router::new()
        .route("/api/counselor/dashboard/stats", get(dashboard_stats))
        .route("/api/counselor/patients", get(my_patients))
        .route("/api/counselor/patients/:id", get(patient_profile))
        .route("/api/counselor/profile/availability", put(update_schedule))
        .layer(from_fn(counselor_only))
        .layer(from_fn(auth_middleware));

    directory.merge(counselor)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryQuery {
    search: Option<String>,
    specialty: Option<String>,
    language: Option<String>,
    service_mode: Option<ServiceMode>,
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    days: Option<u32>,
    from: Option<String>,
}

/// Directory card for one counselor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CounselorCard {
    #[serde(flatten)]
    entry: UserWithProfile,
    next_available: Option<NextSlot>,
}

#[derive(Debug, Serialize)]
struct NextSlot {
    date: NaiveDate,
    time: String,
}

impl CounselorCard {
    fn new(entry: UserWithProfile, today: NaiveDate) -> Self {
        let next_available = entry.profile.as_ref().and_then(|profile| {
            next_available_slot(profile.is_available, &profile.availability, today, NEXT_SLOT_HORIZON_DAYS)
                .map(|(date, time)| NextSlot { date, time })
        });
        CounselorCard { entry, next_available }
    }
}

fn like_pattern(value: Option<&str>) -> Option<String> {
    non_empty(value).map(|v| format!("%{}%", v))
}

async fn search_counselors(
    Extension(state): Extension<Arc<AppState>>,
    Query(filters): Query<DirectoryQuery>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let limit = pagination.limit(20);
    let offset = pagination.offset(20);

    let counselors = sqlx::query_as::<_, User>(
        r#"
        SELECT u.*
        FROM users u
        JOIN profiles p ON p.user_id = u.id
        WHERE u.role = 'counselor' AND u.is_approved = true AND u.is_active = true
          AND ($1::TEXT IS NULL
               OR p.first_name ILIKE $1
               OR p.last_name ILIKE $1
               OR (p.first_name || ' ' || p.last_name) ILIKE $1
               OR COALESCE(p.bio, '') ILIKE $1)
          AND ($2::TEXT IS NULL
               OR EXISTS (SELECT 1 FROM unnest(p.specialties || p.specialization) s WHERE s ILIKE $2))
          AND ($3::TEXT IS NULL
               OR EXISTS (SELECT 1 FROM unnest(p.languages) l WHERE l ILIKE $3))
          AND ($4::TEXT IS NULL OR $4 = ANY(p.service_modes))
        ORDER BY p.is_available DESC, p.rating_average DESC, p.last_name ASC
        LIMIT $5 OFFSET $6
        "#,
    )
    .bind(like_pattern(filters.search.as_deref()))
    .bind(like_pattern(filters.specialty.as_deref()))
    .bind(like_pattern(filters.language.as_deref()))
    .bind(filters.service_mode)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await?;

    let today = Utc::now().date_naive();
    let cards: Vec<CounselorCard> = attach_profiles(&state.db_pool, counselors)
        .await?
        .into_iter()
        .map(|entry| CounselorCard::new(entry, today))
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": cards.len(),
        "data": cards,
    })))
}

async fn load_directory_entry(state: &AppState, counselor_id: i32) -> ApiResult<UserWithProfile> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND role = 'counselor' AND is_approved = true AND is_active = true",
    )
    .bind(counselor_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Counselor not found"))?;

    attach_profiles(&state.db_pool, vec![user])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Counselor not found"))
}

async fn counselor_details(
    Extension(state): Extension<Arc<AppState>>,
    Path(counselor_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let entry = load_directory_entry(&state, counselor_id).await?;

    let completed_sessions = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sessions WHERE counselor_id = $1 AND status = 'completed'",
    )
    .bind(counselor_id)
    .fetch_one(&state.db_pool)
    .await?;

    let card = CounselorCard::new(entry, Utc::now().date_naive());

    Ok(Json(json!({
        "success": true,
        "data": {
            "counselor": card,
            "completedSessions": completed_sessions,
        }
    })))
}

async fn counselor_availability(
    Extension(state): Extension<Arc<AppState>>,
    Path(counselor_id): Path<i32>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Json<Value>> {
    let days = query
        .days
        .unwrap_or(DEFAULT_AVAILABILITY_DAYS)
        .clamp(1, MAX_AVAILABILITY_DAYS);
    let from = match query.from.as_deref() {
        Some(raw) => crate::services::availability::parse_calendar_date(raw)
            .ok_or_else(|| ApiError::bad_request("from must be a valid date"))?,
        None => Utc::now().date_naive(),
    };
    let until = from + Duration::days(days as i64 - 1);

    let mut conn = state.db_pool.acquire().await?;
    let (is_available, availability) = load_counselor_schedule(&mut conn, counselor_id).await?;

    let booked = sqlx::query_as::<_, (NaiveDate, String)>(
        r#"
        SELECT scheduled_date, scheduled_time FROM sessions
        WHERE counselor_id = $1 AND status = ANY($2) AND scheduled_date BETWEEN $3 AND $4
        ORDER BY scheduled_date, scheduled_time
        "#,
    )
    .bind(counselor_id)
    .bind(&SessionStatus::ACTIVE[..])
    .bind(from)
    .bind(until)
    .fetch_all(&mut *conn)
    .await?;

    let booked: Vec<Value> = booked
        .into_iter()
        .map(|(date, time)| json!({ "date": date, "time": time }))
        .collect();

    let next = next_available_slot(is_available, &availability, from, NEXT_SLOT_HORIZON_DAYS)
        .map(|(date, time)| NextSlot { date, time });

    Ok(Json(json!({
        "success": true,
        "data": {
            "counselorId": counselor_id,
            "isAvailable": is_available,
            "timezone": availability.timezone,
            "maxSessionsPerDay": availability.max_sessions_per_day,
            "days": open_slots(is_available, &availability, from, days),
            "bookedSlots": booked,
            "nextAvailable": next,
        }
    })))
}

async fn dashboard_stats(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;
    let today = Utc::now().date_naive();
    let week_ago = Utc::now() - Duration::days(7);

    let (total_patients, upcoming, completed, pending_messages, recent) = tokio::try_join!(
        sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT patient_id) FROM sessions WHERE counselor_id = $1")
            .bind(auth.id)
            .fetch_one(pool),
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sessions WHERE counselor_id = $1 AND status = 'scheduled' AND scheduled_date >= $2",
        )
        .bind(auth.id)
        .bind(today)
        .fetch_one(pool),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions WHERE counselor_id = $1 AND status = 'completed'")
            .bind(auth.id)
            .fetch_one(pool),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND is_read = false")
            .bind(auth.id)
            .fetch_one(pool),
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sessions WHERE counselor_id = $1 AND created_at >= $2")
            .bind(auth.id)
            .bind(week_ago)
            .fetch_one(pool),
    )?;

    let pending_requests = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sessions WHERE counselor_id = $1 AND status = 'requested'",
    )
    .bind(auth.id)
    .fetch_one(pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "overview": {
                "totalPatients": total_patients,
                "upcomingSessions": upcoming,
                "completedSessions": completed,
                "pendingMessages": pending_messages,
                "pendingRequests": pending_requests,
                "recentSessions": recent,
            }
        }
    })))
}

#[derive(Debug, FromRow)]
struct PatientRollup {
    patient_id: i32,
    session_count: i64,
    last_session: NaiveDate,
}

async fn my_patients(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let rollup = sqlx::query_as::<_, PatientRollup>(
        r#"
        SELECT patient_id, COUNT(*) AS session_count, MAX(scheduled_date) AS last_session
        FROM sessions
        WHERE counselor_id = $1
        GROUP BY patient_id
        ORDER BY last_session DESC
        "#,
    )
    .bind(auth.id)
    .fetch_all(&state.db_pool)
    .await?;

    let ids: Vec<i32> = rollup.iter().map(|row| row.patient_id).collect();
    let users = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(&state.db_pool)
        .await?;
    let mut entries: std::collections::HashMap<i32, UserWithProfile> = attach_profiles(&state.db_pool, users)
        .await?
        .into_iter()
        .map(|entry| (entry.user.id, entry))
        .collect();

    let patients: Vec<Value> = rollup
        .into_iter()
        .filter_map(|row| {
            entries.remove(&row.patient_id).map(|entry| {
                json!({
                    "id": entry.user.id,
                    "email": entry.user.email,
                    "role": entry.user.role,
                    "profile": entry.profile,
                    "lastSession": row.last_session,
                    "sessionCount": row.session_count,
                })
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": patients.len(),
        "data": patients,
    })))
}

async fn patient_profile(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(patient_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let shares_session = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM sessions WHERE counselor_id = $1 AND patient_id = $2)",
    )
    .bind(auth.id)
    .bind(patient_id)
    .fetch_one(&state.db_pool)
    .await?;

    if !shares_session {
        return Err(ApiError::forbidden("You do not have access to this patient"));
    }

    let patient = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND role = 'patient'")
        .bind(patient_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
        .bind(patient_id)
        .fetch_optional(&state.db_pool)
        .await?;

    let recent_sessions = sqlx::query_as::<_, Session>(
        r#"
        SELECT * FROM sessions
        WHERE counselor_id = $1 AND patient_id = $2
        ORDER BY scheduled_date DESC, scheduled_time DESC
        LIMIT 10
        "#,
    )
    .bind(auth.id)
    .bind(patient_id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "patient": UserWithProfile {
                user: UserResponse::from(patient),
                profile,
            },
            "recentSessions": recent_sessions,
        }
    })))
}

/// Merges the request into the stored schedule; omitted parts are kept.
fn merge_availability(mut current: Availability, update: UpdateAvailabilityRequest) -> Availability {
    if let Some(weekly_schedule) = update.weekly_schedule {
        current.weekly_schedule = weekly_schedule;
    }
    if let Some(exceptions) = update.exceptions {
        current.exceptions = exceptions;
    }
    if let Some(timezone) = non_empty(update.timezone.as_deref()) {
        current.timezone = timezone;
    }
    if let Some(max) = update.max_sessions_per_day {
        current.max_sessions_per_day = max;
    }
    current
}

async fn update_schedule(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> ApiResult<Json<Value>> {
    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
        .bind(auth.id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    let is_available = payload.is_available.unwrap_or(profile.is_available);
    let availability = merge_availability(profile.availability.0, payload);
    validate_weekly_schedule(&availability).map_err(ApiError::BadRequest)?;

    let updated = sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles
        SET availability = $2, is_available = $3, updated_at = NOW()
        WHERE user_id = $1
        RETURNING *
        "#,
    )
    .bind(auth.id)
    .bind(Jsonb(&availability))
    .bind(is_available)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!(counselor_id = auth.id, days = availability.weekly_schedule.len(), "weekly schedule updated");

    Ok(Json(json!({
        "success": true,
        "message": "Availability updated successfully",
        "data": {
            "isAvailable": updated.is_available,
            "availability": updated.availability,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::{DayOfWeek, DaySchedule, TimeSlot};

    #[test]
    fn test_merge_availability_keeps_omitted_parts() {
        let current = Availability {
            weekly_schedule: vec![DaySchedule {
                day: DayOfWeek::Friday,
                slots: vec![TimeSlot {
                    start: "08:00".to_string(),
                    end: "12:00".to_string(),
                    is_virtual: false,
                }],
            }],
            ..Availability::default()
        };

        let merged = merge_availability(
            current.clone(),
            UpdateAvailabilityRequest {
                weekly_schedule: None,
                exceptions: None,
                timezone: Some("  ".to_string()),
                max_sessions_per_day: Some(3),
                is_available: None,
            },
        );

        assert_eq!(merged.weekly_schedule, current.weekly_schedule);
        assert_eq!(merged.timezone, current.timezone);
        assert_eq!(merged.max_sessions_per_day, 3);
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(Some(" grief ")), Some("%grief%".to_string()));
        assert_eq!(like_pattern(Some("")), None);
    }
}
