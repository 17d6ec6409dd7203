// src/services/scheduling.rs
use chrono::NaiveDate;
use sqlx::PgConnection;

use super::availability::{
    format_minutes, is_within_counselor_availability, parse_calendar_date, parse_time_to_minutes,
    AvailabilityError,
};
use crate::errors::{ApiError, ApiResult};
use crate::models::profile::Availability;
use crate::models::session::SessionStatus;

/// A requested `(date, time)` pair after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    pub date: NaiveDate,
    pub time: String,
}

/// Validates raw request fields into a calendar day and an `HH:mm` time.
pub fn parse_slot_request(date: Option<&str>, time: Option<&str>) -> ApiResult<SlotRequest> {
    let (date, time) = match (date, time) {
        (Some(date), Some(time)) if !date.trim().is_empty() && !time.trim().is_empty() => (date, time),
        _ => return Err(ApiError::bad_request("scheduledDate and scheduledTime are required")),
    };

    let date = parse_calendar_date(date).ok_or(AvailabilityError::InvalidDate)?;
    let minutes = parse_time_to_minutes(time).ok_or(AvailabilityError::InvalidTime)?;

    Ok(SlotRequest {
        date,
        time: format_minutes(minutes),
    })
}

/// Whether an existing session at `existing_time` holds the slot asked for
/// at `requested_time`. Only active sessions block, and only on an exact
/// start-time match; overlapping durations are not considered.
pub fn blocks_slot(existing_status: SessionStatus, existing_time: &str, requested_time: &str) -> bool {
    existing_status.is_active() && existing_time == requested_time
}

/// Id of an active session already holding the counselor's slot, if any.
pub async fn find_conflict(
    conn: &mut PgConnection,
    counselor_id: i32,
    slot: &SlotRequest,
    exclude_session: Option<i32>,
) -> Result<Option<i32>, sqlx::Error> {
    let same_day = sqlx::query_as::<_, (i32, SessionStatus, String)>(
        r#"
        SELECT id, status, scheduled_time FROM sessions
        WHERE counselor_id = $1
          AND scheduled_date = $2
          AND ($3::INTEGER IS NULL OR id <> $3)
        ORDER BY id
        "#,
    )
    .bind(counselor_id)
    .bind(slot.date)
    .bind(exclude_session)
    .fetch_all(conn)
    .await?;

    Ok(same_day
        .into_iter()
        .find(|(_, status, time)| blocks_slot(*status, time, &slot.time))
        .map(|(id, _, _)| id))
}

/// Loads `(is_available, availability)` for an approved, active counselor.
pub async fn load_counselor_schedule(
    conn: &mut PgConnection,
    counselor_id: i32,
) -> ApiResult<(bool, Availability)> {
    let row = sqlx::query_as::<_, (bool, sqlx::types::Json<Availability>)>(
        r#"
        SELECT p.is_available, p.availability
        FROM users u
        JOIN profiles p ON p.user_id = u.id
        WHERE u.id = $1 AND u.role = 'counselor' AND u.is_approved = true AND u.is_active = true
        "#,
    )
    .bind(counselor_id)
    .fetch_optional(conn)
    .await?;

    let (is_available, availability) = row.ok_or_else(|| ApiError::not_found("Counselor not found"))?;
    Ok((is_available, availability.0))
}

/// Availability check plus conflict detection for a counselor slot.
///
/// The partial unique index `sessions_active_slot_idx` still guards the
/// insert itself; this gives the caller a precise reason first.
pub async fn ensure_bookable(
    conn: &mut PgConnection,
    counselor_id: i32,
    slot: &SlotRequest,
    exclude_session: Option<i32>,
) -> ApiResult<()> {
    let (is_available, availability) = load_counselor_schedule(&mut *conn, counselor_id).await?;
    is_within_counselor_availability(is_available, &availability, slot.date, &slot.time)?;

    if let Some(existing) = find_conflict(&mut *conn, counselor_id, slot, exclude_session).await? {
        tracing::debug!(counselor_id, existing, date = %slot.date, time = %slot.time, "slot conflict");
        return Err(ApiError::Conflict(
            "Counselor already has an active session at this date and time".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[test]
    fn test_parse_slot_request_normalizes() {
        let slot = parse_slot_request(Some("2025-03-03T00:00:00.000Z"), Some(" 09:30 ")).unwrap();
        assert_eq!(slot.date, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(slot.time, "09:30");
    }

    #[test]
    fn test_parse_slot_request_rejects_bad_input() {
        assert!(matches!(
            parse_slot_request(None, Some("09:00")),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            parse_slot_request(Some("2025-03-03"), Some("9am")),
            Err(ApiError::Unavailable(AvailabilityError::InvalidTime))
        ));
        assert!(matches!(
            parse_slot_request(Some("next monday"), Some("09:00")),
            Err(ApiError::Unavailable(AvailabilityError::InvalidDate))
        ));
    }

    #[test]
    fn test_blocks_slot_is_exact_start_time() {
        assert!(blocks_slot(SessionStatus::Scheduled, "09:00", "09:00"));
        assert!(blocks_slot(SessionStatus::Requested, "09:00", "09:00"));
        assert!(blocks_slot(SessionStatus::InProgress, "14:30", "14:30"));
        assert!(!blocks_slot(SessionStatus::Scheduled, "09:00", "09:01"));
        assert!(!blocks_slot(SessionStatus::Scheduled, "09:00", "09:30"));
    }

    #[test]
    fn test_blocks_slot_ignores_closed_sessions() {
        for status in [SessionStatus::Cancelled, SessionStatus::Rescheduled, SessionStatus::Completed] {
            assert!(!blocks_slot(status, "09:00", "09:00"), "{}", status);
        }
    }

    async fn insert_user(pool: &PgPool, email: &str, role: &str) -> sqlx::Result<i32> {
        sqlx::query_scalar(
            "INSERT INTO users (email, password_hash, role, is_approved, approval_status) \
             VALUES ($1, 'x', $2, true, 'approved') RETURNING id",
        )
        .bind(email)
        .bind(role)
        .fetch_one(pool)
        .await
    }

    async fn insert_slot(pool: &PgPool, counselor: i32, patient: i32, time: &str, status: &str) -> sqlx::Result<i32> {
        sqlx::query_scalar(
            "INSERT INTO sessions (counselor_id, patient_id, scheduled_date, scheduled_time, status) \
             VALUES ($1, $2, '2025-03-03', $3, $4) RETURNING id",
        )
        .bind(counselor)
        .bind(patient)
        .bind(time)
        .bind(status)
        .fetch_one(pool)
        .await
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_second_active_session_in_slot_is_conflict(pool: PgPool) -> sqlx::Result<()> {
        let counselor = insert_user(&pool, "counselor@rcr.rw", "counselor").await?;
        let patient = insert_user(&pool, "patient@rcr.rw", "patient").await?;

        insert_slot(&pool, counselor, patient, "09:00", "scheduled").await?;
        let err = insert_slot(&pool, counselor, patient, "09:00", "requested")
            .await
            .unwrap_err();
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));

        // Closed sessions and other start times do not hold the slot.
        insert_slot(&pool, counselor, patient, "09:00", "cancelled").await?;
        insert_slot(&pool, counselor, patient, "09:01", "scheduled").await?;
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_find_conflict_honors_exclusion(pool: PgPool) -> sqlx::Result<()> {
        let counselor = insert_user(&pool, "counselor@rcr.rw", "counselor").await?;
        let patient = insert_user(&pool, "patient@rcr.rw", "patient").await?;
        insert_slot(&pool, counselor, patient, "10:00", "rescheduled").await?;
        let held = insert_slot(&pool, counselor, patient, "10:00", "scheduled").await?;

        let slot = parse_slot_request(Some("2025-03-03"), Some("10:00")).unwrap();
        let mut conn = pool.acquire().await?;
        assert_eq!(find_conflict(&mut conn, counselor, &slot, None).await?, Some(held));
        assert_eq!(find_conflict(&mut conn, counselor, &slot, Some(held)).await?, None);

        let other = parse_slot_request(Some("2025-03-03"), Some("10:30")).unwrap();
        assert_eq!(find_conflict(&mut conn, counselor, &other, None).await?, None);
        Ok(())
    }
}
