use crate::errors::{ApiResult, Context};
use crate::middleware::{auth::auth_middleware, roles::admin_only};
use crate::models::auth::Role;
use crate::services::analytics::{counts_by_role, daily_series, rate, round1, DailyCount};
use crate::AppState;
use axum::{
    extract::Extension,
    middleware::from_fn,
    response::Json,
    routing::{get, Router},
};
use chrono::{Duration, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use std::sync::Arc;

const DAYS_IN_WEEK: u32 = 7;
const DAYS_IN_MONTH: u32 = 30;

pub fn analytics_routes() -> Router {
    Router::new()
        .route("/api/admin/analytics/overview", get(system_overview))
        .route("/api/admin/analytics/sessions", get(session_analytics))
        .route("/api/admin/analytics/messages", get(message_analytics))
        .route("/api/admin/analytics/patients", get(patient_engagement))
        .layer(from_fn(admin_only))
        .layer(from_fn(auth_middleware))
}

/// First day of a trailing window of `days` days ending today.
fn window_start(days: u32) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(days as i64 - 1)
}

async fn scalar(pool: &PgPool, sql: &str, since: NaiveDate) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(sql).bind(since).fetch_one(pool).await
}

/// Daily counts over `column` (a DATE expression) for the trailing window.
async fn daily_counts(pool: &PgPool, table: &str, column: &str, days: u32) -> Result<Vec<DailyCount>, sqlx::Error> {
    let since = window_start(days);
    let rows = sqlx::query_as::<_, (NaiveDate, i64)>(&format!(
        "SELECT {col} AS day, COUNT(*) FROM {table} WHERE {col} >= $1 GROUP BY day ORDER BY day",
        col = column,
        table = table
    ))
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(daily_series(Utc::now().date_naive(), days, &rows))
}

fn grouped_to_map(rows: Vec<(String, i64)>) -> Map<String, Value> {
    rows.into_iter().map(|(key, count)| (key, json!(count))).collect()
}

async fn system_overview(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;
    let week = window_start(DAYS_IN_WEEK);
    let month = window_start(DAYS_IN_MONTH);

    let result: Result<Value, sqlx::Error> = async {
        let (total_patients, total_counselors, pending, active_patients, active_counselors) = tokio::try_join!(
            scalar(pool, "SELECT COUNT(*) FROM users WHERE role = 'patient' AND $1::DATE IS NOT NULL", week),
            scalar(pool, "SELECT COUNT(*) FROM users WHERE role = 'counselor' AND $1::DATE IS NOT NULL", week),
            scalar(pool, "SELECT COUNT(*) FROM users WHERE approval_status = 'pending' AND $1::DATE IS NOT NULL", week),
            scalar(pool, "SELECT COUNT(DISTINCT patient_id) FROM sessions WHERE scheduled_date >= $1", month),
            scalar(pool, "SELECT COUNT(DISTINCT counselor_id) FROM sessions WHERE scheduled_date >= $1", month),
        )?;

        let (new_patients, new_counselors, messages_week, sessions_week) = tokio::try_join!(
            scalar(pool, "SELECT COUNT(*) FROM users WHERE role = 'patient' AND created_at >= $1", week),
            scalar(pool, "SELECT COUNT(*) FROM users WHERE role = 'counselor' AND created_at >= $1", week),
            scalar(pool, "SELECT COUNT(*) FROM messages WHERE created_at >= $1", week),
            scalar(pool, "SELECT COUNT(*) FROM sessions WHERE scheduled_date >= $1", week),
        )?;

        let active_sessions = scalar(
            pool,
            "SELECT COUNT(*) FROM sessions WHERE status IN ('scheduled', 'in-progress') AND scheduled_date >= $1",
            Utc::now().date_naive(),
        )
        .await?;

        let by_status = sqlx::query_as::<_, (String, i64)>("SELECT status, COUNT(*) FROM sessions GROUP BY status")
            .fetch_all(pool)
            .await?;
        let total_sessions: i64 = by_status.iter().map(|(_, count)| count).sum();

        let session_trend = daily_counts(pool, "sessions", "scheduled_date", DAYS_IN_WEEK).await?;
        let message_trend = daily_counts(pool, "messages", "(created_at AT TIME ZONE 'UTC')::DATE", DAYS_IN_WEEK).await?;

        Ok(json!({
            "users": {
                "totalPatients": total_patients,
                "totalCounselors": total_counselors,
                "pendingApprovals": pending,
                "newPatientsLastSevenDays": new_patients,
                "newCounselorsLastSevenDays": new_counselors,
                "activePatients": active_patients,
                "activeCounselors": active_counselors,
            },
            "sessions": {
                "total": total_sessions,
                "activeSessions": active_sessions,
                "byStatus": grouped_to_map(by_status),
                "lastSevenDays": session_trend,
            },
            "messages": {
                "lastSevenDays": message_trend,
                "totalLastSevenDays": messages_week,
            },
            "activity": {
                "sessionsLastSevenDays": sessions_week,
                "messagesLastSevenDays": messages_week,
            }
        }))
    }
    .await;

    let data = result.context("Error fetching system overview analytics")?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn session_analytics(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;
    let today = Utc::now().date_naive();

    let result: Result<Value, sqlx::Error> = async {
        let (total, completed, cancelled, average_duration) = sqlx::query_as::<_, (i64, i64, i64, Option<f64>)>(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'cancelled'),
                AVG(duration)::DOUBLE PRECISION
            FROM sessions
            "#,
        )
        .fetch_one(pool)
        .await?;

        let upcoming = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE status IN ('scheduled', 'in-progress') AND scheduled_date BETWEEN $1 AND $2
            "#,
        )
        .bind(today)
        .bind(today + Duration::days(7))
        .fetch_one(pool)
        .await?;

        let by_type = sqlx::query_as::<_, (String, i64)>("SELECT session_type, COUNT(*) FROM sessions GROUP BY session_type")
            .fetch_all(pool)
            .await?;

        let top_counselors = sqlx::query_as::<_, (i32, String, i64, Option<f64>)>(
            r#"
            SELECT u.id, u.email, COUNT(*) AS completed_count, AVG(s.duration)::DOUBLE PRECISION
            FROM sessions s
            JOIN users u ON u.id = s.counselor_id
            WHERE s.status = 'completed'
            GROUP BY u.id, u.email
            ORDER BY completed_count DESC
            LIMIT 5
            "#,
        )
        .fetch_all(pool)
        .await?;

        let top_counselors: Vec<Value> = top_counselors
            .into_iter()
            .map(|(id, email, completed_count, avg)| {
                json!({
                    "counselorId": id,
                    "counselorEmail": email,
                    "role": Role::Counselor,
                    "completedCount": completed_count,
                    "averageDuration": round1(avg.unwrap_or(0.0)),
                })
            })
            .collect();

        let per_day = daily_counts(pool, "sessions", "scheduled_date", DAYS_IN_WEEK).await?;

        Ok(json!({
            "totals": {
                "totalSessions": total,
                "completedSessions": completed,
                "cancelledSessions": cancelled,
                "completionRate": rate(completed, total),
                "cancellationRate": rate(cancelled, total),
                "averageDuration": round1(average_duration.unwrap_or(0.0)),
                "upcomingSessions": upcoming,
            },
            "byType": grouped_to_map(by_type),
            "lastSevenDays": per_day,
            "topCounselors": top_counselors,
        }))
    }
    .await;

    let data = result.context("Error fetching session analytics")?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn message_analytics(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;

    let result: Result<Value, sqlx::Error> = async {
        let (total, unread) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_read = false) FROM messages",
        )
        .fetch_one(pool)
        .await?;

        let types = sqlx::query_as::<_, (String, i64)>("SELECT message_type, COUNT(*) FROM messages GROUP BY message_type")
            .fetch_all(pool)
            .await?;

        let unread_by_role = sqlx::query_as::<_, (Role, i64)>(
            r#"
            SELECT u.role, COUNT(*)
            FROM messages m
            JOIN users u ON u.id = m.receiver_id
            WHERE m.is_read = false
            GROUP BY u.role
            "#,
        )
        .fetch_all(pool)
        .await?;

        let trend = daily_counts(pool, "messages", "(created_at AT TIME ZONE 'UTC')::DATE", DAYS_IN_WEEK).await?;

        Ok(json!({
            "totals": {
                "totalMessages": total,
                "unreadMessages": unread,
                "unreadByRole": counts_by_role(&unread_by_role),
            },
            "types": grouped_to_map(types),
            "lastSevenDays": trend,
        }))
    }
    .await;

    let data = result.context("Error fetching message analytics")?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn patient_engagement(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;
    let month = window_start(DAYS_IN_MONTH);

    let result: Result<Value, sqlx::Error> = async {
        let (approved_patients, non_cancelled, patients_with_sessions, returning, inactive) = tokio::try_join!(
            scalar(
                pool,
                "SELECT COUNT(*) FROM users WHERE role = 'patient' AND approval_status = 'approved' AND $1::DATE IS NOT NULL",
                month
            ),
            scalar(pool, "SELECT COUNT(*) FROM sessions WHERE status <> 'cancelled' AND $1::DATE IS NOT NULL", month),
            scalar(pool, "SELECT COUNT(DISTINCT patient_id) FROM sessions WHERE $1::DATE IS NOT NULL", month),
            scalar(
                pool,
                r#"
                SELECT COUNT(*) FROM (
                    SELECT patient_id FROM sessions
                    WHERE scheduled_date >= $1 AND status = 'completed'
                    GROUP BY patient_id
                    HAVING COUNT(*) >= 2
                ) returning_patients
                "#,
                month
            ),
            scalar(
                pool,
                "SELECT COUNT(*) FROM users WHERE role = 'patient' AND approval_status = 'approved' AND last_login < $1",
                month
            ),
        )?;

        let average = if patients_with_sessions > 0 {
            round1(non_cancelled as f64 / patients_with_sessions as f64)
        } else {
            0.0
        };

        Ok(json!({
            "totals": {
                "totalApprovedPatients": approved_patients,
                "patientsWithCounselor": patients_with_sessions,
                "patientsWithoutCounselor": (approved_patients - patients_with_sessions).max(0),
                "inactivePatients": inactive,
            },
            "engagement": {
                "averageSessionsPerPatient": average,
                "returningPatients": returning,
            }
        }))
    }
    .await;

    let data = result.context("Error fetching patient engagement analytics")?;
    Ok(Json(json!({ "success": true, "data": data })))
}
