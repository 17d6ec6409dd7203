use crate::errors::{ApiError, ApiResult};
use crate::handlers::{attach_profiles, non_empty, total_pages, Pagination};
use crate::middleware::{auth::auth_middleware, roles::admin_only};
use crate::models::auth::{ApprovalStatus, AuthUser, CreateAdminRequest, Role, User, UserResponse};
use crate::models::profile::Profile;
use crate::services::analytics::{approval_rate, last_six_months, pending_urgency};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post, put, Router},
};
use bcrypt::{hash, DEFAULT_COST};
use chrono::{Duration, Months, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn admin_routes() -> Router {
    Router::new()
        .route("/api/admin/dashboard/stats", get(dashboard_stats))
        .route("/api/admin/dashboard/activity", get(recent_activity))
        .route("/api/admin/dashboard/analytics", get(user_analytics))
        .route("/api/admin/pending-approvals", get(pending_approvals))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/approve/:id", put(approve_user))
        .route("/api/admin/reject/:id", put(reject_user))
        .route("/api/admin/create-admin", post(create_admin))
        .layer(from_fn(admin_only))
        .layer(from_fn(auth_middleware))
}

async fn count(state: &AppState, sql: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(sql).fetch_one(&state.db_pool).await
}

async fn dashboard_stats(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let (total_users, total_patients, total_counselors, pending, approved, rejected, recent) = tokio::try_join!(
        count(&state, "SELECT COUNT(*) FROM users WHERE role IN ('patient', 'counselor')"),
        count(&state, "SELECT COUNT(*) FROM users WHERE role = 'patient'"),
        count(&state, "SELECT COUNT(*) FROM users WHERE role = 'counselor'"),
        count(&state, "SELECT COUNT(*) FROM users WHERE approval_status = 'pending'"),
        count(&state, "SELECT COUNT(*) FROM users WHERE approval_status = 'approved'"),
        count(&state, "SELECT COUNT(*) FROM users WHERE approval_status = 'rejected'"),
        count(
            &state,
            "SELECT COUNT(*) FROM users WHERE role IN ('patient', 'counselor') AND created_at >= NOW() - INTERVAL '7 days'"
        ),
    )?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "overview": {
                "totalUsers": total_users,
                "totalPatients": total_patients,
                "totalCounselors": total_counselors,
                "pendingApprovals": pending,
                "approvedUsers": approved,
                "rejectedUsers": rejected,
                "recentRegistrations": recent,
            },
            "approvalRate": approval_rate(approved, total_users),
            "pendingUrgency": pending_urgency(pending),
        }
    })))
}

async fn recent_activity(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let pending = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE approval_status = 'pending' ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(&state.db_pool)
    .await?;

    let approvals = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE approval_status = 'approved' AND approved_at >= $1
        ORDER BY approved_at DESC
        LIMIT 10
        "#,
    )
    .bind(Utc::now() - Duration::days(7))
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "pendingApprovals": attach_profiles(&state.db_pool, pending).await?,
            "recentApprovals": attach_profiles(&state.db_pool, approvals).await?,
        }
    })))
}

async fn user_analytics(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let mut trends = Vec::new();
    for month_start in last_six_months(Utc::now().date_naive()) {
        let month_end = month_start
            .checked_add_months(Months::new(1))
            .unwrap_or(month_start);

        let (patients, counselors) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE role = 'patient'),
                COUNT(*) FILTER (WHERE role = 'counselor')
            FROM users
            WHERE created_at >= $1::DATE AND created_at < $2::DATE
            "#,
        )
        .bind(month_start)
        .bind(month_end)
        .fetch_one(&state.db_pool)
        .await?;

        trends.push(json!({
            "month": month_start.format("%b %Y").to_string(),
            "patients": patients,
            "counselors": counselors,
            "total": patients + counselors,
        }));
    }

    let distribution = sqlx::query_as::<_, (ApprovalStatus, i64)>(
        r#"
        SELECT approval_status, COUNT(*)
        FROM users
        WHERE role IN ('patient', 'counselor')
        GROUP BY approval_status
        "#,
    )
    .fetch_all(&state.db_pool)
    .await?;

    let distribution: Vec<Value> = distribution
        .into_iter()
        .map(|(status, count)| json!({ "status": status, "count": count }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": {
            "registrationTrends": trends,
            "approvalDistribution": distribution,
        }
    })))
}

async fn pending_approvals(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE approval_status = 'pending' AND role IN ('patient', 'counselor')
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(&state.db_pool)
    .await?;

    let data = attach_profiles(&state.db_pool, users).await?;

    Ok(Json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
    })))
}

#[derive(Debug, Deserialize)]
struct UserFilters {
    role: Option<Role>,
    status: Option<ApprovalStatus>,
    search: Option<String>,
}

async fn list_users(
    Extension(state): Extension<Arc<AppState>>,
    Query(pagination): Query<Pagination>,
    Query(filters): Query<UserFilters>,
) -> ApiResult<Json<Value>> {
    if filters.role == Some(Role::Admin) {
        return Err(ApiError::bad_request("Admins are not listed here"));
    }

    let search = non_empty(filters.search.as_deref()).map(|s| format!("%{}%", s));
    let limit = pagination.limit(50);

    let where_clause = r#"
        WHERE u.role IN ('patient', 'counselor')
          AND ($1::TEXT IS NULL OR u.role = $1)
          AND ($2::TEXT IS NULL OR u.approval_status = $2)
          AND ($3::TEXT IS NULL
               OR u.email ILIKE $3
               OR EXISTS (
                   SELECT 1 FROM profiles p
                   WHERE p.user_id = u.id AND (p.first_name ILIKE $3 OR p.last_name ILIKE $3)
               ))
    "#;

    let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM users u {}", where_clause))
        .bind(filters.role)
        .bind(filters.status)
        .bind(search.as_deref())
        .fetch_one(&state.db_pool)
        .await?;

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT u.* FROM users u {} ORDER BY u.created_at DESC LIMIT $4 OFFSET $5",
        where_clause
    ))
    .bind(filters.role)
    .bind(filters.status)
    .bind(search.as_deref())
    .bind(limit)
    .bind(pagination.offset(50))
    .fetch_all(&state.db_pool)
    .await?;

    let data = attach_profiles(&state.db_pool, users).await?;

    Ok(Json(json!({
        "success": true,
        "count": data.len(),
        "data": data,
        "pagination": {
            "page": pagination.page(),
            "limit": limit,
            "total": total,
            "pages": total_pages(total, limit),
        }
    })))
}

async fn approve_user(
    Extension(state): Extension<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.role == Role::Admin {
        return Err(ApiError::bad_request("Cannot approve an admin user"));
    }
    if user.approval_status == ApprovalStatus::Approved {
        return Err(ApiError::bad_request("User is already approved"));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET is_approved = true, approval_status = 'approved', approved_by = $2, approved_at = NOW(),
            rejection_reason = '', updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(admin.id)
    .fetch_one(&state.db_pool)
    .await?;

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?;

    tracing::info!(user_id, admin_id = admin.id, role = %user.role, "approved account");

    Ok(Json(json!({
        "success": true,
        "message": format!("User {} approved successfully", user.role),
        "data": {
            "user": UserResponse::from(user),
            "profile": profile,
        }
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    rejection_reason: Option<String>,
}

async fn reject_user(
    Extension(state): Extension<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Path(user_id): Path<i32>,
    payload: Option<Json<RejectRequest>>,
) -> ApiResult<Json<Value>> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let role = sqlx::query_scalar::<_, Role>("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if role == Role::Admin {
        return Err(ApiError::bad_request("Cannot modify admin user"));
    }

    let reason = non_empty(payload.rejection_reason.as_deref()).unwrap_or_else(|| "No reason provided".to_string());

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET is_approved = false, approval_status = 'rejected', rejection_reason = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&reason)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!(user_id, admin_id = admin.id, "rejected account application");

    Ok(Json(json!({
        "success": true,
        "message": "User application rejected",
        "data": { "user": UserResponse::from(user) }
    })))
}

async fn create_admin(
    Extension(state): Extension<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    Json(payload): Json<CreateAdminRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let email = crate::models::auth::normalize_email(&payload.email);
    if email.is_empty() || payload.full_name.trim().is_empty() {
        return Err(ApiError::bad_request("Email and full name are required"));
    }
    if payload.password.len() < crate::handlers::auth::MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 6 characters long"));
    }

    let existing = sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db_pool)
        .await?;
    if existing.is_some() {
        return Err(ApiError::bad_request("User with this email already exists"));
    }

    let password_hash = hash(&payload.password, DEFAULT_COST).map_err(|e| ApiError::Internal {
        context: "Error creating admin user".to_string(),
        detail: e.to_string(),
    })?;
    let position = non_empty(payload.position.as_deref()).unwrap_or_else(|| "System Administrator".to_string());

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, role, full_name, position, is_approved, approval_status, approved_by, approved_at)
        VALUES ($1, $2, 'admin', $3, $4, true, 'approved', $5, NOW())
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(payload.full_name.trim())
    .bind(&position)
    .bind(admin.id)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!(new_admin = user.id, created_by = admin.id, "created admin account");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Admin user created successfully",
            "data": { "user": UserResponse::from(user) }
        })),
    ))
}
