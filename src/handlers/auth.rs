use crate::config::AppConfig;
use crate::errors::{ApiError, ApiResult, Context};
use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::credential_rate_limit;
use crate::models::auth::*;
use crate::models::profile::{CancerType, Gender, Profile};
use crate::AppState;
use axum::{
    extract::Extension,
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post, Router},
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{json, Value};
use std::sync::Arc;

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn auth_routes() -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .layer(from_fn(credential_rate_limit));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(me))
        .layer(from_fn(auth_middleware));

    public_routes.merge(protected_routes)
}

fn required<'a>(value: &'a str, field: &str) -> ApiResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::bad_request(format!("{} is required", field)))
    } else {
        Ok(trimmed)
    }
}

async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let first_name = required(&payload.first_name, "First name")?;
    let last_name = required(&payload.last_name, "Last name")?;
    let email = normalize_email(required(&payload.email, "Email")?);
    let district = required(&payload.district, "District")?;
    let telephone = required(&payload.telephone, "Telephone")?;

    if payload.password != payload.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 6 characters long"));
    }

    let role = payload.role.unwrap_or(Role::Patient);
    if role == Role::Admin {
        return Err(ApiError::forbidden("Admin accounts cannot be self-registered"));
    }

    let gender: Gender = payload.gender.trim().to_lowercase().parse().map_err(ApiError::BadRequest)?;
    let date_of_birth = parse_birth_date(&payload.dob)
        .ok_or_else(|| ApiError::bad_request("Date of birth must be a valid date"))?;
    let cancer_type = match (role, payload.cancer_type.as_deref()) {
        (Role::Patient, Some(raw)) => raw.trim().parse::<CancerType>().map_err(ApiError::BadRequest)?,
        _ => CancerType::Unspecified,
    };

    let existing = sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db_pool)
        .await?;
    if existing.is_some() {
        return Err(ApiError::bad_request("User with this email already exists"));
    }

    let password_hash = hash(&payload.password, DEFAULT_COST).context("Error creating user account")?;

    let mut tx = state.db_pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, role, is_approved, approval_status)
        VALUES ($1, $2, $3, false, 'pending')
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(role)
    .fetch_one(&mut *tx)
    .await?;

    let profile = sqlx::query_as::<_, Profile>(
        r#"
        INSERT INTO profiles (user_id, first_name, last_name, gender, date_of_birth, district, telephone, cancer_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(first_name)
    .bind(last_name)
    .bind(gender)
    .bind(date_of_birth)
    .bind(district)
    .bind(telephone)
    .bind(cancer_type)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let token = generate_jwt_token(&state.config, &user)?;
    tracing::info!(user_id = user.id, role = %user.role, "registered new account pending approval");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Account created successfully! Your account is pending admin approval. You will be notified once approved.",
            "token": token,
            "data": {
                "user": UserResponse::from(user),
                "profile": profile,
            }
        })),
    ))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("Please provide email and password"));
    }

    let email = normalize_email(&payload.email);
    state.credential_guard.ensure_login_allowed(&email)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db_pool)
        .await?;

    let user = match user {
        Some(user) if verify(&payload.password, &user.password_hash).unwrap_or(false) => user,
        _ => {
            state.credential_guard.record_failed_login(&email);
            tracing::debug!(email = %email, "failed sign-in");
            return Err(ApiError::Unauthorized("Incorrect email or password".to_string()));
        }
    };
    state.credential_guard.clear_failed_logins(&email);

    if !user.is_active {
        return Err(ApiError::forbidden("Your account has been deactivated"));
    }

    if !user.is_approved {
        return Err(ApiError::forbidden(
            "Your account is pending admin approval. Please wait for approval before logging in.",
        ));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET last_login = NOW(), login_count = login_count + 1, last_activity_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user.id)
    .fetch_one(&state.db_pool)
    .await?;

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
        .bind(user.id)
        .fetch_optional(&state.db_pool)
        .await?;

    let token = generate_jwt_token(&state.config, &user)?;
    tracing::info!(user_id = user.id, role = %user.role, "user logged in");

    Ok(Json(json!({
        "success": true,
        "message": "Logged in successfully",
        "token": token,
        "data": {
            "user": UserResponse::from(user),
            "profile": profile,
        }
    })))
}

async fn me(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(auth.id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
        .bind(auth.id)
        .fetch_optional(&state.db_pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "user": UserResponse::from(user),
            "profile": profile,
        }
    })))
}

pub fn generate_jwt_token(config: &AppConfig, user: &User) -> ApiResult<String> {
    let now = Utc::now();
    let expiration = now
        .checked_add_signed(Duration::hours(config.jwt_expires_in_hours))
        .ok_or_else(|| ApiError::Internal {
            context: "Failed to generate authentication token".to_string(),
            detail: "expiry overflow".to_string(),
        })?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role,
        exp: expiration.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )
    .context("Failed to generate authentication token")
}

pub fn verify_jwt_token(config: &AppConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> AppConfig {
        AppConfig {
            database_url: String::new(),
            port: 5000,
            jwt_secret: secret.to_string(),
            jwt_expires_in_hours: 1,
            db_max_connections: 1,
            frontend_url: None,
        }
    }

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: 42,
            email: "p@example.org".to_string(),
            password_hash: String::new(),
            role,
            is_approved: true,
            approval_status: ApprovalStatus::Approved,
            full_name: None,
            position: String::new(),
            last_login: None,
            login_count: 0,
            is_active: true,
            last_activity_at: None,
            deactivated_at: None,
            rejection_reason: String::new(),
            approved_by: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_jwt_round_trip() {
        let cfg = config("test-secret");
        let token = generate_jwt_token(&cfg, &user(Role::Counselor)).unwrap();
        let claims = verify_jwt_token(&cfg, &token).unwrap();
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.role, Role::Counselor);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_jwt_rejects_wrong_secret() {
        let token = generate_jwt_token(&config("one"), &user(Role::Patient)).unwrap();
        assert!(verify_jwt_token(&config("two"), &token).is_err());
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("  Kigali ", "District").unwrap(), "Kigali");
        assert!(required("   ", "District").is_err());
    }
}
