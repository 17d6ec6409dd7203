use super::{auth::MIN_PASSWORD_LEN, non_empty};
use crate::errors::{ApiError, ApiResult, Context};
use crate::middleware::auth::auth_middleware;
use crate::models::auth::{normalize_email, AuthUser, User, UserResponse};
use crate::models::profile::*;
use crate::AppState;
use axum::{
    extract::Extension,
    middleware::from_fn,
    response::Json,
    routing::{get, put, Router},
};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde_json::{json, Value};
use sqlx::types::Json as Jsonb;
use std::sync::Arc;

pub fn profile_routes() -> Router {
    Router::new()
        .route("/api/profile/me", get(my_profile))
        .route("/api/profile", put(update_profile))
        .route("/api/profile/availability", put(update_availability))
        .route("/api/profile/notifications", put(update_notifications))
        .route("/api/profile/password", put(change_password))
        .route("/api/profile/contact", put(update_contact))
        .layer(from_fn(auth_middleware))
}

async fn load_profile(state: &AppState, user_id: i32) -> ApiResult<Profile> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))
}

async fn load_user(state: &AppState, user_id: i32) -> ApiResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn my_profile(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let user = load_user(&state, auth.id).await?;
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

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Applies the editable fields of `update` onto `profile`.
fn apply_profile_update(profile: &mut Profile, update: UpdateProfileRequest) {
    if let Some(first_name) = non_empty(update.first_name.as_deref()) {
        profile.first_name = first_name;
    }
    if let Some(last_name) = non_empty(update.last_name.as_deref()) {
        profile.last_name = last_name;
    }
    if update.bio.is_some() {
        profile.bio = update.bio;
    }
    if let Some(specialization) = update.specialization {
        profile.specialization = clean_list(specialization.into_vec());
    }
    if let Some(specialties) = update.specialties {
        profile.specialties = clean_list(specialties);
    }
    if let Some(languages) = update.languages {
        profile.languages = clean_list(languages);
    }
    if let Some(service_modes) = update.service_modes {
        profile.service_modes = service_modes;
    }
    if update.years_of_experience.is_some() {
        profile.years_of_experience = update.years_of_experience;
    }
    if update.qualifications.is_some() {
        profile.qualifications = update.qualifications;
    }
    if let Some(picture) = non_empty(update.profile_picture.as_deref()) {
        profile.profile_picture = picture;
    }
    if let Some(telephone) = non_empty(update.telephone.as_deref()) {
        profile.telephone = telephone;
    }
    if let Some(district) = non_empty(update.district.as_deref()) {
        profile.district = district;
    }
    if let Some(cancer_type) = update.cancer_type {
        profile.cancer_type = cancer_type;
    }
}

async fn update_profile(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UpdateProfileRequest>,
) -> ApiResult<Json<Value>> {
    if matches!(payload.years_of_experience, Some(years) if years < 0) {
        return Err(ApiError::bad_request("yearsOfExperience cannot be negative"));
    }

    let mut profile = load_profile(&state, auth.id).await?;
    apply_profile_update(&mut profile, payload);

    let profile = sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles
        SET first_name = $2, last_name = $3, bio = $4, specialization = $5, specialties = $6,
            languages = $7, service_modes = $8, years_of_experience = $9, qualifications = $10,
            profile_picture = $11, telephone = $12, district = $13, cancer_type = $14,
            updated_at = NOW()
        WHERE user_id = $1
        RETURNING *
        "#,
    )
    .bind(auth.id)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(&profile.bio)
    .bind(&profile.specialization)
    .bind(&profile.specialties)
    .bind(&profile.languages)
    .bind(&profile.service_modes)
    .bind(profile.years_of_experience)
    .bind(&profile.qualifications)
    .bind(&profile.profile_picture)
    .bind(&profile.telephone)
    .bind(&profile.district)
    .bind(profile.cancer_type)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully",
        "data": profile,
    })))
}

async fn update_availability(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let is_available = payload
        .get("isAvailable")
        .and_then(Value::as_bool)
        .ok_or_else(|| ApiError::bad_request("isAvailable must be a boolean value"))?;

    let profile = sqlx::query_as::<_, Profile>(
        "UPDATE profiles SET is_available = $2, updated_at = NOW() WHERE user_id = $1 RETURNING *",
    )
    .bind(auth.id)
    .bind(is_available)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Availability updated successfully",
        "data": { "isAvailable": profile.is_available },
    })))
}

async fn update_notifications(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UpdateNotificationsRequest>,
) -> ApiResult<Json<Value>> {
    let profile = load_profile(&state, auth.id).await?;
    let preferences = profile.notification_preferences.0.merged(&payload);

    sqlx::query("UPDATE profiles SET notification_preferences = $2, updated_at = NOW() WHERE user_id = $1")
        .bind(auth.id)
        .bind(Jsonb(preferences))
        .execute(&state.db_pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification preferences updated successfully",
        "data": preferences,
    })))
}

async fn change_password(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    let (current, new, confirm) = match (
        payload.current_password.as_deref(),
        payload.new_password.as_deref(),
        payload.confirm_password.as_deref(),
    ) {
        (Some(c), Some(n), Some(f)) if !c.is_empty() && !n.is_empty() && !f.is_empty() => (c, n, f),
        _ => {
            return Err(ApiError::bad_request(
                "Current password, new password, and confirmation are required",
            ))
        }
    };

    if new != confirm {
        return Err(ApiError::bad_request("New password and confirmation do not match"));
    }
    if new.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("New password must be at least 6 characters long"));
    }

    let user = load_user(&state, auth.id).await?;
    if !verify(current, &user.password_hash).unwrap_or(false) {
        return Err(ApiError::Unauthorized("Current password is incorrect".to_string()));
    }

    let password_hash = hash(new, DEFAULT_COST).context("Error updating password")?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(auth.id)
        .bind(password_hash)
        .execute(&state.db_pool)
        .await?;

    tracing::info!(user_id = auth.id, "password changed");

    Ok(Json(json!({
        "success": true,
        "message": "Password updated successfully",
    })))
}

async fn update_contact(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<UpdateContactRequest>,
) -> ApiResult<Json<Value>> {
    let user = load_user(&state, auth.id).await?;

    let email = match non_empty(payload.email.as_deref()).map(|e| normalize_email(&e)) {
        Some(email) if email != user.email => {
            let taken = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND id <> $2)",
            )
            .bind(&email)
            .bind(auth.id)
            .fetch_one(&state.db_pool)
            .await?;
            if taken {
                return Err(ApiError::bad_request("Email already in use"));
            }
            email
        }
        _ => user.email.clone(),
    };

    let mut tx = state.db_pool.begin().await?;
    let user = sqlx::query_as::<_, User>("UPDATE users SET email = $2, updated_at = NOW() WHERE id = $1 RETURNING *")
        .bind(auth.id)
        .bind(&email)
        .fetch_one(&mut *tx)
        .await?;

    let profile = match non_empty(payload.telephone.as_deref()) {
        Some(telephone) => {
            sqlx::query_as::<_, Profile>(
                "UPDATE profiles SET telephone = $2, updated_at = NOW() WHERE user_id = $1 RETURNING *",
            )
            .bind(auth.id)
            .bind(telephone)
            .fetch_optional(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
                .bind(auth.id)
                .fetch_optional(&mut *tx)
                .await?
        }
    };
    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "message": "Contact information updated successfully",
        "data": {
            "user": UserResponse::from(user),
            "profile": profile,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn profile() -> Profile {
        let now = Utc::now();
        Profile {
            id: 1,
            user_id: 5,
            first_name: "Aline".to_string(),
            last_name: "Uwase".to_string(),
            gender: Gender::Female,
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            district: "Gasabo".to_string(),
            telephone: "0788000000".to_string(),
            profile_picture: DEFAULT_PROFILE_PICTURE.to_string(),
            cancer_type: CancerType::Unspecified,
            cv: None,
            medical_license: None,
            specialization: Vec::new(),
            specialties: Vec::new(),
            years_of_experience: None,
            bio: None,
            qualifications: None,
            languages: vec!["English".to_string()],
            service_modes: vec![ServiceMode::Virtual],
            is_available: true,
            availability: Jsonb(Availability::default()),
            rating_average: 0.0,
            rating_count: 0,
            last_review_at: None,
            feedback_highlights: Vec::new(),
            notification_preferences: Jsonb(NotificationPreferences::default()),
            application_date: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_profile_update_ignores_blank_names() {
        let mut p = profile();
        let update: UpdateProfileRequest = serde_json::from_value(json!({
            "firstName": "  ",
            "specialization": "Oncology counseling",
            "languages": ["Kinyarwanda", " ", "French"],
            "yearsOfExperience": 4
        }))
        .unwrap();

        apply_profile_update(&mut p, update);

        assert_eq!(p.first_name, "Aline");
        assert_eq!(p.specialization, vec!["Oncology counseling"]);
        assert_eq!(p.languages, vec!["Kinyarwanda", "French"]);
        assert_eq!(p.years_of_experience, Some(4));
        assert_eq!(p.district, "Gasabo");
    }
}
