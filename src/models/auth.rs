use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

string_enum! {
    pub enum Role {
        Patient => "patient",
        Counselor => "counselor",
        Admin => "admin",
    }
}

string_enum! {
    pub enum ApprovalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_approved: bool,
    pub approval_status: ApprovalStatus,
    pub full_name: Option<String>,
    pub position: String,
    pub last_login: Option<DateTime<Utc>>,
    pub login_count: i32,
    pub is_active: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub rejection_reason: String,
    pub approved_by: Option<i32>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a user; never carries the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub is_approved: bool,
    pub approval_status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub position: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rejection_reason: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            email: user.email,
            role: user.role,
            is_approved: user.is_approved,
            approval_status: user.approval_status,
            full_name: user.full_name,
            position: user.position,
            is_active: user.is_active,
            last_login: user.last_login,
            approved_at: user.approved_at,
            rejection_reason: user.rejection_reason,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub gender: String,
    #[serde(alias = "dateOfBirth")]
    pub dob: String,
    pub district: String,
    pub telephone: String,
    pub cancer_type: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdminRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub position: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user id)
    pub role: Role,
    pub exp: usize, // Expiration time
    pub iat: usize, // Issued at
}

impl Claims {
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }
}

/// The authenticated caller, inserted into request extensions by the auth
/// middleware after the user row has been re-loaded.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        AuthUser {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Normalizes an email the way the users table stores it.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Parses a date of birth given as `YYYY-MM-DD` or a full timestamp.
pub fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    crate::services::availability::parse_calendar_date(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane.Doe@Example.ORG "), "jane.doe@example.org");
    }

    #[test]
    fn test_user_response_hides_password() {
        let now = Utc::now();
        let user = User {
            id: 7,
            email: "c@example.org".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            role: Role::Counselor,
            is_approved: false,
            approval_status: ApprovalStatus::Pending,
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
        };

        let raw = serde_json::to_value(&user).unwrap();
        assert!(raw.get("password_hash").is_none());

        let response = serde_json::to_value(UserResponse::from(user)).unwrap();
        assert_eq!(response["approvalStatus"], "pending");
        assert_eq!(response["isApproved"], false);
        assert!(response.get("position").is_none());
    }
}
