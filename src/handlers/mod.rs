pub mod admin;
pub mod analytics;
pub mod auth;
pub mod community;
pub mod counselor;
pub mod messages;
pub mod profile;
pub mod resources;
pub mod sessions;
pub mod socket;
pub mod templates;

use crate::models::auth::{User, UserResponse};
use crate::models::profile::Profile;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// `?page=&limit=` with a capped page size.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    pub const MAX_LIMIT: i64 = 100;

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, Self::MAX_LIMIT)
    }

    /// Saturates for absurd page numbers; the query then simply returns nothing.
    pub fn offset(&self, default: i64) -> i64 {
        (self.page() - 1).saturating_mul(self.limit(default))
    }
}

pub fn total_pages(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

#[derive(Debug, Serialize)]
pub struct UserWithProfile {
    pub user: UserResponse,
    pub profile: Option<Profile>,
}

/// Pairs each user with their profile, preserving the order of `users`.
pub async fn attach_profiles(pool: &PgPool, users: Vec<User>) -> Result<Vec<UserWithProfile>, sqlx::Error> {
    let ids: Vec<i32> = users.iter().map(|user| user.id).collect();
    let profiles = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = ANY($1)")
        .bind(&ids)
        .fetch_all(pool)
        .await?;

    let mut by_user: HashMap<i32, Profile> = profiles.into_iter().map(|p| (p.user_id, p)).collect();

    Ok(users
        .into_iter()
        .map(|user| UserWithProfile {
            profile: by_user.remove(&user.id),
            user: UserResponse::from(user),
        })
        .collect())
}

/// Trimmed non-empty text, or `None`.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset_saturates() {
        let p = Pagination {
            page: Some(i64::MAX),
            limit: Some(50),
        };
        assert_eq!(p.offset(20), i64::MAX);

        let p: Pagination = serde_json::from_value(serde_json::json!({ "page": i64::MAX })).unwrap();
        assert_eq!(p.offset(20), i64::MAX);
    }

    #[test]
    fn test_pagination_defaults_and_caps() {
        let p = Pagination { page: None, limit: None };
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(20), 20);
        assert_eq!(p.offset(20), 0);

        let p = Pagination {
            page: Some(3),
            limit: Some(500),
        };
        assert_eq!(p.limit(20), 100);
        assert_eq!(p.offset(20), 200);

        let p = Pagination {
            page: Some(-4),
            limit: Some(0),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(20), 1);
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  hi ")), Some("hi".to_string()));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }
}
