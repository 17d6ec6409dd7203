// src/services/participants.rs
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

use crate::models::auth::Role;

/// Compact user card attached to sessions, messages, posts and comments.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: i32,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
}

impl ParticipantSummary {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            _ => self.full_name.clone().unwrap_or_else(|| self.email.clone()),
        }
    }
}

pub async fn load_participants(
    pool: &PgPool,
    ids: &[i32],
) -> Result<HashMap<i32, ParticipantSummary>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut unique = ids.to_vec();
    unique.sort_unstable();
    unique.dedup();

    let rows = sqlx::query_as::<_, ParticipantSummary>(
        r#"
        SELECT u.id, u.email, u.role, u.full_name, p.first_name, p.last_name, p.profile_picture
        FROM users u
        LEFT JOIN profiles p ON p.user_id = u.id
        WHERE u.id = ANY($1)
        "#,
    )
    .bind(&unique)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|row| (row.id, row)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_profile() {
        let mut summary = ParticipantSummary {
            id: 1,
            email: "a@example.org".to_string(),
            role: Role::Admin,
            full_name: Some("Site Admin".to_string()),
            first_name: None,
            last_name: None,
            profile_picture: None,
        };
        assert_eq!(summary.display_name(), "Site Admin");

        summary.first_name = Some("Aline".to_string());
        summary.last_name = Some("Uwase".to_string());
        assert_eq!(summary.display_name(), "Aline Uwase");
    }
}
