use super::non_empty;
use crate::errors::{ApiError, ApiResult};
use crate::middleware::{auth::auth_middleware, roles::counselor_or_admin};
use crate::models::auth::AuthUser;
use crate::models::template::{validate_fields, SessionNotesTemplate, TemplateCategory, TemplateRequest};
use crate::services::participants::{load_participants, ParticipantSummary};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, Router},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json as Jsonb;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

pub fn template_routes() -> Router {
    Router::new()
        .route("/api/session-notes-templates", get(list_templates).post(create_template))
        .route(
            "/api/session-notes-templates/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .layer(from_fn(counselor_or_admin))
        .layer(from_fn(auth_middleware))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateView {
    #[serde(flatten)]
    template: SessionNotesTemplate,
    creator: Option<ParticipantSummary>,
}

async fn template_views(pool: &PgPool, templates: Vec<SessionNotesTemplate>) -> Result<Vec<TemplateView>, sqlx::Error> {
    let ids: Vec<i32> = templates.iter().map(|t| t.created_by).collect();
    let creators = load_participants(pool, &ids).await?;
    Ok(templates
        .into_iter()
        .map(|template| TemplateView {
            creator: creators.get(&template.created_by).cloned(),
            template,
        })
        .collect())
}

async fn template_view(pool: &PgPool, template: SessionNotesTemplate) -> ApiResult<TemplateView> {
    template_views(pool, vec![template])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Template not found"))
}

/// Clears the default flag on every other template owned by `owner_id`.
async fn clear_default(conn: &mut PgConnection, owner_id: i32, keep: Option<i32>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE session_notes_templates
        SET is_default = false, updated_at = NOW()
        WHERE created_by = $1 AND is_default = true AND ($2::INTEGER IS NULL OR id <> $2)
        "#,
    )
    .bind(owner_id)
    .bind(keep)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateFilter {
    category: Option<TemplateCategory>,
    is_public: Option<bool>,
}

async fn list_templates(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<TemplateFilter>,
) -> ApiResult<Json<Value>> {
    let templates = sqlx::query_as::<_, SessionNotesTemplate>(
        r#"
        SELECT * FROM session_notes_templates
        WHERE (created_by = $1 OR is_public = true)
          AND ($2::TEXT IS NULL OR category = $2)
          AND ($3::BOOLEAN IS NULL OR is_public = $3)
        ORDER BY is_default DESC, created_at DESC
        "#,
    )
    .bind(auth.id)
    .bind(filter.category)
    .bind(filter.is_public)
    .fetch_all(&state.db_pool)
    .await?;

    let views = template_views(&state.db_pool, templates).await?;
    Ok(Json(json!({
        "success": true,
        "count": views.len(),
        "data": views,
    })))
}

async fn get_template(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(template_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let template = sqlx::query_as::<_, SessionNotesTemplate>(
        "SELECT * FROM session_notes_templates WHERE id = $1 AND (created_by = $2 OR is_public = true)",
    )
    .bind(template_id)
    .bind(auth.id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Template not found"))?;

    Ok(Json(json!({
        "success": true,
        "data": template_view(&state.db_pool, template).await?,
    })))
}

async fn create_template(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<TemplateRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (name, body) = match (non_empty(payload.name.as_deref()), non_empty(payload.template.as_deref())) {
        (Some(name), Some(body)) => (name, body),
        _ => return Err(ApiError::bad_request("Name and template are required")),
    };
    let fields = payload.fields.unwrap_or_default();
    validate_fields(&fields).map_err(ApiError::BadRequest)?;
    let is_default = payload.is_default.unwrap_or(false);

    let mut tx = state.db_pool.begin().await?;
    if is_default {
        clear_default(&mut tx, auth.id, None).await?;
    }

    let template = sqlx::query_as::<_, SessionNotesTemplate>(
        r#"
        INSERT INTO session_notes_templates
            (name, description, template, fields, created_by, is_default, is_public, category)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&name)
    .bind(payload.description.unwrap_or_default())
    .bind(&body)
    .bind(Jsonb(&fields))
    .bind(auth.id)
    .bind(is_default)
    .bind(payload.is_public.unwrap_or(false))
    .bind(payload.category.unwrap_or(TemplateCategory::General))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(template_id = template.id, created_by = auth.id, "session notes template created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Template created successfully",
            "data": template_view(&state.db_pool, template).await?,
        })),
    ))
}

/// Applies the present fields of `payload` to `template`. Blank names and
/// bodies are ignored; descriptions may be cleared.
fn apply_template_update(template: &mut SessionNotesTemplate, payload: TemplateRequest) {
    if let Some(name) = non_empty(payload.name.as_deref()) {
        template.name = name;
    }
    if let Some(description) = payload.description {
        template.description = description;
    }
    if let Some(body) = non_empty(payload.template.as_deref()) {
        template.template = body;
    }
    if let Some(fields) = payload.fields {
        template.fields = Jsonb(fields);
    }
    if let Some(is_default) = payload.is_default {
        template.is_default = is_default;
    }
    if let Some(is_public) = payload.is_public {
        template.is_public = is_public;
    }
    if let Some(category) = payload.category {
        template.category = category;
    }
}

async fn editable_template(
    conn: &mut PgConnection,
    template_id: i32,
    auth: &AuthUser,
    action: &str,
) -> ApiResult<SessionNotesTemplate> {
    let template = sqlx::query_as::<_, SessionNotesTemplate>(
        "SELECT * FROM session_notes_templates WHERE id = $1 FOR UPDATE",
    )
    .bind(template_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Template not found"))?;

    if template.created_by != auth.id && !auth.is_admin() {
        return Err(ApiError::forbidden(format!(
            "You do not have permission to {} this template",
            action
        )));
    }
    Ok(template)
}

async fn update_template(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(template_id): Path<i32>,
    Json(payload): Json<TemplateRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(fields) = payload.fields.as_deref() {
        validate_fields(fields).map_err(ApiError::BadRequest)?;
    }

    let mut tx = state.db_pool.begin().await?;
    let mut template = editable_template(&mut tx, template_id, &auth, "update").await?;

    let was_default = template.is_default;
    apply_template_update(&mut template, payload);

    // The default flag is unique per owner, not per editor.
    if template.is_default && !was_default {
        clear_default(&mut tx, template.created_by, Some(template.id)).await?;
    }

    let template = sqlx::query_as::<_, SessionNotesTemplate>(
        r#"
        UPDATE session_notes_templates
        SET name = $2, description = $3, template = $4, fields = $5,
            is_default = $6, is_public = $7, category = $8, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(template.id)
    .bind(&template.name)
    .bind(&template.description)
    .bind(&template.template)
    .bind(&template.fields)
    .bind(template.is_default)
    .bind(template.is_public)
    .bind(template.category)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "message": "Template updated successfully",
        "data": template_view(&state.db_pool, template).await?,
    })))
}

async fn delete_template(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(template_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let mut tx = state.db_pool.begin().await?;
    let template = editable_template(&mut tx, template_id, &auth, "delete").await?;

    sqlx::query("DELETE FROM session_notes_templates WHERE id = $1")
        .bind(template.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "message": "Template deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::{FieldType, TemplateField};
    use chrono::Utc;

    fn template() -> SessionNotesTemplate {
        let now = Utc::now();
        SessionNotesTemplate {
            id: 1,
            name: "Intake".to_string(),
            description: "First visit".to_string(),
            template: "Presenting concerns:".to_string(),
            fields: Jsonb(Vec::new()),
            created_by: 5,
            is_default: false,
            is_public: false,
            category: TemplateCategory::Initial,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_update_ignores_blank_name_and_body() {
        let mut current = template();
        let payload: TemplateRequest = serde_json::from_value(json!({
            "name": "  ",
            "template": "",
            "description": "",
            "isPublic": true,
            "category": "follow-up",
            "fields": [{ "name": "Mood", "type": "select", "options": ["low", "ok"] }]
        }))
        .unwrap();

        apply_template_update(&mut current, payload);

        assert_eq!(current.name, "Intake");
        assert_eq!(current.template, "Presenting concerns:");
        assert_eq!(current.description, "");
        assert!(current.is_public);
        assert!(!current.is_default);
        assert_eq!(current.category, TemplateCategory::FollowUp);
        assert_eq!(
            current.fields.0,
            vec![TemplateField {
                name: "Mood".to_string(),
                field_type: FieldType::Select,
                required: false,
                options: vec!["low".to_string(), "ok".to_string()],
            }]
        );
    }

    #[test]
    fn test_template_view_keeps_owner_id() {
        let view = TemplateView {
            template: template(),
            creator: None,
        };
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["createdBy"], 5);
        assert_eq!(value["category"], "initial");
        assert!(value["creator"].is_null());
    }
}
