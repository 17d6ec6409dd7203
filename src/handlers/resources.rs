use super::{non_empty, total_pages, Pagination};
use crate::errors::{ApiError, ApiResult};
use crate::middleware::{auth::auth_middleware, roles::counselor_or_admin};
use crate::models::auth::AuthUser;
use crate::models::resource::*;
use crate::services::participants::{load_participants, ParticipantSummary};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post, put, Router},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: i64 = 20;

pub fn resource_routes() -> Router {
    let public = Router::new()
        .route("/api/resources", get(list_resources))
        .route("/api/resources/:id", get(get_resource))
        .route("/api/resources/:id/download", get(download_resource));

    let managed = Router::new()
        .route("/api/resources", post(create_resource))
        .route("/api/resources/:id", put(update_resource).delete(delete_resource))
        .layer(from_fn(counselor_or_admin))
        .layer(from_fn(auth_middleware));

    public.merge(managed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Newest,
    Oldest,
    Alphabetical,
}

impl SortOrder {
    /// Unknown values fall back to newest first.
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("oldest") => SortOrder::Oldest,
            Some("alphabetical") => SortOrder::Alphabetical,
            _ => SortOrder::Newest,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            SortOrder::Newest => "created_at DESC, id DESC",
            SortOrder::Oldest => "created_at ASC, id ASC",
            SortOrder::Alphabetical => "title ASC, id ASC",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceFilter {
    #[serde(rename = "type")]
    resource_type: Option<ResourceType>,
    category: Option<ResourceCategory>,
    search: Option<String>,
    sort_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceView {
    #[serde(flatten)]
    resource: Resource,
    uploader: Option<ParticipantSummary>,
}

async fn with_uploaders(pool: &PgPool, resources: Vec<Resource>) -> Result<Vec<ResourceView>, sqlx::Error> {
    let ids: Vec<i32> = resources.iter().map(|r| r.uploaded_by).collect();
    let people = load_participants(pool, &ids).await?;
    Ok(resources
        .into_iter()
        .map(|resource| ResourceView {
            uploader: people.get(&resource.uploaded_by).cloned(),
            resource,
        })
        .collect())
}

const FILTER_CLAUSE: &str = r#"
    is_public = true
    AND ($1::TEXT IS NULL OR resource_type = $1)
    AND ($2::TEXT IS NULL OR category = $2)
    AND ($3::TEXT IS NULL
         OR title ILIKE $3
         OR description ILIKE $3
         OR EXISTS (SELECT 1 FROM unnest(tags) t WHERE t ILIKE $3))
"#;

async fn list_resources(
    Extension(state): Extension<Arc<AppState>>,
    Query(filter): Query<ResourceFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let pattern = non_empty(filter.search.as_deref()).map(|s| format!("%{}%", s));
    let sort = SortOrder::parse(filter.sort_by.as_deref());
    let limit = pagination.limit(DEFAULT_PAGE_SIZE);

    let resources = sqlx::query_as::<_, Resource>(&format!(
        "SELECT * FROM resources WHERE {} ORDER BY {} LIMIT $4 OFFSET $5",
        FILTER_CLAUSE,
        sort.order_by()
    ))
    .bind(filter.resource_type)
    .bind(filter.category)
    .bind(&pattern)
    .bind(limit)
    .bind(pagination.offset(DEFAULT_PAGE_SIZE))
    .fetch_all(&state.db_pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM resources WHERE {}", FILTER_CLAUSE))
        .bind(filter.resource_type)
        .bind(filter.category)
        .bind(&pattern)
        .fetch_one(&state.db_pool)
        .await?;

    let resources = with_uploaders(&state.db_pool, resources).await?;

    Ok(Json(json!({
        "success": true,
        "count": resources.len(),
        "total": total,
        "page": pagination.page(),
        "pages": total_pages(total, limit),
        "data": resources,
    })))
}

async fn get_resource(
    Extension(state): Extension<Arc<AppState>>,
    Path(resource_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let resource = sqlx::query_as::<_, Resource>(
        "UPDATE resources SET view_count = view_count + 1 WHERE id = $1 RETURNING *",
    )
    .bind(resource_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Resource not found"))?;

    Ok(Json(json!({
        "success": true,
        "data": with_uploaders(&state.db_pool, vec![resource]).await?.pop(),
    })))
}

async fn download_resource(
    Extension(state): Extension<Arc<AppState>>,
    Path(resource_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let (url, download_count) = sqlx::query_as::<_, (String, i32)>(
        "UPDATE resources SET download_count = download_count + 1 WHERE id = $1 RETURNING url, download_count",
    )
    .bind(resource_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Resource not found"))?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "url": url,
            "downloadCount": download_count,
        }
    })))
}

async fn create_resource(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreateResourceRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (title, description, resource_type) = match (
        non_empty(payload.title.as_deref()),
        non_empty(payload.description.as_deref()),
        payload.resource_type,
    ) {
        (Some(title), Some(description), Some(resource_type)) => (title, description, resource_type),
        _ => return Err(ApiError::bad_request("Title, description, and type are required")),
    };
    let url = non_empty(payload.url.as_deref()).ok_or_else(|| ApiError::bad_request("A resource URL is required"))?;

    let resource = sqlx::query_as::<_, Resource>(
        r#"
        INSERT INTO resources (
            title, description, resource_type, url, thumbnail, uploaded_by, category, tags,
            is_public, file_size, mime_type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(resource_type)
    .bind(url)
    .bind(payload.thumbnail.unwrap_or_default())
    .bind(auth.id)
    .bind(payload.category.unwrap_or(ResourceCategory::Other))
    .bind(normalize_tags(payload.tags))
    .bind(payload.is_public.unwrap_or(true))
    .bind(payload.file_size)
    .bind(payload.mime_type)
    .fetch_one(&state.db_pool)
    .await?;

    tracing::info!(resource_id = resource.id, uploaded_by = auth.id, "resource created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Resource created successfully",
            "data": with_uploaders(&state.db_pool, vec![resource]).await?.pop(),
        })),
    ))
}

/// Loads a resource the caller may modify: its uploader or any admin.
async fn editable_resource(pool: &PgPool, resource_id: i32, auth: &AuthUser, action: &str) -> ApiResult<Resource> {
    let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = $1")
        .bind(resource_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Resource not found"))?;

    if resource.uploaded_by != auth.id && !auth.is_admin() {
        return Err(ApiError::forbidden(format!(
            "You do not have permission to {} this resource",
            action
        )));
    }
    Ok(resource)
}

fn apply_resource_update(resource: &mut Resource, update: UpdateResourceRequest) {
    if let Some(title) = non_empty(update.title.as_deref()) {
        resource.title = title;
    }
    if let Some(description) = non_empty(update.description.as_deref()) {
        resource.description = description;
    }
    if let Some(resource_type) = update.resource_type {
        resource.resource_type = resource_type;
    }
    if let Some(url) = non_empty(update.url.as_deref()) {
        resource.url = url;
    }
    if let Some(thumbnail) = update.thumbnail {
        resource.thumbnail = thumbnail;
    }
    if let Some(category) = update.category {
        resource.category = category;
    }
    if update.tags.is_some() {
        resource.tags = normalize_tags(update.tags);
    }
    if let Some(is_public) = update.is_public {
        resource.is_public = is_public;
    }
}

async fn update_resource(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(resource_id): Path<i32>,
    Json(payload): Json<UpdateResourceRequest>,
) -> ApiResult<Json<Value>> {
    let mut resource = editable_resource(&state.db_pool, resource_id, &auth, "update").await?;
    apply_resource_update(&mut resource, payload);

    let resource = sqlx::query_as::<_, Resource>(
        r#"
        UPDATE resources
        SET title = $2, description = $3, resource_type = $4, url = $5, thumbnail = $6,
            category = $7, tags = $8, is_public = $9, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(resource.id)
    .bind(&resource.title)
    .bind(&resource.description)
    .bind(resource.resource_type)
    .bind(&resource.url)
    .bind(&resource.thumbnail)
    .bind(resource.category)
    .bind(&resource.tags)
    .bind(resource.is_public)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Resource updated successfully",
        "data": with_uploaders(&state.db_pool, vec![resource]).await?.pop(),
    })))
}

async fn delete_resource(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(resource_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let resource = editable_resource(&state.db_pool, resource_id, &auth, "delete").await?;

    sqlx::query("DELETE FROM resources WHERE id = $1")
        .bind(resource.id)
        .execute(&state.db_pool)
        .await?;

    tracing::info!(resource_id = resource.id, deleted_by = auth.id, "resource deleted");

    Ok(Json(json!({
        "success": true,
        "message": "Resource deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::StringOrList;
    use chrono::Utc;

    #[test]
    fn test_sort_order_fallback() {
        assert_eq!(SortOrder::parse(Some("oldest")), SortOrder::Oldest);
        assert_eq!(SortOrder::parse(Some("alphabetical")), SortOrder::Alphabetical);
        assert_eq!(SortOrder::parse(Some("popular")), SortOrder::Newest);
        assert_eq!(SortOrder::parse(None), SortOrder::Newest);
    }

    #[test]
    fn test_apply_resource_update() {
        let now = Utc::now();
        let mut resource = Resource {
            id: 1,
            title: "Coping guide".to_string(),
            description: "Daily coping strategies".to_string(),
            resource_type: ResourceType::Guide,
            url: "https://example.org/guide.pdf".to_string(),
            thumbnail: String::new(),
            uploaded_by: 9,
            category: ResourceCategory::Support,
            tags: vec!["coping".to_string()],
            is_public: true,
            download_count: 0,
            view_count: 0,
            file_size: None,
            mime_type: None,
            created_at: now,
            updated_at: now,
        };

        apply_resource_update(
            &mut resource,
            UpdateResourceRequest {
                title: Some("  ".to_string()),
                description: None,
                resource_type: None,
                url: None,
                thumbnail: None,
                category: Some(ResourceCategory::Wellness),
                tags: Some(StringOrList::One("sleep, rest".to_string())),
                is_public: Some(false),
            },
        );

        assert_eq!(resource.title, "Coping guide");
        assert_eq!(resource.category, ResourceCategory::Wellness);
        assert_eq!(resource.tags, vec!["sleep", "rest"]);
        assert!(!resource.is_public);
    }
}
