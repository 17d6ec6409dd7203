use super::{non_empty, total_pages, Pagination};
use crate::errors::{ApiError, ApiResult};
use crate::middleware::{auth::auth_middleware, roles::admin_only};
use crate::models::auth::AuthUser;
use crate::models::community::*;
use crate::realtime::hub::community_targets;
use crate::realtime::ServerEvent;
use crate::services::analytics::{audience_scope, update_reaction_summary};
use crate::services::participants::{load_participants, ParticipantSummary};
use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{delete, get, post, put, Router},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json as Jsonb;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

const FEED_PAGE_SIZE: i64 = 10;
const FEED_MAX_PAGE_SIZE: i64 = 50;
const COMMENTS_PAGE_SIZE: i64 = 20;
const MAX_TITLE_LEN: usize = 160;
const MAX_COMMENT_LEN: usize = 1000;

pub fn community_routes() -> Router {
    let members = Router::new()
        .route("/api/community", get(list_posts).post(create_post))
        .route("/api/community/:id", delete(delete_post))
        .route("/api/community/:id/reactions", post(react_to_post))
        .route("/api/community/:id/comments", get(list_comments).post(create_comment))
        .route("/api/community/comments/:id", delete(delete_comment))
        .layer(from_fn(auth_middleware));

    let moderation = Router::new()
        .route("/api/community/:id/pin", put(toggle_pin))
        .layer(from_fn(admin_only))
        .layer(from_fn(auth_middleware));

    members.merge(moderation)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    id: i32,
    title: Option<String>,
    content: String,
    audience: Audience,
    tags: Vec<String>,
    attachments: Vec<Attachment>,
    is_pinned: bool,
    published_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    comment_count: i32,
    reaction_summary: ReactionSummary,
    user_reaction: Option<ReactionType>,
    author: Option<ParticipantSummary>,
}

impl PostView {
    fn new(post: CommunityPost, author: Option<ParticipantSummary>, user_reaction: Option<ReactionType>) -> Self {
        PostView {
            reaction_summary: post.reaction_summary(),
            id: post.id,
            title: post.title,
            content: post.content,
            audience: post.audience,
            tags: post.tags,
            attachments: post.attachments.0,
            is_pinned: post.is_pinned,
            published_at: post.published_at,
            created_at: post.created_at,
            updated_at: post.updated_at,
            comment_count: post.comment_count,
            user_reaction,
            author,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentView {
    id: i32,
    content: String,
    post: i32,
    parent_comment: Option<i32>,
    mentions: Vec<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    reaction_summary: ReactionSummary,
    author: Option<ParticipantSummary>,
}

impl CommentView {
    fn new(comment: CommunityComment, author: Option<ParticipantSummary>) -> Self {
        CommentView {
            reaction_summary: comment.reaction_summary(),
            id: comment.id,
            content: comment.content,
            post: comment.post_id,
            parent_comment: comment.parent_comment_id,
            mentions: comment.mentions,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            author,
        }
    }
}

fn to_value<T: Serialize>(view: &T) -> Value {
    serde_json::to_value(view).unwrap_or(Value::Null)
}

async fn find_post(pool: &PgPool, post_id: i32) -> ApiResult<CommunityPost> {
    sqlx::query_as::<_, CommunityPost>("SELECT * FROM community_posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

async fn author_of(pool: &PgPool, author_id: i32) -> Result<Option<ParticipantSummary>, sqlx::Error> {
    Ok(load_participants(pool, &[author_id]).await?.remove(&author_id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedFilter {
    tag: Option<String>,
    author: Option<i32>,
    search: Option<String>,
    audience: Option<Audience>,
    only_pinned: Option<bool>,
}

/// Audiences a feed query may read: the caller's scope, narrowed to the
/// requested audience when that audience is inside the scope.
fn feed_audiences(scope: Vec<Audience>, requested: Option<Audience>) -> Vec<Audience> {
    match requested {
        Some(audience) if scope.contains(&audience) => vec![audience],
        _ => scope,
    }
}

const FEED_CLAUSE: &str = r#"
    audience = ANY($1)
    AND ($2::TEXT IS NULL OR $2 = ANY(tags))
    AND ($3::INTEGER IS NULL OR author_id = $3)
    AND (NOT $4 OR is_pinned = true)
    AND ($5::TEXT IS NULL
         OR COALESCE(title, '') ILIKE $5
         OR content ILIKE $5
         OR EXISTS (SELECT 1 FROM unnest(tags) t WHERE t ILIKE $5))
"#;

async fn list_posts(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<FeedFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;
    let audiences = feed_audiences(audience_scope(auth.role), filter.audience);
    let limit = pagination.limit(FEED_PAGE_SIZE).min(FEED_MAX_PAGE_SIZE);
    let offset = (pagination.page() - 1) * limit;
    let tag = non_empty(filter.tag.as_deref());
    let pattern = non_empty(filter.search.as_deref()).map(|s| format!("%{}%", s));
    let only_pinned = filter.only_pinned.unwrap_or(false);

    let posts = sqlx::query_as::<_, CommunityPost>(&format!(
        "SELECT * FROM community_posts WHERE {} ORDER BY is_pinned DESC, published_at DESC LIMIT $6 OFFSET $7",
        FEED_CLAUSE
    ))
    .bind(&audiences)
    .bind(&tag)
    .bind(filter.author)
    .bind(only_pinned)
    .bind(&pattern)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM community_posts WHERE {}", FEED_CLAUSE))
        .bind(&audiences)
        .bind(&tag)
        .bind(filter.author)
        .bind(only_pinned)
        .bind(&pattern)
        .fetch_one(pool)
        .await?;

    let post_ids: Vec<i32> = posts.iter().map(|p| p.id).collect();
    let reactions: HashMap<i32, ReactionType> = sqlx::query_as::<_, (i32, ReactionType)>(
        "SELECT post_id, reaction_type FROM post_reactions WHERE user_id = $1 AND post_id = ANY($2)",
    )
    .bind(auth.id)
    .bind(&post_ids)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    let author_ids: Vec<i32> = posts.iter().map(|p| p.author_id).collect();
    let authors = load_participants(pool, &author_ids).await?;

    let views: Vec<PostView> = posts
        .into_iter()
        .map(|post| {
            let author = authors.get(&post.author_id).cloned();
            let reaction = reactions.get(&post.id).copied();
            PostView::new(post, author, reaction)
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": views,
        "pagination": {
            "page": pagination.page(),
            "limit": limit,
            "total": total,
            "totalPages": total_pages(total, limit),
        }
    })))
}

async fn create_post(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let content = non_empty(payload.content.as_deref()).ok_or_else(|| ApiError::bad_request("Post content is required"))?;
    let title = non_empty(payload.title.as_deref());
    if title.as_ref().is_some_and(|t| t.chars().count() > MAX_TITLE_LEN) {
        return Err(ApiError::bad_request("Post title cannot exceed 160 characters"));
    }

    // Audiences outside the author's scope fall back to the first allowed one.
    let scope = audience_scope(auth.role);
    let audience = match payload.audience {
        Some(audience) if scope.contains(&audience) => audience,
        _ => scope.first().copied().unwrap_or(Audience::All),
    };
    let tags: Vec<String> = payload
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let post = sqlx::query_as::<_, CommunityPost>(
        r#"
        INSERT INTO community_posts (author_id, title, content, audience, tags, attachments, published_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        RETURNING *
        "#,
    )
    .bind(auth.id)
    .bind(title)
    .bind(content)
    .bind(audience)
    .bind(tags)
    .bind(Jsonb(payload.attachments))
    .fetch_one(&state.db_pool)
    .await?;

    let author = author_of(&state.db_pool, auth.id).await?;
    let view = PostView::new(post, author, None);

    let event = ServerEvent::CommunityNewPost { post: to_value(&view) };
    state.hub.emit(&community_targets(view.audience, auth.id), &event).await;

    tracing::info!(post_id = view.id, author_id = auth.id, audience = %view.audience, "community post created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Post created successfully",
            "data": view,
        })),
    ))
}

async fn react_to_post(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(post_id): Path<i32>,
    Json(payload): Json<ReactRequest>,
) -> ApiResult<Json<Value>> {
    let reaction: ReactionType = payload
        .reaction_type
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid reaction type"))?;

    let mut tx = state.db_pool.begin().await?;

    let post = sqlx::query_as::<_, CommunityPost>("SELECT * FROM community_posts WHERE id = $1 FOR UPDATE")
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    let existing = sqlx::query_scalar::<_, ReactionType>(
        "SELECT reaction_type FROM post_reactions WHERE post_id = $1 AND user_id = $2",
    )
    .bind(post_id)
    .bind(auth.id)
    .fetch_optional(&mut *tx)
    .await?;

    let (summary, user_reaction) = match existing {
        Some(current) if current == reaction => {
            sqlx::query("DELETE FROM post_reactions WHERE post_id = $1 AND user_id = $2")
                .bind(post_id)
                .bind(auth.id)
                .execute(&mut *tx)
                .await?;
            (update_reaction_summary(post.reaction_summary(), Some(current), None), None)
        }
        Some(current) => {
            sqlx::query(
                "UPDATE post_reactions SET reaction_type = $3, reacted_at = NOW() WHERE post_id = $1 AND user_id = $2",
            )
            .bind(post_id)
            .bind(auth.id)
            .bind(reaction)
            .execute(&mut *tx)
            .await?;
            (
                update_reaction_summary(post.reaction_summary(), Some(current), Some(reaction)),
                Some(reaction),
            )
        }
        None => {
            sqlx::query("INSERT INTO post_reactions (post_id, user_id, reaction_type) VALUES ($1, $2, $3)")
                .bind(post_id)
                .bind(auth.id)
                .bind(reaction)
                .execute(&mut *tx)
                .await?;
            (update_reaction_summary(post.reaction_summary(), None, Some(reaction)), Some(reaction))
        }
    };

    let post = sqlx::query_as::<_, CommunityPost>(
        r#"
        UPDATE community_posts
        SET reactions_like = $2, reactions_support = $3, reactions_insight = $4, reactions_celebrate = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(post_id)
    .bind(summary.like)
    .bind(summary.support)
    .bind(summary.insight)
    .bind(summary.celebrate)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let author = author_of(&state.db_pool, post.author_id).await?;
    let targets = community_targets(post.audience, post.author_id);
    let view = PostView::new(post, author, user_reaction);

    let event = ServerEvent::CommunityPostReacted {
        post_id,
        reaction_summary: to_value(&summary),
        reacted_by: auth.id,
        user_reaction: user_reaction.map(|r| r.to_string()),
    };
    state.hub.emit(&targets, &event).await;

    Ok(Json(json!({
        "success": true,
        "data": view,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentFilter {
    parent_id: Option<i32>,
}

async fn list_comments(
    Extension(state): Extension<Arc<AppState>>,
    Path(post_id): Path<i32>,
    Query(filter): Query<CommentFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let pool = &state.db_pool;
    find_post(pool, post_id).await?;

    let limit = pagination.limit(COMMENTS_PAGE_SIZE);
    let comments = sqlx::query_as::<_, CommunityComment>(
        r#"
        SELECT * FROM community_comments
        WHERE post_id = $1 AND parent_comment_id IS NOT DISTINCT FROM $2
        ORDER BY created_at ASC, id ASC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(post_id)
    .bind(filter.parent_id)
    .bind(limit)
    .bind(pagination.offset(COMMENTS_PAGE_SIZE))
    .fetch_all(pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM community_comments WHERE post_id = $1 AND parent_comment_id IS NOT DISTINCT FROM $2",
    )
    .bind(post_id)
    .bind(filter.parent_id)
    .fetch_one(pool)
    .await?;

    let author_ids: Vec<i32> = comments.iter().map(|c| c.author_id).collect();
    let authors = load_participants(pool, &author_ids).await?;
    let views: Vec<CommentView> = comments
        .into_iter()
        .map(|comment| {
            let author = authors.get(&comment.author_id).cloned();
            CommentView::new(comment, author)
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": views,
        "pagination": {
            "page": pagination.page(),
            "limit": limit,
            "total": total,
            "totalPages": total_pages(total, limit),
        }
    })))
}

fn dedup_mentions(mut mentions: Vec<i32>) -> Vec<i32> {
    let mut seen = std::collections::HashSet::new();
    mentions.retain(|id| *id > 0 && seen.insert(*id));
    mentions
}

async fn create_comment(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(post_id): Path<i32>,
    Json(payload): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let content =
        non_empty(payload.content.as_deref()).ok_or_else(|| ApiError::bad_request("Comment content is required"))?;
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(ApiError::bad_request("Comment cannot exceed 1000 characters"));
    }

    let post = find_post(&state.db_pool, post_id).await?;

    if let Some(parent_id) = payload.parent_comment {
        let parent_post = sqlx::query_scalar::<_, i32>("SELECT post_id FROM community_comments WHERE id = $1")
            .bind(parent_id)
            .fetch_optional(&state.db_pool)
            .await?;
        if parent_post != Some(post_id) {
            return Err(ApiError::bad_request("Parent comment not found for this post"));
        }
    }

    let mut tx = state.db_pool.begin().await?;
    let comment = sqlx::query_as::<_, CommunityComment>(
        r#"
        INSERT INTO community_comments (post_id, author_id, content, parent_comment_id, mentions)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(post_id)
    .bind(auth.id)
    .bind(&content)
    .bind(payload.parent_comment)
    .bind(dedup_mentions(payload.mentions))
    .fetch_one(&mut *tx)
    .await?;

    let comment_count = sqlx::query_scalar::<_, i32>(
        "UPDATE community_posts SET comment_count = comment_count + 1 WHERE id = $1 RETURNING comment_count",
    )
    .bind(post_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    let author = author_of(&state.db_pool, auth.id).await?;
    let view = CommentView::new(comment, author);

    let event = ServerEvent::CommunityNewComment {
        post_id,
        comment: to_value(&view),
        comment_count,
    };
    state.hub.emit(&community_targets(post.audience, post.author_id), &event).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Comment added successfully",
            "data": view,
        })),
    ))
}

async fn delete_post(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(post_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let post = find_post(&state.db_pool, post_id).await?;

    if post.author_id != auth.id && !auth.is_admin() {
        return Err(ApiError::forbidden("You do not have permission to delete this post"));
    }

    let mut tx = state.db_pool.begin().await?;
    let deleted_comments = sqlx::query("DELETE FROM community_comments WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM community_posts WHERE id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let event = ServerEvent::CommunityPostDeleted { post_id };
    state.hub.emit(&community_targets(post.audience, post.author_id), &event).await;

    tracing::info!(post_id, deleted_by = auth.id, deleted_comments, "community post deleted");

    Ok(Json(json!({
        "success": true,
        "message": "Post deleted successfully",
        "data": {
            "postId": post_id,
            "deletedComments": deleted_comments,
        }
    })))
}

async fn delete_comment(
    Extension(state): Extension<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(comment_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let comment = sqlx::query_as::<_, CommunityComment>("SELECT * FROM community_comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    let post = find_post(&state.db_pool, comment.post_id)
        .await
        .map_err(|_| ApiError::not_found("Parent post not found"))?;

    let allowed = comment.author_id == auth.id || post.author_id == auth.id || auth.is_admin();
    if !allowed {
        return Err(ApiError::forbidden("You do not have permission to delete this comment"));
    }

    let mut tx = state.db_pool.begin().await?;
    let removed = sqlx::query(
        r#"
        WITH RECURSIVE doomed AS (
            SELECT id FROM community_comments WHERE id = $1
            UNION ALL
            SELECT c.id FROM community_comments c JOIN doomed d ON c.parent_comment_id = d.id
        )
        DELETE FROM community_comments WHERE id IN (SELECT id FROM doomed)
        "#,
    )
    .bind(comment_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let comment_count = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE community_posts
        SET comment_count = GREATEST(comment_count - $2, 0)
        WHERE id = $1
        RETURNING comment_count
        "#,
    )
    .bind(post.id)
    .bind(removed as i32)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    let event = ServerEvent::CommunityCommentDeleted {
        post_id: post.id,
        comment_id,
        comment_count,
    };
    state.hub.emit(&community_targets(post.audience, post.author_id), &event).await;

    Ok(Json(json!({
        "success": true,
        "message": "Comment deleted successfully",
    })))
}

async fn toggle_pin(
    Extension(state): Extension<Arc<AppState>>,
    Path(post_id): Path<i32>,
) -> ApiResult<Json<Value>> {
    let post = sqlx::query_as::<_, CommunityPost>(
        "UPDATE community_posts SET is_pinned = NOT is_pinned, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(post_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Post not found"))?;

    let event = ServerEvent::CommunityPostUpdated {
        post_id,
        is_pinned: post.is_pinned,
    };
    state.hub.emit(&community_targets(post.audience, post.author_id), &event).await;

    let state_word = if post.is_pinned { "pinned" } else { "unpinned" };
    Ok(Json(json!({
        "success": true,
        "message": format!("Post {} successfully", state_word),
        "data": {
            "postId": post_id,
            "isPinned": post.is_pinned,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_audiences_respect_scope() {
        let patient = audience_scope(crate::models::auth::Role::Patient);
        assert_eq!(feed_audiences(patient.clone(), None), patient);
        assert_eq!(feed_audiences(patient.clone(), Some(Audience::All)), vec![Audience::All]);
        // Counselor-only posts are outside a patient's scope.
        assert_eq!(feed_audiences(patient.clone(), Some(Audience::Counselors)), patient);
    }

    #[test]
    fn test_dedup_mentions() {
        assert_eq!(dedup_mentions(vec![3, 3, -1, 0, 7, 3]), vec![3, 7]);
    }

    #[test]
    fn test_post_view_serializes_camel_case() {
        let now = Utc::now();
        let post = CommunityPost {
            id: 4,
            author_id: 1,
            title: None,
            content: "Sharing what helped me".to_string(),
            audience: Audience::Patients,
            tags: vec!["coping".to_string()],
            attachments: Jsonb(Vec::new()),
            is_pinned: false,
            published_at: now,
            reactions_like: 0,
            reactions_support: 2,
            reactions_insight: 0,
            reactions_celebrate: 1,
            comment_count: 3,
            created_at: now,
            updated_at: now,
        };

        let value = to_value(&PostView::new(post, None, Some(ReactionType::Support)));
        assert_eq!(value["reactionSummary"]["support"], 2);
        assert_eq!(value["userReaction"], "support");
        assert_eq!(value["commentCount"], 3);
        assert_eq!(value["audience"], "patients");
    }
}
