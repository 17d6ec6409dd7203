use crate::errors::ApiError;
use crate::handlers::auth::verify_jwt_token;
use crate::models::auth::{AuthUser, User};
use crate::AppState;
use axum::{
    extract::{Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| ApiError::Unauthorized("Not authorized, no token".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid Authorization header format".to_string()))?;

    auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ApiError::Unauthorized("Invalid Authorization header format. Expected 'Bearer <token>'".to_string())
        })
}

/// Verifies `token` and re-loads the user it names. Shared by the HTTP
/// middleware and the WebSocket handshake.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, ApiError> {
    let claims = verify_jwt_token(&state.config, token).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        ApiError::Unauthorized("Not authorized, token failed".to_string())
    })?;

    let user_id = claims
        .user_id()
        .ok_or_else(|| ApiError::Unauthorized("Not authorized, token failed".to_string()))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account has been deactivated".to_string()));
    }

    Ok(user)
}

pub async fn auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)?;
    let user = authenticate(&state, token).await?;

    request.extensions_mut().insert(AuthUser::from(&user));

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(ApiError::Unauthorized(_))));

        headers.insert("Authorization", HeaderValue::from_static("Token abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert("Authorization", HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }
}
