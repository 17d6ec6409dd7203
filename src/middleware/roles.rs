use crate::errors::ApiError;
use crate::models::auth::{AuthUser, Role};
use axum::{extract::Request, middleware::Next, response::Response};

async fn require_roles(allowed: &[Role], request: Request, next: Next) -> Result<Response, ApiError> {
    // Set by auth_middleware, which must run first
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError::Unauthorized("Not authorized, no token".to_string()))?;

    if !allowed.contains(&user.role) {
        return Err(ApiError::forbidden(format!(
            "User role {} is not authorized to access this route",
            user.role
        )));
    }

    Ok(next.run(request).await)
}

pub async fn admin_only(request: Request, next: Next) -> Result<Response, ApiError> {
    require_roles(&[Role::Admin], request, next).await
}

pub async fn counselor_only(request: Request, next: Next) -> Result<Response, ApiError> {
    require_roles(&[Role::Counselor], request, next).await
}

pub async fn patient_only(request: Request, next: Next) -> Result<Response, ApiError> {
    require_roles(&[Role::Patient], request, next).await
}

pub async fn counselor_or_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    require_roles(&[Role::Counselor, Role::Admin], request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn gated_router(role: Option<Role>) -> Router {
        Router::new()
            .route("/gated", get(|| async { "ok" }))
            .layer(from_fn(counselor_or_admin))
            .layer(from_fn(move |mut request: Request, next: Next| async move {
                if let Some(role) = role {
                    request.extensions_mut().insert(AuthUser {
                        id: 1,
                        email: "user@example.org".to_string(),
                        role,
                    });
                }
                next.run(request).await
            }))
    }

    async fn status_for(role: Option<Role>) -> StatusCode {
        gated_router(role)
            .oneshot(HttpRequest::builder().uri("/gated").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_allowed_roles_pass() {
        assert_eq!(status_for(Some(Role::Counselor)).await, StatusCode::OK);
        assert_eq!(status_for(Some(Role::Admin)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_other_roles_are_forbidden() {
        assert_eq!(status_for(Some(Role::Patient)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        assert_eq!(status_for(None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_patient_gate() {
        let app = Router::new()
            .route("/mine", get(|| async { "ok" }))
            .layer(from_fn(patient_only))
            .layer(from_fn(|mut request: Request, next: Next| async move {
                request.extensions_mut().insert(AuthUser {
                    id: 2,
                    email: "c@example.org".to_string(),
                    role: Role::Counselor,
                });
                next.run(request).await
            }));

        let response = app
            .oneshot(HttpRequest::builder().uri("/mine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
