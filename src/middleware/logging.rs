use axum::{
    extract::{ConnectInfo, MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

fn outcome(status: u16) -> &'static str {
    match status {
        200..=299 => "request completed",
        300..=399 => "request completed (redirect)",
        400..=499 => "request completed (client error)",
        500..=599 => "request completed (server error)",
        _ => "request completed (unknown status)",
    }
}

/// One structured event per request, levelled by status class.
pub async fn request_logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let uri = req.uri().clone();
    let matched_path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_owned());
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %matched_path,
        remote_addr = %remote_addr,
        "incoming request"
    );

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();
    let message = outcome(status);

    match status {
        500..=599 => tracing::error!(
            request_id = %request_id, method = %method, path = %matched_path, uri = %uri,
            status, duration_ms = %duration_ms, "{}", message
        ),
        400..=499 => tracing::warn!(
            request_id = %request_id, method = %method, path = %matched_path, uri = %uri,
            status, duration_ms = %duration_ms, "{}", message
        ),
        _ => tracing::info!(
            request_id = %request_id, method = %method, path = %matched_path, uri = %uri,
            status, duration_ms = %duration_ms, "{}", message
        ),
    }

    response
}

#[cfg(test)]
mod tests {
    use super::outcome;

    #[test]
    fn test_outcome_by_status_class() {
        assert_eq!(outcome(201), "request completed");
        assert_eq!(outcome(404), "request completed (client error)");
        assert_eq!(outcome(503), "request completed (server error)");
    }
}
