use axum::{
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::Json,
    routing::get,
    Extension, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use rcr_backend::{config, errors, models, realtime, services};

mod db;
mod handlers;
mod middleware;

// Shared by every handler through an `Extension`.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: config::AppConfig,
    pub hub: realtime::RoomHub,
    pub credential_guard: middleware::rate_limit::CredentialGuard,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        tracing::error!("server stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::AppConfig::from_env()?;
    let db_pool = db::create_pool(&config).await?;
    tracing::info!(max_connections = config.db_max_connections, "database pool ready");

    let port = config.port;
    let shared_state = Arc::new(AppState {
        db_pool,
        config,
        hub: realtime::RoomHub::new(),
        credential_guard: Default::default(),
    });

    let app = build_router(shared_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/api/health", get(health))
        .merge(handlers::auth::auth_routes())
        .merge(handlers::profile::profile_routes())
        .merge(handlers::admin::admin_routes())
        .merge(handlers::analytics::analytics_routes())
        .merge(handlers::counselor::counselor_routes())
        .merge(handlers::sessions::session_routes())
        .merge(handlers::messages::message_routes())
        .merge(handlers::resources::resource_routes())
        .merge(handlers::community::community_routes())
        .merge(handlers::templates::template_routes())
        .merge(handlers::socket::socket_routes())
        .fallback(not_found)
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(cors_layer(&state.config))
        .layer(Extension(state))
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let config = config.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
            origin
                .to_str()
                .map(|origin| config.is_allowed_origin(origin))
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Rwanda Cancer Relief API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/api/health",
        "websocket": "/ws",
    }))
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let database = db::ping(&state.db_pool).await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "success": database,
            "status": if database { "ok" } else { "degraded" },
            "database": if database { "connected" } else { "unreachable" },
            "timestamp": chrono::Utc::now(),
        })),
    )
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": "Route not found",
        })),
    )
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,rcr_backend=trace,sqlx=info,hyper=info,tower=info".to_string()
        } else {
            "info,rcr_backend=info,sqlx=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()?;

    tracing::info!("RCR backend starting up");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = config::AppConfig {
            database_url: "postgres://localhost/rcr_test".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_expires_in_hours: 1,
            db_max_connections: 1,
            frontend_url: Some("https://app.example.org".to_string()),
        };
        let db_pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        Arc::new(AppState {
            db_pool,
            config,
            hub: realtime::RoomHub::new(),
            credential_guard: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let app = build_router(test_state());
        for uri in [
            "/api/sessions",
            "/api/messages/conversations",
            "/api/community",
            "/api/session-notes-templates",
            "/api/admin/users",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_service_info_is_public() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_frontend() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/community")
                    .header(header::ORIGIN, "https://app.example.org")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example.org"
        );
    }
}
