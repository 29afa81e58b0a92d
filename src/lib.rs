//! Recast - multi-tenant AI content transformation backend.

pub mod auth;
pub mod blobstore;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod executor;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod pagination;
pub mod providers;
pub mod queue;
pub mod realtime;
pub mod repo;
pub mod schema;
pub mod telemetry;
pub mod transform;

use axum::{
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};

use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use std::sync::Arc;
use std::time::Duration;

use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use auth::jwt::JwtConfig;
use auth::lockout::LoginLockout;
use auth::password::PasswordPolicy;
use blobstore::BlobStore;
use content::ContentExtractor;
use events::EventBus;
use middleware::rate_limit::{
    auth_rate_limit_middleware, workspace_rate_limit_middleware, RateLimitState,
};
use middleware::request_id::request_id_middleware;
use queue::QueueSignal;
use realtime::{PresenceTracker, SessionHub};

pub use config::Config;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub config: Arc<Config>,
    pub jwt_config: Arc<JwtConfig>,
    pub password_policy: PasswordPolicy,
    pub lockout: Arc<LoginLockout>,
    pub rate_limit: RateLimitState,
    pub bus: EventBus,
    pub hub: Arc<SessionHub>,
    pub blob_store: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub queue_signal: QueueSignal,
    pub broker_pool: Option<deadpool_redis::Pool>,
}

impl AppState {
    pub fn new(
        db_pool: DbPool,
        broker_pool: Option<deadpool_redis::Pool>,
        blob_store: Arc<dyn BlobStore>,
        extractor: Arc<dyn ContentExtractor>,
        config: Config,
    ) -> Self {
        let jwt_config = JwtConfig::from_env(
            config.auth.access_ttl_seconds,
            config.auth.issuer.clone(),
        );
        Self::with_jwt_config(db_pool, broker_pool, blob_store, extractor, config, jwt_config)
    }

    /// Test seam: accepts a pre-built key pair instead of reading the
    /// environment.
    pub fn with_jwt_config(
        db_pool: DbPool,
        broker_pool: Option<deadpool_redis::Pool>,
        blob_store: Arc<dyn BlobStore>,
        extractor: Arc<dyn ContentExtractor>,
        config: Config,
        jwt_config: JwtConfig,
    ) -> Self {
        let password_policy = if config.auth.require_password_complexity {
            PasswordPolicy::complex(config.auth.min_password_length)
        } else {
            PasswordPolicy {
                min_length: config.auth.min_password_length,
                ..Default::default()
            }
        };

        let lockout = LoginLockout::new(
            broker_pool.clone(),
            config.auth.max_failed_login_attempts,
            config.auth.lockout_duration_mins,
        );

        let rate_limit = RateLimitState::from_config(&config.rate_limits);

        let bus = EventBus::new(broker_pool.clone());
        let presence = Arc::new(PresenceTracker::new(
            bus.instance_id().to_string(),
            Duration::from_secs(config.realtime.presence_summary_secs),
        ));
        let hub = Arc::new(SessionHub::new(
            presence,
            config.realtime.send_queue_capacity,
        ));

        Self {
            db_pool,
            config: Arc::new(config),
            jwt_config: Arc::new(jwt_config),
            password_policy,
            lockout: Arc::new(lockout),
            rate_limit,
            bus,
            hub,
            blob_store,
            extractor,
            queue_signal: QueueSignal::new(),
            broker_pool,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    let cors = build_cors_layer(&config);
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let rate_limit_state = state.rate_limit.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check_simple))
        .route("/health/status", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::ready_check))
        .route("/health/live", get(handlers::health::live_check))
        .with_state(state.clone());

    let auth_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh))
        .layer(axum_middleware::from_fn(auth_rate_limit_middleware))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        .route(
            "/api/documents/upload",
            post(handlers::documents::upload_document),
        )
        .route("/api/documents", get(handlers::documents::list_documents))
        .route(
            "/api/documents/{id}",
            get(handlers::documents::get_document),
        )
        .route(
            "/api/documents/{id}",
            delete(handlers::documents::delete_document),
        )
        .route(
            "/api/documents/{id}/transformations",
            get(handlers::transformations::list_document_transformations),
        )
        .route(
            "/api/transformations",
            post(handlers::transformations::create_transformation),
        )
        .route(
            "/api/transformations",
            get(handlers::transformations::list_transformations),
        )
        .route(
            "/api/transformations/{id}",
            get(handlers::transformations::get_transformation),
        )
        .route(
            "/api/transformations/{id}/status",
            get(handlers::transformations::transformation_status),
        )
        .route(
            "/api/transformations/{id}/cancel",
            post(handlers::transformations::cancel_transformation),
        )
        .route(
            "/api/transformation-presets",
            post(handlers::presets::create_preset),
        )
        .route(
            "/api/transformation-presets",
            get(handlers::presets::list_presets),
        )
        .route(
            "/api/transformation-presets/{id}",
            patch(handlers::presets::update_preset),
        )
        .route(
            "/api/transformation-presets/{id}",
            delete(handlers::presets::delete_preset),
        )
        .layer(axum_middleware::from_fn(workspace_rate_limit_middleware))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ))
        .with_state(state.clone());

    let realtime_routes = Router::new()
        .route("/ws", get(handlers::ws::ws_handler))
        .with_state(state.clone());

    let docs_routes = openapi::swagger_router();

    Router::new()
        .merge(docs_routes)
        .merge(public_routes)
        .merge(auth_routes)
        .merge(protected_routes)
        .merge(realtime_routes)
        .fallback(fallback_handler)
        .layer(axum::Extension(rate_limit_state))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
        .layer(cors)
}

async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found", "code": "NOT_FOUND"})),
    )
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::Method;

    let is_wildcard_origin = config.cors.allowed_origins.contains(&"*".to_string())
        || config.cors.allowed_origins.is_empty();

    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [CONTENT_TYPE, AUTHORIZATION];

    if config.cors.allow_credentials && !is_wildcard_origin {
        let origins: Vec<_> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    } else {
        let cors = if is_wildcard_origin {
            CorsLayer::new().allow_origin(Any)
        } else {
            let origins: Vec<_> = config
                .cors
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    }
}

pub fn create_db_pool(config: &Config) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    r2d2::Pool::builder()
        .max_size(config.database.max_connections)
        .min_idle(Some(config.database.min_connections))
        .connection_timeout(Duration::from_secs(config.database.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.database.idle_timeout_secs)))
        .build(manager)
        .expect("Failed to create database pool")
}

pub fn create_db_pool_with_url(database_url: &str) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .max_size(10)
        .min_idle(Some(2))
        .connection_timeout(Duration::from_secs(30))
        .idle_timeout(Some(Duration::from_secs(600)))
        .build(manager)
        .expect("Failed to create database pool")
}

pub fn init_tracing(config: &Config) {
    telemetry::init_telemetry(config);
}

pub use telemetry::shutdown_telemetry;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_build_cors_layer_wildcard() {
        let config = Config::default_for_testing();
        let _ = build_cors_layer(&config);
    }

    #[test]
    fn test_build_cors_layer_specific_origins() {
        let mut config = Config::default_for_testing();
        config.cors.allowed_origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
        ];
        config.cors.allow_credentials = true;
        let _ = build_cors_layer(&config);
    }
}
