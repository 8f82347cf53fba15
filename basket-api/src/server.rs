use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{get, post, put},
    Router,
};
use basket_core::BasketContext;
use std::env;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing;

use crate::auth;
use crate::handlers;
use crate::state::ApiState;

fn cors_layer() -> CorsLayer {
    match env::var("CORS_ORIGINS") {
        Ok(origins) => {
            let mut cors = CorsLayer::new();
            for origin in origins.split(',').map(|s| s.trim()) {
                if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                    cors = cors.allow_origin(parsed);
                }
            }
            cors.allow_methods(Any).allow_headers(Any)
        }
        Err(_) => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

pub fn router(state: Arc<ApiState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/users", post(handlers::create_user))
        .route("/api/v1/users/:id/notifications", put(handlers::update_notification_settings))
        .route("/api/v1/carts", post(handlers::create_cart))
        .route("/api/v1/orders", post(handlers::create_order))
        .route("/api/v1/orders/:id/status", post(handlers::update_order_status))
        .route("/api/v1/orders/:id/history", get(handlers::order_history))
        .route("/api/v1/audit", get(handlers::audit_range))
        .route("/api/v1/admin/import/orders", post(handlers::import_orders))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}

pub async fn run(ctx: BasketContext) -> Result<()> {
    let state = Arc::new(ApiState::from_context(&ctx));
    let app = router(state, cors_layer());

    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.api_port);
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
