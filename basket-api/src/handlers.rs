use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use basket_core::identity::IdOrigin;
use basket_core::{AuditEntry, EntityType, OrderSnapshot};
use basket_notify::NotificationSettings;
use basket_orders::RecordRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthenticatedCaller;
use crate::error::ApiError;
use crate::state::ApiState;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "basket-api"
    }))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Set when loading a user from a legacy data set.
    #[serde(default)]
    pub historical_id: Option<i64>,
}

pub async fn create_user(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<RecordRef>)> {
    let origin = body.historical_id.map_or(IdOrigin::New, IdOrigin::Historical);
    let user = state
        .registry
        .register_user(&body.email, body.display_name, origin)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct CreateCartRequest {
    pub user_id: String,
}

pub async fn create_cart(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<CreateCartRequest>,
) -> ApiResult<(StatusCode, Json<RecordRef>)> {
    let cart = state.registry.open_cart(&body.user_id).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    #[serde(default)]
    pub total_items: i32,
}

pub async fn create_order(
    Extension(state): Extension<Arc<ApiState>>,
    Json(body): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<OrderSnapshot>)> {
    let user_id = state.ids.resolve_str(EntityType::User, &body.user_id).await?;
    let order = state.orders.create_order(user_id, body.total_items).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateStatusResponse {
    pub changed: bool,
    pub order: OrderSnapshot,
}

pub async fn update_order_status(
    Extension(state): Extension<Arc<ApiState>>,
    Path(order_id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> ApiResult<Json<UpdateStatusResponse>> {
    let outcome = state
        .orders
        .update_status(&order_id, &body.status, body.actor_id.as_deref(), body.note)
        .await?;

    Ok(Json(UpdateStatusResponse {
        changed: outcome.is_changed(),
        order: outcome.order().clone(),
    }))
}

pub async fn order_history(
    Extension(state): Extension<Arc<ApiState>>,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = state.audit.history_for_order(&order_id).await?;
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub struct AuditRangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn audit_range(
    Extension(state): Extension<Arc<ApiState>>,
    Query(params): Query<AuditRangeQuery>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = state
        .audit
        .history_between(params.from, params.to, params.limit)
        .await?;
    Ok(Json(entries))
}

pub async fn update_notification_settings(
    Extension(state): Extension<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(settings): Json<NotificationSettings>,
) -> ApiResult<Json<serde_json::Value>> {
    let next = state
        .notifications
        .update_settings(&user_id, settings, Utc::now())
        .await?;
    Ok(Json(serde_json::json!({ "next_scheduled_at": next })))
}

#[derive(Deserialize)]
pub struct ImportedOrder {
    pub historical_id: i64,
    pub user_id: String,
    pub status: String,
    #[serde(default)]
    pub total_items: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct ImportOrdersRequest {
    pub orders: Vec<ImportedOrder>,
}

/// Loads legacy orders with their original ids. No history rows are written.
/// Stops at the first failure; orders already imported stay imported.
pub async fn import_orders(
    Extension(state): Extension<Arc<ApiState>>,
    Extension(caller): Extension<AuthenticatedCaller>,
    Json(body): Json<ImportOrdersRequest>,
) -> ApiResult<Json<Vec<OrderSnapshot>>> {
    let mut imported = Vec::with_capacity(body.orders.len());

    for order in body.orders {
        let user_id = state.ids.resolve_str(EntityType::User, &order.user_id).await?;
        let snapshot = state
            .importer
            .import_order(
                order.historical_id,
                user_id,
                &order.status,
                order.total_items,
                order.created_at,
            )
            .await?;
        imported.push(snapshot);
    }

    tracing::info!("{} imported {} historical orders", caller.subject, imported.len());
    Ok(Json(imported))
}
