use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{AppError, Result};
use crate::handlers::mpesa_handlers::clamp_limit;
use crate::models::order::{OrderQuery, OrderStatus, UpdateOrderStatusRequest};
use crate::state::AppState;

pub async fn get_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(AppError::invalid_data)?;

    let orders = state.orders.list(status, clamp_limit(query.limit)).await?;

    Ok(Json(json!({
        "success": true,
        "count": orders.len(),
        "orders": orders,
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<Value>> {
    let order = state
        .orders
        .find_by_order_number(&order_number)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))?;

    Ok(Json(json!({ "success": true, "order": order })))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    payload: std::result::Result<Json<UpdateOrderStatusRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload.map_err(|e| AppError::invalid_data(e.body_text()))?;
    let status: OrderStatus = request.status.parse().map_err(AppError::invalid_data)?;

    let order = state
        .orders
        .update_status(&order_number, status, request.notes)
        .await?
        .ok_or_else(|| AppError::not_found("Order"))?;

    info!("📦 Order {} moved to {}", order.order_number, status.as_str());

    Ok(Json(json!({
        "success": true,
        "message": "Order status updated",
        "order": order,
    })))
}

pub async fn get_order_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = state.orders.stats().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
