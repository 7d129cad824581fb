// handlers/mpesa_handlers.rs
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::dtos::payment_dtos::{
    CallbackAck, PaymentStatusResponse, StkPushRequest, StkPushResponse,
};
use crate::errors::{AppError, Result};
use crate::models::callback::StkCallback;
use crate::models::mpesa_transactions::{TransactionQuery, TransactionStatus};
use crate::services::callback_reconciler::ReconcileOutcome;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

pub async fn initiate_stk_push(
    State(state): State<AppState>,
    payload: std::result::Result<Json<StkPushRequest>, JsonRejection>,
) -> Result<Json<StkPushResponse>> {
    let Json(request) = payload.map_err(|e| AppError::invalid_data(e.body_text()))?;

    let initiator = state.payment_initiator.as_ref().ok_or_else(|| {
        error!("M-Pesa service not available");
        AppError::ServiceUnavailable("M-Pesa payments are not available right now".to_string())
    })?;

    info!(
        "📲 STK push requested: {} for KSh {}",
        request.product_name, request.amount
    );

    let initiated = initiator.initiate(request).await?;

    Ok(Json(StkPushResponse {
        success: true,
        checkout_request_id: Some(initiated.checkout_request_id),
        merchant_request_id: Some(initiated.merchant_request_id),
        account_reference: Some(initiated.account_reference),
        message: if initiated.customer_message.is_empty() {
            "Check your phone and enter your M-Pesa PIN".to_string()
        } else {
            initiated.customer_message
        },
    }))
}

/// Daraja's result callback. Always answers 200; only a payload that cannot
/// be read at all is acknowledged with a non-zero result code.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Rejected unreadable M-Pesa callback: {}", e);
            return Json(CallbackAck::rejected("Invalid callback payload"));
        }
    };

    let callback = match StkCallback::parse(payload) {
        Ok(callback) => callback,
        Err(e) => {
            warn!("Rejected malformed M-Pesa callback: {}", e);
            return Json(CallbackAck::rejected("Invalid callback payload"));
        }
    };

    info!(
        "📥 M-Pesa callback for {}: code {} ({})",
        callback.checkout_request_id, callback.result_code, callback.result_desc
    );

    match state.reconciler.reconcile(&callback).await {
        Ok(ReconcileOutcome::Completed { order, .. }) => {
            if let Some(order) = order {
                info!("Callback settled into order {}", order.order_number);
            }
        }
        Ok(_) => {}
        Err(e) => error!(
            "❌ Failed to reconcile callback {}: {}",
            callback.checkout_request_id, e
        ),
    }

    Json(CallbackAck::accepted())
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>> {
    let transaction = state
        .transactions
        .find_by_checkout_id(&checkout_request_id)
        .await?
        .ok_or_else(|| AppError::not_found("Transaction"))?;

    Ok(Json(PaymentStatusResponse::from(&transaction)))
}

pub async fn get_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TransactionStatus>)
        .transpose()
        .map_err(AppError::invalid_data)?;
    let limit = clamp_limit(query.limit);

    let transactions = state.transactions.list(status, limit).await?;

    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = state.transactions.stats().await?;
    Ok(Json(json!({
        "success": true,
        "stats": stats,
    })))
}

pub async fn mpesa_health(State(state): State<AppState>) -> Json<Value> {
    let database = match state.transactions.ping().await {
        Ok(()) => "connected",
        Err(_) => "disconnected",
    };
    Json(json!({
        "status": "ok",
        "service": "mpesa",
        "stk_push_enabled": state.payment_initiator.is_some(),
        "database": database,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}
