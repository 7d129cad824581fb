use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::mpesa_handlers;
use crate::state::AppState;

pub fn mpesa_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(mpesa_handlers::mpesa_health))
        .route("/stk-push", post(mpesa_handlers::initiate_stk_push))
        .route("/callback", post(mpesa_handlers::mpesa_callback))
        .route(
            "/payment-status/:checkout_request_id",
            get(mpesa_handlers::payment_status),
        )
        // Back office
        .route("/transactions", get(mpesa_handlers::get_transactions))
        .route("/stats", get(mpesa_handlers::get_stats))
}
