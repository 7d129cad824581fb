use axum::{
    routing::{get, put},
    Router,
};

use crate::handlers::order_handlers;
use crate::state::AppState;

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(order_handlers::get_orders))
        .route("/stats", get(order_handlers::get_order_stats))
        .route("/:order_number", get(order_handlers::get_order))
        .route("/:order_number/status", put(order_handlers::update_order_status))
}
