// HTTP transport shim: thin axum routes over `OrderService`. No business
// logic lives here beyond request/response shaping.

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/prepare", post(handlers::prepare_order))
        .route("/orders", post(handlers::create_order))
        .route("/orders", get(handlers::list_orders))
        .route("/orders/:id", get(handlers::get_order))
        .route("/orders/:id/cancel", post(handlers::cancel_order))
        .route("/orderbook/:base/:quote", get(handlers::get_order_book))
        .route("/trades/:base/:quote", get(handlers::recent_trades))
        .route("/batch", post(handlers::execute_batch))
        .route("/market-price/:base/:quote", get(handlers::get_market_price))
        .route("/market-price", post(handlers::update_market_price))
        .route("/ws", get(handlers::websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
