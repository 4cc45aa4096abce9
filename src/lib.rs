// Re-exports for the order-management core library.

use std::sync::Arc;

use tokio::sync::broadcast;

pub mod api;
pub mod batch;
pub mod canonicalizer;
pub mod config;
pub mod eth;
pub mod matching;
pub mod onchain;
pub mod oracle;
pub mod order_service;
pub mod settlement;
pub mod token_directory;
pub mod typed_data;
pub mod types;

pub use types::*;

use crate::order_service::OrderService;
use crate::types::WebSocketMessage;

#[derive(Clone)]
pub struct AppState {
    pub order_service: Arc<OrderService>,
    pub ws_broadcaster: broadcast::Sender<WebSocketMessage>,
}
