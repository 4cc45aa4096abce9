// HTTP handlers shaping requests/responses around `OrderService`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use ethereum_types::Address;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::canonicalizer::OrderDraft;
use crate::order_service::{CreateOrderRequest, ListFilters};
use crate::types::OrderStatus;
use crate::AppState;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "dex-orderbook-core", "timestamp": Utc::now() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    #[serde(flatten)]
    pub draft: OrderDraft,
    pub signature: String,
    pub client_order_id: Option<Uuid>,
}

fn decode_signature(hex_sig: &str) -> Result<Vec<u8>, String> {
    hex::decode(hex_sig.trim_start_matches("0x")).map_err(|e| e.to_string())
}

pub async fn prepare_order(State(state): State<AppState>, Json(draft): Json<OrderDraft>) -> Response {
    match state.order_service.prepare(&draft).await {
        Ok(prepared) => Json(json!({
            "order": prepared.order,
            "hash": format!("0x{}", hex::encode(prepared.hash)),
            "metadata": prepared.metadata,
        }))
        .into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

pub async fn create_order(State(state): State<AppState>, Json(body): Json<CreateOrderBody>) -> Response {
    let signature = match decode_signature(&body.signature) {
        Ok(sig) => sig,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("invalid signature: {e}") }))).into_response(),
    };

    let request = CreateOrderRequest { draft: body.draft, signature, client_order_id: body.client_order_id };
    match state.order_service.create(request).await {
        Ok(record) => {
            let _ = state.ws_broadcaster.send(crate::types::WebSocketMessage::OrderUpdate(record.clone()));
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => {
            error!("order creation failed: {}", e);
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub base_token: Option<Address>,
    pub quote_token: Option<Address>,
    pub trader: Option<Address>,
    pub status: Option<OrderStatus>,
}

pub async fn list_orders(State(state): State<AppState>, Query(q): Query<ListQuery>) -> Response {
    let filters = ListFilters { base_token: q.base_token, quote_token: q.quote_token, trader: q.trader, status: q.status };
    Json(state.order_service.list(filters).await).into_response()
}

pub async fn get_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.order_service.get(id).await {
        Some(record) => Json(record).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "order not found" }))).into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelBody {
    pub reason: Option<String>,
}

pub async fn cancel_order(State(state): State<AppState>, Path(id): Path<Uuid>, body: Option<Json<CancelBody>>) -> Response {
    let reason = body.and_then(|Json(b)| b.reason);
    match state.order_service.cancel(id, reason).await {
        Ok(record) => {
            let _ = state.ws_broadcaster.send(crate::types::WebSocketMessage::OrderUpdate(record.clone()));
            Json(record).into_response()
        }
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

pub async fn get_order_book(State(state): State<AppState>, Path((base, quote)): Path<(Address, Address)>) -> Response {
    Json(state.order_service.order_book(base, quote).await).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

pub async fn recent_trades(
    State(state): State<AppState>,
    Path((base, quote)): Path<(Address, Address)>,
    Query(q): Query<TradesQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(50);
    Json(state.order_service.recent_trades(base, quote, limit).await).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBody {
    pub order_ids: Vec<Uuid>,
    pub tolerance: Option<f64>,
}

pub async fn execute_batch(State(state): State<AppState>, Json(body): Json<BatchBody>) -> Response {
    match state.order_service.execute_batch(&body.order_ids, body.tolerance).await {
        Ok(result) => {
            for trade in &result.trades {
                let _ = state.ws_broadcaster.send(crate::types::WebSocketMessage::Trade(trade.clone()));
            }
            Json(json!({
                "batchId": result.batch_id,
                "offerAmounts": result.offer_amounts,
                "requestAmounts": result.request_amounts,
                "trades": result.trades,
                "orders": result.order_ids,
            }))
            .into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPriceBody {
    pub base_token: Address,
    pub quote_token: Address,
    pub price: f64,
}

pub async fn get_market_price(State(state): State<AppState>, Path((base, quote)): Path<(Address, Address)>) -> Response {
    match state.order_service.market_price(base, quote).await {
        Some(price) => Json(json!({ "price": price })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no market price set for pair" }))).into_response(),
    }
}

pub async fn update_market_price(State(state): State<AppState>, Json(body): Json<MarketPriceBody>) -> Response {
    let trades = state
        .order_service
        .update_market_price(body.base_token, body.quote_token, body.price)
        .await;
    for trade in &trades {
        let _ = state.ws_broadcaster.send(crate::types::WebSocketMessage::Trade(trade.clone()));
    }
    Json(body.price).into_response()
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| websocket_connection(socket, state))
}

async fn websocket_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ws_broadcaster.subscribe();

    let forward = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
    forward.abort();
    info!("websocket client disconnected");
}
