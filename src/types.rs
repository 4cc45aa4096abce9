// Core data model for the order-management core.

use chrono::{DateTime, Utc};
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Side of an order, `BUY=0, SELL=1` on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_index(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// `LIMIT=0, MARKET=1, STOP_LOSS=2, STOP_LIMIT=3` on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLimit,
}

impl OrderType {
    pub fn as_index(self) -> u8 {
        match self {
            OrderType::Limit => 0,
            OrderType::Market => 1,
            OrderType::StopLoss => 2,
            OrderType::StopLimit => 3,
        }
    }

    pub fn is_stop(self) -> bool {
        matches!(self, OrderType::StopLoss | OrderType::StopLimit)
    }
}

/// `GTC=0, IOC=1, FOK=2, POST_ONLY=3` on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    PostOnly,
}

impl TimeInForce {
    pub fn as_index(self) -> u8 {
        match self {
            TimeInForce::Gtc => 0,
            TimeInForce::Ioc => 1,
            TimeInForce::Fok => 2,
            TimeInForce::PostOnly => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Triggered,
}

/// The canonical on-chain-compatible order, EIP-712 field order and types
/// from spec §3/§6. Every amount here is an exact `U256`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub maker: Address,
    pub token_get: Address,
    pub token_give: Address,
    pub amount_get: U256,
    pub amount_give: U256,
    pub nonce: U256,
    pub expiry: U256,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub side: Side,
    pub stop_price: U256,
    pub min_fill_amount: U256,
    pub allow_partial_fill: bool,
    pub fee_recipient: Address,
    pub fee_amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub amount: f64,
    pub price: f64,
    pub counterparty_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Internal record owned exclusively by the order service registry; the
/// matching engine holds non-owning references indexed by book.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: Uuid,
    pub order: Order,
    pub base_token: Address,
    pub quote_token: Address,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    pub filled: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub executions: Vec<Execution>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// The maker's EIP-712 signature over the canonical order, retained so
    /// the settlement adapter can forward it to `executeOrder` later.
    #[serde(default)]
    pub signature: Vec<u8>,
    /// `minFillAmount` in base-asset display units (same scale as `amount`),
    /// mirroring `order.min_fill_amount` without requiring token decimals to
    /// interpret here. `None` when the maker set no floor.
    #[serde(default)]
    pub min_fill_amount: Option<f64>,
}

impl OrderRecord {
    pub fn remaining(&self) -> f64 {
        (self.amount - self.filled).max(0.0)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub pair_key: String,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
    pub source: String,
    pub synthetic: bool,
    pub batch_id: Option<Uuid>,
    pub executed_at: DateTime<Utc>,
    pub settlement: Option<SettlementOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub success: bool,
    pub synthetic: bool,
    pub receipt: Option<String>,
    pub reason: Option<String>,
}

/// `buy`/`sell` sorted by price-time priority, market/stop queues FIFO or
/// insertion-ordered, bounded trade history.
pub struct OrderBook {
    pub buy: Vec<Uuid>,
    pub sell: Vec<Uuid>,
    pub market_buy: Vec<Uuid>,
    pub market_sell: Vec<Uuid>,
    pub stop_loss: Vec<Uuid>,
    pub stop_limit: Vec<Uuid>,
    pub trades: std::collections::VecDeque<Trade>,
}

pub const MAX_TRADE_HISTORY: usize = 200;

impl OrderBook {
    pub fn new() -> Self {
        Self {
            buy: Vec::new(),
            sell: Vec::new(),
            market_buy: Vec::new(),
            market_sell: Vec::new(),
            stop_loss: Vec::new(),
            stop_limit: Vec::new(),
            trades: std::collections::VecDeque::new(),
        }
    }

    pub fn push_trade(&mut self, trade: Trade) {
        self.trades.push_back(trade);
        while self.trades.len() > MAX_TRADE_HISTORY {
            self.trades.pop_front();
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPriceEntry {
    pub price: f64,
    pub previous_price: Option<f64>,
    pub source: MarketPriceSource,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPriceSource {
    Input,
    Derived,
    Market,
    Orderbook,
    Synthetic,
    Batch,
    MarketBuyImpact,
}

impl std::fmt::Display for MarketPriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketPriceSource::Input => "input",
            MarketPriceSource::Derived => "derived",
            MarketPriceSource::Market => "market",
            MarketPriceSource::Orderbook => "orderbook",
            MarketPriceSource::Synthetic => "synthetic",
            MarketPriceSource::Batch => "batch",
            MarketPriceSource::MarketBuyImpact => "market-buy-impact",
        };
        f.write_str(s)
    }
}

/// Per-canonical-pair (sorted address key) dynamic price state from the
/// unit-value oracle.
#[derive(Debug, Clone)]
pub struct PairPriceState {
    pub price: f64,
    pub baseline_price: f64,
    pub liquidity_score: f64,
    pub last_updated_at: DateTime<Utc>,
    pub last_source: MarketPriceSource,
    pub last_side: Option<Side>,
}

#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: Option<U256>,
    pub issuer: Option<Address>,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            symbol: String::new(),
            decimals: 18,
            total_supply: None,
            issuer: None,
        }
    }
}

pub type TokenMetadataMap = HashMap<Address, TokenMetadata>;

/// Snapshot shape returned to the HTTP layer for `GET orderBook`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookSnapshot {
    pub buy: Vec<OrderRecord>,
    pub sell: Vec<OrderRecord>,
    pub market_buy: Vec<OrderRecord>,
    pub market_sell: Vec<OrderRecord>,
    pub stop_loss: Vec<OrderRecord>,
    pub stop_limit: Vec<OrderRecord>,
    pub trades: Vec<Trade>,
}

/// Events pushed to the `/ws` feed: trade prints and book-affecting order
/// status transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WebSocketMessage {
    Trade(Trade),
    OrderUpdate(OrderRecord),
    MarketPrice { pair_key: String, entry: MarketPriceEntry },
}

pub fn pair_key(base: Address, quote: Address) -> String {
    format!("{:#x}-{:#x}", base, quote).to_lowercase()
}

pub fn sorted_pair_key(a: Address, b: Address) -> (Address, Address) {
    if format!("{:#x}", a) <= format!("{:#x}", b) {
        (a, b)
    } else {
        (b, a)
    }
}
