// Price-time priority matching engine (C4). All mutating operations are
// serialized through a single async mutex per the single-writer model;
// reads take the same lock briefly to return a consistent snapshot.

use std::sync::Arc;

use ethereum_types::Address;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod engine;

use engine::EngineState;

use crate::oracle::PriceOracle;
use crate::types::{pair_key, MarketPriceSource, OrderBookSnapshot, OrderRecord, SettlementOutcome, Trade};

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("order not found")]
    NotFound,
}

pub struct MatchingEngine {
    state: Mutex<EngineState>,
    oracle: Arc<PriceOracle>,
}

impl MatchingEngine {
    pub fn new(oracle: Arc<PriceOracle>) -> Self {
        Self { state: Mutex::new(EngineState::new()), oracle }
    }

    pub async fn add_order(&self, record: OrderRecord) -> (Uuid, Vec<Trade>) {
        let mut state = self.state.lock().await;
        let id = record.id;
        let trades = state.add_order(&self.oracle, record);
        (id, trades)
    }

    pub async fn cancel_order(&self, id: Uuid, reason: Option<String>) -> Result<OrderRecord, MatchingError> {
        let mut state = self.state.lock().await;
        state.cancel_order(id, reason).ok_or(MatchingError::NotFound)
    }

    pub async fn get(&self, id: Uuid) -> Option<OrderRecord> {
        let state = self.state.lock().await;
        state.registry.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<OrderRecord> {
        let state = self.state.lock().await;
        state.registry.values().cloned().collect()
    }

    pub async fn order_book_snapshot(&self, base: Address, quote: Address) -> OrderBookSnapshot {
        let state = self.state.lock().await;
        let pair = pair_key(base, quote);
        let resolve = |ids: &[Uuid]| -> Vec<OrderRecord> {
            ids.iter().filter_map(|id| state.registry.get(id).cloned()).collect()
        };
        match state.books.get(&pair) {
            Some(book) => OrderBookSnapshot {
                buy: resolve(&book.buy),
                sell: resolve(&book.sell),
                market_buy: resolve(&book.market_buy),
                market_sell: resolve(&book.market_sell),
                stop_loss: resolve(&book.stop_loss),
                stop_limit: resolve(&book.stop_limit),
                trades: book.trades.iter().cloned().collect(),
            },
            None => OrderBookSnapshot {
                buy: Vec::new(),
                sell: Vec::new(),
                market_buy: Vec::new(),
                market_sell: Vec::new(),
                stop_loss: Vec::new(),
                stop_limit: Vec::new(),
                trades: Vec::new(),
            },
        }
    }

    pub async fn recent_trades(&self, base: Address, quote: Address, limit: usize) -> Vec<Trade> {
        let state = self.state.lock().await;
        let pair = pair_key(base, quote);
        match state.books.get(&pair) {
            Some(book) => book.trades.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn market_price(&self, base: Address, quote: Address) -> Option<f64> {
        let state = self.state.lock().await;
        state.market_prices.get(&pair_key(base, quote)).map(|e| e.price)
    }

    pub async fn market_price_entry(&self, base: Address, quote: Address) -> Option<crate::types::MarketPriceEntry> {
        let state = self.state.lock().await;
        state.market_prices.get(&pair_key(base, quote)).copied()
    }

    pub async fn update_market_price(&self, base: Address, quote: Address, price: f64) -> Vec<Trade> {
        self.update_market_price_from(base, quote, price, MarketPriceSource::Market).await
    }

    pub async fn update_market_price_from(
        &self,
        base: Address,
        quote: Address,
        price: f64,
        source: MarketPriceSource,
    ) -> Vec<Trade> {
        let mut state = self.state.lock().await;
        state.update_market_price_internal(&self.oracle, base, quote, price, source, false);
        state.drain_trigger_queue(&self.oracle)
    }

    pub async fn apply_external_fill(&self, id: Uuid, amount: f64) -> Option<OrderRecord> {
        let mut state = self.state.lock().await;
        state.apply_external_fill(id, amount)
    }

    /// Appends externally-produced trades (batch executor legs) to each
    /// pair's bounded trade history so they show up in `recentTrades`.
    pub async fn record_external_trades(&self, trades: &[Trade]) {
        let mut state = self.state.lock().await;
        for trade in trades {
            state
                .books
                .entry(trade.pair_key.clone())
                .or_insert_with(crate::types::OrderBook::new)
                .push_trade(trade.clone());
        }
    }

    /// Captures a settlement outcome onto the persisted trade record so
    /// that readers of the pair's trade history see the final status.
    pub async fn record_settlement(&self, pair: &str, trade_id: Uuid, outcome: SettlementOutcome) {
        let mut state = self.state.lock().await;
        if let Some(book) = state.books.get_mut(pair) {
            if let Some(trade) = book.trades.iter_mut().find(|t| t.id == trade_id) {
                trade.settlement = Some(outcome);
            }
        }
    }

    /// Best opposite-side limit price resting on the book, used by the
    /// canonicalizer as a price hint for MARKET orders.
    pub async fn best_opposite_limit(&self, base: Address, quote: Address, side: crate::types::Side) -> Option<f64> {
        let state = self.state.lock().await;
        let pair = pair_key(base, quote);
        let book = state.books.get(&pair)?;
        let list = match side.opposite() {
            crate::types::Side::Buy => &book.buy,
            crate::types::Side::Sell => &book.sell,
        };
        list.first().and_then(|id| state.registry.get(id)).map(|r| r.price)
    }
}
