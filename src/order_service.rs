// Order Service (C6): the public orchestration surface wiring the
// canonicalizer, oracle, matching engine, batch executor and settlement
// adapter together. This is what the HTTP layer calls into.

use std::sync::Arc;

use ethereum_types::{Address, U256};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::batch::{self, BatchError, BatchResult};
use crate::canonicalizer::{self, CanonicalizeError, MarketPriceHints, NonceSource, OrderDraft};
use crate::matching::{MatchingEngine, MatchingError};
use crate::onchain::OnchainCollaborator;
use crate::oracle::PriceOracle;
use crate::settlement::SettlementAdapter;
use crate::token_directory::TokenDirectory;
use crate::typed_data::{self, Domain, SignatureError};
use crate::types::{OrderRecord, OrderStatus, OrderType, Side, Trade, TokenMetadataMap};

#[derive(Debug, Error)]
pub enum OrderServiceError {
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Matching(#[from] MatchingError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("duplicate order id")]
    DuplicateId,
}

pub struct PreparedOrder {
    pub order: crate::types::Order,
    pub hash: [u8; 32],
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

pub struct CreateOrderRequest {
    pub draft: OrderDraft,
    pub signature: Vec<u8>,
    pub client_order_id: Option<Uuid>,
}

#[derive(Default)]
pub struct ListFilters {
    pub base_token: Option<Address>,
    pub quote_token: Option<Address>,
    pub trader: Option<Address>,
    pub status: Option<OrderStatus>,
}

pub struct OrderService {
    engine: Arc<MatchingEngine>,
    oracle: Arc<PriceOracle>,
    onchain: Arc<dyn OnchainCollaborator>,
    tokens: Arc<dyn TokenDirectory>,
    settlement: SettlementAdapter,
    domain: Domain,
    /// The id→record mirror the HTTP/list layer reads from; the engine is
    /// the source of truth but list/get here avoids taking the engine's
    /// write lock on every filter query.
    seen_tokens: RwLock<TokenMetadataMap>,
}

impl OrderService {
    pub fn new(
        engine: Arc<MatchingEngine>,
        oracle: Arc<PriceOracle>,
        onchain: Arc<dyn OnchainCollaborator>,
        tokens: Arc<dyn TokenDirectory>,
        domain: Domain,
    ) -> Self {
        Self {
            engine,
            oracle,
            onchain: onchain.clone(),
            tokens,
            settlement: SettlementAdapter::new(onchain),
            domain,
            seen_tokens: RwLock::new(TokenMetadataMap::new()),
        }
    }

    async fn token_metadata_map(&self, base: Address, quote: Address) -> TokenMetadataMap {
        let mut map = TokenMetadataMap::new();
        map.insert(base, self.tokens.get_metadata(base).await);
        map.insert(quote, self.tokens.get_metadata(quote).await);
        let mut cache = self.seen_tokens.write().await;
        for (k, v) in &map {
            cache.insert(*k, v.clone());
        }
        map
    }

    pub async fn create(&self, request: CreateOrderRequest) -> Result<OrderRecord, OrderServiceError> {
        let draft = request.draft;
        let tokens = self.token_metadata_map(draft.base_token, draft.quote_token).await;

        let current_market_price = self.engine.market_price(draft.base_token, draft.quote_token).await;
        let best_opposite_limit = self.engine.best_opposite_limit(draft.base_token, draft.quote_token, draft.side).await;
        let hints = MarketPriceHints { current_market_price, best_opposite_limit };

        let prefetched_nonce = if draft.nonce.is_none() {
            self.onchain.get_nonce(draft.maker).await.unwrap_or_else(|_| U256::zero())
        } else {
            U256::zero()
        };
        let resolve = move |_maker: Address| -> U256 { prefetched_nonce };
        let nonce_source = NonceSource { resolve: &resolve };

        let canonical = canonicalizer::canonicalize(&draft, &tokens, &hints, &self.oracle, &nonce_source)?;

        typed_data::verify(&self.domain, &canonical.order, &request.signature, draft.maker)?;

        let id = request.client_order_id.unwrap_or_else(Uuid::new_v4);
        let now = chrono::Utc::now();
        let record = OrderRecord {
            id,
            order: canonical.order,
            base_token: canonical.base_token,
            quote_token: canonical.quote_token,
            side: canonical.side,
            price: canonical.price,
            amount: canonical.amount,
            min_fill_amount: canonical.min_fill_amount,
            filled: 0.0,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            triggered_at: None,
            executions: Vec::new(),
            metadata: canonical.metadata,
            signature: request.signature.clone(),
        };

        let (_, trades) = self.engine.add_order(record).await;
        self.settle_trades(&trades).await;

        self.engine.get(id).await.ok_or(OrderServiceError::DuplicateId)
    }

    async fn settle_trades(&self, trades: &[Trade]) {
        for trade in trades {
            let maker = self.engine.get(trade.maker_order_id).await;
            let taker = self.engine.get(trade.taker_order_id).await;
            if let (Some(maker), Some(taker)) = (maker, taker) {
                let signature = maker.signature.clone();
                let outcome = self.settlement.settle(trade, &maker, &taker, &signature).await;
                // Settlement failures are captured per-trade and never
                // roll back matching state.
                self.engine.record_settlement(&trade.pair_key, trade.id, outcome).await;
            }
        }
    }

    /// Builds the typed-data payload and digest for a draft without
    /// persisting anything, for the `POST prepare` HTTP route.
    pub async fn prepare(&self, draft: &OrderDraft) -> Result<PreparedOrder, OrderServiceError> {
        let tokens = self.token_metadata_map(draft.base_token, draft.quote_token).await;
        let current_market_price = self.engine.market_price(draft.base_token, draft.quote_token).await;
        let best_opposite_limit = self.engine.best_opposite_limit(draft.base_token, draft.quote_token, draft.side).await;
        let hints = MarketPriceHints { current_market_price, best_opposite_limit };

        let prefetched_nonce = if draft.nonce.is_none() {
            self.onchain.get_nonce(draft.maker).await.unwrap_or_else(|_| U256::zero())
        } else {
            U256::zero()
        };
        let resolve = move |_maker: Address| -> U256 { prefetched_nonce };
        let nonce_source = NonceSource { resolve: &resolve };

        let canonical = canonicalizer::canonicalize(draft, &tokens, &hints, &self.oracle, &nonce_source)?;
        let hash = typed_data::hash(&self.domain, &canonical.order);

        Ok(PreparedOrder { order: canonical.order, hash, metadata: canonical.metadata })
    }

    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<OrderRecord, OrderServiceError> {
        Ok(self.engine.cancel_order(id, reason).await?)
    }

    pub async fn get(&self, id: Uuid) -> Option<OrderRecord> {
        self.engine.get(id).await
    }

    pub async fn list(&self, filters: ListFilters) -> Vec<OrderRecord> {
        let mut records = self.engine.list().await;
        records.retain(|r| {
            filters.base_token.map(|t| t == r.base_token).unwrap_or(true)
                && filters.quote_token.map(|t| t == r.quote_token).unwrap_or(true)
                && filters.trader.map(|t| t == r.order.maker).unwrap_or(true)
                && filters.status.as_ref().map(|s| *s == r.status).unwrap_or(true)
        });
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub async fn order_book(&self, base: Address, quote: Address) -> crate::types::OrderBookSnapshot {
        self.engine.order_book_snapshot(base, quote).await
    }

    pub async fn recent_trades(&self, base: Address, quote: Address, limit: usize) -> Vec<Trade> {
        self.engine.recent_trades(base, quote, limit).await
    }

    pub async fn market_price(&self, base: Address, quote: Address) -> Option<f64> {
        self.engine.market_price(base, quote).await
    }

    pub async fn market_price_entry(&self, base: Address, quote: Address) -> Option<crate::types::MarketPriceEntry> {
        self.engine.market_price_entry(base, quote).await
    }

    pub async fn update_market_price(&self, base: Address, quote: Address, price: f64) -> Vec<Trade> {
        let trades = self.engine.update_market_price(base, quote, price).await;
        self.settle_trades(&trades).await;
        trades
    }

    pub async fn execute_batch(&self, order_ids: &[Uuid], tolerance: Option<f64>) -> Result<BatchResult, OrderServiceError> {
        let mut orders = Vec::with_capacity(order_ids.len());
        for id in order_ids {
            match self.engine.get(*id).await {
                Some(r) if !r.is_terminal() => orders.push(r),
                _ => continue,
            }
        }
        let (result, fills) = batch::execute_batch(&orders, tolerance, &self.oracle)?;

        for (order_id, base_filled) in &fills {
            self.engine.apply_external_fill(*order_id, *base_filled).await;
        }
        self.engine.record_external_trades(&result.trades).await;
        for (base, quote, rate) in &result.rates {
            self.engine
                .update_market_price_from(*base, *quote, *rate, crate::types::MarketPriceSource::Batch)
                .await;
        }
        self.settle_trades(&result.trades).await;

        Ok(result)
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn is_market_order(order_type: OrderType) -> bool {
        order_type == OrderType::Market
    }

    pub fn opposite_side(side: Side) -> Side {
        side.opposite()
    }
}
