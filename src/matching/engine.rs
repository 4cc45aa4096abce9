// Internal engine state: per-pair order books, the order registry, market
// price table, and the matching/stop-triggering mechanics. Locked as a
// single unit by `MatchingEngine` (mod.rs) to honor the single-writer model.

use std::collections::HashMap;

use chrono::Utc;
use ethereum_types::Address;
use uuid::Uuid;

use crate::oracle::PriceOracle;
use crate::types::{
    pair_key, MarketPriceEntry, MarketPriceSource, OrderBook, OrderRecord, OrderStatus, OrderType,
    Side, TimeInForce, Trade,
};

/// Market-buy price impact rate: 1 quote-unit per base-unit filled. A
/// tunable constant of the system, not derived from anything.
const MARKET_BUY_IMPACT_RATE: f64 = 1.0;

pub(crate) struct EngineState {
    pub books: HashMap<String, OrderBook>,
    pub registry: HashMap<Uuid, OrderRecord>,
    pub market_prices: HashMap<String, MarketPriceEntry>,
    /// Re-entrancy flag for the stop-trigger work queue (design note: event
    /// sourced pipeline draining under a flag, mirroring `skipStopTrigger`).
    triggering: bool,
    pending_trigger_pairs: Option<Vec<String>>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
            registry: HashMap::new(),
            market_prices: HashMap::new(),
            triggering: false,
            pending_trigger_pairs: None,
        }
    }

    fn book_mut(&mut self, pair: &str) -> &mut OrderBook {
        self.books.entry(pair.to_string()).or_insert_with(OrderBook::new)
    }

    fn record(&self, id: Uuid) -> Option<&OrderRecord> {
        self.registry.get(&id)
    }

    fn record_mut(&mut self, id: Uuid) -> Option<&mut OrderRecord> {
        self.registry.get_mut(&id)
    }

    fn remaining_of(&self, id: Uuid) -> f64 {
        self.record(id).map(|r| r.remaining()).unwrap_or(0.0)
    }

    fn sort_buy(&mut self, pair: &str) {
        let registry = &self.registry;
        if let Some(book) = self.books.get_mut(pair) {
            book.buy.sort_by(|a, b| {
                let ra = registry.get(a);
                let rb = registry.get(b);
                let pa = ra.map(|r| r.price).unwrap_or(0.0);
                let pb = rb.map(|r| r.price).unwrap_or(0.0);
                pb.partial_cmp(&pa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let ta = ra.map(|r| r.created_at).unwrap_or_default();
                        let tb = rb.map(|r| r.created_at).unwrap_or_default();
                        ta.cmp(&tb)
                    })
            });
        }
    }

    fn sort_sell(&mut self, pair: &str) {
        let registry = &self.registry;
        if let Some(book) = self.books.get_mut(pair) {
            book.sell.sort_by(|a, b| {
                let ra = registry.get(a);
                let rb = registry.get(b);
                let pa = ra.map(|r| r.price).unwrap_or(0.0);
                let pb = rb.map(|r| r.price).unwrap_or(0.0);
                pa.partial_cmp(&pb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let ta = ra.map(|r| r.created_at).unwrap_or_default();
                        let tb = rb.map(|r| r.created_at).unwrap_or_default();
                        ta.cmp(&tb)
                    })
            });
        }
    }

    fn remove_from_all_lists(&mut self, pair: &str, id: Uuid) {
        if let Some(book) = self.books.get_mut(pair) {
            for list in [
                &mut book.buy,
                &mut book.sell,
                &mut book.market_buy,
                &mut book.market_sell,
                &mut book.stop_loss,
                &mut book.stop_limit,
            ] {
                list.retain(|x| *x != id);
            }
        }
    }

    fn oriented_market_price(&self, pair: &str) -> Option<f64> {
        self.market_prices.get(pair).map(|e| e.price)
    }

    fn price_for(&self, oracle: &PriceOracle, base: Address, quote: Address) -> f64 {
        if let Some(p) = self.oriented_market_price(&pair_key(base, quote)) {
            return p;
        }
        oracle.estimate_pair_price(base, quote)
    }

    // -- Order entry ------------------------------------------------------

    /// Dispatches a freshly canonicalized order into the book, returning
    /// every trade produced (direct matches, stop cascades, synthetic
    /// fills, market-buy impact trades).
    pub fn add_order(&mut self, oracle: &PriceOracle, mut record: OrderRecord) -> Vec<Trade> {
        let pair = pair_key(record.base_token, record.quote_token);
        let id = record.id;
        record.status = OrderStatus::Pending;
        self.registry.insert(id, record);

        let mut trades = match self.registry.get(&id).unwrap().order.order_type {
            OrderType::Limit => self.add_limit(oracle, &pair, id),
            OrderType::Market => self.add_market(oracle, &pair, id),
            OrderType::StopLoss | OrderType::StopLimit => self.add_stop(oracle, &pair, id),
        };

        trades.extend(self.drain_trigger_queue(oracle));
        trades
    }

    fn reject(&mut self, id: Uuid, reason: &'static str) {
        if let Some(r) = self.record_mut(id) {
            r.status = OrderStatus::Rejected;
            r.set_metadata("rejectReason", reason);
            r.updated_at = Utc::now();
        }
    }

    fn best_opposite_limit_price(&self, pair: &str, opposite_side: Side) -> Option<f64> {
        let book = self.books.get(pair)?;
        let list = match opposite_side {
            Side::Buy => &book.buy,
            Side::Sell => &book.sell,
        };
        list.first().and_then(|id| self.record(*id)).map(|r| r.price)
    }

    fn add_limit(&mut self, oracle: &PriceOracle, pair: &str, id: Uuid) -> Vec<Trade> {
        let (side, price) = {
            let r = self.record(id).unwrap();
            (r.side, r.price)
        };
        let opposite = side.opposite();
        let mut trades = Vec::new();

        let has_resting_market = {
            let book = self.book_mut(pair);
            match opposite {
                Side::Buy => !book.market_buy.is_empty(),
                Side::Sell => !book.market_sell.is_empty(),
            }
        };
        if has_resting_market {
            trades.extend(self.match_against_market(oracle, pair, id, opposite));
        }

        let price_condition = |maker_price: f64| match side {
            Side::Buy => maker_price <= price,
            Side::Sell => maker_price >= price,
        };

        if self.remaining_of(id) > 0.0 {
            if let Some(best) = self.best_opposite_limit_price(pair, opposite) {
                if price_condition(best) {
                    let tif = self.record(id).unwrap().order.time_in_force;
                    if tif == TimeInForce::PostOnly {
                        self.reject(id, "POST_ONLY_WOULD_TRADE");
                        return trades;
                    }
                }
            }
        }

        let allow_partial = self.record(id).unwrap().order.allow_partial_fill;
        let tif = self.record(id).unwrap().order.time_in_force;
        if (tif == TimeInForce::Fok || !allow_partial) && self.remaining_of(id) > 0.0 {
            let fillable = self.fillable_opposite_volume(pair, opposite, price_condition);
            if fillable + 1e-12 < self.remaining_of(id) {
                self.reject(id, "INSUFFICIENT_LIQUIDITY");
                return trades;
            }
        }

        if self.remaining_of(id) > 0.0 {
            trades.extend(self.match_against_limits(oracle, pair, id, opposite, price_condition));
        }

        self.finish_residue(pair, id, side, false);
        trades
    }

    fn fillable_opposite_volume(&self, pair: &str, opposite: Side, predicate: impl Fn(f64) -> bool) -> f64 {
        let Some(book) = self.books.get(pair) else { return 0.0 };
        let mut total = 0.0;
        let market_list = match opposite {
            Side::Buy => &book.market_buy,
            Side::Sell => &book.market_sell,
        };
        for id in market_list {
            total += self.remaining_of(*id);
        }
        let limit_list = match opposite {
            Side::Buy => &book.buy,
            Side::Sell => &book.sell,
        };
        for id in limit_list {
            if let Some(r) = self.record(*id) {
                if predicate(r.price) {
                    total += r.remaining();
                } else {
                    break;
                }
            }
        }
        total
    }

    fn add_market(&mut self, oracle: &PriceOracle, pair: &str, id: Uuid) -> Vec<Trade> {
        let side = self.record(id).unwrap().side;
        let opposite = side.opposite();
        let mut trades = Vec::new();

        let has_resting_market = {
            let book = self.book_mut(pair);
            match opposite {
                Side::Buy => !book.market_buy.is_empty(),
                Side::Sell => !book.market_sell.is_empty(),
            }
        };
        if has_resting_market {
            trades.extend(self.match_against_market(oracle, pair, id, opposite));
        }
        if self.remaining_of(id) > 0.0 {
            trades.extend(self.match_against_limits(oracle, pair, id, opposite, |_| true));
        }

        let allow_partial = self.record(id).unwrap().order.allow_partial_fill;
        let tif = self.record(id).unwrap().order.time_in_force;
        if (tif == TimeInForce::Fok || !allow_partial) && self.remaining_of(id) > 0.0 {
            self.reject(id, "INSUFFICIENT_LIQUIDITY");
            return trades;
        }

        if self.remaining_of(id) > 0.0 {
            if let Some(trade) = self.try_synthetic_fill(oracle, pair, id) {
                trades.push(trade);
            }
        }

        self.finish_residue(pair, id, side, true);
        trades
    }

    fn finish_residue(&mut self, pair: &str, id: Uuid, side: Side, is_market: bool) {
        let remaining = self.remaining_of(id);
        if remaining <= 0.0 {
            return;
        }
        let (tif, allow_partial, filled) = {
            let r = self.record(id).unwrap();
            (r.order.time_in_force, r.order.allow_partial_fill, r.filled)
        };
        let reject_residue = tif == TimeInForce::Ioc || tif == TimeInForce::Fok || !allow_partial;
        if reject_residue {
            let status = if filled > 0.0 { OrderStatus::Partial } else { OrderStatus::Rejected };
            if let Some(r) = self.record_mut(id) {
                r.status = status;
                r.updated_at = Utc::now();
            }
            return;
        }
        let book = self.book_mut(pair);
        match (is_market, side) {
            (true, Side::Buy) => book.market_buy.push(id),
            (true, Side::Sell) => book.market_sell.push(id),
            (false, Side::Buy) => {
                book.buy.push(id);
                drop(book);
                self.sort_buy(pair);
            }
            (false, Side::Sell) => {
                book.sell.push(id);
                drop(book);
                self.sort_sell(pair);
            }
        }
    }

    fn add_stop(&mut self, oracle: &PriceOracle, pair: &str, id: Uuid) -> Vec<Trade> {
        let stop_price = self.record(id).unwrap().order.stop_price;
        if stop_price.is_zero() {
            self.reject(id, "INVALID_STOP_PRICE");
            return Vec::new();
        }
        let order_type = self.record(id).unwrap().order.order_type;
        let book = self.book_mut(pair);
        match order_type {
            OrderType::StopLoss => book.stop_loss.push(id),
            OrderType::StopLimit => book.stop_limit.push(id),
            _ => unreachable!(),
        }

        let current = self
            .oriented_market_price(pair)
            .or_else(|| {
                let (base, quote) = self.pair_tokens(pair)?;
                Some(oracle.estimate_pair_price(base, quote))
            });
        if let Some(price) = current {
            if self.stop_triggers(id, price) {
                self.queue_trigger(pair);
                return self.drain_trigger_queue(oracle);
            }
        }
        Vec::new()
    }

    fn pair_tokens(&self, pair: &str) -> Option<(Address, Address)> {
        let book = self.books.get(pair)?;
        let any_id = book
            .buy
            .first()
            .or(book.sell.first())
            .or(book.market_buy.first())
            .or(book.market_sell.first())
            .or(book.stop_loss.first())
            .or(book.stop_limit.first())?;
        let r = self.record(*any_id)?;
        Some((r.base_token, r.quote_token))
    }

    fn stop_triggers(&self, id: Uuid, current_price: f64) -> bool {
        let Some(r) = self.record(id) else { return false };
        let stop = display_stop_price(r);
        match r.side {
            Side::Sell => current_price <= stop,
            Side::Buy => current_price >= stop,
        }
    }

    // -- Matching loop (4.4.4) ---------------------------------------------

    fn match_against_market(&mut self, oracle: &PriceOracle, pair: &str, taker: Uuid, opposite: Side) -> Vec<Trade> {
        self.match_loop(oracle, pair, taker, opposite, true, |_| true)
    }

    fn match_against_limits(
        &mut self,
        oracle: &PriceOracle,
        pair: &str,
        taker: Uuid,
        opposite: Side,
        predicate: impl Fn(f64) -> bool,
    ) -> Vec<Trade> {
        self.match_loop(oracle, pair, taker, opposite, false, predicate)
    }

    fn match_loop(
        &mut self,
        oracle: &PriceOracle,
        pair: &str,
        taker: Uuid,
        opposite: Side,
        against_market: bool,
        predicate: impl Fn(f64) -> bool,
    ) -> Vec<Trade> {
        let mut trades = Vec::new();
        loop {
            if self.remaining_of(taker) <= 0.0 {
                break;
            }
            let head = {
                let Some(book) = self.books.get(pair) else { break };
                let list = if against_market {
                    match opposite {
                        Side::Buy => &book.market_buy,
                        Side::Sell => &book.market_sell,
                    }
                } else {
                    match opposite {
                        Side::Buy => &book.buy,
                        Side::Sell => &book.sell,
                    }
                };
                list.first().copied()
            };
            let Some(maker) = head else { break };
            if !against_market {
                let maker_price = self.record(maker).map(|r| r.price).unwrap_or(0.0);
                if !predicate(maker_price) {
                    break;
                }
            }

            let amount = self.remaining_of(taker).min(self.remaining_of(maker));
            if amount <= 0.0 {
                break;
            }

            let trade_price = {
                let maker_price = self.record(maker).map(|r| r.price).unwrap_or(0.0);
                if maker_price > 0.0 {
                    maker_price
                } else {
                    let taker_price = self.record(taker).map(|r| r.price).unwrap_or(0.0);
                    if taker_price > 0.0 {
                        taker_price
                    } else {
                        self.oriented_market_price(pair).unwrap_or(0.0)
                    }
                }
            };

            let (taker_side, base_token, quote_token) = {
                let t = self.record(taker).unwrap();
                (t.side, t.base_token, t.quote_token)
            };

            apply_fill(self.record_mut(taker).unwrap(), amount, trade_price, maker);
            apply_fill(self.record_mut(maker).unwrap(), amount, trade_price, taker);

            let trade = Trade {
                id: Uuid::new_v4(),
                pair_key: pair.to_string(),
                maker_order_id: maker,
                taker_order_id: taker,
                price: trade_price,
                amount,
                side: taker_side,
                source: "orderbook".to_string(),
                synthetic: false,
                batch_id: None,
                executed_at: Utc::now(),
                settlement: None,
            };
            self.book_mut(pair).push_trade(trade.clone());
            trades.push(trade);

            self.update_market_price_internal(oracle, base_token, quote_token, trade_price, MarketPriceSource::Orderbook, false);
            oracle.register_trade(
                base_token,
                quote_token,
                trade_price,
                Some(amount),
                None,
                Some(taker_side),
                &Default::default(),
                &Default::default(),
            );

            for candidate in [taker, maker] {
                let is_market_buy = self
                    .record(candidate)
                    .map(|r| r.order.order_type == OrderType::Market && r.side == Side::Buy)
                    .unwrap_or(false);
                if is_market_buy {
                    if let Some(impact_trade) = self.apply_market_buy_impact(oracle, base_token, quote_token, amount) {
                        trades.push(impact_trade);
                    }
                }
            }

            if self.remaining_of(maker) <= 0.0 {
                self.remove_from_all_lists(pair, maker);
            }
        }
        trades
    }

    // -- Stop triggering (4.4.6) -------------------------------------------

    /// Sets the pair's oriented market price (and the inverse key) and
    /// scans both keys' stop lists for newly-triggered orders, unless a
    /// trigger pipeline is already draining (`skipStopTrigger`).
    pub fn update_market_price_internal(
        &mut self,
        oracle: &PriceOracle,
        base: Address,
        quote: Address,
        price: f64,
        source: MarketPriceSource,
        skip_stop_trigger: bool,
    ) {
        let forward = pair_key(base, quote);
        let inverse = pair_key(quote, base);
        let previous = self.market_prices.get(&forward).map(|e| e.price);

        self.market_prices.insert(
            forward.clone(),
            MarketPriceEntry { price, previous_price: previous, source, updated_at: Utc::now() },
        );
        let inverse_previous = self.market_prices.get(&inverse).map(|e| e.price);
        self.market_prices.insert(
            inverse.clone(),
            MarketPriceEntry { price: 1.0 / price, previous_price: inverse_previous, source, updated_at: Utc::now() },
        );

        if skip_stop_trigger || self.triggering {
            return;
        }
        self.queue_trigger(&forward);
        self.queue_trigger(&inverse);
        let _ = oracle;
    }

    fn queue_trigger(&mut self, pair: &str) {
        self.pending_trigger_pairs.get_or_insert_with(Vec::new);
        if let Some(queue) = self.pending_trigger_pairs.as_mut() {
            if !queue.contains(&pair.to_string()) {
                queue.push(pair.to_string());
            }
        }
    }

    pub(crate) fn drain_trigger_queue(&mut self, oracle: &PriceOracle) -> Vec<Trade> {
        if self.triggering {
            return Vec::new();
        }
        self.triggering = true;
        let mut all_trades = Vec::new();
        while let Some(pair) = self.pending_trigger_pairs.as_mut().and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }) {
            all_trades.extend(self.process_triggers_for_pair(oracle, &pair));
        }
        self.triggering = false;
        all_trades
    }

    fn process_triggers_for_pair(&mut self, oracle: &PriceOracle, pair: &str) -> Vec<Trade> {
        let Some(price) = self.oriented_market_price(pair) else { return Vec::new() };
        let triggered_loss: Vec<Uuid> = self
            .books
            .get(pair)
            .map(|b| b.stop_loss.iter().copied().filter(|id| self.stop_triggers(*id, price)).collect())
            .unwrap_or_default();
        let triggered_limit: Vec<Uuid> = self
            .books
            .get(pair)
            .map(|b| b.stop_limit.iter().copied().filter(|id| self.stop_triggers(*id, price)).collect())
            .unwrap_or_default();

        if triggered_loss.is_empty() && triggered_limit.is_empty() {
            return Vec::new();
        }

        let source = self.market_prices.get(pair).map(|e| e.source).unwrap_or(MarketPriceSource::Orderbook);

        for id in triggered_loss.iter().chain(triggered_limit.iter()) {
            if let Some(r) = self.record_mut(*id) {
                r.triggered_at = Some(Utc::now());
                r.set_metadata("triggeredPrice", price);
                r.set_metadata("triggerSource", source.to_string());
                r.status = OrderStatus::Triggered;
            }
            self.remove_from_all_lists(pair, *id);
        }

        let mut trades = Vec::new();

        for id in &triggered_limit {
            if let Some(r) = self.record_mut(*id) {
                r.order.order_type = OrderType::Limit;
            }
            trades.extend(self.add_limit(oracle, pair, *id));
        }

        trades.extend(self.cross_match_triggered_stop_losses(oracle, pair, triggered_loss));
        trades
    }

    /// Pairs triggered STOP_LOSS buys against triggered STOP_LOSS sells in
    /// the current batch before routing survivors through the MARKET path.
    fn cross_match_triggered_stop_losses(&mut self, oracle: &PriceOracle, pair: &str, triggered: Vec<Uuid>) -> Vec<Trade> {
        let mut buys: Vec<Uuid> = Vec::new();
        let mut sells: Vec<Uuid> = Vec::new();
        for id in triggered {
            if let Some(r) = self.record_mut(id) {
                r.order.order_type = OrderType::Market;
            }
            match self.record(id).map(|r| r.side) {
                Some(Side::Buy) => buys.push(id),
                Some(Side::Sell) => sells.push(id),
                None => {}
            }
        }
        buys.sort_by_key(|id| self.record(*id).map(|r| r.created_at));
        sells.sort_by_key(|id| self.record(*id).map(|r| r.created_at));

        let mut trades = Vec::new();
        let mut bi = 0;
        let mut si = 0;
        while bi < buys.len() && si < sells.len() {
            let buy_id = buys[bi];
            let sell_id = sells[si];
            if self.remaining_of(buy_id) <= 0.0 {
                bi += 1;
                continue;
            }
            if self.remaining_of(sell_id) <= 0.0 {
                si += 1;
                continue;
            }
            let (older, newer) = {
                let b = self.record(buy_id).unwrap();
                let s = self.record(sell_id).unwrap();
                if b.created_at <= s.created_at { (buy_id, sell_id) } else { (sell_id, buy_id) }
            };
            let snapshot_price = self.oriented_market_price(pair);
            let stop_b = self.record(buy_id).map(display_stop_price).unwrap_or(0.0);
            let stop_s = self.record(sell_id).map(display_stop_price).unwrap_or(0.0);
            let trade_price = snapshot_price
                .filter(|p| p.is_finite() && *p > 0.0)
                .unwrap_or_else(|| {
                    if stop_b > 0.0 && stop_s > 0.0 {
                        (stop_b + stop_s) / 2.0
                    } else if stop_b > 0.0 {
                        stop_b
                    } else {
                        stop_s
                    }
                });

            let amount = self.remaining_of(buy_id).min(self.remaining_of(sell_id));
            if amount <= 0.0 {
                break;
            }

            let allow_partial_older = self.record(older).map(|r| r.order.allow_partial_fill).unwrap_or(true);
            let allow_partial_newer = self.record(newer).map(|r| r.order.allow_partial_fill).unwrap_or(true);
            let fok_older = self.record(older).map(|r| r.order.time_in_force == TimeInForce::Fok).unwrap_or(false);
            let fok_newer = self.record(newer).map(|r| r.order.time_in_force == TimeInForce::Fok).unwrap_or(false);
            let is_partial = amount < self.remaining_of(buy_id) || amount < self.remaining_of(sell_id);
            if (!allow_partial_older || !allow_partial_newer || fok_older || fok_newer) && is_partial {
                break;
            }

            let min_fill_buy = self.record(buy_id).and_then(|r| r.min_fill_amount);
            let min_fill_sell = self.record(sell_id).and_then(|r| r.min_fill_amount);
            if min_fill_buy.map(|m| amount < m).unwrap_or(false) || min_fill_sell.map(|m| amount < m).unwrap_or(false) {
                break;
            }

            let (base_token, quote_token) = {
                let r = self.record(buy_id).unwrap();
                (r.base_token, r.quote_token)
            };

            apply_fill(self.record_mut(buy_id).unwrap(), amount, trade_price, sell_id);
            apply_fill(self.record_mut(sell_id).unwrap(), amount, trade_price, buy_id);

            let trade = Trade {
                id: Uuid::new_v4(),
                pair_key: pair.to_string(),
                maker_order_id: older,
                taker_order_id: newer,
                price: trade_price,
                amount,
                side: Side::Buy,
                source: "stop-cross".to_string(),
                synthetic: false,
                batch_id: None,
                executed_at: Utc::now(),
                settlement: None,
            };
            self.book_mut(pair).push_trade(trade.clone());
            trades.push(trade);

            self.update_market_price_internal(oracle, base_token, quote_token, trade_price, MarketPriceSource::Orderbook, true);
            oracle.register_trade(base_token, quote_token, trade_price, Some(amount), None, Some(Side::Buy), &Default::default(), &Default::default());

            if self.remaining_of(buy_id) <= 0.0 {
                bi += 1;
            }
            if self.remaining_of(sell_id) <= 0.0 {
                si += 1;
            }
        }

        for id in buys.into_iter().chain(sells.into_iter()) {
            if self.remaining_of(id) > 0.0 {
                trades.extend(self.add_market(oracle, pair, id));
            }
        }
        trades
    }

    // -- Synthetic liquidity (4.4.7) ---------------------------------------

    fn try_synthetic_fill(&mut self, oracle: &PriceOracle, pair: &str, id: Uuid) -> Option<Trade> {
        let (price, price_source, base_token, quote_token, side, remaining) = {
            let r = self.record(id)?;
            if r.order.order_type != OrderType::Market || r.remaining() <= 0.0 {
                return None;
            }
            let meta_source = r
                .metadata
                .get("priceSource")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            (r.price, meta_source.to_string(), r.base_token, r.quote_token, r.side, r.remaining())
        };
        if price <= 0.0 {
            return None;
        }
        let pair_source = self.market_prices.get(pair).map(|e| e.source) == Some(MarketPriceSource::Synthetic);
        if price_source != "synthetic" && !pair_source {
            return None;
        }

        let counterparty = format!("synthetic-liquidity-{:08x}", rand::random::<u32>());
        apply_fill_synthetic(self.record_mut(id).unwrap(), remaining, price);

        let trade = Trade {
            id: Uuid::new_v4(),
            pair_key: pair.to_string(),
            maker_order_id: id,
            taker_order_id: id,
            price,
            amount: remaining,
            side,
            source: counterparty,
            synthetic: true,
            batch_id: None,
            executed_at: Utc::now(),
            settlement: None,
        };
        self.book_mut(pair).push_trade(trade.clone());

        if let Some(r) = self.record_mut(id) {
            r.set_metadata("syntheticFill", true);
            r.set_metadata("syntheticQuoteAmount", remaining * price);
        }

        self.update_market_price_internal(oracle, base_token, quote_token, price, MarketPriceSource::Synthetic, true);
        if side == Side::Buy && self.record(id).map(|r| r.order.order_type) == Some(OrderType::Market) {
            self.apply_market_buy_impact(oracle, base_token, quote_token, remaining);
        }
        oracle.register_trade(base_token, quote_token, price, Some(remaining), None, Some(side), &Default::default(), &Default::default());

        Some(trade)
    }

    // -- Market-buy price impact (4.4.8) ------------------------------------

    fn apply_market_buy_impact(&mut self, oracle: &PriceOracle, base: Address, quote: Address, amount: f64) -> Option<Trade> {
        let pair = pair_key(base, quote);
        let baseline = self.oriented_market_price(&pair)?;
        let boosted = baseline + amount * MARKET_BUY_IMPACT_RATE;
        if boosted <= baseline {
            return None;
        }
        self.update_market_price_internal(oracle, base, quote, boosted, MarketPriceSource::MarketBuyImpact, true);
        oracle.register_trade(base, quote, boosted, None, Some(amount * boosted), Some(Side::Buy), &Default::default(), &Default::default());

        let trade = Trade {
            id: Uuid::new_v4(),
            pair_key: pair.clone(),
            maker_order_id: Uuid::nil(),
            taker_order_id: Uuid::nil(),
            price: boosted,
            amount,
            side: Side::Buy,
            source: "market-buy-impact".to_string(),
            synthetic: true,
            batch_id: None,
            executed_at: Utc::now(),
            settlement: None,
        };
        self.book_mut(&pair).push_trade(trade.clone());
        Some(trade)
    }

    // -- Cancellation (4.4.9) ------------------------------------------------

    /// Applies a fill produced outside the matching loop (batch executor
    /// legs) directly onto the registry entry.
    pub fn apply_external_fill(&mut self, id: Uuid, amount: f64) -> Option<OrderRecord> {
        let pair = pair_key(self.record(id)?.base_token, self.record(id)?.quote_token);
        {
            let r = self.record_mut(id)?;
            r.filled += amount;
            r.status = if r.remaining() <= 0.0 { OrderStatus::Filled } else { OrderStatus::Partial };
            r.updated_at = Utc::now();
        }
        if self.remaining_of(id) <= 0.0 {
            self.remove_from_all_lists(&pair, id);
        }
        self.record(id).cloned()
    }

    pub fn cancel_order(&mut self, id: Uuid, reason: Option<String>) -> Option<OrderRecord> {
        let r = self.registry.get(&id)?;
        if r.is_terminal() {
            return self.registry.get(&id).cloned();
        }
        let pair = pair_key(r.base_token, r.quote_token);
        self.remove_from_all_lists(&pair, id);
        let record = self.record_mut(id).unwrap();
        record.status = OrderStatus::Cancelled;
        record.set_metadata("cancelReason", reason.unwrap_or_else(|| "user_requested".to_string()));
        record.updated_at = Utc::now();
        self.registry.get(&id).cloned()
    }
}

fn display_stop_price(r: &OrderRecord) -> f64 {
    let raw = r.order.stop_price.as_u128() as f64;
    raw / 1e18
}

fn apply_fill(record: &mut OrderRecord, amount: f64, price: f64, counterparty_order_id: Uuid) {
    record.filled += amount;
    record.executions.push(crate::types::Execution {
        amount,
        price,
        counterparty_id: counterparty_order_id,
        timestamp: Utc::now(),
    });
    record.status = if record.remaining() <= 0.0 { OrderStatus::Filled } else { OrderStatus::Partial };
    record.updated_at = Utc::now();
}

fn apply_fill_synthetic(record: &mut OrderRecord, amount: f64, price: f64) {
    record.filled += amount;
    record.executions.push(crate::types::Execution {
        amount,
        price,
        counterparty_id: Uuid::nil(),
        timestamp: Utc::now(),
    });
    record.status = if record.remaining() <= 0.0 { OrderStatus::Filled } else { OrderStatus::Partial };
    record.updated_at = Utc::now();
}
