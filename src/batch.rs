// Batch Executor (C5): atomic N-party cyclic settlement. A closed ring of
// orders whose offer/request tokens chain end-to-end and whose rates
// multiply to (approximately) 1 is solved for the maximum volume that
// clears every leg simultaneously.

use chrono::Utc;
use ethereum_types::Address;
use thiserror::Error;
use uuid::Uuid;

use crate::oracle::PriceOracle;
use crate::types::{pair_key, OrderRecord, Side, Trade};

pub const DEFAULT_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch must contain at least two orders")]
    TooFewOrders,
    #[error("ring is not closed: order {0} does not hand off to the next leg's offer token")]
    OpenRing(Uuid),
    #[error("rate product {0} deviates from 1 beyond tolerance")]
    ImbalancedRates(f64),
    #[error("no liquidity: first leg has zero offer remaining")]
    NoLiquidity,
    #[error("order {0} requires all-or-nothing fill but the solved volume would only partially fill it")]
    OverfillAllOrNothing(Uuid),
}

struct Leg {
    order_id: Uuid,
    rate: f64,
    offer_token: Address,
    request_token: Address,
    offer_remaining: f64,
    allow_partial_fill: bool,
}

pub struct BatchResult {
    pub batch_id: Uuid,
    pub offer_amounts: Vec<f64>,
    pub request_amounts: Vec<f64>,
    pub trades: Vec<Trade>,
    pub order_ids: Vec<Uuid>,
    /// Oriented rate applied to each leg, keyed the same as `order_ids`;
    /// callers use this to push a `source=batch` market price update.
    pub rates: Vec<(Address, Address, f64)>,
}

fn leg_of(record: &OrderRecord) -> Leg {
    let (offer_token, request_token) = match record.side {
        Side::Sell => (record.base_token, record.quote_token),
        Side::Buy => (record.quote_token, record.base_token),
    };
    let rate = match record.side {
        Side::Sell => record.price,
        Side::Buy => 1.0 / record.price,
    };
    let offer_remaining = match record.side {
        Side::Sell => record.remaining(),
        Side::Buy => record.remaining() * record.price,
    };
    Leg {
        order_id: record.id,
        rate,
        offer_token,
        request_token,
        offer_remaining,
        allow_partial_fill: record.order.allow_partial_fill,
    }
}

pub fn execute_batch(
    orders: &[OrderRecord],
    tolerance: Option<f64>,
    oracle: &PriceOracle,
) -> Result<(BatchResult, Vec<(Uuid, f64)>), BatchError> {
    if orders.len() < 2 {
        return Err(BatchError::TooFewOrders);
    }
    let tolerance = tolerance.unwrap_or(DEFAULT_TOLERANCE);
    let legs: Vec<Leg> = orders.iter().map(leg_of).collect();
    let n = legs.len();

    for i in 0..n {
        let current = &legs[i];
        let next = &legs[(i + 1) % n];
        if current.request_token != next.offer_token {
            return Err(BatchError::OpenRing(current.order_id));
        }
    }

    let rate_product: f64 = legs.iter().map(|l| l.rate).product();
    if (rate_product - 1.0).abs() > tolerance {
        return Err(BatchError::ImbalancedRates(rate_product));
    }

    if legs[0].offer_remaining <= 0.0 {
        return Err(BatchError::NoLiquidity);
    }

    let mut cumulative_rate = 1.0;
    let mut max_offer = legs[0].offer_remaining;
    for i in 1..n {
        cumulative_rate *= legs[i - 1].rate;
        let candidate = legs[i].offer_remaining / cumulative_rate;
        max_offer = max_offer.min(candidate);
    }

    let mut offer_amounts = vec![0.0; n];
    let mut request_amounts = vec![0.0; n];
    offer_amounts[0] = max_offer;
    for i in 0..n {
        request_amounts[i] = offer_amounts[i] * legs[i].rate;
        let next = (i + 1) % n;
        offer_amounts[next] = request_amounts[i];
    }

    if (request_amounts[n - 1] - offer_amounts[0]).abs() > tolerance {
        return Err(BatchError::ImbalancedRates(rate_product));
    }

    let mut base_fills = Vec::with_capacity(n);
    for (i, (order, leg)) in orders.iter().zip(legs.iter()).enumerate() {
        let base_filled = match order.side {
            Side::Sell => offer_amounts[i],
            Side::Buy => request_amounts[i],
        };
        if base_filled > order.remaining() + tolerance {
            return Err(BatchError::OverfillAllOrNothing(order.id));
        }
        if !leg.allow_partial_fill && (base_filled - order.remaining()).abs() > tolerance {
            return Err(BatchError::OverfillAllOrNothing(order.id));
        }
        base_fills.push((order.id, base_filled));
    }

    let batch_id = Uuid::new_v4();
    let mut trades = Vec::with_capacity(n);
    for i in 0..n {
        let next = (i + 1) % n;
        let order = &orders[i];
        let counterparty = &orders[next];
        let pair = pair_key(order.base_token, order.quote_token);
        let trade = Trade {
            id: Uuid::new_v4(),
            pair_key: pair.clone(),
            maker_order_id: order.id,
            taker_order_id: counterparty.id,
            price: legs[i].rate,
            amount: base_fills[i].1,
            side: order.side,
            source: "batch".to_string(),
            synthetic: false,
            batch_id: Some(batch_id),
            executed_at: Utc::now(),
            settlement: None,
        };
        oracle.register_trade(
            order.base_token,
            order.quote_token,
            trade.price,
            Some(trade.amount),
            None,
            Some(order.side),
            &Default::default(),
            &Default::default(),
        );
        trades.push(trade);
    }

    let rates = orders.iter().zip(legs.iter()).map(|(o, l)| (o.base_token, o.quote_token, l.rate)).collect();

    Ok((
        BatchResult {
            batch_id,
            offer_amounts,
            request_amounts,
            trades,
            order_ids: orders.iter().map(|o| o.id).collect(),
            rates,
        },
        base_fills,
    ))
}
