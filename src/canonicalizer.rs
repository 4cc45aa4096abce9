// Order Canonicalizer (C2): draft -> canonical Order + display metadata.

use chrono::Utc;
use ethereum_types::{Address, U256};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::oracle::PriceOracle;
use crate::types::{Order, OrderType, Side, TimeInForce, TokenMetadataMap};

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid amount")]
    InvalidAmount,
    #[error("invalid enum value: {0}")]
    InvalidEnum(String),
    #[error("unknown token: {0:#x}")]
    UnknownToken(Address),
    #[error("no price source available for market order")]
    MissingPrice,
    #[error("invalid stop price")]
    InvalidStopPrice,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub maker: Address,
    pub base_token: Address,
    pub quote_token: Address,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub amount: f64,
    pub price: Option<f64>,
    pub market_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub min_fill_amount: Option<f64>,
    pub allow_partial_fill: bool,
    pub expiry: Option<i64>,
    pub nonce: Option<U256>,
    pub fee_recipient: Option<Address>,
    pub fee_amount: Option<U256>,
}

pub struct CanonicalOrder {
    pub order: Order,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    pub min_fill_amount: Option<f64>,
    pub base_token: Address,
    pub quote_token: Address,
    pub price_source: &'static str,
    pub metadata: Map<String, Value>,
}

fn pow10(n: u32) -> f64 {
    10f64.powi(n as i32)
}

fn pow10_u256(n: u32) -> U256 {
    U256::from(10u64).pow(U256::from(n))
}

/// Converts a decimal display amount into exact on-chain base units without
/// ever multiplying a float by the full base-unit scale (which loses
/// precision past ~15 significant digits and would make the signed EIP-712
/// digest disagree with an exact-integer contract computation). Only the
/// first `PRECISION_DIGITS` fractional digits are captured via a bounded
/// float-to-integer rounding; every digit beyond that is applied as an exact
/// `U256` power-of-ten multiply, mirroring how CLOB clients truncate a
/// display quantity to a fixed number of digits before scaling it to a
/// wire-level fixed-point integer.
const PRECISION_DIGITS: u32 = 12;

fn decimal_to_base_units(display: f64, decimals: u8) -> Result<U256, CanonicalizeError> {
    if !display.is_finite() || display < 0.0 {
        return Err(CanonicalizeError::InvalidAmount);
    }
    let scale_digits = PRECISION_DIGITS.min(decimals as u32);
    let scaled = (display * pow10(scale_digits)).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > u128::MAX as f64 {
        return Err(CanonicalizeError::InvalidAmount);
    }
    let ticks = U256::from(scaled as u128);
    Ok(ticks * pow10_u256(decimals as u32 - scale_digits))
}

fn decimals_of(tokens: &TokenMetadataMap, addr: Address) -> u8 {
    tokens.get(&addr).map(|m| m.decimals).unwrap_or(18)
}

/// Best opposite-side limit price currently resting on the book, if any.
/// Supplied by the caller (the matching engine) rather than looked up here,
/// so the canonicalizer has no dependency on engine internals.
pub struct MarketPriceHints {
    pub current_market_price: Option<f64>,
    pub best_opposite_limit: Option<f64>,
}

pub struct NonceSource<'a> {
    pub resolve: &'a dyn Fn(Address) -> U256,
}

pub fn canonicalize(
    draft: &OrderDraft,
    tokens: &TokenMetadataMap,
    hints: &MarketPriceHints,
    oracle: &PriceOracle,
    nonce_source: &NonceSource,
) -> Result<CanonicalOrder, CanonicalizeError> {
    if draft.amount <= 0.0 {
        return Err(CanonicalizeError::InvalidAmount);
    }

    let base_decimals = decimals_of(tokens, draft.base_token);
    let quote_decimals = decimals_of(tokens, draft.quote_token);

    let base_units = decimal_to_base_units(draft.amount, base_decimals)?;
    if base_units.is_zero() {
        return Err(CanonicalizeError::InvalidAmount);
    }

    let (price, price_source) = resolve_price(draft, hints, oracle)?;

    // price_units is the price scaled to quote-token base units; rescaling
    // base_units by it and dividing back out the base scale is the same
    // exact-integer transform a settling contract performs on amountGet.
    let price_units = decimal_to_base_units(price, quote_decimals)?;
    let base_pow = pow10_u256(base_decimals as u32);
    let quote_units = base_units
        .checked_mul(price_units)
        .ok_or(CanonicalizeError::InvalidAmount)?
        .checked_div(base_pow)
        .ok_or(CanonicalizeError::InvalidAmount)?;

    let (token_give, amount_give, token_get, amount_get) = match draft.side {
        Side::Sell => (draft.base_token, base_units, draft.quote_token, quote_units),
        Side::Buy => (draft.quote_token, quote_units, draft.base_token, base_units),
    };

    let nonce = draft
        .nonce
        .unwrap_or_else(|| (nonce_source.resolve)(draft.maker));

    let expiry = U256::from(draft.expiry.unwrap_or(0).max(0) as u64);

    let stop_price_display = draft.stop_price.unwrap_or(0.0);
    if draft.order_type.is_stop() && stop_price_display <= 0.0 {
        return Err(CanonicalizeError::InvalidStopPrice);
    }
    let stop_price_units = decimal_to_base_units(stop_price_display, 18)?;

    // SELL minFillAmount is expressed in base units; BUY rescales by price
    // per the observed (and preserved) behavior documented in DESIGN.md.
    let min_fill_display = draft.min_fill_amount.unwrap_or(0.0);
    let min_fill_units = match draft.side {
        Side::Sell => decimal_to_base_units(min_fill_display, base_decimals)?,
        Side::Buy => {
            let min_fill_base_units = decimal_to_base_units(min_fill_display, base_decimals)?;
            min_fill_base_units
                .checked_mul(price_units)
                .ok_or(CanonicalizeError::InvalidAmount)?
                .checked_div(base_pow)
                .ok_or(CanonicalizeError::InvalidAmount)?
        }
    };

    let fee_recipient = draft.fee_recipient.unwrap_or_else(Address::zero);
    let fee_amount = draft.fee_amount.unwrap_or_else(U256::zero);

    let order = Order {
        maker: draft.maker,
        token_get,
        token_give,
        amount_get: non_zero(amount_get)?,
        amount_give: non_zero(amount_give)?,
        nonce,
        expiry,
        order_type: draft.order_type,
        time_in_force: draft.time_in_force,
        side: draft.side,
        stop_price: stop_price_units,
        min_fill_amount: min_fill_units,
        allow_partial_fill: draft.allow_partial_fill,
        fee_recipient,
        fee_amount,
    };

    let mut metadata = Map::new();
    metadata.insert("priceSource".to_string(), Value::String(price_source.to_string()));
    metadata.insert("price".to_string(), serde_json::json!(price));
    metadata.insert("createdAt".to_string(), serde_json::json!(Utc::now().to_rfc3339()));

    Ok(CanonicalOrder {
        order,
        side: draft.side,
        price,
        amount: draft.amount,
        min_fill_amount: if min_fill_display > 0.0 { Some(min_fill_display) } else { None },
        base_token: draft.base_token,
        quote_token: draft.quote_token,
        price_source,
        metadata,
    })
}

fn non_zero(value: U256) -> Result<U256, CanonicalizeError> {
    if value.is_zero() {
        return Err(CanonicalizeError::InvalidAmount);
    }
    Ok(value)
}

/// Price resolution precedence for MARKET orders: explicit draft price,
/// `marketPrice` override, current market snapshot, best opposite limit,
/// synthetic oracle estimate. LIMIT/STOP orders require an explicit price
/// (stop orders carry `stopPrice` separately and are priced at trigger).
fn resolve_price(
    draft: &OrderDraft,
    hints: &MarketPriceHints,
    oracle: &PriceOracle,
) -> Result<(f64, &'static str), CanonicalizeError> {
    if let Some(p) = draft.price {
        if p > 0.0 {
            return Ok((p, "input"));
        }
    }

    if draft.order_type == OrderType::Market {
        if let Some(p) = draft.market_price {
            if p > 0.0 {
                return Ok((p, "derived"));
            }
        }
        if let Some(p) = hints.current_market_price {
            if p > 0.0 {
                return Ok((p, "market"));
            }
        }
        if let Some(p) = hints.best_opposite_limit {
            if p > 0.0 {
                return Ok((p, "orderbook"));
            }
        }
        let estimate = oracle.estimate_pair_price(draft.base_token, draft.quote_token);
        if estimate > 0.0 {
            return Ok((estimate, "synthetic"));
        }
        return Err(CanonicalizeError::MissingPrice);
    }

    Err(CanonicalizeError::MissingField("price"))
}
