// Price Oracle (C3): deterministic per-token unit value, per-pair dynamic
// price state, trade registration.

use chrono::Utc;
use ethereum_types::Address;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{MarketPriceSource, PairPriceState, Side, TokenMetadata};

fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

/// `uv(T) = clamp(m(T) * base(T), 1e-12, 1e12)`.
fn unit_value(addr: Address, meta: &TokenMetadata) -> f64 {
    let base = meta
        .total_supply
        .filter(|s| !s.is_zero())
        .map(|s| 1.0 / s.to_f64_lossy())
        .unwrap_or(1.0);
    let m = mix_factor(addr, &meta.symbol, &meta.name);
    clamp(m * base, 1e-12, 1e12)
}

trait ToF64Lossy {
    fn to_f64_lossy(&self) -> f64;
}

impl ToF64Lossy for ethereum_types::U256 {
    fn to_f64_lossy(&self) -> f64 {
        let mut acc = 0f64;
        for limb in self.0.iter().rev() {
            acc = acc * (u64::MAX as f64 + 1.0) + *limb as f64;
        }
        acc
    }
}

/// `m = (0.5 + f) * (1 + (len(symbol) mod 5) * 0.05)`, `f = hi32(SHA-256(addr|SYMBOL|NAME)) / 2^32`.
fn mix_factor(addr: Address, symbol: &str, name: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(addr.as_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hi32 = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let f = hi32 as f64 / (u32::MAX as f64 + 1.0);
    let symbol_mod = (symbol.len() % 5) as f64;
    (0.5 + f) * (1.0 + symbol_mod * 0.05)
}

pub struct PriceOracle {
    unit_value_cache: RwLock<HashMap<Address, f64>>,
    pair_state: RwLock<HashMap<(Address, Address), PairPriceState>>,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self {
            unit_value_cache: RwLock::new(HashMap::new()),
            pair_state: RwLock::new(HashMap::new()),
        }
    }

    fn unit_value_of(&self, addr: Address, meta: &TokenMetadata) -> f64 {
        if let Some(v) = self.unit_value_cache.read().unwrap().get(&addr) {
            return *v;
        }
        let v = unit_value(addr, meta);
        self.unit_value_cache.write().unwrap().insert(addr, v);
        v
    }

    /// Baseline pair price, forward-oriented `a -> b`, bootstrapped once
    /// from unit values and cached in the pair state on first reference.
    fn baseline_forward(&self, a: Address, b: Address, meta_a: &TokenMetadata, meta_b: &TokenMetadata) -> f64 {
        self.unit_value_of(a, meta_a) / self.unit_value_of(b, meta_b)
    }

    /// Pure estimate with default (unknown) token metadata; used by the
    /// canonicalizer when no token directory entry is available. Real
    /// callers with a token directory should use `describe_pair`.
    pub fn estimate_pair_price(&self, base: Address, quote: Address) -> f64 {
        self.describe_pair(base, quote, &TokenMetadata::default(), &TokenMetadata::default())
            .0
    }

    /// Oriented price lookup: `price` for the canonical (sorted-address)
    /// forward direction, `1/price` for the inverse. Returns `(price, source)`.
    pub fn describe_pair(
        &self,
        base: Address,
        quote: Address,
        base_meta: &TokenMetadata,
        quote_meta: &TokenMetadata,
    ) -> (f64, &'static str) {
        if base == quote {
            return (1.0, "identity");
        }
        let (a, b) = crate::types::sorted_pair_key(base, quote);
        let forward = base == a;

        {
            let states = self.pair_state.read().unwrap();
            if let Some(state) = states.get(&(a, b)) {
                let oriented = if forward { state.price } else { 1.0 / state.price };
                return (oriented, "dynamic");
            }
        }

        let (meta_a, meta_b) = if forward {
            (base_meta, quote_meta)
        } else {
            (quote_meta, base_meta)
        };
        let baseline = self.baseline_forward(a, b, meta_a, meta_b);
        let oriented = if forward { baseline } else { 1.0 / baseline };
        (oriented, "baseline")
    }

    /// Register a trade and nudge the pair's dynamic price toward it.
    pub fn register_trade(
        &self,
        base: Address,
        quote: Address,
        price: f64,
        base_amount: Option<f64>,
        quote_amount: Option<f64>,
        side: Option<Side>,
        base_meta: &TokenMetadata,
        quote_meta: &TokenMetadata,
    ) {
        if base == quote || price <= 0.0 {
            return;
        }
        let (a, b) = crate::types::sorted_pair_key(base, quote);
        let forward = base == a;
        let forward_price = if forward { price } else { 1.0 / price };

        let volume = quote_amount
            .filter(|v| *v > 0.0)
            .unwrap_or_else(|| base_amount.unwrap_or(0.0) * price);

        let mut states = self.pair_state.write().unwrap();
        let entry = states.entry((a, b)).or_insert_with(|| {
            let (meta_a, meta_b) = if forward {
                (base_meta, quote_meta)
            } else {
                (quote_meta, base_meta)
            };
            let baseline = self.baseline_forward(a, b, meta_a, meta_b);
            PairPriceState {
                price: baseline,
                baseline_price: baseline,
                liquidity_score: 0.0,
                last_updated_at: Utc::now(),
                last_source: MarketPriceSource::Orderbook,
                last_side: None,
            }
        });

        let weight = if volume <= 0.0 {
            0.05
        } else {
            clamp(volume / (entry.liquidity_score + volume), 0.05, 0.85)
        };

        entry.price += (forward_price - entry.price) * weight;

        if let Some(side) = side {
            let dir = match (forward, side) {
                (true, Side::Buy) => 1.0,
                (false, Side::Sell) => 1.0,
                _ => -1.0,
            };
            entry.price = clamp(entry.price * (1.0 + dir * (weight * 0.1).min(0.25)), 1e-12, 1e12);
        }

        entry.liquidity_score = 0.85 * entry.liquidity_score + volume;
        entry.last_updated_at = Utc::now();
        entry.last_side = side;
    }

    pub fn clear_cache(&self) {
        self.unit_value_cache.write().unwrap().clear();
        self.pair_state.write().unwrap().clear();
    }
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(symbol: &str) -> TokenMetadata {
        TokenMetadata {
            name: format!("{symbol} Token"),
            symbol: symbol.to_string(),
            decimals: 18,
            total_supply: None,
            issuer: None,
        }
    }

    #[test]
    fn identity_pair_is_one() {
        let oracle = PriceOracle::new();
        let addr = Address::repeat_byte(1);
        let (price, _) = oracle.describe_pair(addr, addr, &meta("AAA"), &meta("AAA"));
        assert_eq!(price, 1.0);
    }

    #[test]
    fn inverse_pair_multiplies_to_one() {
        let oracle = PriceOracle::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let (ab, _) = oracle.describe_pair(a, b, &meta("AAA"), &meta("BBB"));
        let (ba, _) = oracle.describe_pair(b, a, &meta("BBB"), &meta("AAA"));
        assert!((ab * ba - 1.0).abs() < 1e-9);
    }
}
