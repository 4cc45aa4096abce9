// Integration tests for the matching engine's literal scenarios and
// cross-component invariants.

use std::sync::Arc;

use dex_orderbook_core::canonicalizer::OrderDraft;
use dex_orderbook_core::eth::address_from_verifying_key;
use dex_orderbook_core::matching::MatchingEngine;
use dex_orderbook_core::onchain::MockOnchainCollaborator;
use dex_orderbook_core::oracle::PriceOracle;
use dex_orderbook_core::order_service::{CreateOrderRequest, OrderService};
use dex_orderbook_core::token_directory::InMemoryTokenDirectory;
use dex_orderbook_core::types::{OrderRecord, OrderStatus, OrderType, Side, TimeInForce, TokenMetadata};
use dex_orderbook_core::typed_data::{self, Domain};
use ethereum_types::Address;
use k256::ecdsa::{RecoveryId, SigningKey};

fn token(seed: u8) -> Address {
    Address::repeat_byte(seed)
}

fn domain() -> Domain {
    Domain { name: "DEX".into(), version: "1".into(), chain_id: 31337, verifying_contract: Address::repeat_byte(0xaa) }
}

/// Deterministic maker key for a given test seed; the address is derived
/// from the key so every submitted order carries a signature that
/// actually recovers to its own `maker` field.
fn maker(seed: u8) -> (SigningKey, Address) {
    let sk_bytes = [seed; 32];
    let signing_key = SigningKey::from_bytes((&sk_bytes).into()).unwrap();
    let address = address_from_verifying_key(signing_key.verifying_key());
    (signing_key, address)
}

async fn make_service() -> (Arc<OrderService>, Address, Address) {
    let oracle = Arc::new(PriceOracle::new());
    let engine = Arc::new(MatchingEngine::new(oracle.clone()));
    let onchain = Arc::new(MockOnchainCollaborator::new());
    let tokens = Arc::new(InMemoryTokenDirectory::new());

    let base = token(0x01);
    let quote = token(0x02);
    tokens.register(base, TokenMetadata { name: "Token Yield".into(), symbol: "TYD".into(), decimals: 18, total_supply: None, issuer: None });
    tokens.register(quote, TokenMetadata { name: "US Test Dollar".into(), symbol: "USTD".into(), decimals: 18, total_supply: None, issuer: None });

    let service = Arc::new(OrderService::new(engine, oracle, onchain, tokens, domain()));
    (service, base, quote)
}

#[allow(clippy::too_many_arguments)]
fn draft(maker: Address, base: Address, quote: Address, side: Side, order_type: OrderType, amount: f64, price: Option<f64>, stop_price: Option<f64>) -> OrderDraft {
    OrderDraft {
        maker,
        base_token: base,
        quote_token: quote,
        side,
        order_type,
        time_in_force: TimeInForce::Gtc,
        amount,
        price,
        market_price: None,
        stop_price,
        min_fill_amount: None,
        allow_partial_fill: true,
        expiry: None,
        nonce: None,
        fee_recipient: None,
        fee_amount: None,
    }
}

/// Canonicalizes `d` through `prepare`, signs the resulting digest with
/// `sk`, then submits it through the signature-checked `create` path.
async fn submit(service: &OrderService, sk: &SigningKey, d: OrderDraft) -> OrderRecord {
    let prepared = service.prepare(&d).await.expect("order should canonicalize");
    let (sig, recid): (k256::ecdsa::Signature, RecoveryId) =
        sk.sign_prehash_recoverable(&prepared.hash).expect("signing should succeed");
    let mut signature = [0u8; 65];
    signature[..64].copy_from_slice(&sig.to_bytes());
    signature[64] = 27 + recid.to_byte();

    service
        .create(CreateOrderRequest { draft: d, signature: signature.to_vec(), client_order_id: None })
        .await
        .expect("order should be accepted")
}

#[tokio::test]
async fn buy_stop_triggers_when_added_above_current_price() {
    let (service, base, quote) = make_service().await;
    service.update_market_price(base, quote, 6.007).await;

    let (sk, maker_addr) = maker(0x10);
    let order = draft(maker_addr, base, quote, Side::Buy, OrderType::StopLoss, 1.0, Some(6.0), Some(6.0));
    let record = submit(&service, &sk, order).await;

    assert!(record.triggered_at.is_some(), "stop should have triggered immediately on submission");

    let book = service.order_book(base, quote).await;
    assert!(!book.stop_loss.iter().any(|r| r.id == record.id));
}

#[tokio::test]
async fn opposite_stop_does_not_cascade_on_synthetic_fill() {
    let (service, base, quote) = make_service().await;
    service.update_market_price(base, quote, 5.65).await;

    let (buy_sk, buy_addr) = maker(0x11);
    let buy_stop = draft(buy_addr, base, quote, Side::Buy, OrderType::StopLoss, 1.0, Some(6.0), Some(6.0));
    let buy_record = submit(&service, &buy_sk, buy_stop).await;
    assert!(buy_record.triggered_at.is_none(), "buy stop should remain queued below its trigger price");

    // The sell stop's own trigger (current price <= stop price) is already
    // satisfied at the prevailing 5.65 price, so it fires on submission.
    // Its trigger routes through the market path alone and must not also
    // flip the untouched buy stop into a triggered state.
    let (sell_sk, sell_addr) = maker(0x12);
    let sell_stop = draft(sell_addr, base, quote, Side::Sell, OrderType::StopLoss, 1.0, Some(6.0), Some(6.0));
    let sell_record = submit(&service, &sell_sk, sell_stop).await;
    assert!(sell_record.triggered_at.is_some(), "sell stop should trigger immediately at the prevailing price");

    let book = service.order_book(base, quote).await;
    let buy_still_queued = book.stop_loss.iter().any(|r| r.id == buy_record.id);
    assert!(buy_still_queued, "buy stop should still be queued, untouched by the sell stop's trigger");
}

#[tokio::test]
async fn market_order_rests_then_matches_against_incoming_limit() {
    let (service, base, quote) = make_service().await;

    let (buy_sk, buy_addr) = maker(0x21);
    let buy_market = draft(buy_addr, base, quote, Side::Buy, OrderType::Market, 5.0, Some(100.0), None);
    let buy_record = submit(&service, &buy_sk, buy_market).await;
    assert_eq!(buy_record.status, OrderStatus::Pending);

    let (sell_sk, sell_addr) = maker(0x22);
    let sell_limit = draft(sell_addr, base, quote, Side::Sell, OrderType::Limit, 5.0, Some(100.0), None);
    let sell_record = submit(&service, &sell_sk, sell_limit).await;

    let buy_after = service.get(buy_record.id).await.unwrap();
    assert_eq!(buy_after.status, OrderStatus::Filled);
    assert_eq!(sell_record.status, OrderStatus::Filled);

    let book = service.order_book(base, quote).await;
    assert!(book.market_buy.is_empty());
    assert!(book.sell.is_empty());
}

#[tokio::test]
async fn market_buy_impact_boosts_price_after_fill() {
    let (service, base, quote) = make_service().await;
    service.update_market_price(base, quote, 100.0).await;

    let (sell_sk, sell_addr) = maker(0x31);
    let sell_limit = draft(sell_addr, base, quote, Side::Sell, OrderType::Limit, 4.0, Some(100.0), None);
    submit(&service, &sell_sk, sell_limit).await;

    let (buy_sk, buy_addr) = maker(0x32);
    let buy_market = draft(buy_addr, base, quote, Side::Buy, OrderType::Market, 2.0, None, None);
    let buy_record = submit(&service, &buy_sk, buy_market).await;
    assert!(buy_record.filled > 0.0, "market buy should have matched the resting limit");

    let entry = service.market_price_entry(base, quote).await.expect("market price should be set");
    assert_eq!(entry.previous_price, Some(100.0));
    assert_eq!(entry.price, 102.0);
}

#[tokio::test]
async fn stop_pair_cross_matches_on_trigger() {
    let (service, base, quote) = make_service().await;

    let (buy_sk, buy_addr) = maker(0x41);
    let buy_stop = draft(buy_addr, base, quote, Side::Buy, OrderType::StopLoss, 2.0, Some(6.0), Some(6.0));
    let buy_record = submit(&service, &buy_sk, buy_stop).await;

    let (sell_sk, sell_addr) = maker(0x42);
    let sell_stop = draft(sell_addr, base, quote, Side::Sell, OrderType::StopLoss, 2.0, Some(6.0), Some(6.0));
    let sell_record = submit(&service, &sell_sk, sell_stop).await;

    service.update_market_price(base, quote, 6.0).await;

    let buy_after = service.get(buy_record.id).await.unwrap();
    let sell_after = service.get(sell_record.id).await.unwrap();
    assert_eq!(buy_after.status, OrderStatus::Filled);
    assert_eq!(sell_after.status, OrderStatus::Filled);
}

#[tokio::test]
async fn eip712_digest_is_stable_across_calls() {
    let (service, base, quote) = make_service().await;
    let (_, maker_addr) = maker(0x51);
    let d = draft(maker_addr, base, quote, Side::Sell, OrderType::Limit, 1.0, Some(1.0), None);
    let prepared_a = service.prepare(&d).await.unwrap();
    let prepared_b = service.prepare(&d).await.unwrap();
    assert_eq!(prepared_a.hash, prepared_b.hash);

    let direct = typed_data::hash(&domain(), &prepared_a.order);
    assert_eq!(direct, prepared_a.hash);
}

#[tokio::test]
async fn update_market_price_inverts_exactly() {
    let (service, base, quote) = make_service().await;
    service.update_market_price(base, quote, 4.0).await;

    let forward = service.market_price(base, quote).await;
    let inverse = service.market_price(quote, base).await;
    assert_eq!(forward, Some(4.0));
    assert_eq!(inverse, Some(0.25));
}

#[tokio::test]
async fn oracle_describe_pair_identity_and_reciprocal() {
    let oracle = PriceOracle::new();
    let a = Address::repeat_byte(0x61);
    let b = Address::repeat_byte(0x62);
    let meta_a = TokenMetadata { name: "A Token".into(), symbol: "AAA".into(), decimals: 18, total_supply: None, issuer: None };
    let meta_b = TokenMetadata { name: "B Token".into(), symbol: "BBB".into(), decimals: 18, total_supply: None, issuer: None };

    let (identity, _) = oracle.describe_pair(a, a, &meta_a, &meta_a);
    assert_eq!(identity, 1.0);

    let (ab, _) = oracle.describe_pair(a, b, &meta_a, &meta_b);
    let (ba, _) = oracle.describe_pair(b, a, &meta_b, &meta_a);
    assert!((ab * ba - 1.0).abs() < 1e-9);
}
