// Off-chain order-management core for an ERC-20 decentralized exchange.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use dex_orderbook_core::batch::DEFAULT_TOLERANCE;
use dex_orderbook_core::config::Config;
use dex_orderbook_core::matching::MatchingEngine;
use dex_orderbook_core::onchain::MockOnchainCollaborator;
use dex_orderbook_core::oracle::PriceOracle;
use dex_orderbook_core::order_service::OrderService;
use dex_orderbook_core::token_directory::InMemoryTokenDirectory;
use dex_orderbook_core::typed_data::Domain;
use dex_orderbook_core::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    info!("starting dex-orderbook-core, batch tolerance default {}", DEFAULT_TOLERANCE);

    let oracle = Arc::new(PriceOracle::new());
    let engine = Arc::new(MatchingEngine::new(oracle.clone()));
    let onchain = Arc::new(MockOnchainCollaborator::new());
    let tokens = Arc::new(InMemoryTokenDirectory::new());

    let domain = Domain {
        name: config.domain_name.clone(),
        version: config.domain_version.clone(),
        chain_id: config.chain_id,
        verifying_contract: config.verifying_contract(),
    };

    let order_service = Arc::new(OrderService::new(engine, oracle, onchain, tokens, domain));
    let (ws_tx, _ws_rx) = tokio::sync::broadcast::channel(1000);

    let state = AppState { order_service, ws_broadcaster: ws_tx };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
