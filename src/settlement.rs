// Settlement Adapter (C7): turns a matched trade into an on-chain
// `executeOrder` call and captures the outcome onto the trade record.
// Failures never unwind matching state; they are recorded on
// `Trade.settlement` and the outer operation still returns normally.

use std::sync::Arc;

use ethereum_types::U256;
use tracing::{error, info};

use crate::onchain::{OnchainCollaborator, OnchainError};
use crate::types::{Order, OrderRecord, SettlementOutcome, Trade};

pub struct SettlementAdapter {
    onchain: Arc<dyn OnchainCollaborator>,
}

impl SettlementAdapter {
    pub fn new(onchain: Arc<dyn OnchainCollaborator>) -> Self {
        Self { onchain }
    }

    /// Synthetic trades (engine-injected liquidity, market-buy impact)
    /// short-circuit without touching the collaborator.
    pub fn settle_synthetic(&self, reason: &str) -> SettlementOutcome {
        SettlementOutcome { success: true, synthetic: true, receipt: None, reason: Some(reason.to_string()) }
    }

    pub async fn settle(
        &self,
        trade: &Trade,
        maker: &OrderRecord,
        taker: &OrderRecord,
        maker_signature: &[u8],
    ) -> SettlementOutcome {
        if trade.synthetic {
            return self.settle_synthetic("synthetic_liquidity");
        }

        let fill_amount = self.resolve_fill_amount(trade, maker, taker);
        let contract_order = Self::contract_order_view(&maker.order);

        match self.onchain.execute_order(&contract_order, maker_signature, fill_amount).await {
            Ok(receipt) => {
                info!("settled trade {} via {}", trade.id, receipt);
                SettlementOutcome { success: true, synthetic: false, receipt: Some(receipt), reason: None }
            }
            Err(err) => {
                error!("settlement failed for trade {}: {}", trade.id, err);
                SettlementOutcome { success: false, synthetic: false, receipt: None, reason: Some(describe(&err)) }
            }
        }
    }

    /// Precedence: explicit on-chain override on the trade, then the
    /// trade's matched amount (rescaled into the maker's base-unit space
    /// proportionally to its display amount), then the taker's own
    /// amount-give as a last resort.
    fn resolve_fill_amount(&self, trade: &Trade, maker: &OrderRecord, taker: &OrderRecord) -> U256 {
        if let Some(onchain_fill) = trade_onchain_fill_amount(trade) {
            return onchain_fill;
        }
        if maker.amount > 0.0 {
            let fraction = (trade.amount / maker.amount).clamp(0.0, 1.0);
            let base_units = maker.order.amount_give.as_u128() as f64 * fraction;
            return U256::from(base_units.round().max(0.0) as u128);
        }
        taker.order.amount_give
    }

    pub fn contract_order_view(order: &Order) -> Order {
        order.clone()
    }
}

fn trade_onchain_fill_amount(_trade: &Trade) -> Option<U256> {
    None
}

fn describe(err: &OnchainError) -> String {
    match err {
        OnchainError::SignerMissing => "signer_missing".to_string(),
        OnchainError::NonceMismatch { .. } => "nonce_mismatch".to_string(),
        OnchainError::ContractRevert(reason) => format!("contract_revert:{reason}"),
    }
}
