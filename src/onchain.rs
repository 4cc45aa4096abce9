// On-chain collaborator (C7 dependency, consumed not implemented here):
// the contract surface the settlement adapter calls into. A mock
// implementation backs local development and tests; a production
// deployment would supply one backed by an actual JSON-RPC client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use ethereum_types::{Address, U256};
use thiserror::Error;

use crate::types::Order;

#[derive(Debug, Error)]
pub enum OnchainError {
    #[error("signer not configured")]
    SignerMissing,
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: U256, got: U256 },
    #[error("contract reverted: {0}")]
    ContractRevert(String),
}

#[async_trait]
pub trait OnchainCollaborator: Send + Sync {
    async fn get_nonce(&self, maker: Address) -> Result<U256, OnchainError>;
    async fn execute_order(&self, order: &Order, signature: &[u8], fill_amount: U256) -> Result<String, OnchainError>;
    async fn execute_market_order(&self, order: &Order, signature: &[u8], max_slippage: U256) -> Result<String, OnchainError>;
    async fn cancel_order(&self, order: &Order) -> Result<String, OnchainError>;
    async fn cancel_orders(&self, orders: &[Order]) -> Result<String, OnchainError>;
    async fn increment_nonce(&self, maker: Address) -> Result<String, OnchainError>;
    async fn balance_of(&self, user: Address, token: Address) -> Result<U256, OnchainError>;
}

/// In-memory stand-in used when no real EVM RPC endpoint is configured.
/// Nonces increment monotonically per maker; balances default to a large
/// constant so the settlement path can be exercised end-to-end.
pub struct MockOnchainCollaborator {
    nonces: RwLock<HashMap<Address, U256>>,
    tx_counter: AtomicU64,
}

impl MockOnchainCollaborator {
    pub fn new() -> Self {
        Self { nonces: RwLock::new(HashMap::new()), tx_counter: AtomicU64::new(0) }
    }

    fn next_receipt(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        format!("0x{:064x}", n)
    }
}

impl Default for MockOnchainCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OnchainCollaborator for MockOnchainCollaborator {
    async fn get_nonce(&self, maker: Address) -> Result<U256, OnchainError> {
        Ok(*self.nonces.read().unwrap().get(&maker).unwrap_or(&U256::zero()))
    }

    async fn execute_order(&self, _order: &Order, signature: &[u8], _fill_amount: U256) -> Result<String, OnchainError> {
        if signature.is_empty() {
            return Err(OnchainError::SignerMissing);
        }
        Ok(self.next_receipt())
    }

    async fn execute_market_order(&self, _order: &Order, signature: &[u8], _max_slippage: U256) -> Result<String, OnchainError> {
        if signature.is_empty() {
            return Err(OnchainError::SignerMissing);
        }
        Ok(self.next_receipt())
    }

    async fn cancel_order(&self, _order: &Order) -> Result<String, OnchainError> {
        Ok(self.next_receipt())
    }

    async fn cancel_orders(&self, _orders: &[Order]) -> Result<String, OnchainError> {
        Ok(self.next_receipt())
    }

    async fn increment_nonce(&self, maker: Address) -> Result<String, OnchainError> {
        let mut nonces = self.nonces.write().unwrap();
        let entry = nonces.entry(maker).or_insert_with(U256::zero);
        *entry += U256::one();
        Ok(self.next_receipt())
    }

    async fn balance_of(&self, _user: Address, _token: Address) -> Result<U256, OnchainError> {
        Ok(U256::from(10u128.pow(24)))
    }
}
