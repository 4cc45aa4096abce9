// Token directory (consumed): resolves display metadata for an ERC-20
// address. Decimals default to 18 when the directory has no entry.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ethereum_types::Address;

use crate::types::TokenMetadata;

#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn get_metadata(&self, token: Address) -> TokenMetadata;
}

pub struct InMemoryTokenDirectory {
    entries: RwLock<HashMap<Address, TokenMetadata>>,
}

impl InMemoryTokenDirectory {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, token: Address, metadata: TokenMetadata) {
        self.entries.write().unwrap().insert(token, metadata);
    }
}

impl Default for InMemoryTokenDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenDirectory for InMemoryTokenDirectory {
    async fn get_metadata(&self, token: Address) -> TokenMetadata {
        self.entries
            .read()
            .unwrap()
            .get(&token)
            .cloned()
            .unwrap_or_default()
    }
}
