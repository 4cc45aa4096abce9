// Runtime configuration, loaded from a `.env` file (if present) and
// overridden by CLI flags/environment variables via `clap`'s `env` feature.

use clap::Parser;
use ethereum_types::Address;

#[derive(Debug, Clone, Parser)]
#[command(name = "dex-orderbook-core", about = "Off-chain order-management core for an ERC-20 DEX")]
pub struct Config {
    /// Address/port the HTTP API binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// EIP-712 domain name.
    #[arg(long, env = "DOMAIN_NAME", default_value = "DEX")]
    pub domain_name: String,

    /// EIP-712 domain version.
    #[arg(long, env = "DOMAIN_VERSION", default_value = "1")]
    pub domain_version: String,

    /// Chain id included in the EIP-712 domain separator.
    #[arg(long, env = "CHAIN_ID", default_value_t = 31337)]
    pub chain_id: u64,

    /// Verifying contract address included in the EIP-712 domain.
    #[arg(long, env = "VERIFYING_CONTRACT")]
    pub verifying_contract: Option<Address>,

    /// Default tolerance for batch rate-product validation.
    #[arg(long, env = "BATCH_TOLERANCE", default_value_t = crate::batch::DEFAULT_TOLERANCE)]
    pub batch_tolerance: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Config::parse())
    }

    pub fn verifying_contract(&self) -> Address {
        self.verifying_contract.unwrap_or_else(Address::zero)
    }
}
