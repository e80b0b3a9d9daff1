//! Application configuration loaded from environment variables.

use std::str::FromStr;

use alloy_primitives::Address;

use crate::errors::{GatewayError, Result};

/// Which contract backend the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSource {
    /// JSON-RPC against a deployed contract.
    Live,
    /// In-process simulated contract, for local development.
    Mock,
}

impl FromStr for ChainSource {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "mock" => Ok(Self::Mock),
            other => Err(GatewayError::Config(format!(
                "Invalid CHAIN_SOURCE '{other}' (expected live or mock)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chain_source: ChainSource,
    /// EVM JSON-RPC endpoint (e.g. https://api.avax-test.network/ext/bc/C/rpc)
    pub rpc_url: String,
    /// Expected chain id (43113 = Avalanche Fuji)
    pub chain_id: u64,
    /// Deployed funding contract. Required for the live source.
    pub contract_address: Option<Address>,
    /// Account used to sign writes through `eth_sendTransaction`.
    pub account: Option<Address>,
    /// Bearer token for the pinning service
    pub pinata_jwt: Option<String>,
    pub pinata_api_url: String,
    /// Gateway used to build public document URLs
    pub ipfs_gateway_url: String,
    /// Gateway used to read `ipfs://` token metadata
    pub ipfs_read_gateway_url: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the activity feed polls for new blocks
    pub poll_interval_secs: u64,
    /// Pause between a write and the re-read that follows it
    pub settle_delay_ms: u64,
    /// Upper bound on the campaign detail join
    pub detail_timeout_secs: u64,
    /// Poll for receipts instead of sleeping `settle_delay_ms`
    pub await_receipts: bool,
    pub receipt_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let chain_source: ChainSource = env_var("CHAIN_SOURCE")
            .unwrap_or_else(|_| "live".to_string())
            .parse()?;

        let contract_address = match env_var("CONTRACT_ADDRESS") {
            Ok(raw) => Some(parse_address("CONTRACT_ADDRESS", &raw)?),
            Err(_) if chain_source == ChainSource::Mock => None,
            Err(_) => {
                return Err(GatewayError::Config(
                    "CONTRACT_ADDRESS environment variable is required".to_string(),
                ))
            }
        };

        let account = match env_var("ACCOUNT_ADDRESS") {
            Ok(raw) => Some(parse_address("ACCOUNT_ADDRESS", &raw)?),
            Err(_) => None,
        };

        Ok(Config {
            chain_source,
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://api.avax-test.network/ext/bc/C/rpc".to_string()),
            chain_id: parse_or("CHAIN_ID", "43113")?,
            contract_address,
            account,
            pinata_jwt: env_var("PINATA_JWT").ok().filter(|s| !s.is_empty()),
            pinata_api_url: env_var("PINATA_API_URL")
                .unwrap_or_else(|_| "https://api.pinata.cloud".to_string()),
            ipfs_gateway_url: env_var("IPFS_GATEWAY_URL")
                .unwrap_or_else(|_| "https://gateway.pinata.cloud/ipfs/".to_string()),
            ipfs_read_gateway_url: env_var("IPFS_READ_GATEWAY_URL")
                .unwrap_or_else(|_| "https://ipfs.io/ipfs/".to_string()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./funding_activity.db".to_string()),
            api_port: parse_or("API_PORT", "3001")?,
            poll_interval_secs: parse_or("POLL_INTERVAL_SECS", "5")?,
            settle_delay_ms: parse_or("SETTLE_DELAY_MS", "2000")?,
            detail_timeout_secs: parse_or("DETAIL_TIMEOUT_SECS", "30")?,
            await_receipts: parse_or("AWAIT_RECEIPTS", "false")?,
            receipt_timeout_secs: parse_or("RECEIPT_TIMEOUT_SECS", "60")?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| GatewayError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| GatewayError::Config(format!("Invalid {key}")))
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .map_err(|_| GatewayError::Config(format!("Invalid {key}: {raw}")))
}
