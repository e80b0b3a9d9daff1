//! JSON-RPC client for the funding contract on an EVM node.
//!
//! ## Resilience
//!
//! * Transport errors, HTTP 429 and soft JSON-RPC errors are retried with
//!   exponential back-off, at most [`MAX_ATTEMPTS`] times.
//! * Reverts are never retried; they surface as [`GatewayError::Reverted`].
//!
//! Writes go through `eth_sendTransaction`, so signing is left to the node or
//! the wallet behind it.

use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ChainClient, ContractCall, TxHash};
use crate::abi::{self, IStartupFunding as C};
use crate::errors::{GatewayError, Result};

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 8;
const MAX_ATTEMPTS: u32 = 3;

/// Error code geth and most EVM nodes use for execution reverts.
const REVERT_CODE: i64 = 3;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    fn is_revert(&self) -> bool {
        self.code == REVERT_CODE || self.message.to_lowercase().contains("revert")
    }

    fn is_hard(&self) -> bool {
        // Invalid request / method not found / invalid params
        matches!(self.code, -32600 | -32601 | -32602)
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RpcChainClient {
    client: Client,
    rpc_url: String,
    contract: Address,
    chain_id: u64,
}

impl RpcChainClient {
    pub fn new(client: Client, rpc_url: impl Into<String>, contract: Address, chain_id: u64) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            contract,
            chain_id,
        }
    }

    /// Send one JSON-RPC request and return its `result`.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": method,
                    "params": params,
                }))
                .send()
                .await;

            let retry_reason = match response {
                Err(e) => format!("request failed: {e}"),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    "rate-limited".to_string()
                }
                Ok(resp) => {
                    let body: RpcResponse = resp.json().await?;
                    match body.error {
                        Some(err) if err.is_revert() => {
                            return Err(GatewayError::Reverted(revert_message(&err)));
                        }
                        Some(err) if err.is_hard() => {
                            return Err(GatewayError::Rpc(format!(
                                "{method} hard error {}: {}",
                                err.code, err.message
                            )));
                        }
                        Some(err) => format!("soft error {} {}", err.code, err.message),
                        None => {
                            debug!("{method} ok");
                            return Ok(body.result.unwrap_or(Value::Null));
                        }
                    }
                }
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(GatewayError::Rpc(format!(
                    "{method} failed after {attempt} attempts: {retry_reason}"
                )));
            }
            warn!("RPC {method} {retry_reason} (will retry in {backoff}s)");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
        }
    }

    /// `eth_call` against the contract, returning raw return data.
    async fn eth_call(&self, from: Option<Address>, data: Vec<u8>, value: U256) -> Result<Vec<u8>> {
        let mut tx = json!({
            "to": self.contract,
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(from) = from {
            tx["from"] = json!(from);
        }
        if !value.is_zero() {
            tx["value"] = json!(format!("0x{value:x}"));
        }
        let result = self.request("eth_call", json!([tx, "latest"])).await?;
        decode_hex_bytes(&result)
    }

    async fn call<T: SolCall>(&self, call: T) -> Result<T::Return> {
        let data = self.eth_call(None, call.abi_encode(), U256::ZERO).await?;
        Ok(T::abi_decode_returns(&data, true)?)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> Result<u64> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&result)
    }

    async fn block_number(&self) -> Result<u64> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    async fn get_startups(&self) -> Result<Vec<abi::Startup>> {
        Ok(self.call(C::getStartupsCall {}).await?._0)
    }

    async fn get_loan_requests(&self) -> Result<Vec<abi::LoanRequest>> {
        Ok(self.call(C::getLoanRequestsCall {}).await?._0)
    }

    async fn get_startup_documents(&self, id: U256) -> Result<Vec<abi::DocumentHash>> {
        Ok(self.call(C::getStartupDocumentsCall { _id: id }).await?._0)
    }

    async fn get_loan_documents(&self, id: U256) -> Result<Vec<abi::DocumentHash>> {
        Ok(self.call(C::getLoanDocumentsCall { _id: id }).await?._0)
    }

    async fn get_startup_milestones(&self, id: U256) -> Result<Vec<abi::Milestone>> {
        Ok(self.call(C::getStartupMilestonesCall { _id: id }).await?._0)
    }

    async fn get_investor_tokens(&self, investor: Address, startup_id: U256) -> Result<Vec<U256>> {
        let call = C::getInvestorTokensCall {
            _investor: investor,
            _startupId: startup_id,
        };
        Ok(self.call(call).await?._0)
    }

    async fn token_uri(&self, token_id: U256) -> Result<String> {
        Ok(self.call(C::tokenURICall { tokenId: token_id }).await?._0)
    }

    async fn get_investment_amount(&self, investor: Address, startup_id: U256) -> Result<U256> {
        let call = C::getInvestmentAmountCall {
            _investor: investor,
            _startupId: startup_id,
        };
        Ok(self.call(call).await?._0)
    }

    async fn has_investment_in(&self, investor: Address, startup_id: U256) -> Result<bool> {
        let call = C::hasInvestmentInCall {
            _investor: investor,
            _startupId: startup_id,
        };
        Ok(self.call(call).await?._0)
    }

    async fn verifier(&self) -> Result<Address> {
        Ok(self.call(C::verifierCall {}).await?._0)
    }

    async fn simulate(&self, from: Address, call: &ContractCall) -> Result<Option<u64>> {
        let data = self
            .eth_call(Some(from), call.calldata(), call.value())
            .await?;
        call.decode_created_id(&data)
    }

    async fn send(&self, from: Address, call: ContractCall) -> Result<TxHash> {
        let tx = json!({
            "from": from,
            "to": self.contract,
            "data": format!("0x{}", hex::encode(call.calldata())),
            "value": format!("0x{:x}", call.value()),
            "chainId": format!("0x{:x}", self.chain_id),
        });
        let result = self.request("eth_sendTransaction", json!([tx])).await?;
        let hash = parse_tx_hash(&result)?;
        debug!("{} submitted as {hash}", call.method());
        Ok(hash)
    }

    async fn transaction_status(&self, tx: TxHash) -> Result<Option<bool>> {
        let result = self
            .request("eth_getTransactionReceipt", json!([tx]))
            .await?;
        parse_receipt_status(&result)
    }
}

// ─────────────────────────────────────────────────────────
// Hex helpers
// ─────────────────────────────────────────────────────────

fn revert_message(err: &RpcError) -> String {
    match err.data.as_ref().and_then(Value::as_str) {
        Some(data) => format!("{} ({data})", err.message),
        None => err.message.clone(),
    }
}

fn decode_hex_bytes(value: &Value) -> Result<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Rpc(format!("expected hex string, got {value}")))?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| GatewayError::Rpc(format!("invalid hex data: {e}")))
}

/// Parse a JSON-RPC quantity such as `"0xa869"`.
fn parse_quantity(value: &Value) -> Result<u64> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Rpc(format!("expected quantity, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::Rpc(format!("invalid quantity {s}: {e}")))
}

fn parse_tx_hash(value: &Value) -> Result<TxHash> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Rpc(format!("expected transaction hash, got {value}")))?;
    s.parse::<B256>()
        .map_err(|e| GatewayError::Rpc(format!("invalid transaction hash {s}: {e}")))
}

/// `null` receipt means the transaction is still pending.
fn parse_receipt_status(value: &Value) -> Result<Option<bool>> {
    if value.is_null() {
        return Ok(None);
    }
    match value.get("status").and_then(Value::as_str) {
        Some("0x1") => Ok(Some(true)),
        Some("0x0") => Ok(Some(false)),
        other => Err(GatewayError::Rpc(format!(
            "unexpected receipt status {other:?}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quantity_hex() {
        assert_eq!(parse_quantity(&json!("0xa869")).unwrap(), 43113);
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn decode_call_result() {
        assert_eq!(decode_hex_bytes(&json!("0x0102")).unwrap(), vec![1, 2]);
        assert_eq!(decode_hex_bytes(&json!("0x")).unwrap(), Vec::<u8>::new());
        assert!(decode_hex_bytes(&Value::Null).is_err());
    }

    #[test]
    fn receipt_status() {
        assert_eq!(parse_receipt_status(&Value::Null).unwrap(), None);
        assert_eq!(
            parse_receipt_status(&json!({ "status": "0x1" })).unwrap(),
            Some(true)
        );
        assert_eq!(
            parse_receipt_status(&json!({ "status": "0x0" })).unwrap(),
            Some(false)
        );
        assert!(parse_receipt_status(&json!({})).is_err());
    }

    #[test]
    fn tx_hash_parses() {
        let raw = format!("0x{}", "ab".repeat(32));
        let hash = parse_tx_hash(&json!(raw)).unwrap();
        assert_eq!(hash.0, [0xab; 32]);
        assert!(parse_tx_hash(&json!("0x12")).is_err());
    }

    #[test]
    fn revert_detection() {
        let by_code = RpcError {
            code: 3,
            message: "execution reverted: Deadline passed".into(),
            data: Some(json!("0x08c379a0")),
        };
        assert!(by_code.is_revert());
        assert_eq!(
            revert_message(&by_code),
            "execution reverted: Deadline passed (0x08c379a0)"
        );

        let by_message = RpcError {
            code: -32000,
            message: "Transaction reverted without a reason".into(),
            data: None,
        };
        assert!(by_message.is_revert());

        let hard = RpcError {
            code: -32601,
            message: "method not found".into(),
            data: None,
        };
        assert!(!hard.is_revert());
        assert!(hard.is_hard());
    }
}
