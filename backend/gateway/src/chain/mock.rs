//! In-memory stand-in for the funding contract.
//!
//! Mirrors the contract's accounting closely enough for the aggregator and
//! session to be exercised end to end: every funding mints an investment
//! token with a base64 JSON token URI, withdrawals are owner-only, and
//! verification plus milestone completion are verifier-only.

use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ChainClient, ContractCall, TxHash};
use crate::abi;
use crate::errors::{GatewayError, Result};
use crate::metadata::{ATTR_EQUITY_PERCENTAGE, ATTR_INVESTMENT_AMOUNT, ATTR_INVESTMENT_DATE};
use crate::units::{funding_progress, repayment_due, to_display_amount};

const MILLIS_THRESHOLD: u64 = 100_000_000_000;

#[derive(Debug, Clone, Default)]
struct State {
    startups: Vec<abi::Startup>,
    loans: Vec<abi::LoanRequest>,
    loan_withdrawn: HashMap<usize, U256>,
    next_token_id: u64,
    token_uris: HashMap<U256, String>,
    investor_tokens: HashMap<(Address, U256), Vec<U256>>,
    investments: HashMap<(Address, U256), U256>,
    receipts: HashMap<TxHash, bool>,
    block: u64,
    nonce: u64,
    time_offset_secs: i64,
}

pub struct MockChain {
    state: RwLock<State>,
    verifier: Address,
    chain_id: u64,
}

impl MockChain {
    pub fn new(verifier: Address, chain_id: u64) -> Self {
        Self {
            state: RwLock::new(State {
                next_token_id: 1,
                ..State::default()
            }),
            verifier,
            chain_id,
        }
    }

    /// Replace a token's URI, e.g. to exercise other metadata encodings.
    #[cfg(test)]
    pub async fn set_token_uri(&self, token_id: U256, uri: impl Into<String>) {
        self.state.write().await.token_uris.insert(token_id, uri.into());
    }

    /// Move the contract clock forward.
    #[cfg(test)]
    pub async fn advance_time(&self, by: Duration) {
        self.state.write().await.time_offset_secs += by.num_seconds();
    }
}

fn clock(state: &State) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(state.time_offset_secs)
}

fn revert(reason: &str) -> GatewayError {
    GatewayError::Reverted(reason.to_string())
}

fn index(id: U256, len: usize) -> Result<usize> {
    let idx = usize::try_from(id.saturating_to::<u64>()).unwrap_or(usize::MAX);
    if id >= U256::from(len) || idx >= len {
        return Err(revert("Invalid id"));
    }
    Ok(idx)
}

/// Deadlines submitted in milliseconds are accepted as well as seconds.
fn deadline_secs(raw: U256) -> u64 {
    let value = raw.saturating_to::<u64>();
    if value > MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

fn token_uri_for(startup: &abi::Startup, amount: U256, now: DateTime<Utc>) -> String {
    let metadata = json!({
        "name": format!("Investment in {}", startup.title),
        "description": format!("Investment certificate for {}", startup.title),
        "image": startup.image,
        "attributes": [
            { "trait_type": ATTR_INVESTMENT_AMOUNT, "value": format!("{} AVAX", to_display_amount(amount)) },
            { "trait_type": ATTR_EQUITY_PERCENTAGE, "value": format!("{:.2}%", funding_progress(amount, startup.target)) },
            { "trait_type": ATTR_INVESTMENT_DATE, "value": now.timestamp() },
        ],
    });
    format!(
        "data:application/json;base64,{}",
        BASE64.encode(metadata.to_string())
    )
}

impl State {
    fn mint(&mut self, owner: Address, startup_id: U256, uri: String) -> U256 {
        let token_id = U256::from(self.next_token_id);
        self.next_token_id += 1;
        self.token_uris.insert(token_id, uri);
        self.investor_tokens
            .entry((owner, startup_id))
            .or_default()
            .push(token_id);
        token_id
    }

    /// Execute `call` from `from`. Returns the created id for creation calls.
    fn apply(&mut self, from: Address, verifier: Address, call: ContractCall) -> Result<Option<u64>> {
        let now = clock(self);
        let now_secs = U256::from(now.timestamp().max(0) as u64);

        match call {
            ContractCall::CreateStartup {
                owner,
                title,
                description,
                equity_holders,
                pitch_video,
                image,
                target,
                deadline,
            } => {
                if target.is_zero() {
                    return Err(revert("Target must be greater than zero"));
                }
                if deadline_secs(deadline) <= now.timestamp().max(0) as u64 {
                    return Err(revert("The deadline should be a date in the future"));
                }
                let id = self.startups.len() as u64;
                self.startups.push(abi::Startup {
                    owner,
                    title,
                    description,
                    equityHolders: equity_holders,
                    pitchVideo: pitch_video,
                    image,
                    target,
                    deadline,
                    amountCollected: U256::ZERO,
                    amountReleased: U256::ZERO,
                    funders: Vec::new(),
                    documentHashes: Vec::new(),
                    milestones: Vec::new(),
                    isVerified: false,
                });
                Ok(Some(id))
            }
            ContractCall::FundStartup { id, value } => {
                let idx = index(id, self.startups.len())?;
                if value.is_zero() {
                    return Err(revert("Investment must be greater than zero"));
                }
                let startup = &self.startups[idx];
                if deadline_secs(startup.deadline) <= now.timestamp().max(0) as u64 {
                    return Err(revert("Funding deadline has passed"));
                }
                let uri = token_uri_for(startup, value, now);
                let token_id = self.mint(from, id, uri);

                let startup = &mut self.startups[idx];
                startup.amountCollected += value;
                startup.funders.push(abi::Funder {
                    funderAddress: from,
                    amount: value,
                    tokenId: token_id,
                });
                *self.investments.entry((from, id)).or_default() += value;
                Ok(None)
            }
            ContractCall::WithdrawFunds { id } => {
                let idx = index(id, self.startups.len())?;
                let startup = &mut self.startups[idx];
                if startup.owner != from {
                    return Err(revert("Only the startup owner can withdraw"));
                }
                if startup.amountCollected <= startup.amountReleased {
                    return Err(revert("No funds available to withdraw"));
                }
                startup.amountReleased = startup.amountCollected;
                Ok(None)
            }
            ContractCall::VerifyStartup { id } => {
                let idx = index(id, self.startups.len())?;
                if from != verifier {
                    return Err(revert("Only the verifier can verify startups"));
                }
                self.startups[idx].isVerified = true;
                Ok(None)
            }
            ContractCall::AddStartupDocument {
                id,
                ipfs_hash,
                document_type,
            } => {
                let idx = index(id, self.startups.len())?;
                let startup = &mut self.startups[idx];
                if startup.owner != from {
                    return Err(revert("Only the startup owner can add documents"));
                }
                startup.documentHashes.push(abi::DocumentHash {
                    ipfsHash: ipfs_hash,
                    documentType: document_type,
                    timestamp: now_secs,
                });
                Ok(None)
            }
            ContractCall::AddStartupMilestone {
                id,
                title,
                description,
                fund_amount,
            } => {
                let idx = index(id, self.startups.len())?;
                let startup = &mut self.startups[idx];
                if startup.owner != from {
                    return Err(revert("Only the startup owner can add milestones"));
                }
                startup.milestones.push(abi::Milestone {
                    title,
                    description,
                    fundAmount: fund_amount,
                    isCompleted: false,
                    ipfsHash: String::new(),
                    completionTimestamp: U256::ZERO,
                });
                Ok(None)
            }
            ContractCall::CompleteMilestone {
                startup_id,
                milestone_id,
                proof_ipfs_hash,
            } => {
                let idx = index(startup_id, self.startups.len())?;
                if from != verifier {
                    return Err(revert("Only the verifier can complete milestones"));
                }
                let startup = &mut self.startups[idx];
                let m = index(milestone_id, startup.milestones.len())?;
                let milestone = &mut startup.milestones[m];
                if milestone.isCompleted {
                    return Err(revert("Milestone already completed"));
                }
                milestone.isCompleted = true;
                milestone.ipfsHash = proof_ipfs_hash;
                milestone.completionTimestamp = now_secs;
                Ok(None)
            }
            ContractCall::RefundInvestment { startup_id } => {
                let idx = index(startup_id, self.startups.len())?;
                let startup = &self.startups[idx];
                if deadline_secs(startup.deadline) > now.timestamp().max(0) as u64 {
                    return Err(revert("Funding period is still active"));
                }
                if startup.amountCollected >= startup.target {
                    return Err(revert("Funding target was reached"));
                }
                let invested = self
                    .investments
                    .remove(&(from, startup_id))
                    .filter(|v| !v.is_zero())
                    .ok_or_else(|| revert("No investment to refund"))?;
                let startup = &mut self.startups[idx];
                startup.amountCollected = startup.amountCollected.saturating_sub(invested);
                startup.funders.retain(|f| f.funderAddress != from);
                Ok(None)
            }
            ContractCall::RequestLoan {
                requester,
                name,
                purpose,
                amount,
                duration,
            } => {
                if amount.is_zero() {
                    return Err(revert("Loan amount must be greater than zero"));
                }
                if duration.is_zero() {
                    return Err(revert("Duration must be at least one month"));
                }
                let id = self.loans.len() as u64;
                self.loans.push(abi::LoanRequest {
                    requester,
                    name,
                    purpose,
                    amount,
                    duration,
                    amountCollected: U256::ZERO,
                    lenders: Vec::new(),
                    documentHashes: Vec::new(),
                    repaid: false,
                });
                Ok(Some(id))
            }
            ContractCall::FundLoan { id, value } => {
                let idx = index(id, self.loans.len())?;
                if value.is_zero() {
                    return Err(revert("Amount must be greater than zero"));
                }
                let loan = &self.loans[idx];
                if loan.repaid {
                    return Err(revert("Loan already repaid"));
                }
                if loan.amountCollected >= loan.amount {
                    return Err(revert("Loan already fully funded"));
                }
                let token_id = U256::from(self.next_token_id);
                self.next_token_id += 1;
                let loan = &mut self.loans[idx];
                loan.amountCollected += value;
                loan.lenders.push(abi::Funder {
                    funderAddress: from,
                    amount: value,
                    tokenId: token_id,
                });
                Ok(None)
            }
            ContractCall::WithdrawLoanFunds { id } => {
                let idx = index(id, self.loans.len())?;
                let loan = &self.loans[idx];
                if loan.requester != from {
                    return Err(revert("Only the requester can withdraw"));
                }
                let withdrawn = self.loan_withdrawn.get(&idx).copied().unwrap_or_default();
                if loan.amountCollected <= withdrawn {
                    return Err(revert("No funds available to withdraw"));
                }
                self.loan_withdrawn.insert(idx, loan.amountCollected);
                Ok(None)
            }
            ContractCall::RepayLoan { id, value } => {
                let idx = index(id, self.loans.len())?;
                let loan = &mut self.loans[idx];
                if loan.requester != from {
                    return Err(revert("Only the requester can repay"));
                }
                if loan.repaid {
                    return Err(revert("Loan already repaid"));
                }
                if value < repayment_due(loan.amount) {
                    return Err(revert("Insufficient repayment amount"));
                }
                loan.repaid = true;
                Ok(None)
            }
            ContractCall::AddLoanDocument {
                id,
                ipfs_hash,
                document_type,
            } => {
                let idx = index(id, self.loans.len())?;
                let loan = &mut self.loans[idx];
                if loan.requester != from {
                    return Err(revert("Only the requester can add documents"));
                }
                loan.documentHashes.push(abi::DocumentHash {
                    ipfsHash: ipfs_hash,
                    documentType: document_type,
                    timestamp: now_secs,
                });
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.read().await.block)
    }

    async fn get_startups(&self) -> Result<Vec<abi::Startup>> {
        Ok(self.state.read().await.startups.clone())
    }

    async fn get_loan_requests(&self) -> Result<Vec<abi::LoanRequest>> {
        Ok(self.state.read().await.loans.clone())
    }

    async fn get_startup_documents(&self, id: U256) -> Result<Vec<abi::DocumentHash>> {
        let state = self.state.read().await;
        let idx = index(id, state.startups.len())?;
        Ok(state.startups[idx].documentHashes.clone())
    }

    async fn get_loan_documents(&self, id: U256) -> Result<Vec<abi::DocumentHash>> {
        let state = self.state.read().await;
        let idx = index(id, state.loans.len())?;
        Ok(state.loans[idx].documentHashes.clone())
    }

    async fn get_startup_milestones(&self, id: U256) -> Result<Vec<abi::Milestone>> {
        let state = self.state.read().await;
        let idx = index(id, state.startups.len())?;
        Ok(state.startups[idx].milestones.clone())
    }

    async fn get_investor_tokens(&self, investor: Address, startup_id: U256) -> Result<Vec<U256>> {
        let state = self.state.read().await;
        Ok(state
            .investor_tokens
            .get(&(investor, startup_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn token_uri(&self, token_id: U256) -> Result<String> {
        self.state
            .read()
            .await
            .token_uris
            .get(&token_id)
            .cloned()
            .ok_or_else(|| revert("ERC721: invalid token ID"))
    }

    async fn get_investment_amount(&self, investor: Address, startup_id: U256) -> Result<U256> {
        let state = self.state.read().await;
        Ok(state
            .investments
            .get(&(investor, startup_id))
            .copied()
            .unwrap_or_default())
    }

    async fn has_investment_in(&self, investor: Address, startup_id: U256) -> Result<bool> {
        Ok(!self.get_investment_amount(investor, startup_id).await?.is_zero())
    }

    async fn verifier(&self) -> Result<Address> {
        Ok(self.verifier)
    }

    async fn simulate(&self, from: Address, call: &ContractCall) -> Result<Option<u64>> {
        let mut scratch = self.state.read().await.clone();
        scratch.apply(from, self.verifier, call.clone())
    }

    async fn send(&self, from: Address, call: ContractCall) -> Result<TxHash> {
        let method = call.method();
        let mut state = self.state.write().await;
        state.apply(from, self.verifier, call)?;

        state.nonce += 1;
        state.block += 1;
        let hash = B256::left_padding_from(&state.nonce.to_be_bytes());
        state.receipts.insert(hash, true);
        debug!("mock {method} from {from} mined in block {}", state.block);
        Ok(hash)
    }

    async fn transaction_status(&self, tx: TxHash) -> Result<Option<bool>> {
        Ok(self.state.read().await.receipts.get(&tx).copied())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;
    use crate::units::parse_display_amount;

    const OWNER: Address = address!("00000000000000000000000000000000000000a1");
    const INVESTOR: Address = address!("00000000000000000000000000000000000000b2");
    const VERIFIER: Address = address!("00000000000000000000000000000000000000c3");

    fn avax(s: &str) -> U256 {
        parse_display_amount(s).unwrap()
    }

    async fn chain_with_startup(target: &str, days: i64) -> MockChain {
        let chain = MockChain::new(VERIFIER, 43113);
        let deadline = (Utc::now() + Duration::days(days)).timestamp() as u64;
        chain
            .send(
                OWNER,
                ContractCall::CreateStartup {
                    owner: OWNER,
                    title: "Acme".into(),
                    description: "Rockets".into(),
                    equity_holders: vec![],
                    pitch_video: String::new(),
                    image: String::new(),
                    target: avax(target),
                    deadline: U256::from(deadline),
                },
            )
            .await
            .unwrap();
        chain
    }

    #[tokio::test]
    async fn funding_mints_a_token_and_records_the_funder() {
        let chain = chain_with_startup("100", 10).await;
        let id = U256::ZERO;
        chain
            .send(INVESTOR, ContractCall::FundStartup { id, value: avax("2.5") })
            .await
            .unwrap();

        let startups = chain.get_startups().await.unwrap();
        assert_eq!(startups[0].amountCollected, avax("2.5"));
        assert_eq!(startups[0].funders[0].funderAddress, INVESTOR);

        let tokens = chain.get_investor_tokens(INVESTOR, id).await.unwrap();
        assert_eq!(tokens, vec![U256::from(1u64)]);
        let uri = chain.token_uri(tokens[0]).await.unwrap();
        assert!(uri.starts_with("data:application/json;base64,"));
        assert!(chain.has_investment_in(INVESTOR, id).await.unwrap());
        assert_eq!(chain.block_number().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn simulate_reports_created_id_without_mutating() {
        let chain = chain_with_startup("1", 1).await;
        let call = ContractCall::RequestLoan {
            requester: OWNER,
            name: "Bridge".into(),
            purpose: "Stock".into(),
            amount: avax("10"),
            duration: U256::from(6u64),
        };
        assert_eq!(chain.simulate(OWNER, &call).await.unwrap(), Some(0));
        assert!(chain.get_loan_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn owner_and_verifier_guards() {
        let chain = chain_with_startup("1", 1).await;
        let id = U256::ZERO;
        let err = chain
            .send(INVESTOR, ContractCall::VerifyStartup { id })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Reverted(_)));
        chain
            .send(VERIFIER, ContractCall::VerifyStartup { id })
            .await
            .unwrap();

        let err = chain
            .send(INVESTOR, ContractCall::WithdrawFunds { id })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Reverted(_)));
    }

    #[tokio::test]
    async fn refund_only_after_missed_deadline() {
        let chain = chain_with_startup("100", 1).await;
        let id = U256::ZERO;
        chain
            .send(INVESTOR, ContractCall::FundStartup { id, value: avax("5") })
            .await
            .unwrap();
        let refund = ContractCall::RefundInvestment { startup_id: id };
        assert!(chain.send(INVESTOR, refund.clone()).await.is_err());

        chain.advance_time(Duration::days(2)).await;
        chain.send(INVESTOR, refund).await.unwrap();
        let startups = chain.get_startups().await.unwrap();
        assert_eq!(startups[0].amountCollected, U256::ZERO);
        assert!(!chain.has_investment_in(INVESTOR, id).await.unwrap());
    }

    #[tokio::test]
    async fn loan_repayment_requires_interest() {
        let chain = MockChain::new(VERIFIER, 43113);
        chain
            .send(
                OWNER,
                ContractCall::RequestLoan {
                    requester: OWNER,
                    name: "Bridge".into(),
                    purpose: "Stock".into(),
                    amount: avax("10"),
                    duration: U256::from(6u64),
                },
            )
            .await
            .unwrap();
        let id = U256::ZERO;
        let short = ContractCall::RepayLoan { id, value: avax("10") };
        assert!(chain.send(OWNER, short).await.is_err());
        chain
            .send(OWNER, ContractCall::RepayLoan { id, value: avax("11") })
            .await
            .unwrap();
        assert!(chain.get_loan_requests().await.unwrap()[0].repaid);
    }

    #[tokio::test]
    async fn millisecond_deadline_is_accepted() {
        let chain = MockChain::new(VERIFIER, 43113);
        let deadline = (Utc::now() + Duration::days(3)).timestamp_millis() as u64;
        let created = chain
            .simulate(
                OWNER,
                &ContractCall::CreateStartup {
                    owner: OWNER,
                    title: "t".into(),
                    description: "d".into(),
                    equity_holders: vec![],
                    pitch_video: String::new(),
                    image: String::new(),
                    target: avax("1"),
                    deadline: U256::from(deadline),
                },
            )
            .await
            .unwrap();
        assert_eq!(created, Some(0));
    }
}
