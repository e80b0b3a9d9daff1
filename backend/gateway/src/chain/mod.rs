//! Access to the funding contract.
//!
//! [`ChainClient`] is the seam between the gateway and the chain: one typed
//! method per contract read, plus `send` for writes described by
//! [`ContractCall`]. [`rpc::RpcChainClient`] implements it over JSON-RPC and
//! [`mock::MockChain`] simulates the contract in memory.
//!
//! `send` only guarantees that the node accepted the transaction. State read
//! right after it returns may not reflect the write yet.

pub mod mock;
pub mod rpc;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;

use crate::abi::{self, IStartupFunding as C};
use crate::errors::Result;

pub type TxHash = B256;

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    async fn block_number(&self) -> Result<u64>;

    async fn get_startups(&self) -> Result<Vec<abi::Startup>>;
    async fn get_loan_requests(&self) -> Result<Vec<abi::LoanRequest>>;
    async fn get_startup_documents(&self, id: U256) -> Result<Vec<abi::DocumentHash>>;
    async fn get_loan_documents(&self, id: U256) -> Result<Vec<abi::DocumentHash>>;
    async fn get_startup_milestones(&self, id: U256) -> Result<Vec<abi::Milestone>>;
    async fn get_investor_tokens(&self, investor: Address, startup_id: U256) -> Result<Vec<U256>>;
    async fn token_uri(&self, token_id: U256) -> Result<String>;
    async fn get_investment_amount(&self, investor: Address, startup_id: U256) -> Result<U256>;
    async fn has_investment_in(&self, investor: Address, startup_id: U256) -> Result<bool>;
    async fn verifier(&self) -> Result<Address>;

    /// Dry-run `call` as `from`. Returns the id a creation call would be
    /// assigned, `None` for every other call. Reverts surface as errors.
    async fn simulate(&self, from: Address, call: &ContractCall) -> Result<Option<u64>>;

    /// Submit `call` signed by `from`.
    async fn send(&self, from: Address, call: ContractCall) -> Result<TxHash>;

    /// `None` while pending, `Some(success)` once mined.
    async fn transaction_status(&self, tx: TxHash) -> Result<Option<bool>>;
}

/// Every write the gateway performs against the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    CreateStartup {
        owner: Address,
        title: String,
        description: String,
        equity_holders: Vec<abi::EquityHolder>,
        pitch_video: String,
        image: String,
        target: U256,
        deadline: U256,
    },
    RequestLoan {
        requester: Address,
        name: String,
        purpose: String,
        amount: U256,
        duration: U256,
    },
    FundStartup { id: U256, value: U256 },
    FundLoan { id: U256, value: U256 },
    WithdrawFunds { id: U256 },
    WithdrawLoanFunds { id: U256 },
    RepayLoan { id: U256, value: U256 },
    VerifyStartup { id: U256 },
    AddStartupDocument { id: U256, ipfs_hash: String, document_type: String },
    AddLoanDocument { id: U256, ipfs_hash: String, document_type: String },
    AddStartupMilestone { id: U256, title: String, description: String, fund_amount: U256 },
    CompleteMilestone { startup_id: U256, milestone_id: U256, proof_ipfs_hash: String },
    RefundInvestment { startup_id: U256 },
}

impl ContractCall {
    /// Method name, for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateStartup { .. } => "createStartup",
            Self::RequestLoan { .. } => "requestLoan",
            Self::FundStartup { .. } => "fundStartup",
            Self::FundLoan { .. } => "fundLoan",
            Self::WithdrawFunds { .. } => "withdrawFunds",
            Self::WithdrawLoanFunds { .. } => "withdrawLoanFunds",
            Self::RepayLoan { .. } => "repayLoan",
            Self::VerifyStartup { .. } => "verifyStartup",
            Self::AddStartupDocument { .. } => "addStartupDocument",
            Self::AddLoanDocument { .. } => "addLoanDocument",
            Self::AddStartupMilestone { .. } => "addStartupMilestone",
            Self::CompleteMilestone { .. } => "completeMilestone",
            Self::RefundInvestment { .. } => "refundInvestment",
        }
    }

    /// Whether the call returns the id of a newly created entity.
    pub fn creates_entity(&self) -> bool {
        matches!(self, Self::CreateStartup { .. } | Self::RequestLoan { .. })
    }

    /// Native currency attached to the call.
    pub fn value(&self) -> U256 {
        match self {
            Self::FundStartup { value, .. }
            | Self::FundLoan { value, .. }
            | Self::RepayLoan { value, .. } => *value,
            _ => U256::ZERO,
        }
    }

    /// ABI-encoded calldata (selector + arguments).
    pub fn calldata(&self) -> Vec<u8> {
        match self.clone() {
            Self::CreateStartup {
                owner,
                title,
                description,
                equity_holders,
                pitch_video,
                image,
                target,
                deadline,
            } => C::createStartupCall {
                _owner: owner,
                _title: title,
                _description: description,
                _equityHolders: equity_holders,
                _pitchVideo: pitch_video,
                _image: image,
                _target: target,
                _deadline: deadline,
            }
            .abi_encode(),
            Self::RequestLoan {
                requester,
                name,
                purpose,
                amount,
                duration,
            } => C::requestLoanCall {
                _requester: requester,
                _name: name,
                _purpose: purpose,
                _amount: amount,
                _duration: duration,
            }
            .abi_encode(),
            Self::FundStartup { id, .. } => C::fundStartupCall { _id: id }.abi_encode(),
            Self::FundLoan { id, .. } => C::fundLoanCall { _id: id }.abi_encode(),
            Self::WithdrawFunds { id } => C::withdrawFundsCall { _id: id }.abi_encode(),
            Self::WithdrawLoanFunds { id } => C::withdrawLoanFundsCall { _id: id }.abi_encode(),
            Self::RepayLoan { id, .. } => C::repayLoanCall { _id: id }.abi_encode(),
            Self::VerifyStartup { id } => C::verifyStartupCall { _id: id }.abi_encode(),
            Self::AddStartupDocument {
                id,
                ipfs_hash,
                document_type,
            } => C::addStartupDocumentCall {
                _id: id,
                _ipfsHash: ipfs_hash,
                _documentType: document_type,
            }
            .abi_encode(),
            Self::AddLoanDocument {
                id,
                ipfs_hash,
                document_type,
            } => C::addLoanDocumentCall {
                _id: id,
                _ipfsHash: ipfs_hash,
                _documentType: document_type,
            }
            .abi_encode(),
            Self::AddStartupMilestone {
                id,
                title,
                description,
                fund_amount,
            } => C::addStartupMilestoneCall {
                _id: id,
                _title: title,
                _description: description,
                _fundAmount: fund_amount,
            }
            .abi_encode(),
            Self::CompleteMilestone {
                startup_id,
                milestone_id,
                proof_ipfs_hash,
            } => C::completeMilestoneCall {
                _startupId: startup_id,
                _milestoneId: milestone_id,
                _proofIpfsHash: proof_ipfs_hash,
            }
            .abi_encode(),
            Self::RefundInvestment { startup_id } => C::refundInvestmentCall {
                _startupId: startup_id,
            }
            .abi_encode(),
        }
    }

    /// Decode the return data of a simulated call into the created id.
    pub fn decode_created_id(&self, data: &[u8]) -> Result<Option<u64>> {
        let id = match self {
            Self::CreateStartup { .. } => C::createStartupCall::abi_decode_returns(data, true)?._0,
            Self::RequestLoan { .. } => C::requestLoanCall::abi_decode_returns(data, true)?._0,
            _ => return Ok(None),
        };
        Ok(Some(id.saturating_to::<u64>()))
    }
}

#[cfg(test)]
mod tests {
    use alloy_sol_types::SolValue;

    use super::*;

    #[test]
    fn calldata_starts_with_selector() {
        let call = ContractCall::FundStartup {
            id: U256::from(3u64),
            value: U256::from(1u64),
        };
        let data = call.calldata();
        assert_eq!(&data[..4], C::fundStartupCall::SELECTOR.as_slice());
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(call.value(), U256::from(1u64));
    }

    #[test]
    fn calldata_round_trips_through_abi() {
        let call = ContractCall::AddStartupDocument {
            id: U256::from(1u64),
            ipfs_hash: "QmDoc".to_string(),
            document_type: "pitch_deck".to_string(),
        };
        let decoded = C::addStartupDocumentCall::abi_decode(&call.calldata(), true).unwrap();
        assert_eq!(decoded._ipfsHash, "QmDoc");
        assert_eq!(decoded._documentType, "pitch_deck");
    }

    #[test]
    fn created_id_is_decoded_only_for_creation_calls() {
        let create = ContractCall::RequestLoan {
            requester: Address::ZERO,
            name: "n".into(),
            purpose: "p".into(),
            amount: U256::from(1u64),
            duration: U256::from(6u64),
        };
        let data = U256::from(7u64).abi_encode();
        assert_eq!(create.decode_created_id(&data).unwrap(), Some(7));
        assert!(create.creates_entity());

        let withdraw = ContractCall::WithdrawFunds { id: U256::ZERO };
        assert_eq!(withdraw.decode_created_id(&data).unwrap(), None);
        assert_eq!(withdraw.value(), U256::ZERO);
    }
}
