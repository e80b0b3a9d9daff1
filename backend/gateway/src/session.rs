//! Write side: the connected account and everything it can submit.
//!
//! A [`Session`] is built once at start-up from the chain client, the IPFS
//! bridge and the optional account, then shared. Writes return as soon as the
//! transaction is accepted; [`Session::settle`] is the explicit wait before
//! state is re-read.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::abi;
use crate::aggregator::Aggregator;
use crate::chain::{ChainClient, ContractCall, TxHash};
use crate::errors::{GatewayError, Result};
use crate::ipfs::{IpfsBridge, UploadFile};
use crate::models::{Campaign, CampaignId, LoanId};
use crate::units::{parse_display_amount, repayment_due};

/// How to wait for a submitted transaction before re-reading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Sleep for a fixed time. The re-read can still see stale state.
    Delay(Duration),
    /// Poll the receipt until it is mined or `timeout` elapses.
    Receipt { timeout: Duration, poll: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submitted {
    pub tx_hash: TxHash,
    /// Id the contract assigns, for creation calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEquityHolder {
    pub name: String,
    pub percentage: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub equity_holders: Vec<NewEquityHolder>,
    #[serde(default)]
    pub pitch_video: String,
    #[serde(default)]
    pub image: String,
    /// Display units, e.g. `"100"` or `"2.5"`.
    pub target: String,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLoan {
    pub name: String,
    pub purpose: String,
    pub amount: String,
    pub duration_months: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingReceipt {
    #[serde(flatten)]
    pub submitted: Submitted,
    /// Newest token the account holds for the campaign after settling.
    pub token_id: Option<u64>,
    pub campaign: Campaign,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentUpload {
    pub cid: String,
    pub url: String,
    #[serde(flatten)]
    pub submitted: Submitted,
}

#[derive(Clone)]
pub struct Session {
    chain: Arc<dyn ChainClient>,
    ipfs: Arc<IpfsBridge>,
    aggregator: Aggregator,
    account: Option<Address>,
    settle: SettlePolicy,
}

impl Session {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ipfs: Arc<IpfsBridge>,
        aggregator: Aggregator,
        account: Option<Address>,
        settle: SettlePolicy,
    ) -> Self {
        Self {
            chain,
            ipfs,
            aggregator,
            account,
            settle,
        }
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    fn require_account(&self) -> Result<Address> {
        self.account.ok_or(GatewayError::NotConnected)
    }

    async fn submit(&self, call: ContractCall) -> Result<Submitted> {
        let from = self.require_account()?;
        let method = call.method();

        let assigned_id = if call.creates_entity() {
            self.chain.simulate(from, &call).await?
        } else {
            None
        };
        let tx_hash = self.chain.send(from, call).await?;
        info!("{method} submitted by {from}: {tx_hash}");

        Ok(Submitted {
            tx_hash,
            assigned_id,
        })
    }

    /// Wait according to the settle policy.
    pub async fn settle(&self, tx: TxHash) -> Result<()> {
        match self.settle {
            SettlePolicy::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            SettlePolicy::Receipt { timeout, poll } => {
                tokio::time::timeout(timeout, self.wait_for_receipt(tx, poll))
                    .await
                    .map_err(|_| GatewayError::Timeout(format!("receipt for {tx}")))?
            }
        }
    }

    async fn wait_for_receipt(&self, tx: TxHash, poll: Duration) -> Result<()> {
        loop {
            match self.chain.transaction_status(tx).await? {
                Some(true) => return Ok(()),
                Some(false) => return Err(GatewayError::Reverted(format!("transaction {tx}"))),
                None => {
                    debug!("{tx} pending");
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────
    // Campaigns
    // ─────────────────────────────────────────────────────

    pub async fn create_campaign(&self, new: NewCampaign) -> Result<Submitted> {
        let owner = self.require_account()?;
        let target = positive_amount(&new.target)?;
        let deadline = u64::try_from(new.deadline.timestamp())
            .map_err(|_| GatewayError::BadRequest("deadline before 1970".to_string()))?;

        self.submit(ContractCall::CreateStartup {
            owner,
            title: new.title,
            description: new.description,
            equity_holders: new
                .equity_holders
                .into_iter()
                .map(|h| abi::EquityHolder {
                    name: h.name,
                    percentage: U256::from(h.percentage),
                })
                .collect(),
            pitch_video: new.pitch_video,
            image: new.image,
            target,
            deadline: U256::from(deadline),
        })
        .await
    }

    pub async fn fund_campaign(&self, id: CampaignId, amount: &str) -> Result<Submitted> {
        let value = positive_amount(amount)?;
        self.submit(ContractCall::FundStartup {
            id: id.as_u256(),
            value,
        })
        .await
    }

    /// Fund, wait, then re-read the campaign and the newest token minted to
    /// the account for it.
    pub async fn fund_campaign_and_refresh(&self, id: CampaignId, amount: &str) -> Result<FundingReceipt> {
        let investor = self.require_account()?;
        let submitted = self.fund_campaign(id, amount).await?;
        self.settle(submitted.tx_hash).await?;

        let campaign = self.aggregator.campaign(id).await?;
        let token_id = self
            .chain
            .get_investor_tokens(investor, id.as_u256())
            .await?
            .into_iter()
            .max()
            .map(|t| t.saturating_to::<u64>());
        if token_id.is_none() {
            warn!("No investment token visible yet for campaign {id}");
        }

        Ok(FundingReceipt {
            submitted,
            token_id,
            campaign,
        })
    }

    pub async fn withdraw_campaign_funds(&self, id: CampaignId) -> Result<Submitted> {
        self.submit(ContractCall::WithdrawFunds { id: id.as_u256() }).await
    }

    pub async fn verify_campaign(&self, id: CampaignId) -> Result<Submitted> {
        self.submit(ContractCall::VerifyStartup { id: id.as_u256() }).await
    }

    pub async fn refund_investment(&self, id: CampaignId) -> Result<Submitted> {
        self.submit(ContractCall::RefundInvestment {
            startup_id: id.as_u256(),
        })
        .await
    }

    pub async fn create_milestone(
        &self,
        id: CampaignId,
        title: String,
        description: String,
        fund_amount: &str,
    ) -> Result<Submitted> {
        let fund_amount = parse_display_amount(fund_amount)?;
        self.submit(ContractCall::AddStartupMilestone {
            id: id.as_u256(),
            title,
            description,
            fund_amount,
        })
        .await
    }

    /// Pin the proof, then mark the milestone completed with its CID.
    pub async fn complete_milestone(
        &self,
        id: CampaignId,
        milestone_id: u64,
        proof: UploadFile,
    ) -> Result<DocumentUpload> {
        self.require_account()?;
        let cid = self.ipfs.upload(proof).await?;
        let call = ContractCall::CompleteMilestone {
            startup_id: id.as_u256(),
            milestone_id: U256::from(milestone_id),
            proof_ipfs_hash: cid.clone(),
        };
        self.register_upload(cid, call).await
    }

    pub async fn upload_campaign_document(
        &self,
        id: CampaignId,
        file: UploadFile,
        document_type: &str,
    ) -> Result<DocumentUpload> {
        self.require_account()?;
        let cid = self.ipfs.upload(file).await?;
        let call = ContractCall::AddStartupDocument {
            id: id.as_u256(),
            ipfs_hash: cid.clone(),
            document_type: document_type.to_string(),
        };
        self.register_upload(cid, call).await
    }

    // ─────────────────────────────────────────────────────
    // Loans
    // ─────────────────────────────────────────────────────

    pub async fn request_loan(&self, new: NewLoan) -> Result<Submitted> {
        let requester = self.require_account()?;
        let amount = positive_amount(&new.amount)?;
        if new.duration_months == 0 {
            return Err(GatewayError::BadRequest(
                "duration must be at least one month".to_string(),
            ));
        }
        self.submit(ContractCall::RequestLoan {
            requester,
            name: new.name,
            purpose: new.purpose,
            amount,
            duration: U256::from(new.duration_months),
        })
        .await
    }

    pub async fn lend(&self, id: LoanId, amount: &str) -> Result<Submitted> {
        let value = positive_amount(amount)?;
        self.submit(ContractCall::FundLoan {
            id: id.as_u256(),
            value,
        })
        .await
    }

    pub async fn withdraw_loan_funds(&self, id: LoanId) -> Result<Submitted> {
        self.submit(ContractCall::WithdrawLoanFunds { id: id.as_u256() })
            .await
    }

    /// Repay principal plus interest in one payment.
    pub async fn repay_loan(&self, id: LoanId) -> Result<Submitted> {
        self.require_account()?;
        let loan = self.aggregator.loan(id).await?;
        let value = repayment_due(loan.amount.wei());
        self.submit(ContractCall::RepayLoan {
            id: id.as_u256(),
            value,
        })
        .await
    }

    pub async fn upload_loan_document(
        &self,
        id: LoanId,
        file: UploadFile,
        document_type: &str,
    ) -> Result<DocumentUpload> {
        self.require_account()?;
        let cid = self.ipfs.upload(file).await?;
        let call = ContractCall::AddLoanDocument {
            id: id.as_u256(),
            ipfs_hash: cid.clone(),
            document_type: document_type.to_string(),
        };
        self.register_upload(cid, call).await
    }

    /// Register an already pinned CID on-chain. A failure here leaves the
    /// content pinned but unreferenced.
    async fn register_upload(&self, cid: String, call: ContractCall) -> Result<DocumentUpload> {
        match self.submit(call).await {
            Ok(submitted) => Ok(DocumentUpload {
                url: self.ipfs.resolve(&cid, None),
                cid,
                submitted,
            }),
            Err(e) => {
                warn!("Orphaned upload {cid}: registration failed: {e}");
                Err(GatewayError::OrphanedUpload {
                    cid,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn positive_amount(raw: &str) -> Result<U256> {
    let value = parse_display_amount(raw)?;
    if value.is_zero() {
        return Err(GatewayError::InvalidAmount(format!(
            "{raw} (must be greater than zero)"
        )));
    }
    Ok(value)
}
