//! Display-ready projections of the contract's tuples.
//!
//! Raw `abi` structs are converted once here: amounts become [`Amount`],
//! timestamps become dates and document hashes gain gateway URLs.

use std::fmt;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abi;
use crate::ipfs::IpfsBridge;
use crate::metadata::{Metadata, ATTR_EQUITY_PERCENTAGE, ATTR_INVESTMENT_AMOUNT, ATTR_INVESTMENT_DATE};
use crate::units::{
    normalize_deadline, normalize_equity, normalize_investment_amount, parse_leading_i64,
    timestamp_secs, Amount,
};

// ─────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────

/// Key of a campaign in the contract's startup array. The contract only
/// appends, so the key stays valid for the life of the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub u64);

impl CampaignId {
    pub fn as_u256(self) -> U256 {
        U256::from(self.0)
    }
}

impl LoanId {
    pub fn as_u256(self) -> U256 {
        U256::from(self.0)
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────
// Shared pieces
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityHolder {
    pub name: String,
    pub percentage: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Funder {
    pub address: Address,
    pub amount: Amount,
    pub token_id: u64,
}

impl From<&abi::Funder> for Funder {
    fn from(raw: &abi::Funder) -> Self {
        Self {
            address: raw.funderAddress,
            amount: Amount(raw.amount),
            token_id: raw.tokenId.saturating_to(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub ipfs_hash: String,
    pub document_type: String,
    /// `Document-<type>`
    pub name: String,
    pub url: String,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn from_raw(raw: &abi::DocumentHash, ipfs: &IpfsBridge) -> Self {
        Self {
            url: ipfs.resolve(&raw.ipfsHash, None),
            name: format!("Document-{}", raw.documentType),
            ipfs_hash: raw.ipfsHash.clone(),
            document_type: raw.documentType.clone(),
            uploaded_at: timestamp_secs(raw.timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Milestone {
    /// Position in the campaign's milestone list; what `completeMilestone` expects.
    pub id: u64,
    pub title: String,
    pub description: String,
    pub fund_amount: Amount,
    pub is_completed: bool,
    pub status: &'static str,
    pub proof_ipfs_hash: Option<String>,
    pub proof_url: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn from_raw(id: u64, raw: &abi::Milestone, ipfs: &IpfsBridge) -> Self {
        let proof = (!raw.ipfsHash.is_empty()).then(|| raw.ipfsHash.clone());
        Self {
            id,
            title: raw.title.clone(),
            description: raw.description.clone(),
            fund_amount: Amount(raw.fundAmount),
            is_completed: raw.isCompleted,
            status: if raw.isCompleted { "Completed" } else { "In Progress" },
            proof_url: proof.as_deref().map(|cid| ipfs.resolve(cid, None)),
            proof_ipfs_hash: proof,
            completed_at: if raw.isCompleted {
                timestamp_secs(raw.completionTimestamp)
            } else {
                None
            },
        }
    }
}

// ─────────────────────────────────────────────────────────
// Campaigns and loans
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub owner: Address,
    pub title: String,
    pub description: String,
    pub equity_holders: Vec<EquityHolder>,
    pub pitch_video: String,
    pub image: String,
    pub target: Amount,
    pub deadline: DateTime<Utc>,
    pub amount_collected: Amount,
    pub amount_released: Amount,
    pub funders: Vec<Funder>,
    pub documents: Vec<Document>,
    pub milestones: Vec<Milestone>,
    pub is_verified: bool,
}

impl Campaign {
    pub fn from_raw(id: CampaignId, raw: &abi::Startup, now: DateTime<Utc>, ipfs: &IpfsBridge) -> Self {
        Self {
            id,
            owner: raw.owner,
            title: raw.title.clone(),
            description: raw.description.clone(),
            equity_holders: raw
                .equityHolders
                .iter()
                .map(|h| EquityHolder {
                    name: h.name.clone(),
                    percentage: h.percentage.saturating_to(),
                })
                .collect(),
            pitch_video: raw.pitchVideo.clone(),
            image: raw.image.clone(),
            target: Amount(raw.target),
            deadline: normalize_deadline(raw.deadline, now),
            amount_collected: Amount(raw.amountCollected),
            amount_released: Amount(raw.amountReleased),
            funders: raw.funders.iter().map(Funder::from).collect(),
            documents: raw
                .documentHashes
                .iter()
                .map(|d| Document::from_raw(d, ipfs))
                .collect(),
            milestones: raw
                .milestones
                .iter()
                .enumerate()
                .map(|(i, m)| Milestone::from_raw(i as u64, m, ipfs))
                .collect(),
            is_verified: raw.isVerified,
        }
    }

    pub fn is_funder(&self, who: Address) -> bool {
        self.funders.iter().any(|f| f.address == who)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Loan {
    pub id: LoanId,
    pub requester: Address,
    pub name: String,
    pub purpose: String,
    pub amount: Amount,
    pub duration_months: u32,
    pub amount_collected: Amount,
    pub lenders: Vec<Funder>,
    pub documents: Vec<Document>,
    pub repaid: bool,
}

impl Loan {
    pub fn from_raw(id: LoanId, raw: &abi::LoanRequest, ipfs: &IpfsBridge) -> Self {
        Self {
            id,
            requester: raw.requester,
            name: raw.name.clone(),
            purpose: raw.purpose.clone(),
            amount: Amount(raw.amount),
            duration_months: raw.duration.saturating_to(),
            amount_collected: Amount(raw.amountCollected),
            lenders: raw.lenders.iter().map(Funder::from).collect(),
            documents: raw
                .documentHashes
                .iter()
                .map(|d| Document::from_raw(d, ipfs))
                .collect(),
            repaid: raw.repaid,
        }
    }

    pub fn is_lender(&self, who: Address) -> bool {
        self.lenders.iter().any(|l| l.address == who)
    }
}

// ─────────────────────────────────────────────────────────
// Investment certificates
// ─────────────────────────────────────────────────────────

/// An investment NFT with its metadata decoded and normalised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestmentCertificate {
    pub token_id: u64,
    pub campaign_id: CampaignId,
    pub campaign_title: String,
    /// Display units (AVAX).
    pub investment_amount: f64,
    pub investment_date: DateTime<Utc>,
    /// Percent.
    pub equity: f64,
    pub owner: Address,
    pub metadata: Metadata,
}

impl InvestmentCertificate {
    /// Read the well-known attributes. Missing or unparseable values become
    /// zero, and a missing date becomes `now`.
    pub fn from_metadata(
        token_id: u64,
        campaign_id: CampaignId,
        campaign_title: &str,
        owner: Address,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        let text = |trait_type: &str| metadata.attribute(trait_type).map(|a| a.value_text());

        let investment_amount = text(ATTR_INVESTMENT_AMOUNT)
            .map(|v| normalize_investment_amount(&v))
            .unwrap_or(0.0);
        let equity = text(ATTR_EQUITY_PERCENTAGE)
            .map(|v| normalize_equity(&v))
            .unwrap_or(0.0);
        let investment_date = text(ATTR_INVESTMENT_DATE)
            .and_then(|v| parse_leading_i64(&v))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(now);

        Self {
            token_id,
            campaign_id,
            campaign_title: campaign_title.to_string(),
            investment_amount,
            investment_date,
            equity,
            owner,
            metadata,
        }
    }
}
