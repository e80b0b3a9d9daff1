//! Change feed derived from successive contract snapshots.
//!
//! The contract exposes no events we rely on, so activity is reconstructed by
//! diffing two full reads of the campaign and loan collections. Each record
//! carries a fingerprint built from what it describes, so replaying the same
//! diff never produces a second row.

use std::collections::HashSet;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::abi;
use crate::units::repayment_due;

/// Everything the feed can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CampaignCreated,
    CampaignFunded,
    CampaignVerified,
    /// The owner withdrew collected funds.
    FundsReleased,
    DocumentAdded,
    MilestoneAdded,
    MilestoneCompleted,
    InvestmentRefunded,
    LoanRequested,
    LoanFunded,
    LoanRepaid,
}

impl ActivityKind {
    /// Short identifier stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CampaignCreated => "campaign_created",
            Self::CampaignFunded => "campaign_funded",
            Self::CampaignVerified => "campaign_verified",
            Self::FundsReleased => "funds_released",
            Self::DocumentAdded => "document_added",
            Self::MilestoneAdded => "milestone_added",
            Self::MilestoneCompleted => "milestone_completed",
            Self::InvestmentRefunded => "investment_refunded",
            Self::LoanRequested => "loan_requested",
            Self::LoanFunded => "loan_funded",
            Self::LoanRepaid => "loan_repaid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Campaign,
    Loan,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Campaign => "campaign",
            Self::Loan => "loan",
        }
    }
}

/// A change detected between two snapshots, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub actor: Option<Address>,
    /// Wei.
    pub amount: Option<U256>,
    pub detail: Option<String>,
    pub fingerprint: String,
}

impl Activity {
    fn new(kind: ActivityKind, entity_type: EntityType, entity_id: u64, key: impl std::fmt::Display) -> Self {
        Self {
            kind,
            entity_type,
            entity_id,
            actor: None,
            amount: None,
            detail: None,
            fingerprint: format!("{}:{}:{entity_id}:{key}", kind.as_str(), entity_type.as_str()),
        }
    }

    fn actor(mut self, actor: Address) -> Self {
        self.actor = Some(actor);
        self
    }

    fn amount(mut self, amount: U256) -> Self {
        self.amount = Some(amount);
        self
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A stored activity row as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityRecord {
    pub id: i64,
    pub kind: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub actor: Option<String>,
    pub amount: Option<String>,
    pub detail: Option<String>,
    pub block: i64,
    pub fingerprint: String,
    pub created_at: i64,
}

// ─────────────────────────────────────────────────────────
// Snapshot diffs
// ─────────────────────────────────────────────────────────

/// Activity between two reads of `getStartups()`.
///
/// `block` only disambiguates changes that carry no identity of their own
/// (refunds); everything else is keyed on contract data.
pub fn diff_campaigns(prev: &[abi::Startup], next: &[abi::Startup], block: u64) -> Vec<Activity> {
    let mut out = Vec::new();

    for (i, cur) in next.iter().enumerate() {
        let id = i as u64;
        let old = prev.get(i);
        let campaign = |kind, key: String| Activity::new(kind, EntityType::Campaign, id, key);

        if old.is_none() {
            out.push(
                campaign(ActivityKind::CampaignCreated, "created".into())
                    .actor(cur.owner)
                    .amount(cur.target)
                    .detail(cur.title.clone()),
            );
        }

        let seen: HashSet<(Address, U256)> = old
            .map(|o| o.funders.iter().map(|f| (f.funderAddress, f.tokenId)).collect())
            .unwrap_or_default();
        for f in &cur.funders {
            if !seen.contains(&(f.funderAddress, f.tokenId)) {
                out.push(
                    campaign(
                        ActivityKind::CampaignFunded,
                        format!("{}:{}", f.funderAddress, f.tokenId),
                    )
                    .actor(f.funderAddress)
                    .amount(f.amount)
                    .detail(format!("token {}", f.tokenId)),
                );
            }
        }

        if let Some(old) = old {
            if cur.amountCollected < old.amountCollected {
                let current: HashSet<Address> = cur.funders.iter().map(|f| f.funderAddress).collect();
                let mut departed: Vec<(Address, U256)> = Vec::new();
                for f in old.funders.iter().filter(|f| !current.contains(&f.funderAddress)) {
                    match departed.iter_mut().find(|(a, _)| *a == f.funderAddress) {
                        Some((_, total)) => *total = total.saturating_add(f.amount),
                        None => departed.push((f.funderAddress, f.amount)),
                    }
                }

                let mut explained = U256::ZERO;
                for (addr, total) in departed {
                    explained = explained.saturating_add(total);
                    out.push(
                        campaign(ActivityKind::InvestmentRefunded, format!("{block}:{addr}"))
                            .actor(addr)
                            .amount(total),
                    );
                }

                // Whatever left the pool without a departed funder to carry it.
                let residual = (old.amountCollected - cur.amountCollected).saturating_sub(explained);
                if !residual.is_zero() {
                    out.push(
                        campaign(ActivityKind::InvestmentRefunded, format!("{block}")).amount(residual),
                    );
                }
            }
        }

        if cur.isVerified && !old.is_some_and(|o| o.isVerified) {
            out.push(campaign(ActivityKind::CampaignVerified, "verified".into()));
        }

        let released_before = old.map(|o| o.amountReleased).unwrap_or_default();
        if cur.amountReleased > released_before {
            out.push(
                campaign(ActivityKind::FundsReleased, cur.amountReleased.to_string())
                    .actor(cur.owner)
                    .amount(cur.amountReleased - released_before),
            );
        }

        let docs_before = old.map_or(0, |o| o.documentHashes.len());
        for (d, doc) in cur.documentHashes.iter().enumerate().skip(docs_before) {
            out.push(
                campaign(ActivityKind::DocumentAdded, format!("{d}:{}", doc.ipfsHash))
                    .actor(cur.owner)
                    .detail(format!("{}:{}", doc.documentType, doc.ipfsHash)),
            );
        }

        for (m, milestone) in cur.milestones.iter().enumerate() {
            let before = old.and_then(|o| o.milestones.get(m));
            if before.is_none() {
                out.push(
                    campaign(ActivityKind::MilestoneAdded, m.to_string())
                        .actor(cur.owner)
                        .amount(milestone.fundAmount)
                        .detail(milestone.title.clone()),
                );
            }
            if milestone.isCompleted && !before.is_some_and(|b| b.isCompleted) {
                out.push(
                    campaign(ActivityKind::MilestoneCompleted, m.to_string())
                        .detail(milestone.ipfsHash.clone()),
                );
            }
        }
    }

    out
}

/// Activity between two reads of `getLoanRequests()`.
pub fn diff_loans(prev: &[abi::LoanRequest], next: &[abi::LoanRequest]) -> Vec<Activity> {
    let mut out = Vec::new();

    for (i, cur) in next.iter().enumerate() {
        let id = i as u64;
        let old = prev.get(i);
        let loan = |kind, key: String| Activity::new(kind, EntityType::Loan, id, key);

        if old.is_none() {
            out.push(
                loan(ActivityKind::LoanRequested, "requested".into())
                    .actor(cur.requester)
                    .amount(cur.amount)
                    .detail(cur.name.clone()),
            );
        }

        // Lenders are only ever appended.
        let lenders_before = old.map_or(0, |o| o.lenders.len());
        for (l, lender) in cur.lenders.iter().enumerate().skip(lenders_before) {
            out.push(
                loan(ActivityKind::LoanFunded, format!("{l}:{}", lender.funderAddress))
                    .actor(lender.funderAddress)
                    .amount(lender.amount),
            );
        }

        if cur.repaid && !old.is_some_and(|o| o.repaid) {
            out.push(
                loan(ActivityKind::LoanRepaid, "repaid".into())
                    .actor(cur.requester)
                    .amount(repayment_due(cur.amount)),
            );
        }

        let docs_before = old.map_or(0, |o| o.documentHashes.len());
        for (d, doc) in cur.documentHashes.iter().enumerate().skip(docs_before) {
            out.push(
                loan(ActivityKind::DocumentAdded, format!("{d}:{}", doc.ipfsHash))
                    .actor(cur.requester)
                    .detail(format!("{}:{}", doc.documentType, doc.ipfsHash)),
            );
        }
    }

    out
}
