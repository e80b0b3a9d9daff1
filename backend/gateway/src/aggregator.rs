//! Read side: joins contract reads into per-viewer views.
//!
//! Every call re-fetches from the chain; nothing is cached. Collection reads
//! propagate their errors, while per-token and per-campaign failures inside
//! [`Aggregator::get_investor_positions`] are logged and skipped so one bad
//! token never hides the rest of a portfolio.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::chain::ChainClient;
use crate::errors::{GatewayError, Result};
use crate::ipfs::IpfsBridge;
use crate::metadata::{decode_token_uri, Metadata};
use crate::models::{Campaign, CampaignId, Document, InvestmentCertificate, Loan, LoanId, Milestone};
use crate::units::{days_remaining, funding_progress, repayment_due, Amount, LOAN_INTEREST_RATE};

// ─────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub funding_progress: f64,
    pub funding_complete: bool,
    pub days_remaining: i64,
    pub deadline_over: bool,
    pub is_owner: bool,
    pub has_invested: bool,
}

impl CampaignView {
    pub fn new(campaign: Campaign, viewer: Option<Address>, now: DateTime<Utc>) -> Self {
        let progress = funding_progress(campaign.amount_collected.wei(), campaign.target.wei());
        Self {
            funding_progress: progress,
            funding_complete: progress >= 100.0,
            days_remaining: days_remaining(campaign.deadline, now),
            deadline_over: campaign.deadline <= now,
            is_owner: viewer == Some(campaign.owner),
            has_invested: viewer.is_some_and(|v| campaign.is_funder(v)),
            campaign,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEntry {
    pub month: u32,
    pub payment_date: DateTime<Utc>,
    pub payment: f64,
    pub remaining_balance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoanView {
    #[serde(flatten)]
    pub loan: Loan,
    pub funding_progress: f64,
    pub is_requester: bool,
    pub is_lender: bool,
    pub total_repayment: Amount,
    pub repayment_schedule: Vec<ScheduleEntry>,
}

impl LoanView {
    pub fn new(loan: Loan, viewer: Option<Address>, now: DateTime<Utc>) -> Self {
        Self {
            funding_progress: funding_progress(loan.amount_collected.wei(), loan.amount.wei()),
            is_requester: viewer == Some(loan.requester),
            is_lender: viewer.is_some_and(|v| loan.is_lender(v)),
            total_repayment: Amount(repayment_due(loan.amount.wei())),
            repayment_schedule: compute_repayment_schedule(&loan, now),
            loan,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub total_invested: f64,
    pub total_startups: usize,
    pub avg_equity: f64,
    pub total_equity: f64,
    pub earliest_investment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Holding {
    pub campaign_id: CampaignId,
    pub campaign_title: String,
    pub total_invested: f64,
    pub certificates: Vec<InvestmentCertificate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub owner: Address,
    pub stats: PortfolioStats,
    pub holdings: Vec<Holding>,
    pub certificates: Vec<InvestmentCertificate>,
}

/// Everything the campaign detail page shows, fetched in one go.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub view: CampaignView,
    pub is_verifier: bool,
    pub has_investment: bool,
    pub invested_amount: Amount,
    pub certificates: Vec<InvestmentCertificate>,
    pub documents: Vec<Document>,
}

// ─────────────────────────────────────────────────────────
// Pure aggregation
// ─────────────────────────────────────────────────────────

/// Totals over a certificate list. An empty list yields zeros.
pub fn compute_portfolio_stats(certificates: &[InvestmentCertificate]) -> PortfolioStats {
    if certificates.is_empty() {
        return PortfolioStats::default();
    }
    let total_invested = certificates.iter().map(|c| c.investment_amount).sum();
    let total_equity: f64 = certificates.iter().map(|c| c.equity).sum();
    let total_startups = certificates
        .iter()
        .map(|c| c.campaign_id)
        .collect::<HashSet<_>>()
        .len();

    PortfolioStats {
        total_invested,
        total_startups,
        avg_equity: total_equity / certificates.len() as f64,
        total_equity,
        earliest_investment_date: certificates.iter().map(|c| c.investment_date).min(),
    }
}

/// Equal monthly payments of principal plus [`LOAN_INTEREST_RATE`], starting
/// one month after `start`. The remaining balance never goes below zero and
/// the last entry always closes at zero.
pub fn compute_repayment_schedule(loan: &Loan, start: DateTime<Utc>) -> Vec<ScheduleEntry> {
    let months = loan.duration_months;
    if months == 0 {
        return Vec::new();
    }
    let principal = loan.amount.as_f64();
    let total = principal + principal * LOAN_INTEREST_RATE;
    let payment = total / f64::from(months);

    let mut remaining = total;
    (1..=months)
        .map(|month| {
            remaining -= payment;
            let remaining_balance = if month == months { 0.0 } else { remaining.max(0.0) };
            ScheduleEntry {
                month,
                payment_date: start
                    .checked_add_months(Months::new(month))
                    .unwrap_or(start),
                payment,
                remaining_balance,
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────
// Aggregator
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Aggregator {
    chain: Arc<dyn ChainClient>,
    ipfs: Arc<IpfsBridge>,
    detail_timeout: Duration,
}

impl Aggregator {
    pub fn new(chain: Arc<dyn ChainClient>, ipfs: Arc<IpfsBridge>, detail_timeout: Duration) -> Self {
        Self {
            chain,
            ipfs,
            detail_timeout,
        }
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let now = Utc::now();
        let raw = self.chain.get_startups().await?;
        debug!("Fetched {} campaigns", raw.len());
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, s)| Campaign::from_raw(CampaignId(i as u64), s, now, &self.ipfs))
            .collect())
    }

    pub async fn list_loans(&self) -> Result<Vec<Loan>> {
        let raw = self.chain.get_loan_requests().await?;
        debug!("Fetched {} loans", raw.len());
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, l)| Loan::from_raw(LoanId(i as u64), l, &self.ipfs))
            .collect())
    }

    pub async fn campaign(&self, id: CampaignId) -> Result<Campaign> {
        self.list_campaigns()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("campaign {id}")))
    }

    pub async fn loan(&self, id: LoanId) -> Result<Loan> {
        self.list_loans()
            .await?
            .into_iter()
            .find(|l| l.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("loan {id}")))
    }

    pub async fn campaign_documents(&self, id: CampaignId) -> Result<Vec<Document>> {
        let raw = self.chain.get_startup_documents(id.as_u256()).await?;
        Ok(raw.iter().map(|d| Document::from_raw(d, &self.ipfs)).collect())
    }

    pub async fn loan_documents(&self, id: LoanId) -> Result<Vec<Document>> {
        let raw = self.chain.get_loan_documents(id.as_u256()).await?;
        Ok(raw.iter().map(|d| Document::from_raw(d, &self.ipfs)).collect())
    }

    pub async fn campaign_milestones(&self, id: CampaignId) -> Result<Vec<Milestone>> {
        let raw = self.chain.get_startup_milestones(id.as_u256()).await?;
        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, m)| Milestone::from_raw(i as u64, m, &self.ipfs))
            .collect())
    }

    pub async fn campaign_views(&self, viewer: Option<Address>) -> Result<Vec<CampaignView>> {
        let now = Utc::now();
        Ok(self
            .list_campaigns()
            .await?
            .into_iter()
            .map(|c| CampaignView::new(c, viewer, now))
            .collect())
    }

    pub async fn loan_views(&self, viewer: Option<Address>) -> Result<Vec<LoanView>> {
        let now = Utc::now();
        Ok(self
            .list_loans()
            .await?
            .into_iter()
            .map(|l| LoanView::new(l, viewer, now))
            .collect())
    }

    pub async fn loan_view(&self, id: LoanId, viewer: Option<Address>) -> Result<LoanView> {
        let loan = self.loan(id).await?;
        Ok(LoanView::new(loan, viewer, Utc::now()))
    }

    /// `false` when no viewer is connected.
    pub async fn is_verifier(&self, viewer: Option<Address>) -> Result<bool> {
        let Some(viewer) = viewer else {
            return Ok(false);
        };
        Ok(self.chain.verifier().await? == viewer)
    }

    /// `false` when no viewer is connected.
    pub async fn has_invested(&self, viewer: Option<Address>, id: CampaignId) -> Result<bool> {
        let Some(viewer) = viewer else {
            return Ok(false);
        };
        self.chain.has_investment_in(viewer, id.as_u256()).await
    }

    /// Zero when no viewer is connected.
    pub async fn investment_amount(&self, viewer: Option<Address>, id: CampaignId) -> Result<Amount> {
        let Some(viewer) = viewer else {
            return Ok(Amount::default());
        };
        let wei = self.chain.get_investment_amount(viewer, id.as_u256()).await?;
        Ok(Amount(wei))
    }

    /// All investment certificates held by `owner`, campaign by campaign.
    pub async fn get_investor_positions(&self, owner: Address) -> Result<Vec<InvestmentCertificate>> {
        let campaigns = self.chain.get_startups().await?;
        let mut certificates = Vec::new();

        for (i, startup) in campaigns.iter().enumerate() {
            let id = CampaignId(i as u64);
            let tokens = match self.chain.get_investor_tokens(owner, id.as_u256()).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    error!("Error getting tokens for campaign {id}: {e}");
                    continue;
                }
            };

            for token_id in tokens {
                match self.certificate(owner, id, &startup.title, token_id).await {
                    Ok(cert) => certificates.push(cert),
                    Err(e) => error!("Error processing token {token_id} for campaign {id}: {e}"),
                }
            }
        }

        debug!("Found {} certificates for {owner}", certificates.len());
        Ok(certificates)
    }

    async fn certificate(
        &self,
        owner: Address,
        campaign_id: CampaignId,
        title: &str,
        token_id: U256,
    ) -> Result<InvestmentCertificate> {
        let now = Utc::now();
        let metadata = match self.token_metadata(token_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Token {token_id} metadata unusable ({e}), rebuilding from contract reads");
                let amount = self
                    .chain
                    .get_investment_amount(owner, campaign_id.as_u256())
                    .await?;
                Metadata::fallback(title, Amount(amount), now)
            }
        };

        Ok(InvestmentCertificate::from_metadata(
            token_id.saturating_to(),
            campaign_id,
            title,
            owner,
            metadata,
            now,
        ))
    }

    async fn token_metadata(&self, token_id: U256) -> Result<Metadata> {
        let uri = self.chain.token_uri(token_id).await?;
        decode_token_uri(&uri, &self.ipfs).await
    }

    pub async fn portfolio(&self, owner: Address) -> Result<Portfolio> {
        let certificates = self.get_investor_positions(owner).await?;
        let stats = compute_portfolio_stats(&certificates);

        let mut grouped: BTreeMap<CampaignId, Holding> = BTreeMap::new();
        for cert in &certificates {
            let holding = grouped.entry(cert.campaign_id).or_insert_with(|| Holding {
                campaign_id: cert.campaign_id,
                campaign_title: cert.campaign_title.clone(),
                total_invested: 0.0,
                certificates: Vec::new(),
            });
            holding.total_invested += cert.investment_amount;
            holding.certificates.push(cert.clone());
        }

        Ok(Portfolio {
            owner,
            stats,
            holdings: grouped.into_values().collect(),
            certificates,
        })
    }

    /// The detail join, bounded by the configured timeout.
    pub async fn campaign_detail(&self, id: CampaignId, viewer: Option<Address>) -> Result<CampaignDetail> {
        match tokio::time::timeout(self.detail_timeout, self.load_detail(id, viewer)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!(
                "campaign {id} detail after {}s",
                self.detail_timeout.as_secs()
            ))),
        }
    }

    async fn load_detail(&self, id: CampaignId, viewer: Option<Address>) -> Result<CampaignDetail> {
        let campaign = self.campaign(id).await?;

        let is_verifier = self.is_verifier(viewer).await.unwrap_or_else(|e| {
            warn!("Error checking verifier status: {e}");
            false
        });
        let has_investment = self.has_invested(viewer, id).await.unwrap_or_else(|e| {
            warn!("Error checking investment in campaign {id}: {e}");
            false
        });
        let invested_amount = if has_investment {
            self.investment_amount(viewer, id).await.unwrap_or_else(|e| {
                warn!("Error getting investment amount for campaign {id}: {e}");
                Amount::default()
            })
        } else {
            Amount::default()
        };
        let certificates = match viewer {
            Some(viewer) if has_investment => self
                .get_investor_positions(viewer)
                .await
                .map(|certs| certs.into_iter().filter(|c| c.campaign_id == id).collect())
                .unwrap_or_else(|e| {
                    warn!("Error fetching certificates for campaign {id}: {e}");
                    Vec::new()
                }),
            _ => Vec::new(),
        };
        let documents = self.campaign_documents(id).await.unwrap_or_else(|e| {
            warn!("Error fetching documents for campaign {id}: {e}");
            Vec::new()
        });

        Ok(CampaignDetail {
            view: CampaignView::new(campaign, viewer, Utc::now()),
            is_verifier,
            has_investment,
            invested_amount,
            certificates,
            documents,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;
    use chrono::TimeZone;

    use super::*;
    use crate::chain::mock::MockChain;
    use crate::chain::ContractCall;
    use crate::ipfs::MockPinner;
    use crate::units::parse_display_amount;

    const OWNER: Address = address!("00000000000000000000000000000000000000a1");
    const INVESTOR: Address = address!("00000000000000000000000000000000000000b2");
    const VERIFIER: Address = address!("00000000000000000000000000000000000000c3");

    fn avax(s: &str) -> U256 {
        parse_display_amount(s).unwrap()
    }

    fn setup() -> (Arc<MockChain>, Aggregator) {
        let chain = Arc::new(MockChain::new(VERIFIER, 43113));
        let ipfs = Arc::new(IpfsBridge::new(
            Arc::new(MockPinner::new()),
            "https://gateway.pinata.cloud/ipfs/",
            "https://ipfs.io/ipfs/",
        ));
        let aggregator = Aggregator::new(chain.clone(), ipfs, Duration::from_secs(30));
        (chain, aggregator)
    }

    async fn create_campaign(chain: &MockChain, target: &str) {
        let deadline = (Utc::now() + chrono::Duration::days(30)).timestamp() as u64;
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
    }

    async fn fund(chain: &MockChain, from: Address, id: u64, amount: &str) {
        chain
            .send(
                from,
                ContractCall::FundStartup {
                    id: U256::from(id),
                    value: avax(amount),
                },
            )
            .await
            .unwrap();
    }

    fn cert(campaign: u64, amount: f64, equity: f64, ts: i64) -> InvestmentCertificate {
        InvestmentCertificate {
            token_id: 1,
            campaign_id: CampaignId(campaign),
            campaign_title: "t".into(),
            investment_amount: amount,
            investment_date: Utc.timestamp_opt(ts, 0).unwrap(),
            equity,
            owner: Address::ZERO,
            metadata: Metadata::fallback("t", Amount::default(), Utc::now()),
        }
    }

    fn loan(amount: &str, months: u32) -> Loan {
        Loan {
            id: LoanId(0),
            requester: OWNER,
            name: "n".into(),
            purpose: "p".into(),
            amount: Amount(avax(amount)),
            duration_months: months,
            amount_collected: Amount::default(),
            lenders: vec![],
            documents: vec![],
            repaid: false,
        }
    }

    #[test]
    fn empty_portfolio_is_all_zero() {
        let stats = compute_portfolio_stats(&[]);
        assert_eq!(stats, PortfolioStats::default());
        assert_eq!(stats.avg_equity, 0.0);
        assert!(stats.earliest_investment_date.is_none());
    }

    #[test]
    fn portfolio_stats_aggregate() {
        let certs = [
            cert(0, 2.0, 1.0, 2_000),
            cert(0, 3.0, 2.0, 1_000),
            cert(1, 5.0, 3.0, 3_000),
        ];
        let stats = compute_portfolio_stats(&certs);
        assert_eq!(stats.total_invested, 10.0);
        assert_eq!(stats.total_startups, 2);
        assert_eq!(stats.total_equity, 6.0);
        assert_eq!(stats.avg_equity, 2.0);
        assert_eq!(stats.earliest_investment_date.unwrap().timestamp(), 1_000);
    }

    #[test]
    fn repayment_schedule_conserves_total() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let schedule = compute_repayment_schedule(&loan("100", 3), start);
        assert_eq!(schedule.len(), 3);
        let paid: f64 = schedule.iter().map(|e| e.payment).sum();
        assert!((paid - 110.0).abs() < 1e-9);
        assert_eq!(schedule.last().unwrap().remaining_balance, 0.0);
        assert!(schedule
            .windows(2)
            .all(|w| w[0].remaining_balance >= w[1].remaining_balance));
        // month arithmetic clamps to the end of shorter months
        assert_eq!(
            schedule[0].payment_date,
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn zero_duration_has_no_schedule() {
        assert!(compute_repayment_schedule(&loan("100", 0), Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn funding_to_target_completes_the_campaign() {
        let (chain, aggregator) = setup();
        create_campaign(&chain, "100").await;
        fund(&chain, INVESTOR, 0, "60").await;

        let views = aggregator.campaign_views(Some(INVESTOR)).await.unwrap();
        assert_eq!(views[0].funding_progress, 60.0);
        assert!(!views[0].funding_complete);
        assert!(views[0].has_invested);
        assert!(!views[0].is_owner);
        assert!(!views[0].deadline_over);

        fund(&chain, INVESTOR, 0, "40").await;
        let views = aggregator.campaign_views(Some(INVESTOR)).await.unwrap();
        assert_eq!(views[0].funding_progress, 100.0);
        assert!(views[0].funding_complete);
    }

    #[tokio::test]
    async fn overfunding_is_clamped() {
        let (chain, aggregator) = setup();
        create_campaign(&chain, "10").await;
        fund(&chain, INVESTOR, 0, "25").await;
        let views = aggregator.campaign_views(None).await.unwrap();
        assert_eq!(views[0].funding_progress, 100.0);
    }

    #[tokio::test]
    async fn positions_skip_broken_tokens_and_fall_back() {
        let (chain, aggregator) = setup();
        create_campaign(&chain, "100").await;
        create_campaign(&chain, "50").await;
        fund(&chain, INVESTOR, 0, "2").await; // token 1
        fund(&chain, INVESTOR, 1, "3").await; // token 2

        // Undecodable URI: rebuilt from getInvestmentAmount.
        chain.set_token_uri(U256::from(1u64), "ar://gone").await;

        let certs = aggregator.get_investor_positions(INVESTOR).await.unwrap();
        assert_eq!(certs.len(), 2);
        assert_eq!(certs[0].investment_amount, 2.0);
        assert_eq!(certs[0].metadata.name, "Investment in Acme");
        assert_eq!(certs[1].investment_amount, 3.0);
        assert_eq!(certs[1].equity, 6.0);

        let portfolio = aggregator.portfolio(INVESTOR).await.unwrap();
        assert_eq!(portfolio.stats.total_invested, 5.0);
        assert_eq!(portfolio.stats.total_startups, 2);
        assert_eq!(portfolio.holdings.len(), 2);
    }

    #[tokio::test]
    async fn viewer_guards_default_without_account() {
        let (chain, aggregator) = setup();
        create_campaign(&chain, "1").await;
        assert!(!aggregator.is_verifier(None).await.unwrap());
        assert!(aggregator.is_verifier(Some(VERIFIER)).await.unwrap());
        assert!(!aggregator.has_invested(None, CampaignId(0)).await.unwrap());
        assert_eq!(
            aggregator
                .investment_amount(None, CampaignId(0))
                .await
                .unwrap()
                .display(),
            "0.0"
        );
    }

    #[tokio::test]
    async fn detail_joins_viewer_state() {
        let (chain, aggregator) = setup();
        create_campaign(&chain, "100").await;
        fund(&chain, INVESTOR, 0, "7").await;

        let detail = aggregator
            .campaign_detail(CampaignId(0), Some(INVESTOR))
            .await
            .unwrap();
        assert!(detail.has_investment);
        assert_eq!(detail.invested_amount.display(), "7.0");
        assert_eq!(detail.certificates.len(), 1);
        assert!(!detail.is_verifier);

        let missing = aggregator.campaign_detail(CampaignId(9), None).await;
        assert!(matches!(missing, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn loan_views_flag_requester_and_lender() {
        let (chain, aggregator) = setup();
        chain
            .send(
                OWNER,
                ContractCall::RequestLoan {
                    requester: OWNER,
                    name: "Bridge".into(),
                    purpose: "Stock".into(),
                    amount: avax("10"),
                    duration: U256::from(2u64),
                },
            )
            .await
            .unwrap();
        chain
            .send(
                INVESTOR,
                ContractCall::FundLoan {
                    id: U256::ZERO,
                    value: avax("4"),
                },
            )
            .await
            .unwrap();

        let view = aggregator.loan_view(LoanId(0), Some(INVESTOR)).await.unwrap();
        assert!(view.is_lender);
        assert!(!view.is_requester);
        assert_eq!(view.funding_progress, 40.0);
        assert_eq!(view.total_repayment.display(), "11.0");
        assert_eq!(view.repayment_schedule.len(), 2);
    }
}
