//! Long-running background task that turns contract snapshots into activity.
//!
//! Each poll checks the chain head; when it moved, the full campaign and loan
//! collections are re-read and diffed against the previous snapshot.
//!
//! The saved cursor seeds the first snapshot after start-up: if the head has
//! not moved past it, everything on chain was already recorded and the read
//! becomes the baseline without writing. Otherwise the first read is diffed
//! against nothing and the stored fingerprints absorb what was recorded
//! before the restart.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::abi;
use crate::activity::{diff_campaigns, diff_loans};
use crate::chain::ChainClient;
use crate::db;
use crate::errors::Result;

pub struct SyncState {
    pub pool: SqlitePool,
    pub chain: Arc<dyn ChainClient>,
    pub poll_interval: Duration,
}

/// The collections as of `block`.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub block: Option<u64>,
    /// Last block whose activity is already stored.
    pub cursor: u64,
    pub startups: Vec<abi::Startup>,
    pub loans: Vec<abi::LoanRequest>,
}

impl Snapshot {
    /// An empty snapshot that trusts activity up to `cursor` as recorded.
    pub fn resume(cursor: u64) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }
}

/// Run the sync loop until `cancel` fires.
pub async fn run(state: Arc<SyncState>, cancel: CancellationToken) {
    let last_block = db::get_last_block(&state.pool).await.unwrap_or(0);
    info!("Activity sync starting (last processed block {last_block})");

    let mut snapshot = Snapshot::resume(last_block.max(0) as u64);

    loop {
        if let Err(e) = poll_once(&state.pool, state.chain.as_ref(), &mut snapshot).await {
            error!("Activity sync poll error: {e}");
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Activity sync stopped");
                return;
            }
            _ = tokio::time::sleep(state.poll_interval) => {}
        }
    }
}

/// Perform a single poll iteration. Returns the number of new records.
pub async fn poll_once(
    pool: &SqlitePool,
    chain: &dyn ChainClient,
    snapshot: &mut Snapshot,
) -> Result<usize> {
    let head = chain.block_number().await?;
    if snapshot.block == Some(head) {
        debug!("No new block (head {head})");
        return Ok(0);
    }

    let startups = chain.get_startups().await?;
    let loans = chain.get_loan_requests().await?;

    if snapshot.block.is_none() && head <= snapshot.cursor {
        info!("Head {head} already processed (cursor {}), adopting as baseline", snapshot.cursor);
        *snapshot = Snapshot {
            block: Some(head),
            cursor: snapshot.cursor,
            startups,
            loans,
        };
        return Ok(0);
    }

    let mut activity = diff_campaigns(&snapshot.startups, &startups, head);
    activity.extend(diff_loans(&snapshot.loans, &loans));

    let inserted = if activity.is_empty() {
        0
    } else {
        db::insert_activities(pool, head as i64, &activity).await?
    };
    if inserted > 0 {
        info!(
            "Block {head}: {} changes → {inserted} new activity records",
            activity.len()
        );
    }

    // Persist cursor so restarts are observable.
    db::save_cursor(pool, head as i64).await?;

    *snapshot = Snapshot {
        block: Some(head),
        cursor: head,
        startups,
        loans,
    };
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, Address, U256};
    use chrono::Utc;

    use super::*;
    use crate::chain::mock::MockChain;
    use crate::chain::ContractCall;

    const OWNER: Address = address!("00000000000000000000000000000000000000a1");
    const INVESTOR: Address = address!("00000000000000000000000000000000000000b2");

    async fn create(chain: &MockChain) {
        let deadline = (Utc::now() + chrono::Duration::days(5)).timestamp() as u64;
        chain
            .send(
                OWNER,
                ContractCall::CreateStartup {
                    owner: OWNER,
                    title: "Acme".into(),
                    description: String::new(),
                    equity_holders: vec![],
                    pitch_video: String::new(),
                    image: String::new(),
                    target: U256::from(100u64),
                    deadline: U256::from(deadline),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn polls_record_changes_once() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        let chain = MockChain::new(Address::ZERO, 43113);
        create(&chain).await;

        let mut snapshot = Snapshot::default();
        assert_eq!(poll_once(&pool, &chain, &mut snapshot).await.unwrap(), 1);
        // Head unchanged: nothing to do.
        assert_eq!(poll_once(&pool, &chain, &mut snapshot).await.unwrap(), 0);

        chain
            .send(
                INVESTOR,
                ContractCall::FundStartup {
                    id: U256::ZERO,
                    value: U256::from(10u64),
                },
            )
            .await
            .unwrap();
        assert_eq!(poll_once(&pool, &chain, &mut snapshot).await.unwrap(), 1);
        assert_eq!(db::get_last_block(&pool).await.unwrap(), 2);

        let kinds: Vec<String> = db::get_all_activity(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec!["campaign_created", "campaign_funded"]);
    }

    #[tokio::test]
    async fn restart_does_not_duplicate_history() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        let chain = MockChain::new(Address::ZERO, 43113);
        create(&chain).await;

        let mut first = Snapshot::default();
        poll_once(&pool, &chain, &mut first).await.unwrap();

        let mut after_restart = Snapshot::default();
        assert_eq!(poll_once(&pool, &chain, &mut after_restart).await.unwrap(), 0);
        assert_eq!(db::get_all_activity(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resumed_snapshot_skips_processed_head() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        let chain = MockChain::new(Address::ZERO, 43113);
        create(&chain).await;
        chain
            .send(
                INVESTOR,
                ContractCall::FundStartup {
                    id: U256::ZERO,
                    value: U256::from(10u64),
                },
            )
            .await
            .unwrap();

        // A cursor saved at the current head, with no local rows to dedupe against.
        let cursor = chain.block_number().await.unwrap();
        db::save_cursor(&pool, cursor as i64).await.unwrap();

        let mut resumed = Snapshot::resume(cursor);
        assert_eq!(poll_once(&pool, &chain, &mut resumed).await.unwrap(), 0);
        assert_eq!(resumed.block, Some(cursor));
        assert!(db::get_all_activity(&pool).await.unwrap().is_empty());

        chain
            .send(
                OWNER,
                ContractCall::FundStartup {
                    id: U256::ZERO,
                    value: U256::from(5u64),
                },
            )
            .await
            .unwrap();
        assert_eq!(poll_once(&pool, &chain, &mut resumed).await.unwrap(), 1);
        let rows = db::get_all_activity(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "campaign_funded");
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        let state = Arc::new(SyncState {
            pool,
            chain: Arc::new(MockChain::new(Address::ZERO, 43113)),
            poll_interval: Duration::from_secs(3600),
        });
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(state, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
