//! Startup funding gateway entry point.
//!
//! Reads campaigns, loans and investment NFTs from the funding contract,
//! submits writes for the configured account, pins documents to IPFS, and
//! keeps an activity feed in SQLite from a background sync task. Everything
//! is exposed through a small Axum REST API.

mod abi;
mod activity;
mod aggregator;
mod api;
mod chain;
mod config;
mod db;
mod errors;
mod ipfs;
mod metadata;
mod models;
mod session;
mod sync;
mod units;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aggregator::Aggregator;
use chain::mock::MockChain;
use chain::rpc::RpcChainClient;
use chain::ChainClient;
use config::{ChainSource, Config};
use ipfs::{IpfsBridge, IpfsPinner, MockPinner, PinataClient};
use session::{Session, SettlePolicy};
use sync::SyncState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by the RPC client, the pinning service and metadata reads.
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

    // ─── Chain ────────────────────────────────────────────
    let chain: Arc<dyn ChainClient> = match config.chain_source {
        ChainSource::Live => {
            let contract = config
                .contract_address
                .ok_or_else(|| anyhow::anyhow!("CONTRACT_ADDRESS is required for the live chain"))?;
            info!("Using contract {contract} via {}", config.rpc_url);
            Arc::new(RpcChainClient::new(
                client.clone(),
                config.rpc_url.clone(),
                contract,
                config.chain_id,
            ))
        }
        ChainSource::Mock => {
            let verifier = config.account.unwrap_or(Address::ZERO);
            info!("Using in-memory mock contract (verifier {verifier})");
            Arc::new(MockChain::new(verifier, config.chain_id))
        }
    };

    match chain.chain_id().await {
        Ok(id) if id == config.chain_id => info!("Connected to chain {id}"),
        Ok(id) => anyhow::bail!("RPC reports chain {id}, expected {}", config.chain_id),
        Err(e) => warn!("Could not verify chain id: {e}"),
    }

    // ─── IPFS ─────────────────────────────────────────────
    let pinner: Arc<dyn IpfsPinner> = match (&config.pinata_jwt, config.chain_source) {
        (None, ChainSource::Mock) => {
            info!("No PINATA_JWT, pinning to memory");
            Arc::new(MockPinner::new())
        }
        (jwt, _) => {
            if jwt.is_none() {
                warn!("PINATA_JWT is not set; uploads will fail");
            }
            Arc::new(PinataClient::new(
                client.clone(),
                &config.pinata_api_url,
                jwt.clone(),
            ))
        }
    };
    let ipfs = Arc::new(IpfsBridge::new(
        pinner,
        &config.ipfs_gateway_url,
        &config.ipfs_read_gateway_url,
    ));

    // ─── Read and write sides ─────────────────────────────
    let aggregator = Aggregator::new(
        chain.clone(),
        ipfs.clone(),
        Duration::from_secs(config.detail_timeout_secs),
    );
    let settle = if config.await_receipts {
        SettlePolicy::Receipt {
            timeout: Duration::from_secs(config.receipt_timeout_secs),
            poll: Duration::from_secs(1),
        }
    } else {
        SettlePolicy::Delay(Duration::from_millis(config.settle_delay_ms))
    };
    match config.account {
        Some(account) => info!("Writes are submitted as {account}"),
        None => warn!("ACCOUNT_ADDRESS is not set; write endpoints will reject requests"),
    }
    let session = Session::new(
        chain.clone(),
        ipfs.clone(),
        aggregator.clone(),
        config.account,
        settle,
    );

    // ─── Background activity sync ─────────────────────────
    let cancel = CancellationToken::new();
    let sync_state = Arc::new(SyncState {
        pool: pool.clone(),
        chain,
        poll_interval: Duration::from_secs(config.poll_interval_secs),
    });
    let sync_task = tokio::spawn(sync::run(sync_state, cancel.clone()));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        aggregator,
        session,
        ipfs,
        pool,
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = sync_task.await;
    Ok(())
}
