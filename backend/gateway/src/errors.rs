//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI decode error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("IPFS upload failed: {0}")]
    UploadFailed(String),

    /// The file is pinned but the on-chain registration did not go through,
    /// so nothing references `cid` any more.
    #[error("Document {cid} uploaded but not registered on-chain: {reason}")]
    OrphanedUpload { cid: String, reason: String },

    #[error("No account connected")]
    NotConnected,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
