//! Database layer: migrations, activity queries and the sync cursor.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::activity::{Activity, ActivityRecord, EntityType};
use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    // Every in-memory connection is its own database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Cursor helpers
// ─────────────────────────────────────────────────────────

/// Last block whose snapshot was processed; `0` before the first sync.
pub async fn get_last_block(pool: &SqlitePool) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT last_block FROM sync_cursor WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v).unwrap_or(0))
}

pub async fn save_cursor(pool: &SqlitePool, last_block: i64) -> Result<()> {
    sqlx::query("UPDATE sync_cursor SET last_block = ?1 WHERE id = 1")
        .bind(last_block)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Activity writes
// ─────────────────────────────────────────────────────────

/// Persist a batch of activity observed at `block`. Rows whose fingerprint
/// is already stored are ignored, so replays are harmless.
pub async fn insert_activities(pool: &SqlitePool, block: i64, activity: &[Activity]) -> Result<usize> {
    let mut count = 0usize;
    for a in activity {
        let rows_affected = sqlx::query(
            r#"
            INSERT OR IGNORE INTO activity
                (kind, entity_type, entity_id, actor, amount, detail, block, fingerprint)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(a.kind.as_str())
        .bind(a.entity_type.as_str())
        .bind(a.entity_id as i64)
        .bind(a.actor.map(|addr| addr.to_string()))
        .bind(a.amount.map(|wei| wei.to_string()))
        .bind(a.detail.as_deref())
        .bind(block)
        .bind(&a.fingerprint)
        .execute(pool)
        .await?
        .rows_affected();

        count += rows_affected as usize;
    }
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Activity reads
// ─────────────────────────────────────────────────────────

/// Activity for one campaign or loan, oldest first.
pub async fn get_activity_for(
    pool: &SqlitePool,
    entity_type: EntityType,
    entity_id: u64,
) -> Result<Vec<ActivityRecord>> {
    let rows = sqlx::query_as::<_, ActivityRecord>(
        r#"
        SELECT id, kind, entity_type, entity_id, actor, amount, detail, block,
               fingerprint, created_at
        FROM   activity
        WHERE  entity_type = ?1 AND entity_id = ?2
        ORDER  BY block ASC, id ASC
        "#,
    )
    .bind(entity_type.as_str())
    .bind(entity_id as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All activity, oldest first.
pub async fn get_all_activity(pool: &SqlitePool) -> Result<Vec<ActivityRecord>> {
    let rows = sqlx::query_as::<_, ActivityRecord>(
        r#"
        SELECT id, kind, entity_type, entity_id, actor, amount, detail, block,
               fingerprint, created_at
        FROM   activity
        ORDER  BY block ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
