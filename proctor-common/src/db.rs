//! Database pool initialization and schema migrations
//!
//! One SQLite file carries both the queue tables and the status ledger, so a
//! publish and the matching history entry share a storage domain.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if needed) the pipeline database and run migrations.
pub async fn init_db_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests and drain-once tooling.
///
/// Capped at one connection: every pooled connection to `:memory:` would
/// otherwise open its own empty database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queues (
            name TEXT PRIMARY KEY,
            durable INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            body TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'ready',
            attempts INTEGER NOT NULL DEFAULT 0,
            visible_at INTEGER NOT NULL DEFAULT 0,
            locked_at INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_messages_claim
         ON queue_messages(queue, state, visible_at, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interviews (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            processing_attempts INTEGER NOT NULL DEFAULT 0,
            results TEXT,
            completed_at TEXT,
            last_updated TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Required for batch-selection queries over pending interviews
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_interviews_status ON interviews(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interview_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            interview_id TEXT NOT NULL,
            ts TEXT NOT NULL,
            status TEXT NOT NULL,
            stage TEXT NOT NULL,
            actor TEXT NOT NULL,
            message TEXT,
            error TEXT,
            attempt INTEGER,
            details TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interview_history_interview
         ON interview_history(interview_id, id)",
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (queues, queue_messages, interviews, interview_history)"
    );

    Ok(())
}
