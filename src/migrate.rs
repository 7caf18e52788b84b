use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema setup, shared with tests that run on a fresh pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Connection endpoints; the hub is a plain grouping key, no table of its own
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connections (
            id TEXT PRIMARY KEY,
            entity TEXT NOT NULL,
            hub TEXT NOT NULL,
            template TEXT,
            range_text TEXT,
            range_start INTEGER NOT NULL DEFAULT 0,
            range_end INTEGER NOT NULL DEFAULT 0,
            filename TEXT,
            language TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Entity records; one row per language edition sharing shared_id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            shared_id TEXT NOT NULL,
            language TEXT NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'entity',
            template TEXT,
            published INTEGER,
            creation_date INTEGER NOT NULL DEFAULT 0,
            filename TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(shared_id, language)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            properties_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relationtypes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dictionaries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            values_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only change log driving incremental sync
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS changelog (
            timestamp INTEGER NOT NULL,
            namespace TEXT NOT NULL,
            record_id TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row watermark
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS syncs (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sync INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row settings record holding the sync configuration as JSON
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            sync_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_connections_entity ON connections(entity)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_connections_hub ON connections(hub)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_connections_template ON connections(template)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_changelog_timestamp ON changelog(timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_shared_id ON entities(shared_id)")
        .execute(pool)
        .await?;

    Ok(())
}
