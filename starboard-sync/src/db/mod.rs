//! Database access
//!
//! SQLite holds the mirror entry table and per-guild configuration.

pub mod entries;
pub mod guild_config;

pub use entries::EntryStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use starboard_common::Result;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Columns added after the first schema revision; older databases get them on startup
const LATE_COLUMNS: &[(&str, &str, &str)] = &[
    ("mirror_entries", "origin_channel_id", "INTEGER"),
    ("mirror_entries", "reply_context_mirror_id", "INTEGER"),
];

/// Open (creating if needed) the database file and bring its schema up to date
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables if missing, then add any late columns
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mirror_entries (
            origin_id INTEGER PRIMARY KEY,
            mirror_id INTEGER NOT NULL,
            guild_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guild_config (
            guild_id INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (guild_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (table, column, sql_type) in LATE_COLUMNS {
        ensure_column(pool, table, column, sql_type).await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mirror_entries_guild ON mirror_entries (guild_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mirror_entries_mirror ON mirror_entries (mirror_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (mirror_entries, guild_config)");

    Ok(())
}

/// Add `column` to `table` unless PRAGMA table_info already lists it
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, sql_type: &str) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;
    let exists = rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column);

    if !exists {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, sql_type))
            .execute(pool)
            .await?;
        tracing::info!(table, column, "Added missing column");
    }
    Ok(())
}
