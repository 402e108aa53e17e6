//! Mirror entry store
//!
//! Keyed repository from origin item to mirror post(s). No business logic: each
//! operation is a single statement, atomic for its key.

use sqlx::{FromRow, SqlitePool};
use starboard_common::{Error, Result};

use crate::types::{GuildId, MessageId, MirrorEntry};
use crate::utils::retry_on_lock;
use crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS;

#[derive(Debug, FromRow)]
struct EntryRow {
    origin_id: i64,
    mirror_id: i64,
    guild_id: i64,
    origin_channel_id: Option<i64>,
    reply_context_mirror_id: Option<i64>,
}

impl From<EntryRow> for MirrorEntry {
    fn from(row: EntryRow) -> Self {
        MirrorEntry {
            origin_id: row.origin_id as u64,
            mirror_id: row.mirror_id as u64,
            guild_id: row.guild_id as u64,
            origin_channel_id: row.origin_channel_id.map(|id| id as u64),
            reply_context_mirror_id: row.reply_context_mirror_id.map(|id| id as u64),
        }
    }
}

const SELECT_ENTRY: &str = "SELECT origin_id, mirror_id, guild_id, origin_channel_id, reply_context_mirror_id FROM mirror_entries";

#[derive(Clone)]
pub struct EntryStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl EntryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, origin_id: MessageId) -> Result<Option<MirrorEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!("{} WHERE origin_id = ?", SELECT_ENTRY))
            .bind(origin_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    /// Entry whose primary or reply-context post is `post_id`
    pub async fn find_by_mirror(&self, post_id: MessageId) -> Result<Option<MirrorEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "{} WHERE mirror_id = ? OR reply_context_mirror_id = ? LIMIT 1",
            SELECT_ENTRY
        ))
        .bind(post_id as i64)
        .bind(post_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Insert or replace the entry for `entry.origin_id`
    pub async fn upsert(&self, entry: &MirrorEntry) -> Result<()> {
        retry_on_lock("upsert_entry", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO mirror_entries (
                    origin_id, mirror_id, guild_id, origin_channel_id, reply_context_mirror_id
                ) VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(origin_id) DO UPDATE SET
                    mirror_id = excluded.mirror_id,
                    guild_id = excluded.guild_id,
                    origin_channel_id = excluded.origin_channel_id,
                    reply_context_mirror_id = excluded.reply_context_mirror_id
                "#,
            )
            .bind(entry.origin_id as i64)
            .bind(entry.mirror_id as i64)
            .bind(entry.guild_id as i64)
            .bind(entry.origin_channel_id.map(|id| id as i64))
            .bind(entry.reply_context_mirror_id.map(|id| id as i64))
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            Ok::<(), Error>(())
        })
        .await
    }

    /// Returns whether an entry existed
    pub async fn remove(&self, origin_id: MessageId) -> Result<bool> {
        let result = retry_on_lock("remove_entry", self.max_lock_wait_ms, || async {
            sqlx::query("DELETE FROM mirror_entries WHERE origin_id = ?")
                .bind(origin_id as i64)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn all_for_guild(&self, guild_id: GuildId) -> Result<Vec<MirrorEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "{} WHERE guild_id = ? ORDER BY origin_id",
            SELECT_ENTRY
        ))
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Returns the number of entries removed
    pub async fn clear_for_guild(&self, guild_id: GuildId) -> Result<u64> {
        let result = retry_on_lock("clear_guild_entries", self.max_lock_wait_ms, || async {
            sqlx::query("DELETE FROM mirror_entries WHERE guild_id = ?")
                .bind(guild_id as i64)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)
        })
        .await?;
        tracing::info!(guild_id, removed = result.rows_affected(), "Cleared mirror entries");
        Ok(result.rows_affected())
    }
}
