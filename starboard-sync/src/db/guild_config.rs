//! Per-guild mirror configuration
//!
//! Stored as key/value rows so new settings need no migration. Missing or
//! unparseable values fall back to the configured defaults.

use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use starboard_common::config::MirrorDefaults;
use starboard_common::{Error, Result};

use crate::types::{GuildConfig, GuildId};

const KEY_MIRROR_CHANNEL: &str = "mirror_channel_id";
const KEY_SIGNAL_KIND: &str = "signal_kind";
const KEY_THRESHOLD: &str = "threshold";

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuildConfigUpdate {
    pub mirror_channel_id: Option<u64>,
    pub signal_kind: Option<String>,
    pub threshold: Option<u32>,
}

pub async fn get_guild_config(
    pool: &SqlitePool,
    guild_id: GuildId,
    defaults: &MirrorDefaults,
) -> Result<GuildConfig> {
    let rows = sqlx::query("SELECT key, value FROM guild_config WHERE guild_id = ?")
        .bind(guild_id as i64)
        .fetch_all(pool)
        .await?;

    let mut config = GuildConfig {
        mirror_channel_id: None,
        signal_kind: defaults.signal_kind.clone(),
        threshold: defaults.threshold,
    };

    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            KEY_MIRROR_CHANNEL => config.mirror_channel_id = value.trim().parse().ok(),
            KEY_SIGNAL_KIND if !value.trim().is_empty() => config.signal_kind = value,
            KEY_THRESHOLD => {
                if let Some(threshold) = value.trim().parse().ok().filter(|t: &u32| *t > 0) {
                    config.threshold = threshold;
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

pub async fn set_guild_config(
    pool: &SqlitePool,
    guild_id: GuildId,
    update: &GuildConfigUpdate,
) -> Result<()> {
    if update.threshold == Some(0) {
        return Err(Error::InvalidInput("threshold must be positive".to_string()));
    }
    if update.signal_kind.as_deref().is_some_and(|k| k.trim().is_empty()) {
        return Err(Error::InvalidInput("signal kind must not be empty".to_string()));
    }

    let mut tx = pool.begin().await?;
    let values = [
        (KEY_MIRROR_CHANNEL, update.mirror_channel_id.map(|id| id.to_string())),
        (KEY_SIGNAL_KIND, update.signal_kind.clone()),
        (KEY_THRESHOLD, update.threshold.map(|t| t.to_string())),
    ];
    for (key, value) in values {
        if let Some(value) = value {
            sqlx::query(
                "INSERT INTO guild_config (guild_id, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT(guild_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(guild_id as i64)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    tracing::info!(guild_id, ?update, "Guild mirror configuration updated");
    Ok(())
}
