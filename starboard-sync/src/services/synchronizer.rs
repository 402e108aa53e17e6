//! Signal synchronizer
//!
//! Event-driven handling of reaction add/remove notifications. Every mutation for
//! one origin runs under that origin's lock and re-reads the live count, so the
//! final entry state matches "latest count >= threshold" whatever order events
//! arrive in.

use std::sync::Arc;

use crate::error::MirrorResult;
use crate::services::assembler::header_line;
use crate::services::executor::CallPolicy;
use crate::services::publisher::MirrorPublisher;
use crate::types::{ChannelId, GuildConfig, GuildId, MessageId, MirrorEntry, OriginItem, SignalEvent, UserId};

/// What a signal event did to the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    /// Not a signal this guild tracks
    Ignored,
    BelowThreshold,
    Created,
    Updated,
    Removed,
    /// Entry was stale and the mirror was posted again
    Recreated,
}

pub struct SignalSynchronizer {
    publisher: Arc<MirrorPublisher>,
    self_user_id: Option<UserId>,
}

impl SignalSynchronizer {
    pub fn new(publisher: Arc<MirrorPublisher>, self_user_id: Option<UserId>) -> Self {
        Self {
            publisher,
            self_user_id,
        }
    }

    pub async fn handle_signal_added(&self, event: &SignalEvent) -> MirrorResult<SignalOutcome> {
        let Some((config, mirror_channel)) = self.relevant(event).await? else {
            return Ok(SignalOutcome::Ignored);
        };

        let _guard = self.publisher.lock_item(event.message_id).await;
        let entry = self.publisher.entries().get(event.message_id).await?;
        self.converge(event, &config, mirror_channel, entry).await
    }

    pub async fn handle_signal_removed(&self, event: &SignalEvent) -> MirrorResult<SignalOutcome> {
        let Some((config, mirror_channel)) = self.relevant(event).await? else {
            return Ok(SignalOutcome::Ignored);
        };

        let _guard = self.publisher.lock_item(event.message_id).await;
        let Some(entry) = self.publisher.entries().get(event.message_id).await? else {
            return Ok(SignalOutcome::Ignored);
        };
        self.converge(event, &config, mirror_channel, Some(entry)).await
    }

    /// A mirror post was deleted by hand: drop its entry and the companion post
    pub async fn handle_mirror_deleted(
        &self,
        guild_id: GuildId,
        post_id: MessageId,
    ) -> MirrorResult<SignalOutcome> {
        let config = self.publisher.guild_config(guild_id).await?;
        let Some(mirror_channel) = config.mirror_channel_id else {
            return Ok(SignalOutcome::Ignored);
        };
        let Some(found) = self.publisher.entries().find_by_mirror(post_id).await? else {
            return Ok(SignalOutcome::Ignored);
        };

        let _guard = self.publisher.lock_item(found.origin_id).await;
        // re-read under the lock; the entry may have been replaced meanwhile
        let Some(entry) = self.publisher.entries().get(found.origin_id).await? else {
            return Ok(SignalOutcome::Ignored);
        };
        if entry.mirror_id != post_id && entry.reply_context_mirror_id != Some(post_id) {
            return Ok(SignalOutcome::Ignored);
        }

        self.publisher
            .remove_mirror(&entry, mirror_channel, CallPolicy::Direct)
            .await?;
        Ok(SignalOutcome::Removed)
    }

    /// Guild settings if this event is one the mirror should act on
    async fn relevant(&self, event: &SignalEvent) -> MirrorResult<Option<(GuildConfig, ChannelId)>> {
        if self.self_user_id == Some(event.user_id) {
            return Ok(None);
        }
        let config = self.publisher.guild_config(event.guild_id).await?;
        let Some(mirror_channel) = config.mirror_channel_id else {
            return Ok(None);
        };
        if event.emoji != config.signal_kind || event.channel_id == mirror_channel {
            return Ok(None);
        }
        Ok(Some((config, mirror_channel)))
    }

    /// Bring the mirror for one origin in line with its live count. Caller holds the item lock.
    async fn converge(
        &self,
        event: &SignalEvent,
        config: &GuildConfig,
        mirror_channel: ChannelId,
        entry: Option<MirrorEntry>,
    ) -> MirrorResult<SignalOutcome> {
        let store = self.publisher.store();
        let item = match store.fetch_item(event.item()).await {
            Ok(item) => item,
            Err(e) if e.is_not_found() => {
                tracing::info!(origin_id = event.message_id, "Origin is gone");
                return match entry {
                    Some(entry) => {
                        self.publisher
                            .remove_mirror(&entry, mirror_channel, CallPolicy::Direct)
                            .await?;
                        Ok(SignalOutcome::Removed)
                    }
                    None => Ok(SignalOutcome::Ignored),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let count = item.signal_count(&config.signal_kind);
        tracing::debug!(origin_id = item.id(), count, threshold = config.threshold, "Live signal count");

        match (config.qualifies(count), entry) {
            (false, None) => Ok(SignalOutcome::BelowThreshold),
            (false, Some(entry)) => {
                self.publisher
                    .remove_mirror(&entry, mirror_channel, CallPolicy::Direct)
                    .await?;
                Ok(SignalOutcome::Removed)
            }
            (true, None) => {
                self.publisher
                    .create_mirror(&item, config, mirror_channel, CallPolicy::Direct)
                    .await?;
                Ok(SignalOutcome::Created)
            }
            (true, Some(entry)) => self.refresh(&item, config, mirror_channel, entry, count).await,
        }
    }

    /// Edit the count line; a vanished post means the entry was stale
    async fn refresh(
        &self,
        item: &OriginItem,
        config: &GuildConfig,
        mirror_channel: ChannelId,
        entry: MirrorEntry,
        count: u32,
    ) -> MirrorResult<SignalOutcome> {
        let header = header_line(&config.signal_kind, count, item.item.channel_id);
        match self
            .publisher
            .store()
            .edit(mirror_channel, entry.mirror_id, &header)
            .await
        {
            Ok(()) => Ok(SignalOutcome::Updated),
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    origin_id = entry.origin_id,
                    mirror_id = entry.mirror_id,
                    "Mirror post missing, recreating"
                );
                self.publisher
                    .remove_mirror(&entry, mirror_channel, CallPolicy::Direct)
                    .await?;
                self.publisher
                    .create_mirror(item, config, mirror_channel, CallPolicy::Direct)
                    .await?;
                Ok(SignalOutcome::Recreated)
            }
            Err(e) => Err(e.into()),
        }
    }
}
