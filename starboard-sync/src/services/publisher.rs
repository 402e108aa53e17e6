//! Mirror post creation and removal
//!
//! Shared by the signal synchronizer and the reconciliation jobs. Creation
//! handles reply threading: a replied-to origin is mirrored first as a context
//! post and the main mirror is posted as a reply to it. Partial failures clean up
//! whatever was already posted, so a failed create leaves no orphans behind.

use chrono::Utc;
use starboard_common::config::MirrorDefaults;
use starboard_common::events::{EventBus, MirrorEvent};
use std::sync::Arc;

use crate::db::guild_config::get_guild_config;
use crate::db::EntryStore;
use crate::error::{MirrorError, MirrorResult};
use crate::external::{ContentStore, ExternalResult, MirrorPost};
use crate::services::assembler::{
    header_line, tombstone_content, tombstone_header, ContentAssembler,
};
use crate::services::executor::CallPolicy;
use crate::services::item_locks::{ItemGuard, ItemLocks};
use crate::types::{ChannelId, GuildConfig, GuildId, ItemRef, MessageId, MirrorEntry, OriginItem};

pub struct MirrorPublisher {
    store: Arc<dyn ContentStore>,
    entries: EntryStore,
    assembler: ContentAssembler,
    events: EventBus,
    defaults: MirrorDefaults,
    locks: ItemLocks,
}

impl MirrorPublisher {
    pub fn new(
        store: Arc<dyn ContentStore>,
        entries: EntryStore,
        events: EventBus,
        defaults: MirrorDefaults,
    ) -> Self {
        Self {
            assembler: ContentAssembler::new(store.clone()),
            store,
            entries,
            events,
            defaults,
            locks: ItemLocks::new(),
        }
    }

    /// Serialize every mutation of one origin's mirror
    pub async fn lock_item(&self, origin_id: MessageId) -> ItemGuard<'_> {
        self.locks.acquire(origin_id).await
    }

    /// Lock two distinct origins, lowest id first
    pub async fn lock_pair(&self, a: MessageId, b: MessageId) -> (ItemGuard<'_>, ItemGuard<'_>) {
        debug_assert_ne!(a, b);
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let low = self.locks.acquire(low).await;
        let high = self.locks.acquire(high).await;
        (low, high)
    }

    /// Number of origins currently holding a lock handle
    pub fn active_locks(&self) -> usize {
        self.locks.tracked()
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn entries(&self) -> &EntryStore {
        &self.entries
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Guild settings with defaults applied
    pub async fn guild_config(&self, guild_id: GuildId) -> MirrorResult<GuildConfig> {
        Ok(get_guild_config(self.entries.pool(), guild_id, &self.defaults).await?)
    }

    /// Guild settings, failing when mirroring is not set up for the guild
    pub async fn configured(&self, guild_id: GuildId) -> MirrorResult<(GuildConfig, ChannelId)> {
        let config = self.guild_config(guild_id).await?;
        match config.mirror_channel_id {
            Some(channel) => Ok((config, channel)),
            None => Err(MirrorError::NotConfigured(guild_id)),
        }
    }

    /// Post the mirror (and reply context, if any) for `item` and persist its entry
    pub async fn create_mirror(
        &self,
        item: &OriginItem,
        config: &GuildConfig,
        mirror_channel: ChannelId,
        policy: CallPolicy<'_>,
    ) -> MirrorResult<MirrorEntry> {
        let header = header_line(
            &config.signal_kind,
            item.signal_count(&config.signal_kind),
            item.item.channel_id,
        );
        let content = self.assembler.assemble(item).await;

        let context_id = match item.reply_to {
            Some(parent) => self.post_reply_context(item, parent, mirror_channel, policy).await?,
            None => None,
        };

        let main = MirrorPost {
            header: Some(header),
            content,
            reply_to: context_id,
        };
        let mirror_id = match self.post(mirror_channel, &main, policy).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(context_id) = context_id {
                    self.discard_post(mirror_channel, context_id, policy).await;
                }
                return Err(e.into());
            }
        };

        let entry = MirrorEntry {
            origin_id: item.id(),
            mirror_id,
            guild_id: item.item.guild_id,
            origin_channel_id: Some(item.item.channel_id),
            reply_context_mirror_id: context_id,
        };
        self.persist(&entry, mirror_channel, policy).await?;

        tracing::info!(
            origin_id = entry.origin_id,
            mirror_id,
            reply_context = ?context_id,
            "Mirror created"
        );
        self.events.emit_lossy(MirrorEvent::MirrorCreated {
            guild_id: entry.guild_id,
            origin_id: entry.origin_id,
            mirror_id,
            timestamp: Utc::now(),
        });
        Ok(entry)
    }

    /// Placeholder mirror for an origin that no longer exists; the entry has no reply context
    pub async fn post_tombstone(
        &self,
        origin: ItemRef,
        config: &GuildConfig,
        mirror_channel: ChannelId,
        policy: CallPolicy<'_>,
    ) -> MirrorResult<MirrorEntry> {
        let post = MirrorPost {
            header: Some(tombstone_header(&config.signal_kind, origin.channel_id)),
            content: tombstone_content(origin),
            reply_to: None,
        };
        let mirror_id = self.post(mirror_channel, &post, policy).await?;

        let entry = MirrorEntry {
            origin_id: origin.message_id,
            mirror_id,
            guild_id: origin.guild_id,
            origin_channel_id: Some(origin.channel_id),
            reply_context_mirror_id: None,
        };
        self.persist(&entry, mirror_channel, policy).await?;

        tracing::info!(origin_id = origin.message_id, mirror_id, "Tombstone posted");
        Ok(entry)
    }

    /// Delete the entry's posts (already-gone posts are fine), then the entry itself
    pub async fn remove_mirror(
        &self,
        entry: &MirrorEntry,
        mirror_channel: ChannelId,
        policy: CallPolicy<'_>,
    ) -> MirrorResult<()> {
        self.delete_posts(entry, mirror_channel, policy).await?;
        self.forget(entry).await
    }

    /// Delete the main and reply-context posts, tolerating NotFound
    pub async fn delete_posts(
        &self,
        entry: &MirrorEntry,
        mirror_channel: ChannelId,
        policy: CallPolicy<'_>,
    ) -> MirrorResult<()> {
        let posts = std::iter::once(entry.mirror_id).chain(entry.reply_context_mirror_id);
        for post_id in posts {
            match self.delete(mirror_channel, post_id, policy).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(post_id, "Mirror post already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drop the entry without touching any posts
    pub async fn forget(&self, entry: &MirrorEntry) -> MirrorResult<()> {
        if self.entries.remove(entry.origin_id).await? {
            tracing::info!(origin_id = entry.origin_id, "Mirror entry removed");
            self.events.emit_lossy(MirrorEvent::MirrorRemoved {
                guild_id: entry.guild_id,
                origin_id: entry.origin_id,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Context post for the replied-to item; `None` when the parent is gone
    async fn post_reply_context(
        &self,
        item: &OriginItem,
        parent: ItemRef,
        mirror_channel: ChannelId,
        policy: CallPolicy<'_>,
    ) -> MirrorResult<Option<MessageId>> {
        let store = &self.store;
        let parent_item = match policy
            .call("fetch_item", || store.fetch_item(parent))
            .await
        {
            Ok(parent_item) => parent_item,
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    origin_id = item.id(),
                    parent_id = parent.message_id,
                    "Replied-to message is gone, posting without context"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let context = MirrorPost {
            header: None,
            content: self.assembler.assemble(&parent_item).await,
            reply_to: None,
        };
        Ok(Some(self.post(mirror_channel, &context, policy).await?))
    }

    /// Upsert the entry, deleting the fresh posts again if that fails
    async fn persist(
        &self,
        entry: &MirrorEntry,
        mirror_channel: ChannelId,
        policy: CallPolicy<'_>,
    ) -> MirrorResult<()> {
        if let Err(e) = self.entries.upsert(entry).await {
            tracing::error!(
                origin_id = entry.origin_id,
                error = %e,
                "Failed to record mirror entry, withdrawing posts"
            );
            let posts = std::iter::once(entry.mirror_id).chain(entry.reply_context_mirror_id);
            for post_id in posts {
                self.discard_post(mirror_channel, post_id, policy).await;
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn post(
        &self,
        channel: ChannelId,
        post: &MirrorPost,
        policy: CallPolicy<'_>,
    ) -> ExternalResult<MessageId> {
        let store = &self.store;
        policy.call("post", || store.post(channel, post)).await
    }

    async fn delete(
        &self,
        channel: ChannelId,
        post_id: MessageId,
        policy: CallPolicy<'_>,
    ) -> ExternalResult<()> {
        let store = &self.store;
        policy.call("delete", || store.delete(channel, post_id)).await
    }

    /// Best-effort cleanup; failures are only logged
    async fn discard_post(&self, channel: ChannelId, post_id: MessageId, policy: CallPolicy<'_>) {
        if let Err(e) = self.delete(channel, post_id, policy).await {
            if !e.is_not_found() {
                tracing::warn!(post_id, error = %e, "Could not clean up orphaned mirror post");
            }
        }
    }
}
