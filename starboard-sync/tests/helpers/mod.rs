//! Shared fixtures for starboard-sync integration tests
//!
//! [`FakeStore`] is an in-memory content store: origin messages, mirror posts and
//! guild channel lists live in maps, and every call yields once so concurrent
//! handlers actually interleave.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use starboard_common::config::TomlConfig;
use starboard_common::events::EventBus;
use starboard_sync::backlink::BackLink;
use starboard_sync::db::guild_config::{set_guild_config, GuildConfigUpdate};
use starboard_sync::external::{
    ContentStore, ExternalError, ExternalResult, MirrorPost, PostedMirror, Resource,
};
use starboard_sync::types::{
    AttachmentRef, Author, ChannelId, GuildId, ItemRef, MessageId, OriginItem, Reaction,
    SignalEvent,
};
use starboard_sync::services::SignalSynchronizer;
use starboard_sync::AppState;

pub const GUILD: GuildId = 100;
pub const CHANNEL: ChannelId = 200;
pub const OTHER_CHANNEL: ChannelId = 201;
pub const MIRROR: ChannelId = 900;
pub const BOT_USER: u64 = 1;
pub const STAR: &str = "⭐";

/// A mirror post as the fake store keeps it
#[derive(Debug, Clone)]
pub struct StoredPost {
    pub channel_id: ChannelId,
    pub header: Option<String>,
    /// Rendered body: description, back-link field and footer
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub files: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    items: HashMap<MessageId, OriginItem>,
    posts: HashMap<MessageId, StoredPost>,
    channels: HashMap<GuildId, Vec<ChannelId>>,
    attachments: HashMap<String, Vec<u8>>,
    /// Successful posts allowed before posting starts failing
    post_budget: Option<usize>,
    post_calls: usize,
    /// Remaining transient failures per operation name
    transient: HashMap<&'static str, usize>,
    delete_error: Option<ExternalError>,
}

/// Signals delivered while a fetch of `trigger` is in flight
struct InterleavedSignals {
    trigger: MessageId,
    synchronizer: Arc<SignalSynchronizer>,
    events: Vec<SignalEvent>,
}

pub struct FakeStore {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
    interleaved: Mutex<Option<InterleavedSignals>>,
}

impl FakeStore {
    pub fn new() -> Self {
        let store = Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicU64::new(10_000),
            interleaved: Mutex::new(None),
        };
        store.set_channels(GUILD, vec![CHANNEL, OTHER_CHANNEL, MIRROR]);
        store
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_channels(&self, guild_id: GuildId, channels: Vec<ChannelId>) {
        self.state().channels.insert(guild_id, channels);
    }

    pub fn remove_guild(&self, guild_id: GuildId) {
        self.state().channels.remove(&guild_id);
    }

    pub fn add_item(&self, item: OriginItem) {
        self.state().items.insert(item.id(), item);
    }

    pub fn remove_item(&self, id: MessageId) {
        self.state().items.remove(&id);
    }

    pub fn set_count(&self, id: MessageId, count: u32) {
        let mut state = self.state();
        let item = state.items.get_mut(&id).expect("unknown item");
        item.reactions.retain(|r| r.kind != STAR);
        if count > 0 {
            item.reactions.push(Reaction {
                kind: STAR.to_string(),
                count,
            });
        }
    }

    pub fn add_attachment(&self, url: &str, bytes: &[u8]) {
        self.state().attachments.insert(url.to_string(), bytes.to_vec());
    }

    pub fn set_post_budget(&self, budget: Option<usize>) {
        self.state().post_budget = budget;
    }

    /// Fail the next `times` calls of `op` ("fetch_item", "fetch_post") with a timeout
    pub fn fail_transiently(&self, op: &'static str, times: usize) {
        self.state().transient.insert(op, times);
    }

    /// Transient failures of `op` not yet consumed
    pub fn transient_left(&self, op: &'static str) -> usize {
        self.state().transient.get(op).copied().unwrap_or(0)
    }

    /// Every delete of an existing post fails with `error`
    pub fn set_delete_error(&self, error: Option<ExternalError>) {
        self.state().delete_error = error;
    }

    /// Run `events` through `synchronizer` the first time `trigger` is fetched
    pub fn signal_during_fetch(
        &self,
        trigger: MessageId,
        synchronizer: Arc<SignalSynchronizer>,
        events: Vec<SignalEvent>,
    ) {
        *self.interleaved.lock().unwrap() = Some(InterleavedSignals {
            trigger,
            synchronizer,
            events,
        });
    }

    fn take_transient(&self, op: &'static str) -> ExternalResult<()> {
        let mut state = self.state();
        match state.transient.get_mut(op) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(ExternalError::transient(format!("{} timed out", op)))
            }
            _ => Ok(()),
        }
    }

    async fn deliver_interleaved(&self, fetched: MessageId) {
        let pending = {
            let mut slot = self.interleaved.lock().unwrap();
            if slot.as_ref().is_some_and(|pending| pending.trigger == fetched) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(pending) = pending {
            for event in &pending.events {
                pending.synchronizer.handle_signal_added(event).await.unwrap();
            }
        }
    }

    pub fn post_calls(&self) -> usize {
        self.state().post_calls
    }

    pub fn post(&self, id: MessageId) -> Option<StoredPost> {
        self.state().posts.get(&id).cloned()
    }

    pub fn posts_in(&self, channel_id: ChannelId) -> Vec<(MessageId, StoredPost)> {
        let mut posts: Vec<_> = self
            .state()
            .posts
            .iter()
            .filter(|(_, p)| p.channel_id == channel_id)
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        posts.sort_by_key(|(id, _)| *id);
        posts
    }

    pub fn delete_post_by_hand(&self, id: MessageId) {
        self.state().posts.remove(&id);
    }

    pub fn rewrite_post_text(&self, id: MessageId, text: &str) {
        if let Some(post) = self.state().posts.get_mut(&id) {
            post.text = text.to_string();
        }
    }

    fn check_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> ExternalResult<()> {
        let state = self.state();
        match state.channels.get(&guild_id) {
            None => Err(ExternalError::not_found(Resource::Guild, guild_id)),
            Some(channels) if !channels.contains(&channel_id) => {
                Err(ExternalError::not_found(Resource::Channel, channel_id))
            }
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl ContentStore for FakeStore {
    async fn fetch_item(&self, item: ItemRef) -> ExternalResult<OriginItem> {
        tokio::task::yield_now().await;
        self.deliver_interleaved(item.message_id).await;
        self.take_transient("fetch_item")?;
        self.check_channel(item.guild_id, item.channel_id)?;
        self.state()
            .items
            .get(&item.message_id)
            .filter(|found| found.item == item)
            .cloned()
            .ok_or_else(|| ExternalError::not_found(Resource::Message, item.message_id))
    }

    async fn fetch_attachment(&self, url: &str) -> ExternalResult<Vec<u8>> {
        tokio::task::yield_now().await;
        self.state()
            .attachments
            .get(url)
            .cloned()
            .ok_or_else(|| ExternalError::not_found(Resource::Attachment, url))
    }

    async fn fetch_post(
        &self,
        channel_id: ChannelId,
        post_id: MessageId,
    ) -> ExternalResult<PostedMirror> {
        tokio::task::yield_now().await;
        self.take_transient("fetch_post")?;
        let state = self.state();
        let post = state
            .posts
            .get(&post_id)
            .filter(|p| p.channel_id == channel_id)
            .ok_or_else(|| ExternalError::not_found(Resource::Message, post_id))?;
        Ok(PostedMirror {
            id: post_id,
            channel_id,
            header: post.header.clone().unwrap_or_default(),
            back_link: BackLink::find_in(&post.text),
            reply_to: post.reply_to,
        })
    }

    async fn post(&self, channel_id: ChannelId, post: &MirrorPost) -> ExternalResult<MessageId> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.post_calls += 1;
        if let Some(budget) = state.post_budget {
            if budget == 0 {
                return Err(ExternalError::permanent(Some(403), "Missing Permissions"));
            }
            state.post_budget = Some(budget - 1);
        }

        let link = post.content.back_link;
        let text = format!(
            "{}\n{}\n{}",
            post.content.description,
            link.field_value(),
            link.footer_text()
        );
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        state.posts.insert(
            id,
            StoredPost {
                channel_id,
                header: post.header.clone(),
                text,
                reply_to: post.reply_to,
                files: post.content.files.iter().map(|f| f.upload_name()).collect(),
            },
        );
        Ok(id)
    }

    async fn edit(
        &self,
        channel_id: ChannelId,
        post_id: MessageId,
        header: &str,
    ) -> ExternalResult<()> {
        tokio::task::yield_now().await;
        match self.state().posts.get_mut(&post_id) {
            Some(post) if post.channel_id == channel_id => {
                post.header = Some(header.to_string());
                Ok(())
            }
            _ => Err(ExternalError::not_found(Resource::Message, post_id)),
        }
    }

    async fn delete(&self, channel_id: ChannelId, post_id: MessageId) -> ExternalResult<()> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        let owned = state
            .posts
            .get(&post_id)
            .is_some_and(|post| post.channel_id == channel_id);
        if !owned {
            return Err(ExternalError::not_found(Resource::Message, post_id));
        }
        if let Some(error) = state.delete_error.clone() {
            return Err(error);
        }
        state.posts.remove(&post_id);
        Ok(())
    }

    async fn list_channels(&self, guild_id: GuildId) -> ExternalResult<Vec<ChannelId>> {
        tokio::task::yield_now().await;
        self.state()
            .channels
            .get(&guild_id)
            .cloned()
            .ok_or_else(|| ExternalError::not_found(Resource::Guild, guild_id))
    }
}

/// Origin message in `CHANNEL` with `stars` star reactions
pub fn origin(id: MessageId, stars: u32) -> OriginItem {
    origin_in(CHANNEL, id, stars)
}

pub fn origin_in(channel_id: ChannelId, id: MessageId, stars: u32) -> OriginItem {
    let reactions = if stars > 0 {
        vec![Reaction {
            kind: STAR.to_string(),
            count: stars,
        }]
    } else {
        Vec::new()
    };
    OriginItem {
        item: ItemRef::new(GUILD, channel_id, id),
        author: Author {
            id: 42,
            name: "sancho".to_string(),
            display_name: "Sancho".to_string(),
            avatar_url: None,
        },
        content: format!("message {}", id),
        attachments: Vec::new(),
        snapshots: Vec::new(),
        link_preview: None,
        reply_to: None,
        reactions,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}

pub fn attachment(url: &str, filename: &str, spoiler: bool) -> AttachmentRef {
    AttachmentRef {
        url: url.to_string(),
        filename: filename.to_string(),
        spoiler,
    }
}

/// Reaction event for `message_id` in `CHANNEL`
pub fn star(message_id: MessageId, user_id: u64) -> SignalEvent {
    SignalEvent {
        guild_id: GUILD,
        channel_id: CHANNEL,
        message_id,
        user_id,
        emoji: STAR.to_string(),
    }
}

/// Config with throttling delays shrunk so jobs finish quickly
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.discord.self_user_id = Some(BOT_USER);
    config.recovery.call_delay_ms = 0;
    config.recovery.backoff_base_ms = 1;
    config.recovery.backoff_cap_ms = 5;
    config
}

pub struct TestApp {
    pub store: Arc<FakeStore>,
    pub state: AppState,
    _dir: TempDir,
}

/// App over a fresh database with `GUILD` mirroring into `MIRROR` at threshold 3
pub async fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let pool = starboard_sync::db::init_database_pool(&dir.path().join("starboard.db"))
        .await
        .unwrap();
    set_guild_config(
        &pool,
        GUILD,
        &GuildConfigUpdate {
            mirror_channel_id: Some(MIRROR),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let store = Arc::new(FakeStore::new());
    let state = AppState::new(pool, store.clone(), &test_config(), EventBus::new(256));
    TestApp {
        store,
        state,
        _dir: dir,
    }
}
