//! Core data types shared by the synchronizer, assembler and reconciliation jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type GuildId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// Address of an origin item in the external store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl ItemRef {
    pub fn new(guild_id: GuildId, channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            guild_id,
            channel_id,
            message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    /// Account name
    pub name: String,
    /// Nickname or global display name, falls back to `name`
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Reference to a binary attachment held by the external store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
    pub spoiler: bool,
}

/// Content of a forwarded or quoted message carried inside another message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
}

/// Link-preview embed generated by the external store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkPreview {
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Reaction tally for one signal kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub kind: String,
    pub count: u32,
}

/// An item in the external, authoritative store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginItem {
    pub item: ItemRef,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
    pub snapshots: Vec<Snapshot>,
    pub link_preview: Option<LinkPreview>,
    pub reply_to: Option<ItemRef>,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
}

impl OriginItem {
    pub fn id(&self) -> MessageId {
        self.item.message_id
    }

    /// Live count for `kind`; zero when nobody reacted with it
    pub fn signal_count(&self, kind: &str) -> u32 {
        self.reactions
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.count)
            .unwrap_or(0)
    }
}

/// Persisted linkage between an origin item and its mirror post(s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub origin_id: MessageId,
    pub mirror_id: MessageId,
    pub guild_id: GuildId,
    pub origin_channel_id: Option<ChannelId>,
    /// Set only when the origin was a reply and a context post was created
    pub reply_context_mirror_id: Option<MessageId>,
}

/// Per-guild mirror settings, defaults applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub mirror_channel_id: Option<ChannelId>,
    pub signal_kind: String,
    pub threshold: u32,
}

impl GuildConfig {
    pub fn qualifies(&self, count: u32) -> bool {
        count >= self.threshold
    }
}

/// Raw reaction add/remove notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    /// Reaction rendered as text: the unicode emoji, or `<:name:id>` for custom ones
    pub emoji: String,
}

impl SignalEvent {
    pub fn item(&self) -> ItemRef {
        ItemRef::new(self.guild_id, self.channel_id, self.message_id)
    }
}
