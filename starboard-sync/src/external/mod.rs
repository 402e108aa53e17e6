//! External content store contract
//!
//! The chat platform owns origin items and mirror posts. Everything the core needs
//! from it goes through [`ContentStore`]; [`discord::DiscordClient`] is the REST
//! implementation used in production, tests substitute an in-memory store.

pub mod discord;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::backlink::BackLink;
use crate::services::assembler::AssembledContent;
use crate::types::{ChannelId, GuildId, ItemRef, MessageId, OriginItem};

/// Kind of external object a NotFound refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Guild,
    Channel,
    Message,
    Attachment,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Guild => write!(f, "guild"),
            Resource::Channel => write!(f, "channel"),
            Resource::Message => write!(f, "message"),
            Resource::Attachment => write!(f, "attachment"),
        }
    }
}

/// External store failures, classified by how callers must react
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalError {
    /// Target is gone: repair or remove, never fatal
    #[error("{resource} {target} not found")]
    NotFound { resource: Resource, target: String },

    /// Timeout or throttling: retry with backoff
    #[error("Transient external error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Permissions, invalid target, malformed response
    #[error("External request rejected (status {status:?}): {message}")]
    Permanent { status: Option<u16>, message: String },
}

impl ExternalError {
    pub fn not_found(resource: Resource, target: impl ToString) -> Self {
        ExternalError::NotFound {
            resource,
            target: target.to_string(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ExternalError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        ExternalError::Permanent {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExternalError::NotFound { .. })
    }

    /// Missing resource kind, if this is a NotFound
    pub fn missing(&self) -> Option<Resource> {
        match self {
            ExternalError::NotFound { resource, .. } => Some(*resource),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ExternalError::Transient { .. })
    }

    /// Server-provided wait hint for throttled requests
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExternalError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type ExternalResult<T> = Result<T, ExternalError>;

/// A fetched attachment ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub filename: String,
    pub spoiler: bool,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Filename as uploaded; the platform marks spoilers by prefix
    pub fn upload_name(&self) -> String {
        if self.spoiler && !self.filename.starts_with("SPOILER_") {
            format!("SPOILER_{}", self.filename)
        } else {
            self.filename.clone()
        }
    }
}

/// A post to be created in the mirror channel
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorPost {
    /// Count line shown above the embed; context posts have none
    pub header: Option<String>,
    pub content: AssembledContent,
    /// Post this one replies to (the reply-context post)
    pub reply_to: Option<MessageId>,
}

/// A live mirror post as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMirror {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub header: String,
    /// Origin identity recovered from the post itself
    pub back_link: Option<BackLink>,
    /// Post this one replies to
    pub reply_to: Option<MessageId>,
}

/// Operations the mirror engine needs from the external store
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch_item(&self, item: ItemRef) -> ExternalResult<OriginItem>;

    async fn fetch_attachment(&self, url: &str) -> ExternalResult<Vec<u8>>;

    async fn fetch_post(&self, channel_id: ChannelId, post_id: MessageId)
        -> ExternalResult<PostedMirror>;

    /// Create a post, returning its identity
    async fn post(&self, channel_id: ChannelId, post: &MirrorPost) -> ExternalResult<MessageId>;

    /// Replace the header line of an existing post
    async fn edit(&self, channel_id: ChannelId, post_id: MessageId, header: &str)
        -> ExternalResult<()>;

    async fn delete(&self, channel_id: ChannelId, post_id: MessageId) -> ExternalResult<()>;

    /// Text channels of a guild that may hold origin items
    async fn list_channels(&self, guild_id: GuildId) -> ExternalResult<Vec<ChannelId>>;
}
