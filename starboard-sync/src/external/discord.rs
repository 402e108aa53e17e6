//! Discord REST client
//!
//! Implements [`ContentStore`] over the Discord HTTP API (v10). Status codes are
//! mapped onto [`ExternalError`] so the rest of the engine never sees HTTP details:
//! 404 → NotFound (resource taken from the Discord error code), 429 and 5xx →
//! Transient, everything else → Permanent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ContentStore, ExternalError, ExternalResult, MirrorPost, PostedMirror, Resource,
};
use crate::backlink::BackLink;
use crate::types::{
    AttachmentRef, Author, ChannelId, GuildId, ItemRef, LinkPreview, MessageId, OriginItem,
    Reaction, Snapshot,
};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = "DiscordBot (https://github.com/starboard-sync/starboard-sync, 0.1.0)";
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Gold embed colour
const MIRROR_COLOR: u32 = 0xF1C40F;
const ORIGINAL_FIELD_NAME: &str = "Original Message";

// Discord JSON error codes
const UNKNOWN_CHANNEL: u64 = 10003;
const UNKNOWN_GUILD: u64 = 10004;
const UNKNOWN_MESSAGE: u64 = 10008;

// Channel types that carry ordinary messages
const GUILD_TEXT: u8 = 0;
const GUILD_ANNOUNCEMENT: u8 = 5;

/// Message reference type for forwards (replies are 0)
const REFERENCE_FORWARD: u8 = 1;

/// Discord API client
pub struct DiscordClient {
    http_client: reqwest::Client,
    api_base: String,
    token: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, api_base: Option<String>) -> ExternalResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ExternalError::permanent(None, format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.api_base, path))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
    }

    /// Send a request and classify failures
    async fn send(
        &self,
        builder: RequestBuilder,
        resource: Resource,
        target: u64,
    ) -> ExternalResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: Option<ApiErrorBody> = response.json().await.ok();
        Err(classify_status(status, body, resource, target))
    }

    async fn get_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> ExternalResult<WireMessage> {
        let path = format!("/channels/{}/messages/{}", channel_id, message_id);
        tracing::debug!(channel_id, message_id, "Fetching Discord message");
        let response = self
            .send(self.request(Method::GET, &path), Resource::Message, message_id)
            .await?;
        response
            .json()
            .await
            .map_err(|e| ExternalError::permanent(None, format!("Parse message: {}", e)))
    }
}

#[async_trait]
impl ContentStore for DiscordClient {
    async fn fetch_item(&self, item: ItemRef) -> ExternalResult<OriginItem> {
        let message = self.get_message(item.channel_id, item.message_id).await?;
        Ok(message.into_origin(item))
    }

    async fn fetch_attachment(&self, url: &str) -> ExternalResult<Vec<u8>> {
        // CDN URLs are signed; no bot authorization header
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ExternalError::not_found(Resource::Attachment, url));
        }
        if !status.is_success() {
            return Err(classify_status(status, None, Resource::Attachment, 0));
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn fetch_post(
        &self,
        channel_id: ChannelId,
        post_id: MessageId,
    ) -> ExternalResult<PostedMirror> {
        let message = self.get_message(channel_id, post_id).await?;
        Ok(message.into_posted(channel_id))
    }

    async fn post(&self, channel_id: ChannelId, post: &MirrorPost) -> ExternalResult<MessageId> {
        let path = format!("/channels/{}/messages", channel_id);
        let payload = build_payload(post);
        let builder = self.request(Method::POST, &path);

        let builder = if post.content.files.is_empty() {
            builder.json(&payload)
        } else {
            let mut form = Form::new().text("payload_json", payload.to_string());
            for (index, file) in post.content.files.iter().enumerate() {
                let part = Part::bytes(file.bytes.clone()).file_name(file.upload_name());
                form = form.part(format!("files[{}]", index), part);
            }
            builder.multipart(form)
        };

        let response = self.send(builder, Resource::Channel, channel_id).await?;
        let created: WireMessage = response
            .json()
            .await
            .map_err(|e| ExternalError::permanent(None, format!("Parse created message: {}", e)))?;
        tracing::debug!(channel_id, post_id = created.id, "Created mirror post");
        Ok(created.id)
    }

    async fn edit(
        &self,
        channel_id: ChannelId,
        post_id: MessageId,
        header: &str,
    ) -> ExternalResult<()> {
        let path = format!("/channels/{}/messages/{}", channel_id, post_id);
        self.send(
            self.request(Method::PATCH, &path).json(&json!({ "content": header })),
            Resource::Message,
            post_id,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, channel_id: ChannelId, post_id: MessageId) -> ExternalResult<()> {
        let path = format!("/channels/{}/messages/{}", channel_id, post_id);
        self.send(self.request(Method::DELETE, &path), Resource::Message, post_id)
            .await?;
        Ok(())
    }

    async fn list_channels(&self, guild_id: GuildId) -> ExternalResult<Vec<ChannelId>> {
        let path = format!("/guilds/{}/channels", guild_id);
        let response = self
            .send(self.request(Method::GET, &path), Resource::Guild, guild_id)
            .await?;
        let channels: Vec<WireChannel> = response
            .json()
            .await
            .map_err(|e| ExternalError::permanent(None, format!("Parse channels: {}", e)))?;
        Ok(channels
            .into_iter()
            .filter(|c| c.kind == GUILD_TEXT || c.kind == GUILD_ANNOUNCEMENT)
            .map(|c| c.id)
            .collect())
    }
}

fn transport_error(e: reqwest::Error) -> ExternalError {
    if e.is_decode() {
        ExternalError::permanent(None, e.to_string())
    } else {
        // timeouts, connection resets, DNS hiccups
        ExternalError::transient(e.to_string())
    }
}

fn classify_status(
    status: StatusCode,
    body: Option<ApiErrorBody>,
    resource: Resource,
    target: u64,
) -> ExternalError {
    let message = body
        .as_ref()
        .and_then(|b| b.message.clone())
        .unwrap_or_else(|| status.to_string());

    match status.as_u16() {
        404 => {
            let resource = match body.as_ref().and_then(|b| b.code) {
                Some(UNKNOWN_CHANNEL) => Resource::Channel,
                Some(UNKNOWN_GUILD) => Resource::Guild,
                Some(UNKNOWN_MESSAGE) => Resource::Message,
                _ => resource,
            };
            ExternalError::not_found(resource, target)
        }
        429 => ExternalError::Transient {
            message,
            retry_after: body
                .and_then(|b| b.retry_after)
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64),
        },
        500..=599 => ExternalError::transient(format!("{}: {}", status, message)),
        code => ExternalError::permanent(Some(code), message),
    }
}

/// JSON body sent to create a mirror post
fn build_payload(post: &MirrorPost) -> Value {
    let content = &post.content;

    let mut embed = json!({
        "color": MIRROR_COLOR,
        "footer": { "text": content.back_link.footer_text() },
        "fields": [{
            "name": ORIGINAL_FIELD_NAME,
            "value": content.back_link.field_value(),
            "inline": false,
        }],
    });
    if !content.description.is_empty() {
        embed["description"] = json!(content.description);
    }
    if let Some(created_at) = content.created_at {
        embed["timestamp"] = json!(created_at.to_rfc3339());
    }
    if let Some(author) = &content.author {
        embed["author"] = json!({
            "name": format!("{} ({})", author.display_name, author.name),
            "icon_url": author.avatar_url,
        });
    }

    let mut payload = json!({
        "embeds": [embed],
        "allowed_mentions": { "parse": [] },
    });
    if let Some(header) = &post.header {
        payload["content"] = json!(header);
    }
    if let Some(reply_to) = post.reply_to {
        payload["message_reference"] = json!({
            "message_id": reply_to.to_string(),
            "fail_if_not_exists": false,
        });
    }
    if !content.files.is_empty() {
        let attachments: Vec<Value> = content
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| json!({ "id": index, "filename": file.upload_name() }))
            .collect();
        payload["attachments"] = json!(attachments);
    }
    payload
}

// ============================================================================
// Wire types
// ============================================================================

fn snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn optional_snowflake<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u64>,
    message: Option<String>,
    retry_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
    username: String,
    global_name: Option<String>,
    avatar: Option<String>,
}

impl WireUser {
    fn into_author(self) -> Author {
        let avatar_url = match &self.avatar {
            Some(hash) => format!("https://cdn.discordapp.com/avatars/{}/{}.png", self.id, hash),
            None => format!(
                "https://cdn.discordapp.com/embed/avatars/{}.png",
                (self.id >> 22) % 6
            ),
        };
        Author {
            id: self.id,
            display_name: self.global_name.unwrap_or_else(|| self.username.clone()),
            name: self.username,
            avatar_url: Some(avatar_url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    url: String,
    filename: String,
}

impl From<WireAttachment> for AttachmentRef {
    fn from(a: WireAttachment) -> Self {
        AttachmentRef {
            spoiler: a.filename.starts_with("SPOILER_"),
            url: a.url,
            filename: a.filename,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WireField {
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireFooter {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireEmbed {
    description: Option<String>,
    image: Option<WireMedia>,
    thumbnail: Option<WireMedia>,
    #[serde(default)]
    fields: Vec<WireField>,
    footer: Option<WireFooter>,
}

impl WireEmbed {
    fn into_preview(self) -> Option<LinkPreview> {
        let image_url = self.image.or(self.thumbnail).map(|m| m.url);
        if self.description.is_none() && image_url.is_none() {
            return None;
        }
        Some(LinkPreview {
            description: self.description,
            image_url,
        })
    }

    fn back_link(&self) -> Option<BackLink> {
        self.fields
            .iter()
            .find_map(|f| BackLink::find_in(&f.value))
            .or_else(|| self.description.as_deref().and_then(BackLink::find_in))
            .or_else(|| self.footer.as_ref().and_then(|f| BackLink::find_in(&f.text)))
    }
}

#[derive(Debug, Deserialize)]
struct WireEmoji {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    animated: bool,
}

impl WireEmoji {
    /// Same rendering the gateway uses for reaction payloads
    fn key(&self) -> String {
        let name = self.name.clone().unwrap_or_default();
        match &self.id {
            Some(id) if self.animated => format!("<a:{}:{}>", name, id),
            Some(id) => format!("<:{}:{}>", name, id),
            None => name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireReaction {
    count: u32,
    emoji: WireEmoji,
}

#[derive(Debug, Deserialize)]
struct WireReference {
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default, deserialize_with = "optional_snowflake")]
    message_id: Option<u64>,
    #[serde(default, deserialize_with = "optional_snowflake")]
    channel_id: Option<u64>,
    #[serde(default, deserialize_with = "optional_snowflake")]
    guild_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireSnapshotMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    message: WireSnapshotMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
    #[serde(default)]
    content: String,
    author: WireUser,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    #[serde(default)]
    embeds: Vec<WireEmbed>,
    #[serde(default)]
    reactions: Vec<WireReaction>,
    message_reference: Option<WireReference>,
    #[serde(default)]
    message_snapshots: Vec<WireSnapshot>,
    timestamp: DateTime<Utc>,
}

impl WireMessage {
    fn into_origin(self, item: ItemRef) -> OriginItem {
        let reply_to = self
            .message_reference
            .as_ref()
            .filter(|r| r.kind != REFERENCE_FORWARD)
            .and_then(|r| {
                r.message_id.map(|message_id| {
                    ItemRef::new(
                        r.guild_id.unwrap_or(item.guild_id),
                        r.channel_id.unwrap_or(item.channel_id),
                        message_id,
                    )
                })
            });

        OriginItem {
            item,
            author: self.author.into_author(),
            content: self.content,
            attachments: self.attachments.into_iter().map(Into::into).collect(),
            snapshots: self
                .message_snapshots
                .into_iter()
                .map(|s| Snapshot {
                    content: s.message.content,
                    attachments: s.message.attachments.into_iter().map(Into::into).collect(),
                })
                .collect(),
            link_preview: self.embeds.into_iter().find_map(WireEmbed::into_preview),
            reply_to,
            reactions: self
                .reactions
                .iter()
                .map(|r| Reaction {
                    kind: r.emoji.key(),
                    count: r.count,
                })
                .collect(),
            created_at: self.timestamp,
        }
    }

    fn into_posted(self, channel_id: ChannelId) -> PostedMirror {
        let back_link = self
            .embeds
            .iter()
            .find_map(WireEmbed::back_link)
            .or_else(|| BackLink::find_in(&self.content));
        PostedMirror {
            id: self.id,
            channel_id,
            header: self.content,
            back_link,
            reply_to: self.message_reference.and_then(|r| r.message_id),
        }
    }
}
