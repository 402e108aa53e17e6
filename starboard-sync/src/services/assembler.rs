//! Content assembler
//!
//! Turns an origin item into mirror-ready content: display text, re-uploaded
//! attachments and the origin back-link. Attachment fetch failures are logged and
//! skipped; assembly itself never fails.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::backlink::BackLink;
use crate::external::{ContentStore, FileUpload};
use crate::types::{AttachmentRef, Author, ChannelId, ItemRef, OriginItem};

/// Embed description limit imposed by the platform
pub const MAX_DESCRIPTION_CHARS: usize = 4096;
const ELLIPSIS: &str = "...";
const TOMBSTONE_TEXT: &str = "*The original message was deleted.*";
const PREVIEW_FALLBACK_NAME: &str = "preview.png";

/// Mirror-ready representation of one origin item
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContent {
    pub description: String,
    pub author: Option<Author>,
    pub created_at: Option<DateTime<Utc>>,
    pub back_link: BackLink,
    pub files: Vec<FileUpload>,
}

/// Count line shown on a mirror post
pub fn header_line(signal_kind: &str, count: u32, origin_channel: ChannelId) -> String {
    format!("{} **{}** in <#{}>", signal_kind, count, origin_channel)
}

pub fn tombstone_header(signal_kind: &str, origin_channel: ChannelId) -> String {
    format!("{} in <#{}>", signal_kind, origin_channel)
}

/// Placeholder content for an origin that no longer exists
pub fn tombstone_content(origin: ItemRef) -> AssembledContent {
    AssembledContent {
        description: TOMBSTONE_TEXT.to_string(),
        author: None,
        created_at: None,
        back_link: origin.into(),
        files: Vec::new(),
    }
}

/// Cap `text` at [`MAX_DESCRIPTION_CHARS`] characters, marking the cut
pub fn truncate_description(text: String) -> String {
    if text.chars().count() <= MAX_DESCRIPTION_CHARS {
        return text;
    }
    let keep = MAX_DESCRIPTION_CHARS - ELLIPSIS.len();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

fn append_block(description: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !description.is_empty() {
        description.push_str("\n\n");
    }
    description.push_str(block);
}

/// Last path segment of a URL, query stripped
fn filename_from_url(url: &str) -> String {
    url.split(|c| c == '?' || c == '#')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty() && name.contains('.'))
        .map(str::to_string)
        .unwrap_or_else(|| PREVIEW_FALLBACK_NAME.to_string())
}

pub struct ContentAssembler {
    store: Arc<dyn ContentStore>,
}

impl ContentAssembler {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub async fn assemble(&self, item: &OriginItem) -> AssembledContent {
        let mut description = item.content.clone();
        let mut files = Vec::new();

        self.fetch_attachments(item, &item.attachments, &mut files).await;

        if !item.snapshots.is_empty() {
            for snapshot in &item.snapshots {
                append_block(&mut description, &snapshot.content);
                self.fetch_attachments(item, &snapshot.attachments, &mut files)
                    .await;
            }
        } else if let Some(preview) = &item.link_preview {
            if let Some(text) = &preview.description {
                append_block(&mut description, text);
            }
            if let Some(url) = &preview.image_url {
                let image = AttachmentRef {
                    url: url.clone(),
                    filename: filename_from_url(url),
                    spoiler: false,
                };
                self.fetch_attachments(item, std::slice::from_ref(&image), &mut files)
                    .await;
            }
        }

        AssembledContent {
            description: truncate_description(description),
            author: Some(item.author.clone()),
            created_at: Some(item.created_at),
            back_link: item.item.into(),
            files,
        }
    }

    async fn fetch_attachments(
        &self,
        item: &OriginItem,
        attachments: &[AttachmentRef],
        files: &mut Vec<FileUpload>,
    ) {
        for attachment in attachments {
            match self.store.fetch_attachment(&attachment.url).await {
                Ok(bytes) => files.push(FileUpload {
                    filename: attachment.filename.clone(),
                    spoiler: attachment.spoiler,
                    bytes,
                }),
                Err(e) => {
                    tracing::warn!(
                        origin_id = item.id(),
                        filename = %attachment.filename,
                        error = %e,
                        "Skipping attachment that could not be downloaded"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        let text = "a".repeat(MAX_DESCRIPTION_CHARS);
        assert_eq!(truncate_description(text.clone()), text);
    }

    #[test]
    fn test_long_text_truncated_with_marker() {
        let text = "b".repeat(MAX_DESCRIPTION_CHARS + 1);
        let out = truncate_description(text);
        assert_eq!(out.chars().count(), MAX_DESCRIPTION_CHARS);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let text = "é".repeat(MAX_DESCRIPTION_CHARS);
        assert_eq!(truncate_description(text.clone()), text);

        let out = truncate_description("é".repeat(5000));
        assert_eq!(out.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn test_header_lines() {
        assert_eq!(header_line("⭐", 5, 42), "⭐ **5** in <#42>");
        assert_eq!(tombstone_header("⭐", 42), "⭐ in <#42>");
    }

    #[test]
    fn test_append_block_spacing() {
        let mut text = String::new();
        append_block(&mut text, "first");
        append_block(&mut text, "");
        append_block(&mut text, "second");
        assert_eq!(text, "first\n\nsecond");
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("https://img.example/a/b/cat.jpg?w=200"), "cat.jpg");
        assert_eq!(filename_from_url("https://img.example/a/b/"), "preview.png");
        assert_eq!(filename_from_url("https://img.example/render"), "preview.png");
    }

    #[test]
    fn test_tombstone_keeps_back_link() {
        let content = tombstone_content(ItemRef::new(1, 2, 3));
        assert_eq!(content.back_link.to_item(), ItemRef::new(1, 2, 3));
        assert!(content.author.is_none());
        assert!(content.files.is_empty());
    }
}
