//! Origin back-link embedded in every mirror post
//!
//! The jump URL `https://discord.com/channels/{guild}/{channel}/{message}` is written
//! verbatim into the mirror embed. Audit-and-repair parses it back out of the live
//! post, so the origin identity survives loss of the entry table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ChannelId, GuildId, ItemRef, MessageId};

const JUMP_URL_BASE: &str = "https://discord.com/channels/";
/// Host-independent marker; also matches ptb./canary. links
const JUMP_URL_MARKER: &str = "discord.com/channels/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackLink {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl BackLink {
    pub fn to_item(self) -> ItemRef {
        ItemRef::new(self.guild_id, self.channel_id, self.message_id)
    }

    pub fn jump_url(&self) -> String {
        format!(
            "{}{}/{}/{}",
            JUMP_URL_BASE, self.guild_id, self.channel_id, self.message_id
        )
    }

    /// Markdown link placed in the "Original Message" embed field
    pub fn field_value(&self) -> String {
        format!("[Jump to Message]({})", self.jump_url())
    }

    pub fn footer_text(&self) -> String {
        format!("ID: {}", self.message_id)
    }

    /// First well-formed jump URL in `text`
    pub fn find_in(text: &str) -> Option<BackLink> {
        let mut rest = text;
        while let Some(pos) = rest.find(JUMP_URL_MARKER) {
            let tail = &rest[pos + JUMP_URL_MARKER.len()..];
            if let Some(link) = Self::parse_path(tail) {
                return Some(link);
            }
            rest = tail;
        }
        None
    }

    /// `{guild}/{channel}/{message}` followed by anything that isn't a digit
    fn parse_path(tail: &str) -> Option<BackLink> {
        let mut ids = tail.splitn(3, '/');
        let guild_id = ids.next()?.parse().ok()?;
        let channel_id = ids.next()?.parse().ok()?;
        let last = ids.next()?;
        let digits_end = last
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(last.len());
        let message_id = last[..digits_end].parse().ok()?;
        Some(BackLink {
            guild_id,
            channel_id,
            message_id,
        })
    }
}

impl From<ItemRef> for BackLink {
    fn from(item: ItemRef) -> Self {
        BackLink {
            guild_id: item.guild_id,
            channel_id: item.channel_id,
            message_id: item.message_id,
        }
    }
}

impl fmt::Display for BackLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.jump_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> BackLink {
        BackLink {
            guild_id: 111,
            channel_id: 222,
            message_id: 333,
        }
    }

    #[test]
    fn test_field_value_parses_back() {
        let value = link().field_value();
        assert_eq!(value, "[Jump to Message](https://discord.com/channels/111/222/333)");
        assert_eq!(BackLink::find_in(&value), Some(link()));
    }

    #[test]
    fn test_find_in_surrounding_text() {
        let text = "see https://ptb.discord.com/channels/111/222/333?foo for context";
        assert_eq!(BackLink::find_in(text), Some(link()));
    }

    #[test]
    fn test_skips_malformed_candidates() {
        let text = "discord.com/channels/@me/5 then discord.com/channels/111/222/333";
        assert_eq!(BackLink::find_in(text), Some(link()));
    }

    #[test]
    fn test_no_link() {
        assert_eq!(BackLink::find_in("ID: 333"), None);
        assert_eq!(BackLink::find_in("https://discord.com/channels/111/222/"), None);
    }
}
