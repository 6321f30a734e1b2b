//! Archive documents: server descriptors, chunks and messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key of the uncategorised bucket inside a server's `categories` object.
pub const UNCATEGORIZED: &str = "channels";

/// Decrypted server descriptor (`servers/{id}.json`).
#[derive(Debug, Clone)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub emojis: BTreeMap<String, String>,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub chunks: u32,
    /// Fingerprint of the channel password.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<u64>,
}

#[derive(Deserialize)]
struct RawServer {
    #[serde(default)]
    name: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    emojis: BTreeMap<String, String>,
    #[serde(default)]
    categories: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCategory {
    Named {
        #[serde(default)]
        name: Option<String>,
        channels: Map<String, Value>,
    },
    Bare(Map<String, Value>),
}

impl Server {
    /// Parse a decrypted descriptor, keeping category and channel order.
    pub fn from_json(id: &str, json: &str) -> serde_json::Result<Self> {
        let raw: RawServer = serde_json::from_str(json)?;
        let mut categories = Vec::with_capacity(raw.categories.len());
        for (category_id, value) in raw.categories {
            let (name, channels) = match serde_json::from_value::<RawCategory>(value)? {
                RawCategory::Named { name, channels } => (name.unwrap_or_default(), channels),
                RawCategory::Bare(channels) => (String::new(), channels),
            };
            let mut parsed = Vec::with_capacity(channels.len());
            for (channel_id, value) in channels {
                let mut channel: Channel = serde_json::from_value(value)?;
                channel.id = channel_id;
                parsed.push(channel);
            }
            categories.push(Category {
                id: category_id,
                name,
                channels: parsed,
            });
        }
        Ok(Server {
            id: id.to_string(),
            name: raw.name,
            icon: raw.icon,
            emojis: raw.emojis,
            categories,
        })
    }

    pub fn channels(&self) -> impl Iterator<Item = (&Category, &Channel)> {
        self.categories
            .iter()
            .flat_map(|category| category.channels.iter().map(move |channel| (category, channel)))
    }

    pub fn channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channels()
            .map(|(_, channel)| channel)
            .find(|channel| channel.id == channel_id)
    }
}

/// One decrypted page of channel history (`servers/{channel}/{n}.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct Chunk {
    pub channel: ChunkChannel,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub map: ChunkMap,
    #[serde(default)]
    pub guild: Option<Guild>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChunkMap {
    #[serde(default)]
    pub chunks: u32,
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub messages: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guild {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub timestamp_edited: Option<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub mentions: Vec<Author>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub reference: Option<Reference>,
}

impl Message {
    pub fn is_member_join(&self) -> bool {
        self.kind == "GuildMemberJoin"
    }

    pub fn is_boost(&self) -> bool {
        self.kind == "8" || self.kind == "GuildBoost"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Author {
    pub fn tag(&self) -> String {
        if self.discriminator.is_empty() || self.discriminator == "0000" {
            self.name.clone()
        } else {
            format!("{}#{}", self.name, self.discriminator)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    File,
}

impl Attachment {
    pub fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> AttachmentKind {
        match self.extension().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" => AttachmentKind::Image,
            "mp3" | "wav" | "ogg" => AttachmentKind::Audio,
            "mp4" | "webm" => AttachmentKind::Video,
            _ => AttachmentKind::File,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<EmbedAuthor>,
    #[serde(default)]
    pub thumbnail: Option<EmbedImage>,
    #[serde(default)]
    pub image: Option<EmbedImage>,
    #[serde(default)]
    pub footer: Option<EmbedFooter>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedImage {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedFooter {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedField {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_inline: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub emoji: Emoji,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Emoji {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub message_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}
