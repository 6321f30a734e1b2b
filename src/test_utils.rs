//! Shared test utilities.
//!
//! All tests that manipulate environment variables must use the shared
//! `env_lock()` to prevent race conditions.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::ArchiveError;
use crate::keys::key_hash;
use crate::model::{Author, Chunk, ChunkChannel, ChunkMap, Message};
use crate::source::ArchiveSource;
use crate::window::MessageWindow;

/// Global lock for tests that modify environment variables.
/// All such tests MUST hold this lock to prevent race conditions.
pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

/// RAII guard for temporarily setting an environment variable.
pub struct EnvGuard {
    key: String,
    old: Option<String>,
}

impl EnvGuard {
    pub fn set(key: &str, value: &str) -> Self {
        let old = std::env::var(key).ok();
        unsafe {
            std::env::set_var(key, value);
        }
        Self {
            key: key.to_string(),
            old,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Some(val) = &self.old {
            unsafe {
                std::env::set_var(&self.key, val);
            }
        } else {
            unsafe {
                std::env::remove_var(&self.key);
            }
        }
    }
}

/// Archive resources held in memory, keyed by resource path.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn insert(&mut self, path: &str, contents: impl Into<String>) {
        self.files
            .insert(path.to_string(), contents.into().into_bytes());
    }
}

impl ArchiveSource for MemorySource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

fn timestamp(i: usize) -> String {
    format!(
        "2021-01-{:02}T{:02}:{:02}:00+00:00",
        1 + i / 1440,
        (i / 60) % 24,
        i % 60
    )
}

/// `n` messages with ids "1".."n", one minute apart, authored by "user{id}".
pub fn numbered_messages(n: usize) -> Vec<Message> {
    (1..=n)
        .map(|i| Message {
            id: i.to_string(),
            kind: "Default".to_string(),
            timestamp: timestamp(i),
            content: format!("message {i}"),
            author: Author {
                id: format!("u{i}"),
                name: format!("user{i}"),
                discriminator: "0001".to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
        .collect()
}

/// Window with every message already ingested.
pub fn indexed_window(messages: Vec<Message>, page_size: usize) -> MessageWindow {
    let total = messages.len();
    let mut window = MessageWindow::with_messages(messages, page_size);
    for pos in (0..total).rev() {
        window.index_message(pos);
    }
    window
}

pub fn chunk_of(channel_id: &str, messages: Vec<Message>) -> Chunk {
    Chunk {
        channel: ChunkChannel {
            id: channel_id.to_string(),
            name: format!("channel-{channel_id}"),
            topic: None,
        },
        map: ChunkMap {
            chunks: 1,
            current: 0,
            messages: Some(messages.len() as u64),
        },
        messages,
        guild: None,
    }
}

/// Raw export-shaped message objects.
pub fn sample_messages(n: usize) -> Vec<Value> {
    (1..=n)
        .map(|i| {
            json!({
                "id": i.to_string(),
                "type": "Default",
                "timestamp": timestamp(i),
                "timestampEdited": null,
                "isPinned": false,
                "content": format!("message {i}"),
                "author": {
                    "id": format!("u{i}"),
                    "name": format!("user{i}"),
                    "discriminator": "0001",
                    "isBot": false
                },
                "attachments": [],
                "embeds": [],
                "reactions": [],
                "mentions": []
            })
        })
        .collect()
}

/// Plaintext chunk document.
pub fn chunk_json(channel_id: &str, messages: &[Value], current: u32, chunks: u32) -> String {
    json!({
        "map": {"current": current, "chunks": chunks, "messages": messages.len()},
        "guild": {"id": "1", "name": "Test Guild", "iconUrl": null},
        "channel": {"id": channel_id, "name": format!("channel-{channel_id}"), "topic": null},
        "messages": messages
    })
    .to_string()
}

/// Plaintext server descriptor with uncategorised channels, each locked by
/// the fingerprint of its password.
pub fn server_json(name: &str, channels: &[(&str, &str, &str)]) -> String {
    let mut bucket = serde_json::Map::new();
    for (id, channel_name, password) in channels {
        bucket.insert(
            id.to_string(),
            json!({
                "key": key_hash(password),
                "chunks": 1,
                "name": channel_name,
                "topic": null,
                "messages": 3
            }),
        );
    }
    json!({
        "name": name,
        "icon": null,
        "emojis": {},
        "categories": {"channels": bucket}
    })
    .to_string()
}

/// One raw export file as written by the exporter.
pub fn export_json(
    guild: (&str, &str),
    channel: (&str, &str),
    category: (&str, &str),
    messages: &[Value],
) -> String {
    json!({
        "guild": {"id": guild.0, "name": guild.1, "iconUrl": "https://cdn.example/guild.png"},
        "channel": {
            "id": channel.0,
            "type": "GuildTextChat",
            "categoryId": category.0,
            "category": category.1,
            "name": channel.1,
            "topic": null
        },
        "messages": messages
    })
    .to_string()
}
