//! Build an encrypted archive from raw per-channel export files.
//!
//! Every `*.json` file under the input directory is one channel export:
//! `{"guild": {...}, "channel": {...}, "messages": [...]}`. Sealing groups
//! channels by guild, splits messages into chunks and writes
//!
//! ```text
//! servers/index.json            plaintext {guild id: fingerprint}
//! servers/{guild}.json          encrypted server descriptor
//! servers/{channel}/{n}.json    encrypted chunk n
//! ```
//!
//! Chunks are encrypted with the channel's password, which defaults to the
//! category's, then the server's, then the archive-wide password.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::crypto;
use crate::keys::key_hash;
use crate::model::UNCATEGORIZED;

/// Passwords used for sealing, most specific wins.
#[derive(Debug, Clone, Default)]
pub struct Passwords {
    pub default: String,
    pub servers: HashMap<String, String>,
    pub categories: HashMap<String, String>,
    pub channels: HashMap<String, String>,
}

impl Passwords {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            ..Default::default()
        }
    }

    pub fn for_server(&self, server_id: &str) -> &str {
        self.servers
            .get(server_id)
            .map(String::as_str)
            .unwrap_or(&self.default)
    }

    pub fn for_channel(&self, server_id: &str, category_id: &str, channel_id: &str) -> &str {
        self.channels
            .get(channel_id)
            .or_else(|| self.categories.get(category_id))
            .map(String::as_str)
            .unwrap_or_else(|| self.for_server(server_id))
    }
}

#[derive(Debug, Clone)]
pub struct SealOptions {
    pub chunk_size: usize,
    pub passwords: Passwords,
}

impl SealOptions {
    pub fn new(passwords: Passwords) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            passwords,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SealReport {
    pub servers: usize,
    pub channels: usize,
    pub chunks: usize,
    pub messages: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportGuild {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    icon_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportChannel {
    id: String,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    topic: Option<String>,
}

struct ExportFile {
    path: PathBuf,
    guild: ExportGuild,
    channel: ExportChannel,
    guild_raw: Value,
    channel_raw: Value,
    messages: Vec<Value>,
}

impl ExportFile {
    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut value: Value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let guild_raw = value.get_mut("guild").map(Value::take).unwrap_or(Value::Null);
        let channel_raw = value
            .get_mut("channel")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let messages = match value.get_mut("messages").map(Value::take) {
            Some(Value::Array(messages)) => messages,
            _ => bail!("{} has no messages array", path.display()),
        };
        let guild: ExportGuild = serde_json::from_value(guild_raw.clone())
            .with_context(|| format!("{}: bad guild object", path.display()))?;
        let channel: ExportChannel = serde_json::from_value(channel_raw.clone())
            .with_context(|| format!("{}: bad channel object", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            guild,
            channel,
            guild_raw,
            channel_raw,
            messages,
        })
    }

    fn category_id(&self) -> &str {
        match self.channel.category_id.as_deref() {
            None | Some("") | Some("0") => UNCATEGORIZED,
            Some(id) => id,
        }
    }
}

/// Export files under `input`, sorted by path.
pub fn collect_exports(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        bail!("{} is not a directory", input.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", input.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn chunk_count(messages: usize, chunk_size: usize) -> usize {
    messages.div_ceil(chunk_size)
}

struct GuildBuild {
    name: String,
    icon: Option<String>,
    categories: Map<String, Value>,
    emojis: Map<String, Value>,
}

impl GuildBuild {
    fn new(guild: &ExportGuild) -> Self {
        let mut categories = Map::new();
        categories.insert(UNCATEGORIZED.to_string(), Value::Object(Map::new()));
        Self {
            name: guild.name.clone(),
            icon: guild.icon_url.clone(),
            categories,
            emojis: Map::new(),
        }
    }

    fn add_channel(&mut self, category_id: &str, category_name: &str, id: &str, entry: Value) {
        if category_id == UNCATEGORIZED {
            if let Some(Value::Object(bucket)) = self.categories.get_mut(UNCATEGORIZED) {
                bucket.insert(id.to_string(), entry);
            }
            return;
        }
        let category = self
            .categories
            .entry(category_id.to_string())
            .or_insert_with(|| json!({"name": category_name, "channels": {}}));
        if let Some(Value::Object(channels)) = category.get_mut("channels") {
            channels.insert(id.to_string(), entry);
        }
    }

    fn collect_emojis(&mut self, messages: &[Value]) {
        for message in messages {
            let Some(reactions) = message.get("reactions").and_then(Value::as_array) else {
                continue;
            };
            for reaction in reactions {
                let emoji = &reaction["emoji"];
                let (Some(name), Some(url)) =
                    (emoji["name"].as_str(), emoji["imageUrl"].as_str())
                else {
                    continue;
                };
                if !self.emojis.contains_key(name) {
                    self.emojis.insert(name.to_string(), json!(url));
                }
            }
        }
    }

    fn descriptor(self) -> Value {
        json!({
            "name": self.name,
            "icon": self.icon,
            "categories": self.categories,
            "emojis": self.emojis,
        })
    }
}

fn write_sealed(path: &Path, plaintext: &str, password: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, crypto::encrypt(plaintext, password))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Seal every export under `input` into `out/servers/`.
pub fn seal(input: &Path, out: &Path, options: &SealOptions) -> Result<SealReport> {
    if options.chunk_size == 0 {
        bail!("chunk size must be positive");
    }
    if options.passwords.default.is_empty() {
        bail!("a password is required");
    }
    let files = collect_exports(input)?;
    if files.is_empty() {
        bail!("no .json exports found in {}", input.display());
    }

    let servers_dir = out.join("servers");
    fs::create_dir_all(&servers_dir)
        .with_context(|| format!("failed to create {}", servers_dir.display()))?;

    let mut report = SealReport::default();
    let mut guild_order: Vec<String> = Vec::new();
    let mut guilds: HashMap<String, GuildBuild> = HashMap::new();

    for path in &files {
        let export = ExportFile::read(path)?;
        let guild_id = export.guild.id.clone();
        let category_id = export.category_id().to_string();
        let channel_id = export.channel.id.clone();
        if channel_id.is_empty() || channel_id.contains(['/', '\\']) || channel_id == ".." {
            bail!("{}: invalid channel id {channel_id:?}", export.path.display());
        }

        let password = options
            .passwords
            .for_channel(&guild_id, &category_id, &channel_id)
            .to_string();
        let total = export.messages.len();
        let chunks = chunk_count(total, options.chunk_size);

        let guild = guilds.entry(guild_id.clone()).or_insert_with(|| {
            guild_order.push(guild_id.clone());
            GuildBuild::new(&export.guild)
        });
        guild.collect_emojis(&export.messages);
        guild.add_channel(
            &category_id,
            export.channel.category.as_deref().unwrap_or_default(),
            &channel_id,
            json!({
                "key": key_hash(&password),
                "chunks": chunks,
                "name": export.channel.name,
                "topic": export.channel.topic,
                "messages": total,
            }),
        );

        for (i, slice) in export.messages.chunks(options.chunk_size).enumerate() {
            let document = json!({
                "map": {"current": i, "chunks": chunks, "messages": total},
                "guild": export.guild_raw,
                "channel": export.channel_raw,
                "messages": slice,
            });
            let target = servers_dir.join(&channel_id).join(format!("{i}.json"));
            write_sealed(&target, &document.to_string(), &password)?;
            debug!(path = %target.display(), messages = slice.len(), "chunk sealed");
            report.chunks += 1;
        }
        if total == 0 {
            warn!(channel = %channel_id, "channel has no messages, no chunks written");
        }
        info!(
            file = %export.path.display(),
            channel = %channel_id,
            chunks,
            "channel sealed"
        );
        report.channels += 1;
        report.messages += total;
    }

    let mut index = Map::new();
    for guild_id in guild_order {
        let Some(guild) = guilds.remove(&guild_id) else {
            continue;
        };
        let password = options.passwords.for_server(&guild_id);
        let descriptor = serde_json::to_string_pretty(&guild.descriptor())
            .context("failed to serialize server descriptor")?;
        write_sealed(
            &servers_dir.join(format!("{guild_id}.json")),
            &descriptor,
            password,
        )?;
        index.insert(guild_id.clone(), json!(key_hash(password)));
        info!(server = %guild_id, "server sealed");
        report.servers += 1;
    }

    let index_path = servers_dir.join("index.json");
    let index_json = serde_json::to_string_pretty(&Value::Object(index))
        .context("failed to serialize index")?;
    fs::write(&index_path, index_json)
        .with_context(|| format!("failed to write {}", index_path.display()))?;

    Ok(report)
}
