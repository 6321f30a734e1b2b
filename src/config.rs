use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::ingest::DEFAULT_BATCH_SIZE;
use crate::render::DateFormat;
use crate::window::DEFAULT_PAGE_SIZE;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Archive root: a directory containing `servers/`, or an http(s) URL
    #[serde(default = "default_source")]
    pub source: String,

    /// Messages per rendered page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Messages indexed per ingest slice
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timestamp style (default, us, or iso)
    #[serde(default)]
    pub date_format: DateFormat,

    /// Messages per chunk when sealing
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Base URL used when printing message links
    #[serde(default)]
    pub link_base: Option<String>,
}

fn default_source() -> String {
    ".".to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME not set")?;
    Ok(PathBuf::from(home).join(".archview").join("config.toml"))
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("invalid {key}: must be a positive integer"),
    }
}

impl Config {
    /// Load config from ~/.archview/config.toml, returning defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save config to ~/.archview/config.toml
    pub fn save(&self) -> Result<PathBuf> {
        let path = config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Apply `config set KEY VALUE`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "source" => self.source = value.to_string(),
            "page_size" | "page" => self.page_size = parse_count("page_size", value)?,
            "batch_size" | "batch" => self.batch_size = parse_count("batch_size", value)?,
            "date_format" | "date" => self.date_format = DateFormat::parse(value)?,
            "chunk_size" | "chunk" => self.chunk_size = parse_count("chunk_size", value)?,
            "link_base" | "link" => {
                let value = value.trim();
                self.link_base = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => bail!("unknown config key: {key}"),
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: default_source(),
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            date_format: DateFormat::default(),
            chunk_size: default_chunk_size(),
            link_base: None,
        }
    }
}
