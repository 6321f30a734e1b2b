//! Index, server unlock and chunk fetch on top of an [`ArchiveSource`].

use serde_json::{Map, Value};
use std::thread;
use tracing::{debug, warn};

use crate::crypto;
use crate::error::ArchiveError;
use crate::keys::KeyRing;
use crate::model::{Chunk, Server};
use crate::source::{ArchiveSource, chunk_path, index_path, server_path};

/// One row of `servers/index.json`. Servers without a fingerprint were never
/// sealed and cannot be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub server_id: String,
    pub fingerprint: Option<String>,
}

/// A server whose descriptor was decrypted with one of the user's keys.
#[derive(Debug, Clone)]
pub struct UnlockedServer {
    pub server: Server,
    pub key: String,
}

/// Outcome of unlocking one server; failures never affect other servers.
#[derive(Debug)]
pub struct ServerLoad {
    pub server_id: String,
    pub result: Result<UnlockedServer, ArchiveError>,
}

/// A channel the user holds a key for, with that key resolved.
#[derive(Debug, Clone)]
pub struct ChannelAccess {
    pub server_id: String,
    pub category_id: String,
    pub channel_id: String,
    pub name: String,
    pub topic: Option<String>,
    pub chunks: u32,
    pub key: String,
}

impl ChannelAccess {
    /// Access for a channel opened without consulting its descriptor.
    pub fn forced(server_id: &str, channel_id: &str, key: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            category_id: String::new(),
            channel_id: channel_id.to_string(),
            name: channel_id.to_string(),
            topic: None,
            chunks: 0,
            key: key.to_string(),
        }
    }
}

pub struct Archive {
    source: Box<dyn ArchiveSource>,
}

impl Archive {
    pub fn new(source: impl ArchiveSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn from_boxed(source: Box<dyn ArchiveSource>) -> Self {
        Self { source }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Read the plaintext access index in document order.
    pub fn index(&self) -> Result<Vec<IndexEntry>, ArchiveError> {
        let path = index_path();
        let bytes = self.source.fetch(&path)?;
        let map: Map<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|source| ArchiveError::MalformedChunk { path, source })?;
        Ok(map
            .into_iter()
            .map(|(server_id, value)| IndexEntry {
                server_id,
                fingerprint: value.as_str().map(str::to_string),
            })
            .collect())
    }

    /// Fetch and decrypt a single server descriptor.
    pub fn server(&self, server_id: &str, key: &str) -> Result<Server, ArchiveError> {
        let path = server_path(server_id);
        let json = self.decrypt_resource(&path, key)?;
        Server::from_json(server_id, &json)
            .map_err(|source| ArchiveError::MalformedChunk { path, source })
    }

    /// Decrypt every server some key in `keys` opens.
    ///
    /// Descriptors are fetched and decrypted on scoped threads, each with its
    /// own key, at most [`unlock_parallelism`] at a time. Results keep index
    /// order.
    pub fn unlock_servers(&self, keys: &KeyRing) -> Result<Vec<ServerLoad>, ArchiveError> {
        let index = self.index()?;
        let matched: Vec<(String, String)> = index
            .into_iter()
            .filter_map(|entry| {
                let fingerprint = entry.fingerprint?;
                match keys.resolve(&fingerprint) {
                    Ok(key) => Some((entry.server_id, key.to_string())),
                    Err(_) => {
                        debug!(server = %entry.server_id, "no key for server");
                        None
                    }
                }
            })
            .collect();

        let loads = self.load_servers(&matched, unlock_parallelism());
        for load in &loads {
            if let Err(e) = &load.result {
                warn!(server = %load.server_id, error = %e, "failed to load server");
            }
        }
        Ok(loads)
    }

    fn load_servers(&self, matched: &[(String, String)], limit: usize) -> Vec<ServerLoad> {
        let mut loads = Vec::with_capacity(matched.len());
        for group in matched.chunks(limit.max(1)) {
            thread::scope(|scope| {
                let handles: Vec<_> = group
                    .iter()
                    .map(|(server_id, key)| {
                        scope.spawn(move || ServerLoad {
                            server_id: server_id.clone(),
                            result: self.server(server_id, key).map(|server| UnlockedServer {
                                server,
                                key: key.clone(),
                            }),
                        })
                    })
                    .collect();
                loads.extend(handles.into_iter().zip(group).map(|(handle, (server_id, _))| {
                    handle.join().unwrap_or_else(|_| ServerLoad {
                        server_id: server_id.clone(),
                        result: Err(ArchiveError::Source {
                            path: server_path(server_id),
                            message: "loader thread panicked".to_string(),
                        }),
                    })
                }));
            });
        }
        loads
    }

    /// Fetch, decrypt and parse one chunk of a channel.
    pub fn fetch_chunk(
        &self,
        channel_id: &str,
        chunk_index: u32,
        key: &str,
    ) -> Result<Chunk, ArchiveError> {
        let path = chunk_path(channel_id, chunk_index);
        let json = self.decrypt_resource(&path, key)?;
        let chunk: Chunk = serde_json::from_str(&json)
            .map_err(|source| ArchiveError::MalformedChunk { path, source })?;
        debug!(
            channel = channel_id,
            chunk = chunk_index,
            messages = chunk.messages.len(),
            "chunk decrypted"
        );
        Ok(chunk)
    }

    fn decrypt_resource(&self, path: &str, key: &str) -> Result<String, ArchiveError> {
        let bytes = self.source.fetch(path)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| ArchiveError::Decryption(format!("{path} is not base64 text")))?;
        crypto::decrypt(&text, key)
    }
}

/// Most server descriptors unlocked at once.
pub fn unlock_parallelism() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

/// Channels of `server` that some key in `keys` opens, each with its key.
pub fn accessible_channels(server: &Server, keys: &KeyRing) -> Vec<ChannelAccess> {
    let mut out = Vec::new();
    for (category, channel) in server.channels() {
        let resolved = channel
            .key
            .as_deref()
            .and_then(|fingerprint| keys.resolve(fingerprint).ok());
        match resolved {
            Some(key) => out.push(ChannelAccess {
                server_id: server.id.clone(),
                category_id: category.id.clone(),
                channel_id: channel.id.clone(),
                name: channel.name.clone(),
                topic: channel.topic.clone().filter(|t| !t.is_empty()),
                chunks: channel.chunks,
                key: key.to_string(),
            }),
            None => warn!(channel = %channel.id, "invalid key for channel, skipping"),
        }
    }
    out
}
