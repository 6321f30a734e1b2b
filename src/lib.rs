pub mod archive;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod model;
pub mod render;
pub mod seal;
pub mod search;
pub mod session;
pub mod source;
pub mod window;

#[cfg(test)]
pub mod test_utils;

pub use archive::{Archive, ChannelAccess, IndexEntry, ServerLoad, UnlockedServer, accessible_channels};
pub use config::Config;
pub use error::{ArchiveError, ErrorKind};
pub use keys::{KeyRing, key_hash, resolve_access};
pub use render::{AppendMode, DateFormat, RenderContext, Renderer, TerminalRenderer};
pub use search::{Query, search};
pub use session::{JumpOutcome, LoadOutcome, ScrollOutcome, Session, ViewState};
pub use source::{ArchiveSource, DirSource, HttpSource, open_source};
pub use window::MessageWindow;

/// Where a message lives: the same parameters the viewer accepts on entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLink {
    pub server: String,
    pub channel: String,
    pub chunk: u32,
    pub message: String,
}

impl MessageLink {
    /// `base` with the link parameters appended as a query string.
    pub fn to_url(&self, base: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{separator}server={}&channel={}&chunk={}&message={}",
            self.server, self.channel, self.chunk, self.message
        )
    }

    /// Read link parameters back out of a URL or bare query string.
    pub fn parse(url: &str) -> Option<Self> {
        let query = url.split_once('?').map_or(url, |(_, query)| query);
        let mut server = None;
        let mut channel = None;
        let mut chunk = None;
        let mut message = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("server", value)) => server = Some(value.to_string()),
                Some(("channel", value)) => channel = Some(value.to_string()),
                Some(("chunk", value)) => chunk = value.parse().ok(),
                Some(("message", value)) => message = Some(value.to_string()),
                _ => {}
            }
        }
        Some(Self {
            server: server?,
            channel: channel?,
            chunk: chunk.unwrap_or(0),
            message: message?,
        })
    }
}
