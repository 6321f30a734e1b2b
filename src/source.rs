//! Where archive resources come from: a local directory or a static web host.

use std::fs;
use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::ArchiveError;

pub fn index_path() -> String {
    "servers/index.json".to_string()
}

pub fn server_path(server_id: &str) -> String {
    format!("servers/{server_id}.json")
}

pub fn chunk_path(channel_id: &str, chunk_index: u32) -> String {
    format!("servers/{channel_id}/{chunk_index}.json")
}

/// Read-only access to archive resources by relative path.
pub trait ArchiveSource: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, ArchiveError>;

    /// Human-readable location, for logs and messages.
    fn describe(&self) -> String;
}

/// Open a directory root or an `http(s)://` base URL.
pub fn open_source(location: &str) -> Box<dyn ArchiveSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new(location))
    } else {
        Box::new(DirSource::new(location))
    }
}

/// Resources laid out under a local directory.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveSource for DirSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        if path.split('/').any(|segment| segment == "..") {
            return Err(ArchiveError::NotFound(path.to_string()));
        }
        let full = self.root.join(path);
        debug!(path = %full.display(), "reading resource");
        fs::read(&full).map_err(|e| match e.kind() {
            IoErrorKind::NotFound => ArchiveError::NotFound(path.to_string()),
            _ => ArchiveError::Source {
                path: full.display().to_string(),
                message: e.to_string(),
            },
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Resources served over HTTP, e.g. a static pages deployment.
pub struct HttpSource {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl ArchiveSource for HttpSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let url = self.url_for(path);
        debug!(%url, "fetching resource");
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Err(ArchiveError::NotFound(path.to_string())),
            Err(ureq::Error::Status(status, _)) => {
                return Err(ArchiveError::Source {
                    path: url,
                    message: format!("HTTP {status}"),
                });
            }
            Err(e) => {
                return Err(ArchiveError::Source {
                    path: url,
                    message: e.to_string(),
                });
            }
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| ArchiveError::Source {
                path: url.clone(),
                message: e.to_string(),
            })?;
        Ok(body)
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}
