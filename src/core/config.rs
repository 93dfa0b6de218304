//! Server definition loading.
//!
//! Tool servers are declared in a JSON document whose top-level `mcp_servers`
//! object maps a server name to one entry. The entry's fields decide the
//! transport: an explicit `type` marker of `http` selects streamable HTTP, a
//! bare `url` selects SSE, a `command` selects a spawned subprocess. The
//! checks run in that order, so an entry carrying both a `url` and a
//! `command` is treated as a URL transport.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::core::error::ConfigError;
use crate::utils::paths::expand_tilde;

pub const SERVERS_FILE: &str = "mcp_servers.json";

const SERVERS_KEY: &str = "mcp_servers";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescriptor {
    pub name: String,
    pub endpoint: ServerEndpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEndpoint {
    Stdio {
        command: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        env: Option<HashMap<String, String>>,
    },
    Sse {
        url: String,
    },
    StreamableHttp {
        url: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<String>,
    env: Option<HashMap<String, String>>,
}

/// Reads server descriptors from `path`, preserving document order. An
/// absent file is not an error: it yields an empty set. A present but
/// unreadable or malformed file is reported so the caller can fall back to
/// running without tools.
pub fn load_descriptors(path: &Path) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let document: Value = serde_json::from_str(&contents).map_err(|err| ConfigError::Structure {
        reason: err.to_string(),
    })?;
    let servers = document
        .get(SERVERS_KEY)
        .ok_or_else(|| ConfigError::Structure {
            reason: format!("missing top-level '{SERVERS_KEY}' object"),
        })?;
    let entries = servers.as_object().ok_or_else(|| ConfigError::Structure {
        reason: format!("'{SERVERS_KEY}' must map server names to entries"),
    })?;

    let mut descriptors = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        let entry: RawEntry =
            serde_json::from_value(value.clone()).map_err(|err| ConfigError::Entry {
                name: name.clone(),
                reason: err.to_string(),
            })?;
        descriptors.push(ServerDescriptor {
            name: name.clone(),
            endpoint: classify(name, entry)?,
        });
    }
    Ok(descriptors)
}

fn classify(name: &str, entry: RawEntry) -> Result<ServerEndpoint, ConfigError> {
    let marker = entry.kind.as_deref().map(str::to_ascii_lowercase);
    if matches!(
        marker.as_deref(),
        Some("http" | "streamable-http" | "streamable_http")
    ) {
        let url = entry.url.ok_or_else(|| ConfigError::Entry {
            name: name.to_string(),
            reason: "http transport requires a url".to_string(),
        })?;
        return Ok(ServerEndpoint::StreamableHttp { url });
    }

    if let Some(url) = entry.url {
        return Ok(ServerEndpoint::Sse { url });
    }

    if let Some(command) = entry.command {
        return Ok(ServerEndpoint::Stdio {
            command: expand_tilde(&command),
            args: entry.args.iter().map(|arg| expand_tilde(arg)).collect(),
            cwd: entry.cwd.map(|cwd| PathBuf::from(expand_tilde(&cwd))),
            env: entry.env,
        });
    }

    Err(ConfigError::Entry {
        name: name.to_string(),
        reason: "entry needs a url or a command".to_string(),
    })
}

/// The starter document written by `causerie init`: one filesystem server
/// rooted at the desktop, with URL-based entries shown commented out in the
/// surrounding docs rather than in JSON.
pub fn starter_document() -> String {
    let root = crate::utils::paths::desktop_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "/tmp".to_string());
    let document = serde_json::json!({
        SERVERS_KEY: {
            "filesystem": {
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem", root],
            }
        }
    });
    let mut text = serde_json::to_string_pretty(&document).unwrap_or_else(|_| "{}".to_string());
    text.push('\n');
    text
}
