//! Startup configuration: the global node directory and this node's
//! neighbor adjacency list, read once from a line-oriented file.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// An entry in the global node directory. Immutable after load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: u32,
    pub ip: IpAddr,
    pub port: u16,
}

impl NodeDescriptor {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Resolved startup configuration for a single node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub default_ttr: u32,
    pub directory: HashMap<u32, NodeDescriptor>,
    pub neighbors: Vec<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file is empty, expected defaultTtr on line 1")]
    MissingTtr,
    #[error("invalid defaultTtr on line 1: {0:?}")]
    InvalidTtr(String),
    #[error("malformed directory line {line_no}: {text:?}")]
    MalformedDirectoryLine { line_no: usize, text: String },
    #[error("malformed adjacency line {line_no}: {text:?}")]
    MalformedAdjacencyLine { line_no: usize, text: String },
    #[error("duplicate node id {0} in directory")]
    DuplicateNodeId(u32),
}

/// Parses the configuration format described in spec.md §6:
/// line 1 is `defaultTtr`; then directory lines `id ip port` until a blank
/// line or a line that is just `-1`; then adjacency lines `id peer1 peer2 …`,
/// of which only the line whose `id` matches `my_id` is kept.
pub fn parse(text: &str, my_id: u32) -> Result<Config, ConfigError> {
    let mut lines = text.lines();

    let ttr_line = lines.next().ok_or(ConfigError::MissingTtr)?;
    let default_ttr = ttr_line
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidTtr(ttr_line.to_string()))?;

    let mut directory = HashMap::new();
    let mut line_no = 1usize;
    for line in lines.by_ref() {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "-1" {
            break;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(ConfigError::MalformedDirectoryLine {
                line_no,
                text: trimmed.to_string(),
            });
        }
        let parse_line = || -> Option<NodeDescriptor> {
            Some(NodeDescriptor {
                id: fields[0].parse().ok()?,
                ip: fields[1].parse().ok()?,
                port: fields[2].parse().ok()?,
            })
        };
        let descriptor = parse_line().ok_or_else(|| ConfigError::MalformedDirectoryLine {
            line_no,
            text: trimmed.to_string(),
        })?;
        if directory.insert(descriptor.id, descriptor).is_some() {
            return Err(ConfigError::DuplicateNodeId(descriptor.id));
        }
    }

    let mut neighbors = Vec::new();
    for line in lines {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let id: u32 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ConfigError::MalformedAdjacencyLine {
                line_no,
                text: trimmed.to_string(),
            })?;
        let peers: Result<Vec<u32>, _> = fields.map(|s| s.parse::<u32>()).collect();
        let peers = peers.map_err(|_| ConfigError::MalformedAdjacencyLine {
            line_no,
            text: trimmed.to_string(),
        })?;
        if id == my_id {
            neighbors = peers;
        }
    }

    Ok(Config {
        default_ttr,
        directory,
        neighbors,
    })
}

pub fn load(path: &Path, my_id: u32) -> anyhow::Result<Config> {
    use anyhow::Context;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse(&text, my_id).with_context(|| format!("parsing config file {}", path.display()))
}
