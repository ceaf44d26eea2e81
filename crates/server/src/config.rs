//! Node configuration: a small structured document read at startup, with
//! CLI flags layered on top of whatever a config file provides. Mirrors the
//! way the teacher's CLI resolves a `Config` from disk and then lets flags
//! override individual fields rather than replacing the whole document.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TCP_PORT: u16 = 7077;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("failed to write config file {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// The document a `node.toml` config file holds. Every field optional so a
/// partial file only overrides what it mentions.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ConfigFile {
    tcp_port: Option<u16>,
    data_path: Option<PathBuf>,
}

/// Fully resolved configuration the server runs with, after merging (in
/// increasing priority) built-in defaults, the config file, and CLI flags.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub tcp_port: u16,
    pub data_path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            data_path: default_data_path(),
        }
    }
}

fn default_data_path() -> PathBuf {
    std::env::temp_dir().join("cachecore")
}

/// Command-line flags. Anything left unset falls back to the config file,
/// then to built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "cachecore-server", about = "Reference TCP server for the object cache store")]
pub struct Cli {
    /// Path to a TOML config file (created with defaults if absent).
    #[arg(long, default_value = "node.toml")]
    pub config: PathBuf,

    /// Overrides the config file's `tcp_port`.
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// Overrides the config file's `data_path`.
    #[arg(long)]
    pub data_path: Option<PathBuf>,
}

impl NodeConfig {
    /// Loads the config file at `path` if present, falling back to defaults
    /// and writing them back out so a fresh deployment gets a discoverable
    /// `node.toml` to edit.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<ConfigFile>(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                let file = ConfigFile::default();
                let rendered = toml::to_string_pretty(&file).expect("ConfigFile always serializes");
                fs::write(path, rendered).map_err(|source| ConfigError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
                file
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let defaults = NodeConfig::default();
        Ok(NodeConfig {
            tcp_port: file.tcp_port.unwrap_or(defaults.tcp_port),
            data_path: file.data_path.unwrap_or(defaults.data_path),
        })
    }

    /// Applies CLI overrides on top of an already-resolved config.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(tcp_port) = cli.tcp_port {
            self.tcp_port = tcp_port;
        }
        if let Some(data_path) = &cli.data_path {
            self.data_path = data_path.clone();
        }
        self
    }
}
