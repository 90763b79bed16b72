use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::decision::{DecidedBy, Role};

pub const KEEL_DIR: &str = ".keel";
pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const INDEX_FILE: &str = "index.sqlite";
pub const CONFIG_FILE: &str = "config.yml";

/// Where one repository's ledger lives. Built once per invocation and passed
/// to the log, index and write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    pub root: PathBuf,
    pub keel_dir: PathBuf,
    pub log: PathBuf,
    pub index: PathBuf,
    pub repo_config: PathBuf,
}

impl LedgerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let keel_dir = root.join(KEEL_DIR);
        Self {
            log: keel_dir.join(DECISIONS_FILE),
            index: keel_dir.join(INDEX_FILE),
            repo_config: keel_dir.join(CONFIG_FILE),
            keel_dir,
            root,
        }
    }

    /// A ledger counts as initialized once its log file exists.
    pub fn is_initialized(&self) -> bool {
        self.log.is_file()
    }
}

/// Defaults applied by the write path and list/search reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeelConfig {
    pub role: Option<Role>,
    pub identifier: Option<String>,
    pub search_limit: Option<usize>,
}

impl KeelConfig {
    /// Provenance for a new decision; `agent` on the command line wins over
    /// the configured role.
    pub fn decided_by(&self, agent: bool) -> DecidedBy {
        let role = if agent {
            Role::Agent
        } else {
            self.role.unwrap_or_default()
        };
        DecidedBy {
            role,
            identifier: self.identifier.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown role `{0}` (expected human or agent)")]
    InvalidRole(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    decided_by: Option<RawDecidedBy>,
    #[serde(default)]
    search: Option<RawSearch>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDecidedBy {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSearch {
    #[serde(default)]
    limit: Option<usize>,
}

/// Merges the user config and then the repo config; a key set in a later
/// layer replaces the earlier value.
pub fn load_effective_config(
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<KeelConfig, ConfigError> {
    let mut merged = KeelConfig::default();

    for path in [user_config, repo_config].into_iter().flatten() {
        if path.is_file() {
            let layer = load_config_file(path)?;
            merge_layer(&mut merged, layer);
        }
    }

    Ok(merged)
}

pub fn load_config_file(path: &Path) -> Result<KeelConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content).map_err(|err| match err {
        ConfigError::Yaml { source, .. } => ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

fn parse_config(content: &str) -> Result<KeelConfig, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
        path: PathBuf::new(),
        source,
    })?;
    let decided_by = raw.decided_by.unwrap_or_default();
    let role = decided_by
        .role
        .as_deref()
        .map(|value| {
            value
                .parse::<Role>()
                .map_err(|_| ConfigError::InvalidRole(value.to_string()))
        })
        .transpose()?;
    Ok(KeelConfig {
        role,
        identifier: decided_by.identifier.filter(|value| !value.trim().is_empty()),
        search_limit: raw.search.and_then(|search| search.limit),
    })
}

fn merge_layer(merged: &mut KeelConfig, layer: KeelConfig) {
    if layer.role.is_some() {
        merged.role = layer.role;
    }
    if layer.identifier.is_some() {
        merged.identifier = layer.identifier;
    }
    if layer.search_limit.is_some() {
        merged.search_limit = layer.search_limit;
    }
}

pub fn default_repo_config_yaml() -> String {
    r#"decided_by:
  role: human
search:
  limit: 0
"#
    .to_string()
}
