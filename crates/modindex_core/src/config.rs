use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::reconcile::MissPolicy;
use crate::scan::SelectionStrategy;

pub const DEFAULT_USER_AGENT: &str = "modindex/0.2";
pub const DEFAULT_MIRROR_DIR: &str = "bmi";
pub const DEFAULT_JOBS: usize = 8;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: usize = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const CONFIG_RELATIVE_PATH: &str = ".modindex/config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct IndexConfig {
    #[serde(default)]
    pub index: IndexSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct IndexSection {
    pub mirror_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub on_miss: Option<MissPolicy>,
    pub selection: Option<SelectionStrategy>,
    #[serde(default)]
    pub require_header_delimiter: bool,
}

impl IndexConfig {
    /// Resolve the mirror directory: env MODINDEX_MIRROR_DIR > config > DEFAULT_MIRROR_DIR.
    /// Relative paths are taken against `project_root`.
    pub fn mirror_dir(&self, project_root: &Path) -> PathBuf {
        let configured = env_string("MODINDEX_MIRROR_DIR")
            .map(PathBuf::from)
            .or_else(|| self.index.mirror_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MIRROR_DIR));
        absolutize(project_root, configured)
    }

    pub fn output_dir(&self, project_root: &Path) -> PathBuf {
        let configured = self
            .index
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        absolutize(project_root, configured)
    }

    /// Worker count: env MODINDEX_JOBS > config > DEFAULT_JOBS, never below one.
    pub fn jobs(&self) -> usize {
        env_parsed::<usize>("MODINDEX_JOBS")
            .or(self.index.jobs)
            .unwrap_or(DEFAULT_JOBS)
            .max(1)
    }

    pub fn timeout_ms(&self) -> u64 {
        env_parsed::<u64>("MODINDEX_HTTP_TIMEOUT_MS")
            .or(self.index.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn retries(&self) -> usize {
        env_parsed::<usize>("MODINDEX_HTTP_RETRIES")
            .or(self.index.retries)
            .unwrap_or(DEFAULT_RETRIES)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        env_parsed::<u64>("MODINDEX_HTTP_RETRY_DELAY_MS")
            .or(self.index.retry_delay_ms)
            .unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }

    pub fn user_agent(&self) -> String {
        env_string("MODINDEX_USER_AGENT")
            .or_else(|| self.index.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn on_miss(&self) -> MissPolicy {
        self.index.on_miss.unwrap_or_default()
    }

    pub fn selection(&self) -> SelectionStrategy {
        self.index.selection.unwrap_or_default()
    }

    /// The credential only ever comes from the process environment.
    pub fn github_token(&self) -> Option<String> {
        env_string("GITHUB_TOKEN")
    }
}

/// Load and parse an IndexConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<IndexConfig> {
    if !config_path.exists() {
        return Ok(IndexConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: IndexConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_string(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse::<T>().ok())
}

fn absolutize(root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}
