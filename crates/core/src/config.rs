use anyhow::{anyhow, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thinking_cycles::DetectorConfig;

pub const DATA_DIR_NAME: &str = ".thinking";
pub const DEFAULT_MAX_BRANCHES: usize = 10;
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 1000;
pub const DEFAULT_REFLECTION_INTERVAL: u32 = 3;
pub const DEFAULT_SCORE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

impl StorageBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "file" | "fs" | "disk" => Some(Self::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the file backend (default `~/.thinking`)
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .map(|home| home.join(DATA_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME))
    }
}

/// Immutable configuration handed to every component at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingConfig {
    pub max_branches: usize,
    pub max_history_size: usize,
    pub min_total_thoughts: u32,
    /// Periodic reflection cadence in submissions; 0 disables it
    pub reflection_interval: u32,
    /// Score assumed when a submission carries none
    pub default_score: f64,
    pub detector: DetectorConfig,
    pub storage: StorageConfig,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            max_branches: DEFAULT_MAX_BRANCHES,
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            min_total_thoughts: 1,
            reflection_interval: DEFAULT_REFLECTION_INTERVAL,
            default_score: DEFAULT_SCORE,
            detector: DetectorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl ThinkingConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_bytes(&bytes)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parses JSON, falling back to TOML.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self = match serde_json::from_slice(bytes) {
            Ok(config) => config,
            Err(json_err) => {
                let utf8 = std::str::from_utf8(bytes)
                    .map_err(|err| anyhow!("Config is neither JSON ({json_err}) nor UTF-8: {err}"))?;
                toml::from_str(utf8).map_err(|toml_err| {
                    anyhow!("Config is not valid JSON ({json_err}) or TOML ({toml_err})")
                })?
            }
        };
        Ok(config.normalized())
    }

    /// Repairs out-of-range values instead of rejecting the whole config.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        // main plus at least one fork
        self.max_branches = self.max_branches.max(2);
        self.max_history_size = self.max_history_size.max(1);
        self.min_total_thoughts = self.min_total_thoughts.max(1);
        if !self.default_score.is_finite() {
            self.default_score = DEFAULT_SCORE;
        }
        self.default_score = self.default_score.clamp(0.0, 10.0);
        self.detector = self.detector.normalized();
        self
    }
}
