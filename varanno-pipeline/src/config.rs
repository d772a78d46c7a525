use std::path::Path;

use serde::{Deserialize, Serialize};

use varanno_cache::CacheSettings;

use crate::error::{PipelineError, Result};
use crate::stages::ChromosomeStyle;

/// Upper bound on plausible variant positions, a little above the longest
/// human chromosome.
pub const DEFAULT_MAX_POSITION: u64 = 300_000_000;

/// Number of input variants per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Pipeline tuning and stage options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads; 0 lets rayon decide.
    pub threads: usize,
    pub batch_size: usize,
    pub max_position: u64,
    /// Run the normalization stage before validation.
    pub normalize: bool,
    pub chromosome_style: ChromosomeStyle,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            max_position: DEFAULT_MAX_POSITION,
            normalize: false,
            chromosome_style: ChromosomeStyle::AsIs,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_position == 0 {
            return Err(PipelineError::Config("max_position must be at least 1".to_string()));
        }
        if !self.normalize && self.chromosome_style != ChromosomeStyle::AsIs {
            return Err(PipelineError::Config(
                "chromosome_style only applies when normalize = true".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whole-run configuration file: a `[cache]` and a `[pipeline]` table.
///
/// ```toml
/// [cache]
/// cache_folder = "/scratch/varanno"
/// pipeline_version = "2"
///
/// [pipeline]
/// threads = 8
/// normalize = true
/// chromosome_style = "ucsc"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub cache: CacheSettings,
    pub pipeline: PipelineConfig,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl AnnotatorConfig {
    /// Read a TOML (or, by extension, YAML) config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }
}
