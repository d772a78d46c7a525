use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;

use varanno_cache::{CacheManager, ReferenceSource};
use varanno_pipeline::AnnotatorConfig;

/// Config file (if given) with command line overrides for the cache table.
pub fn load_config(matches: &ArgMatches) -> Result<AnnotatorConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AnnotatorConfig::from_file(Path::new(path))
            .with_context(|| format!("Failed to read config file: {}", path))?,
        None => AnnotatorConfig::default(),
    };
    if let Some(folder) = matches.get_one::<String>("cache-folder") {
        config.cache.cache_folder = Some(PathBuf::from(folder));
    }
    Ok(config)
}

pub fn build_manager(config: &AnnotatorConfig) -> Result<CacheManager> {
    let manager = CacheManager::builder()
        .with_settings(&config.cache)
        .finish()
        .context("Failed to open the cache folder")?;
    Ok(manager)
}

pub fn reference_source(matches: &ArgMatches) -> Result<ReferenceSource> {
    let reference = matches
        .get_one::<String>("reference")
        .context("A reference source is required")?;
    Ok(ReferenceSource::from_path(reference))
}
