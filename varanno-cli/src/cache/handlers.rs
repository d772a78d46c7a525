use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use tabled::{Table, Tabled};

use varanno_cache::artifact::HeaderProbe;

use super::cli::*;
use crate::settings::{build_manager, load_config, reference_source};

#[derive(Tabled)]
struct ArtifactRow {
    artifact: String,
    version: String,
    records: String,
    created: String,
    source: String,
}

impl ArtifactRow {
    fn new(path: PathBuf, probe: HeaderProbe) -> Self {
        let artifact = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match probe {
            HeaderProbe::Readable(header) => ArtifactRow {
                artifact,
                version: header.pipeline_version,
                records: header.record_count.to_string(),
                created: header.created_at.to_rfc3339(),
                source: header.fingerprint.source_path.display().to_string(),
            },
            HeaderProbe::OtherVersion(v) => ArtifactRow {
                artifact,
                version: format!("format v{}", v),
                records: "-".to_string(),
                created: "-".to_string(),
                source: "-".to_string(),
            },
            HeaderProbe::Corrupt(reason) => ArtifactRow {
                artifact,
                version: "-".to_string(),
                records: "-".to_string(),
                created: "-".to_string(),
                source: format!("corrupt: {}", reason),
            },
            HeaderProbe::Missing => ArtifactRow {
                artifact,
                version: "-".to_string(),
                records: "-".to_string(),
                created: "-".to_string(),
                source: "missing".to_string(),
            },
        }
    }
}

/// Execute the cache subcommands
/// # Arguments
/// - matches: matched items from CLAP args
pub fn run_cache(matches: &ArgMatches) -> Result<()> {
    let (subcmd, matches) = matches
        .subcommand()
        .context("A cache subcommand is required")?;
    let config = load_config(matches)?;
    let manager = build_manager(&config)?;

    match subcmd {
        CACHE_STATUS => {
            let source = reference_source(matches)?;
            let state = manager.state(&source)?;
            let key = manager.key_for(&source)?;
            println!("{}\t{}", state, manager.artifact_path(&key).display());
        }
        CACHE_BUILD => {
            let source = reference_source(matches)?;
            let lookup = if matches.get_flag("force") {
                manager.force_refresh(&source)?
            } else {
                manager.lookup(&source)?
            };
            println!(
                "{}: {} records ({}) in {:?}",
                source.path().display(),
                lookup.index.len(),
                lookup.outcome,
                lookup.elapsed
            );
        }
        CACHE_INVALIDATE => {
            let source = reference_source(matches)?;
            if manager.invalidate(&source)? {
                println!("Removed cached artifact for {}", source.path().display());
            } else {
                println!("No cached artifact for {}", source.path().display());
            }
        }
        CACHE_INSPECT => {
            let source = reference_source(matches)?;
            match manager.inspect(&source)? {
                Some(header) => {
                    let state = manager.state(&source)?;
                    println!("state:            {}", state);
                    println!("format version:   {}", header.format_version);
                    println!("pipeline version: {}", header.pipeline_version);
                    println!("records:          {}", header.record_count);
                    println!("created:          {}", header.created_at.to_rfc3339());
                    println!("source:           {}", header.fingerprint.source_path.display());
                    println!("source size:      {}", header.fingerprint.byte_size);
                    println!("source modified:  {}", header.fingerprint.modified.to_rfc3339());
                    println!("content digest:   {}", header.fingerprint.content_digest);
                }
                None => println!("No cached artifact for {}", source.path().display()),
            }
        }
        CACHE_LIST => {
            let artifacts = manager.list_artifacts()?;
            let n = artifacts.len();
            let rows: Vec<ArtifactRow> = artifacts
                .into_iter()
                .map(|(path, probe)| ArtifactRow::new(path, probe))
                .collect();
            println!("{}", Table::new(rows));
            println!("Number of artifacts in {}: {}", manager.cache_folder().display(), n);
        }
        CACHE_CLEAR => {
            let removed = manager.clear()?;
            println!("Removed {} artifacts from {}", removed, manager.cache_folder().display());
        }
        _ => unreachable!("Unknown cache subcommand: {subcmd}"),
    }

    Ok(())
}
