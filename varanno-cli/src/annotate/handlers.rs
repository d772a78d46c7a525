use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use varanno_core::adapter::RawVariant;
use varanno_core::utils::get_dynamic_reader;
use varanno_pipeline::{Orchestrator, OutputFormat, into_batches, write_outcomes};

use crate::settings::{build_manager, load_config, reference_source};

///
/// Read query variants, one per line. Blank lines and `#` comments (including
/// VCF headers) are skipped.
///
pub fn read_query_variants<R: BufRead>(reader: R) -> Result<Vec<RawVariant>> {
    let mut variants = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        variants.push(RawVariant::from_line(&line));
    }
    Ok(variants)
}

fn open_input(input: &str) -> Result<Vec<RawVariant>> {
    if input == "-" {
        return read_query_variants(io::stdin().lock());
    }
    let reader = get_dynamic_reader(Path::new(input))?;
    read_query_variants(reader)
}

/// Execute the annotate command
/// # Arguments
/// - matches: matched items from CLAP args
pub fn run_annotate(matches: &ArgMatches) -> Result<()> {
    let mut config = load_config(matches)?;
    if let Some(threads) = matches.get_one::<usize>("threads") {
        config.pipeline.threads = *threads;
    }
    if let Some(batch_size) = matches.get_one::<usize>("batch-size") {
        config.pipeline.batch_size = *batch_size;
    }
    if matches.get_flag("normalize") {
        config.pipeline.normalize = true;
    }

    let format: OutputFormat = matches
        .get_one::<String>("format")
        .map(|f| f.parse::<OutputFormat>())
        .transpose()?
        .unwrap_or_default();

    let source = reference_source(matches)?;
    let manager = Arc::new(build_manager(&config)?);


    let input = matches
        .get_one::<String>("input")
        .context("An input file is required")?;
    let variants = open_input(input)?;
    info!("Read {} query variants from {}", variants.len(), input);

    let total = variants.len() as u64;
    let batches = into_batches(variants, config.pipeline.batch_size);
    let orchestrator = Orchestrator::new(Arc::clone(&manager), config.pipeline.clone())?;

    let pb = if matches.get_flag("no-progress") {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} variants")?
            .progress_chars("=> "),
    );

    let lookup = if matches.get_flag("force-refresh") {
        let lookup = manager.force_refresh(&source)?;
        info!("Rebuilt {:?} ({} records)", source.path(), lookup.index.len());
        lookup
    } else {
        manager.lookup(&source)?
    };
    let report = orchestrator.run_resolved(lookup, batches, |batch| {
        pb.inc(batch.outcomes.len() as u64);
    });
    pb.finish_and_clear();

    match matches.get_one::<String>("output") {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
            let mut writer = BufWriter::new(file);
            write_outcomes(&mut writer, report.outcomes(), format)?;
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            write_outcomes(&mut writer, report.outcomes(), format)?;
            writer.flush()?;
        }
    }

    info!(
        "Reference lookup: {} ({:?}); {} annotated, {} unannotated, {} rejected in {:?}",
        report.lookup,
        report.cache_elapsed,
        report.counts.annotated,
        report.counts.unannotated,
        report.counts.rejected,
        report.elapsed
    );

    Ok(())
}
