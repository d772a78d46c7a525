//! Runs batches of query variants through the stage sequence.
//!
//! A run first establishes the reference index through the [`CacheManager`]
//! (a single, serialized step that may parse the source), then fans the
//! batches out over a rayon pool. Workers share the index read-only.
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use rayon::prelude::*;

use varanno_cache::{
    CacheLookup, CacheManager, LookupOutcome, ReferenceIndex, ReferenceSource, SourceFingerprint,
};
use varanno_core::adapter::{CoordinateAdapter, GnomadAdapter, RawVariant};
use varanno_core::models::VariantKey;

use crate::batch::{BatchResult, ItemOutcome, OutcomeCounts, PipelineBatch, RejectReason};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::stages::{AnnotationStage, NormalizationStage, Stage, StageOutcome, ValidationStage};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub lookup: LookupOutcome,
    pub fingerprint: SourceFingerprint,
    pub reference_records: usize,
    pub batches: Vec<BatchResult>,
    pub counts: OutcomeCounts,
    pub cache_elapsed: Duration,
    pub elapsed: Duration,
}

impl RunReport {
    /// All item outcomes in input order.
    pub fn outcomes(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.batches.iter().flat_map(|b| b.outcomes.iter())
    }
}

/// The ordered stage list for one run.
pub struct StageSequence {
    stages: Vec<Box<dyn Stage>>,
}

impl StageSequence {
    ///
    /// Normalization (when enabled), then Validation, then Annotation.
    ///
    pub fn new(config: &PipelineConfig, index: Arc<ReferenceIndex>) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(3);
        if config.normalize {
            stages.push(Box::new(NormalizationStage {
                style: config.chromosome_style,
            }));
        }
        stages.push(Box::new(ValidationStage {
            max_position: config.max_position,
        }));
        stages.push(Box::new(AnnotationStage::new(index)));
        StageSequence { stages }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    fn run(&self, input: &RawVariant, mut key: VariantKey) -> ItemOutcome {
        for stage in &self.stages {
            match stage.process(key) {
                StageOutcome::Continue(next) => key = next,
                StageOutcome::Reject(reason) => {
                    return ItemOutcome::Rejected {
                        input: input.describe(),
                        reason,
                    };
                }
                StageOutcome::Complete(outcome) => return outcome,
            }
        }
        // every sequence ends with the annotation stage
        ItemOutcome::Unannotated { key }
    }
}

/// Drives runs against one cache manager.
pub struct Orchestrator {
    manager: Arc<CacheManager>,
    adapter: Arc<dyn CoordinateAdapter>,
    config: PipelineConfig,
    pool: rayon::ThreadPool,
}

impl Orchestrator {
    pub fn new(manager: Arc<CacheManager>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("varanno-worker-{}", i))
            .build()?;
        Ok(Orchestrator {
            manager,
            adapter: Arc::new(GnomadAdapter::new()),
            config,
            pool,
        })
    }

    /// Replace the default gnomAD coordinate adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn CoordinateAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn run(&self, source: &ReferenceSource, batches: Vec<PipelineBatch>) -> Result<RunReport> {
        self.run_with_progress(source, batches, |_| {})
    }

    ///
    /// Run every batch, calling `on_batch` as each one finishes.
    ///
    /// Fails only if the reference index cannot be established; per-item
    /// problems are reported as [`ItemOutcome::Rejected`].
    ///
    pub fn run_with_progress<F>(
        &self,
        source: &ReferenceSource,
        batches: Vec<PipelineBatch>,
        on_batch: F,
    ) -> Result<RunReport>
    where
        F: Fn(&BatchResult) + Sync,
    {
        let lookup = self.manager.lookup(source)?;
        Ok(self.run_resolved(lookup, batches, on_batch))
    }

    ///
    /// Run every batch against an index the caller already established, for
    /// example through [`CacheManager::force_refresh`]. No further cache
    /// lookup is made.
    ///
    pub fn run_resolved<F>(
        &self,
        lookup: CacheLookup,
        batches: Vec<PipelineBatch>,
        on_batch: F,
    ) -> RunReport
    where
        F: Fn(&BatchResult) + Sync,
    {
        let started = Instant::now();
        info!(
            "Reference index ready: {} records ({}) in {:?}",
            lookup.index.len(),
            lookup.outcome,
            lookup.elapsed
        );

        let stages = StageSequence::new(&self.config, Arc::clone(&lookup.index));
        debug!("Stages: {}", stages.names().join(" -> "));

        let results: Vec<BatchResult> = self.pool.install(|| {
            batches
                .par_iter()
                .map(|batch| {
                    let result = self.process_batch(&stages, batch);
                    on_batch(&result);
                    result
                })
                .collect()
        });

        let mut counts = OutcomeCounts::default();
        for result in &results {
            counts.merge(result.counts());
        }
        info!(
            "Processed {} variants: {} annotated, {} unannotated, {} rejected",
            counts.total(),
            counts.annotated,
            counts.unannotated,
            counts.rejected
        );

        RunReport {
            lookup: lookup.outcome,
            fingerprint: lookup.fingerprint,
            reference_records: lookup.index.len(),
            batches: results,
            counts,
            cache_elapsed: lookup.elapsed,
            elapsed: started.elapsed() + lookup.elapsed,
        }
    }

    /// Resolve and run every item of one batch, preserving order.
    pub fn process_batch(&self, stages: &StageSequence, batch: &PipelineBatch) -> BatchResult {
        let outcomes = batch
            .items()
            .iter()
            .map(|item| match self.adapter.variant_key(item) {
                Ok(key) => stages.run(item, key),
                Err(e) => ItemOutcome::Rejected {
                    input: item.describe(),
                    reason: RejectReason::UnparseableCoordinate {
                        detail: e.to_string(),
                    },
                },
            })
            .collect();
        BatchResult {
            batch_id: batch.id(),
            outcomes,
        }
    }
}
