use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use rstest::*;
use tempfile::TempDir;

use varanno_cache::{CacheError, CacheManager, CacheState, LookupOutcome, ReferenceSource};
use varanno_core::adapter::RawVariant;
use varanno_core::models::{FieldValue, VariantKey};
use varanno_pipeline::{
    ItemOutcome, Orchestrator, PipelineBatch, PipelineConfig, PipelineError, RejectReason,
    into_batches,
};

struct Setup {
    _dir: TempDir,
    cache: PathBuf,
    reference: PathBuf,
}

impl Setup {
    fn orchestrator(&self, config: PipelineConfig) -> Orchestrator {
        let manager = CacheManager::builder()
            .with_cache_folder(self.cache.clone())
            .finish()
            .unwrap();
        Orchestrator::new(Arc::new(manager), config).unwrap()
    }
}

#[fixture]
fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let reference = dir.path().join("clinvar.tsv");
    fs::write(
        &reference,
        "#chrom\tpos\tref\talt\tsignificance\n\
         chr1\t100\tA\tG\tpathogenic\n",
    )
    .unwrap();
    Setup {
        cache: dir.path().join("cache"),
        reference,
        _dir: dir,
    }
}

fn scenario_batch() -> Vec<PipelineBatch> {
    vec![PipelineBatch::from_keys(
        0,
        vec![
            VariantKey::new("chr1", 100, "A", "G"),
            VariantKey::new("chr2", 200, "C", "T"),
        ],
    )]
}

fn assert_scenario(outcomes: Vec<&ItemOutcome>) {
    assert_eq!(outcomes.len(), 2);
    match outcomes[0] {
        ItemOutcome::Annotated { key, annotations } => {
            assert_eq!(key, &VariantKey::new("chr1", 100, "A", "G"));
            assert_eq!(
                annotations["reference"]["significance"],
                FieldValue::Text("pathogenic".into())
            );
        }
        other => panic!("expected an annotated outcome, got {:?}", other),
    }
    assert_eq!(
        outcomes[1],
        &ItemOutcome::Unannotated {
            key: VariantKey::new("chr2", 200, "C", "T")
        }
    );
}

#[rstest]
fn test_cold_then_warm_runs_agree(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig::default());
    let source = ReferenceSource::from_path(&setup.reference);

    let cold = orchestrator.run(&source, scenario_batch()).unwrap();
    assert_eq!(cold.lookup, LookupOutcome::Populated { from: CacheState::Absent });
    assert_scenario(cold.outcomes().collect());

    // a fresh orchestrator on the same cache folder takes the fast path
    let warm_orchestrator = setup.orchestrator(PipelineConfig::default());
    let warm = warm_orchestrator.run(&source, scenario_batch()).unwrap();
    assert_eq!(warm.lookup, LookupOutcome::Hit);
    assert_scenario(warm.outcomes().collect());

    assert_eq!(cold.counts, warm.counts);
    assert_eq!(warm.counts.annotated, 1);
    assert_eq!(warm.counts.unannotated, 1);
    assert_eq!(warm.reference_records, 1);
}

#[rstest]
fn test_forced_refresh_run_decodes_nothing(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig::default());
    let source = ReferenceSource::from_path(&setup.reference);
    orchestrator.run(&source, scenario_batch()).unwrap();

    let rebuilt = setup.orchestrator(PipelineConfig::default());
    let lookup = rebuilt.manager().force_refresh(&source).unwrap();
    let report = rebuilt.run_resolved(lookup, scenario_batch(), |_| {});

    assert_eq!(report.lookup, LookupOutcome::Populated { from: CacheState::Valid });
    assert_scenario(report.outcomes().collect());
    let stats = rebuilt.manager().stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.populations, 1);
}

#[rstest]
fn test_outcomes_keep_input_order(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig {
        threads: 4,
        ..PipelineConfig::default()
    });
    let source = ReferenceSource::from_path(&setup.reference);

    let inputs: Vec<RawVariant> = (1..=2_000u64)
        .map(|i| match i % 3 {
            0 => RawVariant::from(format!("chr1-{}-A-G", i).as_str()),
            1 => RawVariant::from(format!("chr1:{}:A:G", i).as_str()),
            _ => RawVariant::from(VariantKey::new("chr1", i, "A", "G")),
        })
        .collect();
    let report = orchestrator.run(&source, into_batches(inputs, 37)).unwrap();

    let positions: Vec<u64> = report
        .outcomes()
        .map(|o| o.key().unwrap().pos())
        .collect();
    let expected: Vec<u64> = (1..=2_000).collect();
    assert_eq!(positions, expected);

    let batch_ids: Vec<usize> = report.batches.iter().map(|b| b.batch_id).collect();
    assert_eq!(batch_ids, (0..report.batches.len()).collect::<Vec<_>>());
    assert_eq!(report.counts.annotated, 1);
    assert_eq!(report.counts.total(), 2_000);
}

#[rstest]
fn test_bad_items_never_abort_the_batch(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig::default());
    let source = ReferenceSource::from_path(&setup.reference);

    let inputs = vec![
        RawVariant::from("not a variant"),
        RawVariant::from("chr1:100:A:G"),
        RawVariant::from(VariantKey::new("chr1", 0, "A", "G")),
        RawVariant::from(VariantKey::new("chr1", 5, "A", "X")),
        RawVariant::from(r#"{"locus": "chr1:100", "alleles": ["A", "G"]}"#),
    ];
    let report = orchestrator.run(&source, into_batches(inputs, 10)).unwrap();
    let outcomes: Vec<&ItemOutcome> = report.outcomes().collect();

    assert!(matches!(
        outcomes[0],
        ItemOutcome::Rejected { reason: RejectReason::UnparseableCoordinate { .. }, .. }
    ));
    assert!(outcomes[1].is_annotated());
    assert!(matches!(
        outcomes[2],
        ItemOutcome::Rejected { reason: RejectReason::PositionOutOfRange { pos: 0, .. }, .. }
    ));
    assert!(matches!(
        outcomes[3],
        ItemOutcome::Rejected { reason: RejectReason::InvalidAllele { .. }, .. }
    ));
    assert!(outcomes[4].is_annotated());
    assert_eq!(report.counts.rejected, 3);
}

#[rstest]
fn test_normalization_stage_rewrites_before_lookup(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig {
        normalize: true,
        chromosome_style: varanno_pipeline::ChromosomeStyle::Ucsc,
        ..PipelineConfig::default()
    });
    let source = ReferenceSource::from_path(&setup.reference);

    let report = orchestrator
        .run(&source, into_batches(vec![RawVariant::from("1-100-a-g")], 10))
        .unwrap();
    let outcome = report.outcomes().next().unwrap();
    assert!(outcome.is_annotated());
    assert_eq!(outcome.key(), Some(&VariantKey::new("chr1", 100, "A", "G")));
}

#[rstest]
fn test_missing_reference_aborts_run(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig::default());
    let source = ReferenceSource::from_path(setup.reference.with_file_name("missing.tsv"));

    let err = orchestrator.run(&source, scenario_batch()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Cache(CacheError::SourceUnavailable { .. })
    ));
}

#[rstest]
fn test_progress_callback_sees_every_batch(setup: Setup) {
    let orchestrator = setup.orchestrator(PipelineConfig::default());
    let source = ReferenceSource::from_path(&setup.reference);
    let inputs: Vec<RawVariant> = (1..=25u64)
        .map(|i| RawVariant::from(VariantKey::new("chr1", i, "A", "G")))
        .collect();

    let seen = AtomicUsize::new(0);
    let report = orchestrator
        .run_with_progress(&source, into_batches(inputs, 10), |batch| {
            seen.fetch_add(batch.outcomes.len(), Ordering::SeqCst);
        })
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 25);
    assert_eq!(report.batches.len(), 3);
}

#[rstest]
fn test_invalid_config_is_rejected(setup: Setup) {
    let manager = CacheManager::builder()
        .with_cache_folder(setup.cache.clone())
        .finish()
        .unwrap();
    let result = Orchestrator::new(
        Arc::new(manager),
        PipelineConfig {
            batch_size: 0,
            ..PipelineConfig::default()
        },
    );
    assert!(matches!(result, Err(PipelineError::Config(_))));
}
