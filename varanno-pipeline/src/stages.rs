//! Pipeline stages.
//!
//! Each item flows through a fixed, ordered list of [`Stage`]s. A stage
//! either hands a (possibly rewritten) key to the next stage, rejects the
//! item, or finishes it with a terminal outcome.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use varanno_cache::ReferenceIndex;
use varanno_core::models::VariantKey;

use crate::batch::{ItemOutcome, RejectReason};

/// What a stage decided for one item.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Continue(VariantKey),
    Reject(RejectReason),
    Complete(ItemOutcome),
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, key: VariantKey) -> StageOutcome;
}

/// Chromosome naming convention applied by [`NormalizationStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromosomeStyle {
    /// Leave labels as written.
    #[default]
    AsIs,
    /// `chr1`, `chrX`, `chrM`
    Ucsc,
    /// `1`, `X`, `MT`
    Ensembl,
}

impl ChromosomeStyle {
    pub fn apply(&self, chrom: &str) -> String {
        let bare = chrom
            .strip_prefix("chr")
            .or_else(|| chrom.strip_prefix("CHR"))
            .or_else(|| chrom.strip_prefix("Chr"))
            .unwrap_or(chrom);
        match self {
            ChromosomeStyle::AsIs => chrom.to_string(),
            ChromosomeStyle::Ucsc => match bare {
                "MT" | "M" => "chrM".to_string(),
                _ => format!("chr{}", bare),
            },
            ChromosomeStyle::Ensembl => match bare {
                "M" | "MT" => "MT".to_string(),
                _ => bare.to_string(),
            },
        }
    }
}

/// Upper-cases alleles and optionally rewrites the chromosome label.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizationStage {
    pub style: ChromosomeStyle,
}

impl Stage for NormalizationStage {
    fn name(&self) -> &'static str {
        "normalization"
    }

    fn process(&self, key: VariantKey) -> StageOutcome {
        let (chrom, pos, ref_allele, alt_allele) = key.into_parts();
        StageOutcome::Continue(VariantKey::new(
            self.style.apply(chrom.trim()),
            pos,
            ref_allele.to_ascii_uppercase(),
            alt_allele.to_ascii_uppercase(),
        ))
    }
}

/// Structural checks. Never consults the reference data.
#[derive(Debug, Clone, Copy)]
pub struct ValidationStage {
    pub max_position: u64,
}

fn is_valid_allele(allele: &str) -> bool {
    !allele.is_empty() && allele.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N'))
}

impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn process(&self, key: VariantKey) -> StageOutcome {
        if key.chrom().trim().is_empty() {
            return StageOutcome::Reject(RejectReason::EmptyChromosome);
        }
        if key.pos() == 0 || key.pos() > self.max_position {
            return StageOutcome::Reject(RejectReason::PositionOutOfRange {
                pos: key.pos(),
                max: self.max_position,
            });
        }
        for allele in [key.ref_allele(), key.alt_allele()] {
            if !is_valid_allele(allele) {
                return StageOutcome::Reject(RejectReason::InvalidAllele {
                    allele: allele.to_string(),
                });
            }
        }
        StageOutcome::Continue(key)
    }
}

/// Exact-key lookup in the shared reference index.
#[derive(Debug, Clone)]
pub struct AnnotationStage {
    index: Arc<ReferenceIndex>,
}

impl AnnotationStage {
    pub fn new(index: Arc<ReferenceIndex>) -> Self {
        AnnotationStage { index }
    }
}

impl Stage for AnnotationStage {
    fn name(&self) -> &'static str {
        "annotation"
    }

    fn process(&self, key: VariantKey) -> StageOutcome {
        let outcome = match self.index.get(&key) {
            Some(record) => ItemOutcome::Annotated {
                annotations: record.annotations.clone(),
                key,
            },
            None => ItemOutcome::Unannotated { key },
        };
        StageOutcome::Complete(outcome)
    }
}
