use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::Serialize;

use varanno_core::adapter::RawVariant;
use varanno_core::models::{AnnotationPayload, VariantKey};

/// Ordered group of query variants submitted together.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineBatch {
    id: usize,
    items: Vec<RawVariant>,
}

impl PipelineBatch {
    pub fn new(id: usize, items: Vec<RawVariant>) -> Self {
        PipelineBatch { id, items }
    }

    pub fn from_keys(id: usize, keys: Vec<VariantKey>) -> Self {
        PipelineBatch::new(id, keys.into_iter().map(RawVariant::from).collect())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn items(&self) -> &[RawVariant] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

///
/// Split an input stream into batches of at most `batch_size` items,
/// numbered from zero in input order.
///
pub fn into_batches(items: Vec<RawVariant>, batch_size: usize) -> Vec<PipelineBatch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(PipelineBatch::new(batches.len(), std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        batches.push(PipelineBatch::new(batches.len(), current));
    }
    batches
}

/// Why an item was excluded from annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    UnparseableCoordinate { detail: String },
    EmptyChromosome,
    PositionOutOfRange { pos: u64, max: u64 },
    InvalidAllele { allele: String },
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RejectReason::UnparseableCoordinate { detail } => {
                write!(f, "unparseable coordinate: {}", detail)
            }
            RejectReason::EmptyChromosome => write!(f, "empty chromosome"),
            RejectReason::PositionOutOfRange { pos, max } => {
                write!(f, "position {} outside 1..={}", pos, max)
            }
            RejectReason::InvalidAllele { allele } => {
                write!(f, "invalid allele '{}'", allele)
            }
        }
    }
}

/// Terminal result for one input item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Annotated {
        key: VariantKey,
        annotations: BTreeMap<String, AnnotationPayload>,
    },
    Unannotated {
        key: VariantKey,
    },
    Rejected {
        input: String,
        reason: RejectReason,
    },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Annotated { .. } => "annotated",
            ItemOutcome::Unannotated { .. } => "unannotated",
            ItemOutcome::Rejected { .. } => "rejected",
        }
    }

    /// The resolved key, if the item got far enough to have one.
    pub fn key(&self) -> Option<&VariantKey> {
        match self {
            ItemOutcome::Annotated { key, .. } | ItemOutcome::Unannotated { key } => Some(key),
            ItemOutcome::Rejected { .. } => None,
        }
    }

    pub fn is_annotated(&self) -> bool {
        matches!(self, ItemOutcome::Annotated { .. })
    }
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub annotated: usize,
    pub unannotated: usize,
    pub rejected: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.annotated + self.unannotated + self.rejected
    }

    pub fn add(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Annotated { .. } => self.annotated += 1,
            ItemOutcome::Unannotated { .. } => self.unannotated += 1,
            ItemOutcome::Rejected { .. } => self.rejected += 1,
        }
    }

    pub fn merge(&mut self, other: OutcomeCounts) {
        self.annotated += other.annotated;
        self.unannotated += other.unannotated;
        self.rejected += other.rejected;
    }
}

/// Per-item outcomes of one batch, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub batch_id: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchResult {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in &self.outcomes {
            counts.add(outcome);
        }
        counts
    }
}
