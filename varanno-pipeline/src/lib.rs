//! # Staged variant annotation
//!
//! Query variants are grouped into [`PipelineBatch`]es and pushed through a
//! fixed stage sequence: optional normalization, validation, then annotation
//! against the reference index served by the cache manager.
//!
//! Every input item ends in exactly one [`ItemOutcome`]: `Annotated`,
//! `Unannotated` or `Rejected`, reported in input order. A run only fails as
//! a whole when the reference index cannot be established.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use varanno_cache::{CacheManager, ReferenceSource};
//! use varanno_core::adapter::RawVariant;
//! use varanno_pipeline::{Orchestrator, PipelineConfig, into_batches};
//!
//! # fn main() -> anyhow::Result<()> {
//! let manager = Arc::new(CacheManager::builder().finish()?);
//! let orchestrator = Orchestrator::new(manager, PipelineConfig::default())?;
//!
//! let inputs = vec![RawVariant::from("chr1:100:A:G"), RawVariant::from("2-200-C-T")];
//! let report = orchestrator.run(&ReferenceSource::from_path("clinvar.tsv"), into_batches(inputs, 1000))?;
//! for outcome in report.outcomes() {
//!     println!("{}", outcome.label());
//! }
//! # Ok(())
//! # }
//! ```
pub mod batch;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod stages;

// re-export for cleaner imports
pub use batch::{BatchResult, ItemOutcome, OutcomeCounts, PipelineBatch, RejectReason, into_batches};
pub use config::{AnnotatorConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use orchestrator::{Orchestrator, RunReport, StageSequence};
pub use output::{OutputFormat, write_outcomes};
pub use stages::{ChromosomeStyle, Stage, StageOutcome};
