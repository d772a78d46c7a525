//! # varanno
//!
//! Annotate query variants against large reference sources (ClinVar style
//! VCF or TSV dumps). Parsed references are kept as fingerprinted columnar
//! artifacts that invalidate themselves when the source file changes.
//!
//! - [`core`]: variant keys, annotation records, coordinate adapters
//! - [`cache`]: source fingerprinting, the columnar codec and the cache manager
//! - [`pipeline`]: batched, staged annotation runs
#[doc(inline)]
pub use varanno_core as core;

#[cfg(feature = "cache")]
#[doc(inline)]
pub use varanno_cache as cache;

#[cfg(feature = "pipeline")]
#[doc(inline)]
pub use varanno_pipeline as pipeline;
