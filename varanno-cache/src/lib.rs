//! # Fingerprinted reference cache for variant annotation
//!
//! Parsing a multi-gigabyte reference dump (ClinVar, gnomAD) takes minutes.
//! This crate parses it once, stores the records as a compressed columnar
//! artifact tagged with the source's fingerprint, and serves later runs from
//! that artifact until the source changes.
//!
//! # Module Structure
//!
//! - `fingerprint` - source identity (size, mtime, SHA-256 content digest)
//! - `columnar` - column-wise record codec with per-column zlib and CRC32
//! - `artifact` - on-disk container: header with fingerprint + columnar payload
//! - `parser` - TSV and VCF reference parsers
//! - `index` - in-memory, read-only lookup by exact variant key
//! - `manager` - lookup / populate / invalidate lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use varanno_cache::{CacheManager, ReferenceSource};
//! use varanno_core::models::VariantKey;
//!
//! # fn main() -> Result<(), varanno_cache::CacheError> {
//! let manager = CacheManager::builder().finish()?;
//! let source = ReferenceSource::from_path("clinvar.vcf.gz");
//!
//! let lookup = manager.lookup(&source)?;
//! println!("{} records ({})", lookup.index.len(), lookup.outcome);
//! let hit = lookup.index.get(&VariantKey::new("1", 55516888, "G", "GA"));
//! # Ok(())
//! # }
//! ```
pub mod artifact;
pub mod columnar;
pub mod consts;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod manager;
pub mod parser;
pub mod utils;

// re-export for cleaner imports
pub use error::{CacheError, CodecError, Result};
pub use fingerprint::{DigestStrategy, SourceFingerprint};
pub use index::ReferenceIndex;
pub use manager::{
    CacheKey, CacheLookup, CacheManager, CacheManagerBuilder, CacheSettings, CacheState,
    CacheStats, CancelToken, ContentionPolicy, LookupOutcome, ReferenceSource,
};
pub use parser::{ReferenceParser, StopFlag, TsvReferenceParser, VcfReferenceParser};
