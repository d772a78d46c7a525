//! # Core models for variant annotation
//!
//! This crate holds the types every other varanno crate speaks in:
//!
//! - [`VariantKey`]: the exact (chrom, pos, ref, alt) join key
//! - [`AnnotationRecord`]: a key plus per-source annotation payloads
//! - [`adapter`]: conversion of upstream variant representations (gnomAD ids,
//!   VCF fields, gnomAD/Hail JSON) into [`VariantKey`]s
//!
pub mod adapter;
pub mod errors;
pub mod models;
pub mod utils;

// re-export for cleaner imports
pub use adapter::{CoordinateAdapter, GnomadAdapter, RawVariant};
pub use errors::{CoreError, Result};
pub use models::{AnnotationPayload, AnnotationRecord, FieldValue, VariantKey};
