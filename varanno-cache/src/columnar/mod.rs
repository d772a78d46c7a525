//! # Columnar codec for annotation records
//!
//! Records are stored column by column: each field of every record lives in
//! one contiguous, separately compressed region. Low-cardinality string
//! columns (chromosomes, source names, field names, repeated significance
//! values) are dictionary encoded before compression.
//!
//! See [`format`] for the byte layout.
pub mod format;
pub mod reader;
pub mod writer;

pub use format::{Column, ColumnEntry, ColumnId, Encoding};
pub use reader::ColumnarReader;
pub use writer::encode;

use varanno_core::models::AnnotationRecord;

use crate::error::CodecError;

///
/// Decode a columnar block produced by [`encode`].
///
/// Fails with [`CodecError::CorruptArtifact`] when the header, directory,
/// checksums or cross-column row counts are inconsistent.
///
pub fn decode(bytes: &[u8]) -> Result<Vec<AnnotationRecord>, CodecError> {
    ColumnarReader::open(bytes)?.records()
}
