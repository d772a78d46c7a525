//! On-disk cache artifact container.
//!
//! ```text
//! magic "VCAR" | artifact version u16 | header_len u32 | JSON header | columnar block
//! ```
//!
//! The header carries the [`SourceFingerprint`] the artifact was built from,
//! so fingerprint and payload are always replaced together by a single
//! rename.
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use varanno_core::models::AnnotationRecord;

use crate::columnar::{self, ColumnarReader};
use crate::consts::{ARTIFACT_FORMAT_VERSION, ARTIFACT_MAGIC, MAX_ARTIFACT_HEADER_LEN, TEMP_PREFIX};
use crate::error::{CacheError, CodecError, Result};
use crate::fingerprint::SourceFingerprint;

/// Metadata stored in front of the columnar payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u16,
    pub pipeline_version: String,
    pub fingerprint: SourceFingerprint,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ArtifactHeader {
    pub fn new(pipeline_version: &str, fingerprint: SourceFingerprint, record_count: u64) -> Self {
        ArtifactHeader {
            format_version: ARTIFACT_FORMAT_VERSION,
            pipeline_version: pipeline_version.to_string(),
            fingerprint,
            record_count,
            created_at: Utc::now(),
        }
    }
}

/// What was found at an artifact path, judged from the header alone.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderProbe {
    Missing,
    Readable(ArtifactHeader),
    /// Written by a different artifact format version.
    OtherVersion(u16),
    Corrupt(String),
}

fn corrupt(msg: impl Into<String>) -> CodecError {
    CodecError::CorruptArtifact(msg.into())
}

///
/// Read just the artifact header, without touching the columnar payload.
///
/// # Arguments
/// - path: artifact file
///
/// # Returns
/// - what the header says; IO errors other than a missing file are returned
pub fn probe_header(path: &Path) -> std::io::Result<HeaderProbe> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HeaderProbe::Missing),
        Err(e) => return Err(e),
    };

    match read_header_from(&mut file) {
        Ok(header) => Ok(HeaderProbe::Readable(header)),
        Err(HeaderError::Version(v)) => Ok(HeaderProbe::OtherVersion(v)),
        Err(HeaderError::Corrupt(msg)) => Ok(HeaderProbe::Corrupt(msg)),
    }
}

enum HeaderError {
    Version(u16),
    Corrupt(String),
}

impl From<std::io::Error> for HeaderError {
    fn from(e: std::io::Error) -> Self {
        HeaderError::Corrupt(format!("header unreadable: {}", e))
    }
}

fn read_header_from<R: Read>(reader: &mut R) -> std::result::Result<ArtifactHeader, HeaderError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != ARTIFACT_MAGIC {
        return Err(HeaderError::Corrupt("missing artifact magic bytes".to_string()));
    }

    let version = reader.read_u16::<LittleEndian>()?;
    if version != ARTIFACT_FORMAT_VERSION {
        return Err(HeaderError::Version(version));
    }

    let header_len = reader.read_u32::<LittleEndian>()?;
    if header_len == 0 || header_len > MAX_ARTIFACT_HEADER_LEN {
        return Err(HeaderError::Corrupt(format!(
            "implausible header length {}",
            header_len
        )));
    }

    let mut json = vec![0u8; header_len as usize];
    reader.read_exact(&mut json)?;
    let header: ArtifactHeader = serde_json::from_slice(&json)
        .map_err(|e| HeaderError::Corrupt(format!("header is not valid JSON: {}", e)))?;
    if header.format_version != version {
        return Err(HeaderError::Corrupt(format!(
            "header claims version {} inside a version {} container",
            header.format_version, version
        )));
    }

    Ok(header)
}

///
/// Load a whole artifact and decode its records.
///
/// Any inconsistency, including a version this build does not read, is
/// reported as [`CodecError::CorruptArtifact`].
///
pub fn read_artifact(path: &Path) -> std::result::Result<(ArtifactHeader, Vec<AnnotationRecord>), CodecError> {
    let bytes = fs::read(path)?;
    let mut slice = bytes.as_slice();

    let header = read_header_from(&mut slice).map_err(|e| match e {
        HeaderError::Version(v) => corrupt(format!("unsupported artifact version {}", v)),
        HeaderError::Corrupt(msg) => corrupt(msg),
    })?;

    let reader = ColumnarReader::open(slice)?;
    if reader.record_count() != header.record_count {
        return Err(corrupt(format!(
            "header promises {} records, payload holds {}",
            header.record_count,
            reader.record_count()
        )));
    }

    let records = reader.records()?;
    Ok((header, records))
}

///
/// Serialize a complete artifact (container plus columnar payload) into memory.
///
pub fn encode_artifact(header: &ArtifactHeader, records: &[AnnotationRecord]) -> std::result::Result<Vec<u8>, CodecError> {
    let payload = columnar::encode(records)?;
    let json = serde_json::to_vec(header).map_err(|e| corrupt(format!("cannot serialize header: {}", e)))?;

    let mut out = Vec::with_capacity(4 + 2 + 4 + json.len() + payload.len());
    out.write_all(ARTIFACT_MAGIC)?;
    out.write_u16::<LittleEndian>(header.format_version)?;
    out.write_u32::<LittleEndian>(json.len() as u32)?;
    out.write_all(&json)?;
    out.write_all(&payload)?;
    Ok(out)
}

///
/// Atomically install `bytes` as the artifact at `dest`.
///
/// The bytes go to a temporary file in the same folder which is renamed over
/// `dest` only if `cancel` is still unset. On cancellation or any error the
/// temporary file is removed and `dest` is left as it was.
///
pub fn write_atomic(dest: &Path, bytes: &[u8], cancel: &AtomicBool) -> Result<()> {
    let folder = dest
        .parent()
        .ok_or_else(|| CacheError::Config(format!("artifact path {:?} has no parent", dest)))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(folder)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    if cancel.load(Ordering::SeqCst) {
        // dropping `tmp` deletes it
        return Err(CacheError::Cancelled(dest.to_path_buf()));
    }

    tmp.persist(dest).map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}

/// Remove an artifact, treating "already gone" as success.
pub fn remove_artifact(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
