//! Source fingerprinting.
//!
//! A [`SourceFingerprint`] identifies one exact state of a reference source
//! file: its canonical path, byte size, modification time and a SHA-256
//! content digest. A cache artifact is only ever served for the fingerprint
//! it was written with.
//!
//! Two digest strategies exist:
//!
//! - [`DigestStrategy::Full`] (default) hashes every byte. Any content change
//!   is detected.
//! - [`DigestStrategy::Sampled`] hashes the byte size plus `blocks` evenly
//!   spaced blocks (head and tail included). Appends and truncations are
//!   always detected through the size; an in-place edit is only detected when
//!   it lands in a sampled block or moves the modification time.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::{
    DEFAULT_SAMPLE_BLOCKS, DEFAULT_SAMPLE_BLOCK_SIZE, DIGEST_BUFFER_SIZE, MAX_SAMPLE_BLOCK_SIZE,
};
use crate::error::{CacheError, Result};

/// How much of the source content goes into the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DigestStrategy {
    #[default]
    Full,
    Sampled { block_size: u64, blocks: u32 },
}

impl DigestStrategy {
    /// Sampled strategy with the default block size and count.
    pub fn sampled() -> Self {
        DigestStrategy::Sampled {
            block_size: DEFAULT_SAMPLE_BLOCK_SIZE,
            blocks: DEFAULT_SAMPLE_BLOCKS,
        }
    }

    /// Reject sampled settings that cannot be hashed: empty blocks, fewer
    /// than two blocks, or a block larger than [`MAX_SAMPLE_BLOCK_SIZE`].
    pub fn validate(&self) -> Result<()> {
        let DigestStrategy::Sampled { block_size, blocks } = *self else {
            return Ok(());
        };
        if block_size == 0 || blocks < 2 {
            return Err(CacheError::Config(
                "sampled digest needs a positive block size and at least 2 blocks".to_string(),
            ));
        }
        if block_size > MAX_SAMPLE_BLOCK_SIZE {
            return Err(CacheError::Config(format!(
                "sampled digest block size {} exceeds the maximum of {} bytes",
                block_size, MAX_SAMPLE_BLOCK_SIZE
            )));
        }
        Ok(())
    }

    /// Whether a file of `byte_size` bytes is hashed by sampling.
    fn samples(&self, byte_size: u64) -> bool {
        match *self {
            DigestStrategy::Full => false,
            DigestStrategy::Sampled { block_size, blocks } => {
                blocks >= 2
                    && block_size > 0
                    && block_size <= MAX_SAMPLE_BLOCK_SIZE
                    && block_size
                        .checked_mul(blocks as u64)
                        .is_some_and(|sampled| byte_size > sampled)
            }
        }
    }
}

/// Identity of one state of a reference source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    pub source_path: PathBuf,
    pub byte_size: u64,
    pub modified: DateTime<Utc>,
    pub content_digest: String,
}

impl SourceFingerprint {
    ///
    /// Fingerprint the file at `path`.
    ///
    /// # Arguments
    /// - path: reference source path
    /// - strategy: full or sampled content hashing
    ///
    /// # Returns
    /// - the fingerprint, or [`CacheError::SourceUnavailable`] if the path
    ///   does not exist, is not a regular file, or cannot be read
    pub fn compute<P: AsRef<Path>>(path: P, strategy: DigestStrategy) -> Result<Self> {
        let path = path.as_ref();
        let source_path = fs::canonicalize(path).map_err(|e| CacheError::unavailable(path, e))?;
        let metadata = fs::metadata(&source_path).map_err(|e| CacheError::unavailable(path, e))?;
        if !metadata.is_file() {
            return Err(CacheError::unavailable(path, "not a regular file"));
        }

        let byte_size = metadata.len();
        let modified: DateTime<Utc> = metadata.modified().unwrap_or(UNIX_EPOCH).into();

        let content_digest = match strategy {
            DigestStrategy::Sampled { block_size, blocks } if strategy.samples(byte_size) => {
                sampled_digest(&source_path, byte_size, block_size, blocks)
            }
            _ => full_digest(&source_path),
        }
        .map_err(|e| CacheError::unavailable(path, e))?;

        Ok(SourceFingerprint {
            source_path,
            byte_size,
            modified,
            content_digest,
        })
    }

    /// Short digest prefix for log lines.
    pub fn short_digest(&self) -> &str {
        let hex = self
            .content_digest
            .rsplit_once(':')
            .map(|(_, h)| h)
            .unwrap_or(&self.content_digest);
        &hex[..hex.len().min(12)]
    }
}

fn full_digest(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

fn sampled_digest(path: &Path, size: u64, block_size: u64, blocks: u32) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());

    let mut buf = vec![0u8; block_size as usize];
    let span = size - block_size;
    for i in 0..blocks as u64 {
        // at most `span`, so the narrowing is lossless
        let offset = (span as u128 * i as u128 / (blocks as u128 - 1)) as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        hasher.update(offset.to_le_bytes());
        hasher.update(&buf);
    }

    Ok(format!(
        "sha256-sampled-{}x{}:{:x}",
        block_size,
        blocks,
        hasher.finalize()
    ))
}

///
/// Stable, file-name-safe identity for a source path, used to derive the
/// artifact file name. The path is canonicalized first so that different
/// spellings of the same file share one artifact.
///
pub fn source_identity<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let canonical = fs::canonicalize(path).map_err(|e| CacheError::unavailable(path, e))?;

    let stem: String = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect();

    let path_hash = format!(
        "{:x}",
        Sha256::digest(canonical.to_string_lossy().as_bytes())
    );

    Ok(format!("{}-{}", stem, &path_hash[..16]))
}
