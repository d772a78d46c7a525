//! Constants for cache configuration and on-disk layout.
//!
//! This module defines environment variable names, file extensions, magic
//! bytes and format versions used by the artifact and columnar layers.

// Environment variable names

/// Environment variable name for setting the cache directory location.
///
/// When set, this overrides the default cache location (`~/.varanno/`).
///
/// # Example
///
/// ```bash
/// export VARANNO_CACHE=/scratch/varanno
/// ```
pub const VARANNO_CACHE_ENV: &str = "VARANNO_CACHE";

/// Default cache folder name, created under the home directory.
pub const DEFAULT_CACHE_FOLDER: &str = ".varanno";

/// Default pipeline version baked into artifact paths.
pub const DEFAULT_PIPELINE_VERSION: &str = "1";

/// Default upper bound on a single parse-and-populate run.
pub const DEFAULT_POPULATE_TIMEOUT_SECS: u64 = 3600;

// File extension constants

/// Extension of cache artifact files.
pub const ARTIFACT_EXT: &str = "vca";

/// Extension of the per-key advisory lock files.
pub const LOCK_EXT: &str = "lock";

/// Prefix of in-flight temporary artifacts inside the cache folder.
pub const TEMP_PREFIX: &str = ".populating-";

// Artifact container

/// Magic bytes at the start of every artifact file.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"VCAR";

/// Version of the artifact container (magic + header + payload).
pub const ARTIFACT_FORMAT_VERSION: u16 = 1;

/// Refuse artifact headers larger than this.
pub const MAX_ARTIFACT_HEADER_LEN: u32 = 1 << 20;

// Columnar payload

/// Magic bytes at the start of an encoded columnar block.
pub const COLUMNAR_MAGIC: &[u8; 4] = b"VCOL";

/// Version of the columnar layout.
pub const COLUMNAR_FORMAT_VERSION: u16 = 1;

/// Worst case deflate expansion ratio; guards allocation on corrupt input.
pub const MAX_INFLATE_RATIO: u64 = 1100;

// Fingerprinting

/// Read buffer used while hashing reference sources.
pub const DIGEST_BUFFER_SIZE: usize = 1 << 20;

/// Default block size for sampled digests.
pub const DEFAULT_SAMPLE_BLOCK_SIZE: u64 = 1 << 20;

/// Default number of sampled blocks (head and tail included).
pub const DEFAULT_SAMPLE_BLOCKS: u32 = 16;

/// Largest accepted sample block; one block is buffered in memory.
pub const MAX_SAMPLE_BLOCK_SIZE: u64 = 1 << 28;
