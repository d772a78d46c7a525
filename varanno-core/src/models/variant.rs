use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

///
/// VariantKey struct, the (chrom, pos, ref, alt) tuple that joins query
/// variants against reference annotations.
///
/// Equality is exact on all four fields. No case folding or chromosome
/// prefix rewriting happens here; that belongs to a pipeline stage.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantKey {
    chrom: String,
    pos: u64,
    ref_allele: String,
    alt_allele: String,
}

impl VariantKey {
    pub fn new(
        chrom: impl Into<String>,
        pos: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
    ) -> Self {
        VariantKey {
            chrom: chrom.into(),
            pos,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
        }
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    /// Split the key back into its owned parts.
    pub fn into_parts(self) -> (String, u64, String, String) {
        (self.chrom, self.pos, self.ref_allele, self.alt_allele)
    }
}

impl Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chrom, self.pos, self.ref_allele, self.alt_allele
        )
    }
}

impl FromStr for VariantKey {
    type Err = CoreError;

    ///
    /// Parse a key from its `chrom:pos:ref:alt` display form.
    ///
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 4 {
            return Err(CoreError::InvalidVariantKey(format!(
                "expected chrom:pos:ref:alt, got '{}'",
                s
            )));
        }
        let pos = parts[1].parse::<u64>().map_err(|_| {
            CoreError::InvalidVariantKey(format!("position '{}' is not an unsigned integer", parts[1]))
        })?;

        Ok(VariantKey::new(parts[0], pos, parts[2], parts[3]))
    }
}
