//! Coordinate adapters.
//!
//! Upstream variant sources describe the same allele in different shapes:
//! gnomAD variant ids (`1-55516888-G-GA`), colon ids (`chr1:100:A:G`), VCF
//! columns, or JSON objects from the gnomAD API and Hail exports. An adapter
//! turns any of those into a [`VariantKey`] or fails with
//! [`CoreError::UnparseableCoordinate`].

use serde_json::Value;

use crate::errors::{CoreError, Result};
use crate::models::VariantKey;

/// An upstream variant representation, before it is resolved to a key.
#[derive(Debug, Clone, PartialEq)]
pub enum RawVariant {
    /// A dash (`1-100-A-G`) or colon (`chr1:100:A:G`) separated id.
    VariantId(String),
    /// VCF-style columns, position still as text.
    Fields {
        chrom: String,
        pos: String,
        ref_allele: String,
        alt_allele: String,
    },
    /// A JSON object as returned by the gnomAD API or a Hail table export.
    Json(Value),
    /// Already resolved.
    Key(VariantKey),
}

impl RawVariant {
    ///
    /// Guess the representation of a single input line.
    ///
    /// - lines starting with `{` are JSON
    /// - tab separated lines are VCF data lines (CHROM POS ID REF ALT ...)
    ///   or four column chrom/pos/ref/alt rows
    /// - anything else is treated as a variant id
    ///
    pub fn from_line(line: &str) -> Self {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim_start().starts_with('{') {
            return match serde_json::from_str::<Value>(line) {
                Ok(value) => RawVariant::Json(value),
                Err(_) => RawVariant::VariantId(line.to_string()),
            };
        }

        let fields: Vec<&str> = line.split('\t').collect();
        match fields.len() {
            4 => RawVariant::Fields {
                chrom: fields[0].to_string(),
                pos: fields[1].to_string(),
                ref_allele: fields[2].to_string(),
                alt_allele: fields[3].to_string(),
            },
            n if n >= 5 => RawVariant::Fields {
                chrom: fields[0].to_string(),
                pos: fields[1].to_string(),
                ref_allele: fields[3].to_string(),
                alt_allele: fields[4].to_string(),
            },
            _ => RawVariant::VariantId(line.trim().to_string()),
        }
    }

    /// Short human readable form used in rejection reports.
    pub fn describe(&self) -> String {
        match self {
            RawVariant::VariantId(id) => id.clone(),
            RawVariant::Fields {
                chrom,
                pos,
                ref_allele,
                alt_allele,
            } => format!("{}:{}:{}:{}", chrom, pos, ref_allele, alt_allele),
            RawVariant::Json(value) => value.to_string(),
            RawVariant::Key(key) => key.to_string(),
        }
    }
}

impl From<VariantKey> for RawVariant {
    fn from(key: VariantKey) -> Self {
        RawVariant::Key(key)
    }
}

impl From<&str> for RawVariant {
    fn from(line: &str) -> Self {
        RawVariant::from_line(line)
    }
}

/// Resolve upstream variant representations into join keys.
pub trait CoordinateAdapter: Send + Sync {
    fn variant_key(&self, raw: &RawVariant) -> Result<VariantKey>;
}

/// Adapter for the representations gnomAD and its tooling emit.
///
/// Values are extracted as written; chromosome prefixes and allele case are
/// left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct GnomadAdapter;

impl GnomadAdapter {
    pub fn new() -> Self {
        GnomadAdapter
    }

    fn from_id(&self, id: &str) -> Result<VariantKey> {
        let id = id.trim();
        let sep = if id.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = id.split(sep).collect();
        if parts.len() != 4 {
            return Err(unparseable(format!(
                "'{}' is not a chrom{sep}pos{sep}ref{sep}alt variant id",
                id
            )));
        }
        build_key(parts[0], parts[1], parts[2], parts[3])
    }

    fn from_json(&self, value: &Value) -> Result<VariantKey> {
        let obj = value
            .as_object()
            .ok_or_else(|| unparseable(format!("expected a JSON object, got {}", value)))?;

        // gnomAD API variant object
        if let (Some(chrom), Some(pos), Some(r), Some(a)) = (
            obj.get("chrom"),
            obj.get("pos"),
            obj.get("ref"),
            obj.get("alt"),
        ) {
            return build_key(
                &json_text(chrom)?,
                &json_text(pos)?,
                &json_text(r)?,
                &json_text(a)?,
            );
        }

        // Hail export: locus + alleles
        if let (Some(locus), Some(alleles)) = (obj.get("locus"), obj.get("alleles")) {
            let (chrom, pos) = match locus {
                Value::String(s) => {
                    let (c, p) = s
                        .rsplit_once(':')
                        .ok_or_else(|| unparseable(format!("locus '{}' has no position", s)))?;
                    (c.to_string(), p.to_string())
                }
                Value::Object(l) => {
                    let contig = l
                        .get("contig")
                        .ok_or_else(|| unparseable("locus object has no contig".to_string()))?;
                    let position = l
                        .get("position")
                        .ok_or_else(|| unparseable("locus object has no position".to_string()))?;
                    (json_text(contig)?, json_text(position)?)
                }
                other => return Err(unparseable(format!("unsupported locus value {}", other))),
            };
            let alleles = alleles
                .as_array()
                .ok_or_else(|| unparseable("alleles is not an array".to_string()))?;
            if alleles.len() != 2 {
                return Err(unparseable(format!(
                    "expected exactly two alleles, got {}",
                    alleles.len()
                )));
            }
            return build_key(
                &chrom,
                &pos,
                &json_text(&alleles[0])?,
                &json_text(&alleles[1])?,
            );
        }

        if let Some(id) = obj.get("variant_id").or_else(|| obj.get("variantId")) {
            return self.from_id(&json_text(id)?);
        }

        Err(unparseable(format!(
            "JSON object has no recognizable coordinate fields: {}",
            value
        )))
    }
}

impl CoordinateAdapter for GnomadAdapter {
    fn variant_key(&self, raw: &RawVariant) -> Result<VariantKey> {
        match raw {
            RawVariant::VariantId(id) => self.from_id(id),
            RawVariant::Fields {
                chrom,
                pos,
                ref_allele,
                alt_allele,
            } => build_key(chrom, pos, ref_allele, alt_allele),
            RawVariant::Json(value) => self.from_json(value),
            RawVariant::Key(key) => Ok(key.clone()),
        }
    }
}

fn unparseable(msg: String) -> CoreError {
    CoreError::UnparseableCoordinate(msg)
}

fn json_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(unparseable(format!("unexpected JSON value {}", other))),
    }
}

fn build_key(chrom: &str, pos: &str, ref_allele: &str, alt_allele: &str) -> Result<VariantKey> {
    let pos = pos.trim().parse::<u64>().map_err(|_| {
        unparseable(format!("position '{}' is not an unsigned integer", pos.trim()))
    })?;
    Ok(VariantKey::new(
        chrom.trim(),
        pos,
        ref_allele.trim(),
        alt_allele.trim(),
    ))
}
