//! Reference source parsers.
//!
//! A [`ReferenceParser`] turns one reference dump into annotation records.
//! This is the slow path the cache exists to avoid, so parsers stream the
//! file line by line and never hold more than the records themselves.
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow, bail};

use varanno_core::models::{AnnotationRecord, FieldValue, VariantKey};
use varanno_core::utils::{base_extension, get_dynamic_reader};

/// Source name used for TSV columns that carry no `source:` prefix.
pub const DEFAULT_TSV_SOURCE: &str = "reference";

/// Source name the VCF parser files INFO fields under by default.
pub const DEFAULT_VCF_SOURCE: &str = "clinvar";

/// Raised by the cache manager when a running parse is no longer wanted
/// (timeout or cancellation). Parsers check it once per input line.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out of a parse loop once stopped.
    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            bail!("parse stopped before completion");
        }
        Ok(())
    }
}

/// Full parse of a reference source.
pub trait ReferenceParser: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Parse every record. Implementations return early (with an error) once
    /// `stop` is raised.
    fn parse(&self, path: &Path, stop: &StopFlag) -> Result<Vec<AnnotationRecord>>;
}

///
/// Pick a parser from the file extension (compression suffixes ignored):
/// `.vcf` gets a [`VcfReferenceParser`], everything else a [`TsvReferenceParser`].
///
pub fn parser_for_path(path: &Path) -> Box<dyn ReferenceParser> {
    match base_extension(path).as_deref() {
        Some("vcf") => Box::new(VcfReferenceParser::default()),
        _ => Box::new(TsvReferenceParser),
    }
}

fn parse_position(raw: &str, line_no: usize) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid position '{}' on line {}", raw, line_no))
}

/// Tab separated reference table.
///
/// The first line is a header naming the four key columns followed by
/// annotation columns, each written `source:field` (or a bare `field`, filed
/// under [`DEFAULT_TSV_SOURCE`]):
///
/// ```text
/// #chrom  pos  ref  alt  clinvar:significance  gnomad:af
/// chr1    100  A    G    pathogenic            0.0001
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvReferenceParser;

impl ReferenceParser for TsvReferenceParser {
    fn name(&self) -> &str {
        "tsv"
    }

    fn parse(&self, path: &Path, stop: &StopFlag) -> Result<Vec<AnnotationRecord>> {
        let reader = get_dynamic_reader(path)?;
        let mut lines = reader.lines().enumerate();

        let header = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line.with_context(|| format!("Failed reading {:?}", path))?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => bail!("Reference table {:?} is empty", path),
            }
        };

        let columns: Vec<&str> = header.trim_start_matches('#').trim_end().split('\t').collect();
        if columns.len() < 4 {
            bail!(
                "Reference table header needs at least chrom, pos, ref, alt columns; found {}",
                columns.len()
            );
        }
        let fields: Vec<(String, String)> = columns[4..]
            .iter()
            .map(|c| match c.split_once(':') {
                Some((source, field)) => (source.to_string(), field.to_string()),
                None => (DEFAULT_TSV_SOURCE.to_string(), c.to_string()),
            })
            .collect();

        let mut records = Vec::new();
        for (idx, line) in lines {
            stop.check()?;
            let line_no = idx + 1;
            let line = line.with_context(|| format!("Failed reading {:?}", path))?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() != columns.len() {
                bail!(
                    "Line {} has {} columns, header has {}",
                    line_no,
                    parts.len(),
                    columns.len()
                );
            }

            let key = VariantKey::new(parts[0], parse_position(parts[1], line_no)?, parts[2], parts[3]);
            let mut record = AnnotationRecord::new(key);
            for ((source, field), raw) in fields.iter().zip(&parts[4..]) {
                record.insert_field(source, field, FieldValue::infer(raw));
            }
            records.push(record);
        }

        Ok(records)
    }
}

/// ClinVar-style VCF.
///
/// INFO entries become fields of a single source; flags become
/// `Flag(true)`, the ID column is kept as field `id`. Multi-allelic sites are
/// split into one record per ALT, and INFO fields declared `Number=A` are
/// split alongside them. Symbolic, `*` and `.` ALTs are skipped.
#[derive(Debug, Clone)]
pub struct VcfReferenceParser {
    source_name: String,
}

impl Default for VcfReferenceParser {
    fn default() -> Self {
        VcfReferenceParser {
            source_name: DEFAULT_VCF_SOURCE.to_string(),
        }
    }
}

impl VcfReferenceParser {
    pub fn new(source_name: impl Into<String>) -> Self {
        VcfReferenceParser {
            source_name: source_name.into(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}

/// `##INFO=<ID=AF,Number=A,...>` -> `Some("AF")` when Number is `A`.
fn per_allele_info_id(meta: &str) -> Option<&str> {
    let body = meta.strip_prefix("##INFO=<")?.strip_suffix('>')?;
    let mut id = None;
    let mut per_allele = false;
    for part in body.split(',') {
        match part.split_once('=') {
            Some(("ID", v)) => id = Some(v),
            Some(("Number", "A")) => per_allele = true,
            _ => {}
        }
    }
    id.filter(|_| per_allele)
}

impl ReferenceParser for VcfReferenceParser {
    fn name(&self) -> &str {
        "vcf"
    }

    fn parse(&self, path: &Path, stop: &StopFlag) -> Result<Vec<AnnotationRecord>> {
        let mut reader = get_dynamic_reader(path)?;
        let mut per_allele: HashSet<String> = HashSet::new();
        let mut saw_column_header = false;
        let mut records = Vec::new();
        let mut line_buf = String::new();
        let mut line_no = 0usize;

        loop {
            stop.check()?;
            line_buf.clear();
            if reader
                .read_line(&mut line_buf)
                .with_context(|| format!("Failed reading {:?}", path))?
                == 0
            {
                break;
            }
            line_no += 1;

            let line = line_buf.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if line.starts_with("##") {
                if let Some(id) = per_allele_info_id(line) {
                    per_allele.insert(id.to_string());
                }
                continue;
            }
            if line.starts_with("#CHROM") {
                saw_column_header = true;
                continue;
            }
            if !saw_column_header {
                bail!("{:?} has data before the #CHROM header line", path);
            }

            let fields: Vec<&str> = line.splitn(9, '\t').collect();
            if fields.len() < 8 {
                return Err(anyhow!(
                    "Line {} has {} columns, a VCF record needs 8",
                    line_no,
                    fields.len()
                ));
            }

            let chrom = fields[0];
            let pos = parse_position(fields[1], line_no)?;
            let id = fields[2];
            let ref_allele = fields[3];
            let alts: Vec<&str> = fields[4].split(',').collect();
            let info = fields[7];

            for (alt_idx, alt) in alts.iter().enumerate() {
                if alt.starts_with('<') || *alt == "*" || *alt == "." {
                    continue;
                }

                let mut record = AnnotationRecord::new(VariantKey::new(chrom, pos, ref_allele, *alt));
                if id != "." {
                    record.insert_field(&self.source_name, "id", FieldValue::Text(id.to_string()));
                }

                if info != "." {
                    for entry in info.split(';').filter(|e| !e.is_empty()) {
                        let Some((key, raw)) = entry.split_once('=') else {
                            record.insert_field(&self.source_name, entry, FieldValue::Flag(true));
                            continue;
                        };
                        let raw = if per_allele.contains(key) {
                            let values: Vec<&str> = raw.split(',').collect();
                            if values.len() == alts.len() { values[alt_idx] } else { raw }
                        } else {
                            raw
                        };
                        record.insert_field(&self.source_name, key, FieldValue::infer(raw));
                    }
                }

                records.push(record);
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::fs;
    use std::io::Write;

    const TSV: &str = "#chrom\tpos\tref\talt\tclinvar:significance\tgnomad:af\tnote\n\
                       chr1\t100\tA\tG\tpathogenic\t0.0001\t.\n\
                       chr1\t200\tC\tT\tbenign\t.\ttrue\n";

    const VCF: &str = "##fileformat=VCFv4.2\n\
                       ##INFO=<ID=AF,Number=A,Type=Float,Description=\"freq\">\n\
                       ##INFO=<ID=CLNSIG,Number=.,Type=String,Description=\"sig\">\n\
                       #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
                       1\t55516888\trs1\tG\tGA,T\t.\tPASS\tAF=0.1,0.2;CLNSIG=Pathogenic;DB\n\
                       1\t600\t.\tC\t<DEL>\t.\tPASS\t.\n";

    #[rstest]
    fn test_tsv_parser_types_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.tsv");
        fs::write(&path, TSV).unwrap();

        let records = TsvReferenceParser.parse(&path, &StopFlag::new()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].field("clinvar", "significance"),
            Some(&FieldValue::Text("pathogenic".into()))
        );
        assert_eq!(records[0].field("gnomad", "af"), Some(&FieldValue::Float(0.0001)));
        assert_eq!(records[0].field(DEFAULT_TSV_SOURCE, "note"), Some(&FieldValue::Null));
        assert_eq!(records[1].field(DEFAULT_TSV_SOURCE, "note"), Some(&FieldValue::Flag(true)));
    }

    #[rstest]
    fn test_tsv_parser_reads_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.tsv.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        encoder.write_all(TSV.as_bytes()).unwrap();
        encoder.finish().unwrap();

        assert_eq!(TsvReferenceParser.parse(&path, &StopFlag::new()).unwrap().len(), 2);
    }

    #[rstest]
    #[case::bad_position("#chrom\tpos\tref\talt\nchr1\tabc\tA\tG\n")]
    #[case::ragged_row("#chrom\tpos\tref\talt\tx\nchr1\t1\tA\tG\n")]
    #[case::short_header("#chrom\tpos\n")]
    #[case::empty("")]
    fn test_tsv_parser_rejects_malformed(#[case] content: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        fs::write(&path, content).unwrap();
        assert!(TsvReferenceParser.parse(&path, &StopFlag::new()).is_err());
    }

    #[rstest]
    fn test_vcf_parser_splits_alleles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clinvar.vcf");
        fs::write(&path, VCF).unwrap();

        let records = VcfReferenceParser::default().parse(&path, &StopFlag::new()).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].key, VariantKey::new("1", 55516888, "G", "GA"));
        assert_eq!(records[1].key, VariantKey::new("1", 55516888, "G", "T"));
        assert_eq!(records[0].field("clinvar", "AF"), Some(&FieldValue::Float(0.1)));
        assert_eq!(records[1].field("clinvar", "AF"), Some(&FieldValue::Float(0.2)));
        assert_eq!(
            records[1].field("clinvar", "CLNSIG"),
            Some(&FieldValue::Text("Pathogenic".into()))
        );
        assert_eq!(records[0].field("clinvar", "DB"), Some(&FieldValue::Flag(true)));
        assert_eq!(records[0].field("clinvar", "id"), Some(&FieldValue::Text("rs1".into())));
    }

    #[rstest]
    fn test_vcf_parser_requires_column_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.vcf");
        fs::write(&path, "1\t100\t.\tA\tG\t.\t.\t.\n").unwrap();
        assert!(VcfReferenceParser::new("custom").parse(&path, &StopFlag::new()).is_err());
    }

    #[rstest]
    fn test_raised_stop_flag_ends_parse() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = dir.path().join("ref.tsv");
        let vcf = dir.path().join("ref.vcf");
        fs::write(&tsv, TSV).unwrap();
        fs::write(&vcf, VCF).unwrap();

        let stop = StopFlag::new();
        stop.stop();
        let err = TsvReferenceParser.parse(&tsv, &stop).unwrap_err();
        assert!(format!("{:#}", err).contains("stopped"));
        assert!(VcfReferenceParser::default().parse(&vcf, &stop).is_err());
    }

    #[rstest]
    #[case("clinvar.vcf.gz", "vcf")]
    #[case("clinvar.vcf", "vcf")]
    #[case("table.tsv", "tsv")]
    #[case("table.txt.gz", "tsv")]
    fn test_parser_for_path(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(parser_for_path(Path::new(name)).name(), expected);
    }
}
