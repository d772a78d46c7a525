use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

/// Reader buffer for large reference dumps.
const READER_CAPACITY: usize = 256 * 1024;

/// True when the path carries a gzip/bgzip extension.
pub fn is_gzipped(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("gz") | Some("bgz")
    )
}

///
/// Get a reader for either a gzip'd or non-gzip'd file.
///
/// # Arguments
///
/// - path: path to the file to read
///
pub fn get_dynamic_reader(path: &Path) -> Result<BufReader<Box<dyn Read>>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let file: Box<dyn Read> = match is_gzipped(path) {
        true => Box::new(MultiGzDecoder::new(file)),
        false => Box::new(file),
    };

    Ok(BufReader::with_capacity(READER_CAPACITY, file))
}

///
/// Strip compression and return the "real" extension of a file, e.g.
/// `clinvar.vcf.gz` -> `vcf`.
///
pub fn base_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let name = name
        .strip_suffix(".gz")
        .or_else(|| name.strip_suffix(".bgz"))
        .unwrap_or(name);
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|e| e.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rstest::*;
    use std::io::{BufRead, Write};
    use std::path::PathBuf;

    #[rstest]
    #[case("clinvar.vcf.gz", Some("vcf"))]
    #[case("ref.tsv", Some("tsv"))]
    #[case("ref.TSV.bgz", Some("tsv"))]
    #[case("noext", None)]
    fn test_base_extension(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            base_extension(&PathBuf::from(name)).as_deref(),
            expected
        );
    }

    #[rstest]
    fn test_dynamic_reader_reads_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.txt.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"first\nsecond\n").unwrap();
        enc.finish().unwrap();

        let lines: Vec<String> = get_dynamic_reader(&path)
            .unwrap()
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[rstest]
    fn test_dynamic_reader_missing_file() {
        assert!(get_dynamic_reader(Path::new("/definitely/not/here.tsv")).is_err());
    }
}
