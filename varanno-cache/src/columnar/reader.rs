use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::Crc;
use flate2::read::ZlibDecoder;

use varanno_core::models::{AnnotationPayload, AnnotationRecord, FieldValue, VariantKey};

use super::format::{Column, ColumnEntry, ColumnId, ColumnKind, ENTRY_LEN, Encoding, FieldTag, HEADER_LEN};
use crate::consts::{COLUMNAR_FORMAT_VERSION, COLUMNAR_MAGIC, MAX_INFLATE_RATIO};
use crate::error::CodecError;

fn corrupt(msg: impl Into<String>) -> CodecError {
    CodecError::CorruptArtifact(msg.into())
}

/// Read-side view over an encoded columnar block.
///
/// Opening a reader only parses the header and directory; columns are
/// inflated on demand, so callers that need a subset of columns never pay for
/// the rest.
#[derive(Debug)]
pub struct ColumnarReader<'a> {
    bytes: &'a [u8],
    record_count: u64,
    directory: Vec<ColumnEntry>,
}

impl<'a> ColumnarReader<'a> {
    ///
    /// Parse and validate the header and column directory.
    ///
    pub fn open(bytes: &'a [u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!(
                "block is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(|e| corrupt(e.to_string()))?;
        if &magic != COLUMNAR_MAGIC {
            return Err(corrupt("missing columnar magic bytes"));
        }

        let version = read_u16(&mut cursor)?;
        if version != COLUMNAR_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unrecognized columnar format version {} (expected {})",
                version, COLUMNAR_FORMAT_VERSION
            )));
        }

        let record_count = read_u64(&mut cursor)?;
        let column_count = read_u16(&mut cursor)? as usize;
        if column_count != ColumnId::ALL.len() {
            return Err(corrupt(format!(
                "expected {} columns, directory lists {}",
                ColumnId::ALL.len(),
                column_count
            )));
        }

        let directory_end = HEADER_LEN + column_count * ENTRY_LEN;
        if bytes.len() < directory_end {
            return Err(corrupt("column directory is truncated"));
        }

        let mut directory: Vec<ColumnEntry> = Vec::with_capacity(column_count);
        let mut offset = directory_end as u64;
        for _ in 0..column_count {
            let id = ColumnId::try_from(read_u8(&mut cursor)?)?;
            let encoding = Encoding::try_from(read_u8(&mut cursor)?)?;
            let rows = read_u64(&mut cursor)?;
            let raw_len = read_u64(&mut cursor)?;
            let compressed_len = read_u64(&mut cursor)?;
            let crc32 = read_u32(&mut cursor)?;

            if directory.iter().any(|e| e.id == id) {
                return Err(corrupt(format!("column '{}' listed twice", id.name())));
            }
            if encoding == Encoding::Dictionary && id.kind() != ColumnKind::Str {
                return Err(corrupt(format!(
                    "column '{}' is not a string column but claims dictionary encoding",
                    id.name()
                )));
            }

            directory.push(ColumnEntry {
                id,
                encoding,
                rows,
                raw_len,
                compressed_len,
                crc32,
                offset: offset as usize,
            });
            offset = offset
                .checked_add(compressed_len)
                .ok_or_else(|| corrupt("column lengths overflow"))?;
        }

        if offset != bytes.len() as u64 {
            return Err(corrupt(format!(
                "column lengths account for {} bytes but block has {}",
                offset,
                bytes.len()
            )));
        }

        for id in ColumnId::PER_RECORD {
            let entry = find_entry(&directory, id)?;
            if entry.rows != record_count {
                return Err(corrupt(format!(
                    "column '{}' has {} rows, expected {}",
                    id.name(),
                    entry.rows,
                    record_count
                )));
            }
        }

        Ok(ColumnarReader {
            bytes,
            record_count,
            directory,
        })
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn directory(&self) -> &[ColumnEntry] {
        &self.directory
    }

    pub fn entry(&self, id: ColumnId) -> Result<&ColumnEntry, CodecError> {
        find_entry(&self.directory, id)
    }

    ///
    /// Inflate and decode a single column.
    ///
    pub fn read_column(&self, id: ColumnId) -> Result<Column, CodecError> {
        let entry = self.entry(id)?;
        let raw = self.inflate(entry)?;

        let kind = id.kind();
        let Some(width) = kind.width() else {
            let mut cursor = Cursor::new(raw.as_slice());
            let values = read_strings(&mut cursor, entry)?;
            if cursor.position() != entry.raw_len {
                return Err(corrupt(format!(
                    "column '{}' has {} trailing bytes",
                    id.name(),
                    entry.raw_len - cursor.position()
                )));
            }
            return Ok(Column::Str(values));
        };

        if entry.rows.checked_mul(width) != Some(entry.raw_len) {
            return Err(corrupt(format!(
                "column '{}' has {} bytes for {} rows of width {}",
                id.name(),
                entry.raw_len,
                entry.rows,
                width
            )));
        }

        let column = match kind {
            ColumnKind::U64 => Column::U64(
                raw.chunks_exact(8)
                    .map(|c| u64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                    .collect(),
            ),
            ColumnKind::I64 => Column::I64(
                raw.chunks_exact(8)
                    .map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                    .collect(),
            ),
            ColumnKind::U32 => Column::U32(
                raw.chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap_or([0; 4])))
                    .collect(),
            ),
            ColumnKind::U8 | ColumnKind::Str => Column::U8(raw),
        };

        Ok(column)
    }

    fn inflate(&self, entry: &ColumnEntry) -> Result<Vec<u8>, CodecError> {
        if entry.raw_len > entry.compressed_len.saturating_mul(MAX_INFLATE_RATIO) + 64 {
            return Err(corrupt(format!(
                "column '{}' claims an impossible inflated size of {} bytes",
                entry.id.name(),
                entry.raw_len
            )));
        }

        let start = entry.offset;
        let end = start + entry.compressed_len as usize;
        let slice = &self.bytes[start..end];

        let mut raw = Vec::with_capacity(entry.raw_len as usize);
        ZlibDecoder::new(slice)
            .take(entry.raw_len + 1)
            .read_to_end(&mut raw)
            .map_err(|e| corrupt(format!("column '{}': {}", entry.id.name(), e)))?;
        if raw.len() as u64 != entry.raw_len {
            return Err(corrupt(format!(
                "column '{}' inflated to {} bytes, expected {}",
                entry.id.name(),
                raw.len(),
                entry.raw_len
            )));
        }

        let mut crc = Crc::new();
        crc.update(&raw);
        if crc.sum() != entry.crc32 {
            return Err(corrupt(format!("column '{}' failed its checksum", entry.id.name())));
        }

        Ok(raw)
    }

    ///
    /// Decode only the variant keys, leaving annotation columns compressed.
    ///
    pub fn keys(&self) -> Result<Vec<VariantKey>, CodecError> {
        let chrom = self.strings(ColumnId::Chrom)?;
        let pos = self.u64s(ColumnId::Position)?;
        let refs = self.strings(ColumnId::RefAllele)?;
        let alts = self.strings(ColumnId::AltAllele)?;

        Ok(chrom
            .into_iter()
            .zip(pos)
            .zip(refs)
            .zip(alts)
            .map(|(((c, p), r), a)| VariantKey::new(c, p, r, a))
            .collect())
    }

    ///
    /// Decode every record.
    ///
    pub fn records(&self) -> Result<Vec<AnnotationRecord>, CodecError> {
        let keys = self.keys()?;

        let source_count = self.u32s(ColumnId::SourceCount)?;
        let source_name = self.strings(ColumnId::SourceName)?;
        let field_count = self.u32s(ColumnId::FieldCount)?;
        let field_name = self.strings(ColumnId::FieldName)?;
        let field_type = self.u8s(ColumnId::FieldType)?;
        let flag_value = self.u8s(ColumnId::FlagValue)?;
        let int_value = self.i64s(ColumnId::IntValue)?;
        let float_value = self.u64s(ColumnId::FloatValue)?;
        let text_value = self.strings(ColumnId::TextValue)?;

        let total_sources: u64 = source_count.iter().map(|&c| c as u64).sum();
        if total_sources != source_name.len() as u64 || total_sources != field_count.len() as u64 {
            return Err(corrupt(format!(
                "records reference {} sources but source columns hold {} names and {} counts",
                total_sources,
                source_name.len(),
                field_count.len()
            )));
        }

        let total_fields: u64 = field_count.iter().map(|&c| c as u64).sum();
        if total_fields != field_name.len() as u64 || total_fields != field_type.len() as u64 {
            return Err(corrupt(format!(
                "sources reference {} fields but field columns hold {} names and {} types",
                total_fields,
                field_name.len(),
                field_type.len()
            )));
        }

        let mut expected = [0usize; 5];
        for &tag in &field_type {
            expected[FieldTag::try_from(tag)? as usize] += 1;
        }
        let value_rows = [
            (FieldTag::Flag, flag_value.len()),
            (FieldTag::Integer, int_value.len()),
            (FieldTag::Float, float_value.len()),
            (FieldTag::Text, text_value.len()),
        ];
        for (tag, rows) in value_rows {
            if expected[tag as usize] != rows {
                return Err(corrupt(format!(
                    "{} fields are typed {:?} but the value column holds {}",
                    expected[tag as usize], tag, rows
                )));
            }
        }

        let mut sources = source_name.into_iter().zip(field_count);
        let mut fields = field_name.into_iter().zip(field_type);
        let mut flags = flag_value.into_iter();
        let mut ints = int_value.into_iter();
        let mut floats = float_value.into_iter();
        let mut texts = text_value.into_iter();

        let mut records = Vec::with_capacity(keys.len());
        for (key, n_sources) in keys.into_iter().zip(source_count) {
            let mut annotations: BTreeMap<String, AnnotationPayload> = BTreeMap::new();
            for _ in 0..n_sources {
                let (source, n_fields) = sources
                    .next()
                    .ok_or_else(|| corrupt("source column exhausted"))?;
                let mut payload = AnnotationPayload::new();
                for _ in 0..n_fields {
                    let (name, tag) = fields
                        .next()
                        .ok_or_else(|| corrupt("field column exhausted"))?;
                    let value = match FieldTag::try_from(tag)? {
                        FieldTag::Null => FieldValue::Null,
                        FieldTag::Flag => FieldValue::Flag(
                            flags.next().ok_or_else(|| corrupt("flag column exhausted"))? != 0,
                        ),
                        FieldTag::Integer => FieldValue::Integer(
                            ints.next().ok_or_else(|| corrupt("int column exhausted"))?,
                        ),
                        FieldTag::Float => FieldValue::Float(f64::from_bits(
                            floats.next().ok_or_else(|| corrupt("float column exhausted"))?,
                        )),
                        FieldTag::Text => FieldValue::Text(
                            texts.next().ok_or_else(|| corrupt("text column exhausted"))?,
                        ),
                    };
                    if payload.insert(name, value).is_some() {
                        return Err(corrupt(format!("duplicate field in record {}", key)));
                    }
                }
                if annotations.insert(source, payload).is_some() {
                    return Err(corrupt(format!("duplicate source in record {}", key)));
                }
            }
            records.push(AnnotationRecord { key, annotations });
        }

        Ok(records)
    }

    fn strings(&self, id: ColumnId) -> Result<Vec<String>, CodecError> {
        match self.read_column(id)? {
            Column::Str(v) => Ok(v),
            _ => Err(corrupt(format!("column '{}' is not a string column", id.name()))),
        }
    }

    fn u64s(&self, id: ColumnId) -> Result<Vec<u64>, CodecError> {
        match self.read_column(id)? {
            Column::U64(v) => Ok(v),
            _ => Err(corrupt(format!("column '{}' is not a u64 column", id.name()))),
        }
    }

    fn u32s(&self, id: ColumnId) -> Result<Vec<u32>, CodecError> {
        match self.read_column(id)? {
            Column::U32(v) => Ok(v),
            _ => Err(corrupt(format!("column '{}' is not a u32 column", id.name()))),
        }
    }

    fn u8s(&self, id: ColumnId) -> Result<Vec<u8>, CodecError> {
        match self.read_column(id)? {
            Column::U8(v) => Ok(v),
            _ => Err(corrupt(format!("column '{}' is not a u8 column", id.name()))),
        }
    }

    fn i64s(&self, id: ColumnId) -> Result<Vec<i64>, CodecError> {
        match self.read_column(id)? {
            Column::I64(v) => Ok(v),
            _ => Err(corrupt(format!("column '{}' is not an i64 column", id.name()))),
        }
    }
}

fn find_entry(directory: &[ColumnEntry], id: ColumnId) -> Result<&ColumnEntry, CodecError> {
    directory
        .iter()
        .find(|e| e.id == id)
        .ok_or_else(|| corrupt(format!("column '{}' missing from directory", id.name())))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    cursor.read_u8().map_err(|e| corrupt(e.to_string()))
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, CodecError> {
    cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| corrupt(e.to_string()))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| corrupt(e.to_string()))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64, CodecError> {
    cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| corrupt(e.to_string()))
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = read_u32(cursor)? as u64;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len > remaining {
        return Err(corrupt(format!(
            "string of {} bytes overruns its column ({} bytes left)",
            len, remaining
        )));
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf).map_err(|e| corrupt(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| corrupt(format!("invalid UTF-8 in string column: {}", e)))
}

fn read_strings(cursor: &mut Cursor<&[u8]>, entry: &ColumnEntry) -> Result<Vec<String>, CodecError> {
    // every string costs at least its 4 byte length prefix or index
    if entry.rows.saturating_mul(4) > entry.raw_len {
        return Err(corrupt(format!(
            "column '{}' is too short for {} rows",
            entry.id.name(),
            entry.rows
        )));
    }

    match entry.encoding {
        Encoding::Plain => (0..entry.rows).map(|_| read_str(cursor)).collect(),
        Encoding::Dictionary => {
            let dict_len = read_u32(cursor)? as u64;
            if dict_len.saturating_mul(4) > entry.raw_len {
                return Err(corrupt(format!(
                    "column '{}' dictionary of {} entries cannot fit",
                    entry.id.name(),
                    dict_len
                )));
            }
            let dict: Vec<String> = (0..dict_len)
                .map(|_| read_str(cursor))
                .collect::<Result<_, _>>()?;
            (0..entry.rows)
                .map(|_| {
                    let idx = read_u32(cursor)? as usize;
                    dict.get(idx).cloned().ok_or_else(|| {
                        corrupt(format!(
                            "column '{}' index {} outside dictionary of {}",
                            entry.id.name(),
                            idx,
                            dict.len()
                        ))
                    })
                })
                .collect()
        }
    }
}
