use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::Crc;
use flate2::write::ZlibEncoder;
use fxhash::FxHashMap;

use varanno_core::models::{AnnotationRecord, FieldValue};

use super::format::{ColumnId, Encoding, FieldTag};
use crate::consts::{COLUMNAR_FORMAT_VERSION, COLUMNAR_MAGIC};
use crate::error::CodecError;

/// Raw (uncompressed) column values borrowed from the records.
#[derive(Default)]
struct ColumnBuffers<'a> {
    chrom: Vec<&'a str>,
    pos: Vec<u64>,
    ref_allele: Vec<&'a str>,
    alt_allele: Vec<&'a str>,
    source_count: Vec<u32>,
    source_name: Vec<&'a str>,
    field_count: Vec<u32>,
    field_name: Vec<&'a str>,
    field_type: Vec<u8>,
    flag_value: Vec<u8>,
    int_value: Vec<i64>,
    float_value: Vec<u64>,
    text_value: Vec<&'a str>,
}

impl<'a> ColumnBuffers<'a> {
    fn from_records(records: &'a [AnnotationRecord]) -> Self {
        let mut cols = ColumnBuffers::default();
        for record in records {
            cols.chrom.push(record.key.chrom());
            cols.pos.push(record.key.pos());
            cols.ref_allele.push(record.key.ref_allele());
            cols.alt_allele.push(record.key.alt_allele());
            cols.source_count.push(record.annotations.len() as u32);

            for (source, payload) in &record.annotations {
                cols.source_name.push(source);
                cols.field_count.push(payload.len() as u32);

                for (field, value) in payload {
                    cols.field_name.push(field);
                    match value {
                        FieldValue::Null => cols.field_type.push(FieldTag::Null as u8),
                        FieldValue::Flag(b) => {
                            cols.field_type.push(FieldTag::Flag as u8);
                            cols.flag_value.push(*b as u8);
                        }
                        FieldValue::Integer(i) => {
                            cols.field_type.push(FieldTag::Integer as u8);
                            cols.int_value.push(*i);
                        }
                        FieldValue::Float(f) => {
                            cols.field_type.push(FieldTag::Float as u8);
                            cols.float_value.push(f.to_bits());
                        }
                        FieldValue::Text(s) => {
                            cols.field_type.push(FieldTag::Text as u8);
                            cols.text_value.push(s);
                        }
                    }
                }
            }
        }
        cols
    }

    /// Uncompressed body, encoding and row count for a column.
    fn body(&self, id: ColumnId) -> (Encoding, Vec<u8>, u64) {
        match id {
            ColumnId::Chrom => string_body(&self.chrom),
            ColumnId::RefAllele => string_body(&self.ref_allele),
            ColumnId::AltAllele => string_body(&self.alt_allele),
            ColumnId::SourceName => string_body(&self.source_name),
            ColumnId::FieldName => string_body(&self.field_name),
            ColumnId::TextValue => string_body(&self.text_value),
            ColumnId::Position => fixed_body(&self.pos, |buf, v| buf.extend_from_slice(&v.to_le_bytes())),
            ColumnId::FloatValue => {
                fixed_body(&self.float_value, |buf, v| buf.extend_from_slice(&v.to_le_bytes()))
            }
            ColumnId::IntValue => {
                fixed_body(&self.int_value, |buf, v| buf.extend_from_slice(&v.to_le_bytes()))
            }
            ColumnId::SourceCount => {
                fixed_body(&self.source_count, |buf, v| buf.extend_from_slice(&v.to_le_bytes()))
            }
            ColumnId::FieldCount => {
                fixed_body(&self.field_count, |buf, v| buf.extend_from_slice(&v.to_le_bytes()))
            }
            ColumnId::FieldType => (Encoding::Plain, self.field_type.clone(), self.field_type.len() as u64),
            ColumnId::FlagValue => (Encoding::Plain, self.flag_value.clone(), self.flag_value.len() as u64),
        }
    }
}

fn fixed_body<T: Copy>(values: &[T], put: impl Fn(&mut Vec<u8>, T)) -> (Encoding, Vec<u8>, u64) {
    let mut buf = Vec::with_capacity(values.len() * std::mem::size_of::<T>());
    for v in values {
        put(&mut buf, *v);
    }
    (Encoding::Plain, buf, values.len() as u64)
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

///
/// Encode a string column, choosing dictionary encoding when the number of
/// distinct values is at most half the row count.
///
fn string_body(values: &[&str]) -> (Encoding, Vec<u8>, u64) {
    let rows = values.len() as u64;

    let mut dict: Vec<&str> = Vec::new();
    let mut lookup: FxHashMap<&str, u32> = FxHashMap::default();
    let mut indices: Vec<u32> = Vec::with_capacity(values.len());
    for &v in values {
        let idx = *lookup.entry(v).or_insert_with(|| {
            dict.push(v);
            (dict.len() - 1) as u32
        });
        indices.push(idx);
    }

    let mut buf = Vec::new();
    if !values.is_empty() && dict.len() * 2 <= values.len() {
        buf.extend_from_slice(&(dict.len() as u32).to_le_bytes());
        for entry in &dict {
            put_str(&mut buf, entry);
        }
        for idx in indices {
            buf.extend_from_slice(&idx.to_le_bytes());
        }
        (Encoding::Dictionary, buf, rows)
    } else {
        for v in values {
            put_str(&mut buf, v);
        }
        (Encoding::Plain, buf, rows)
    }
}

fn compress(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

///
/// Encode records into a columnar block.
///
/// # Arguments
/// - records: the records to encode, in the order they should decode
///
/// # Returns
/// - the encoded bytes
pub fn encode(records: &[AnnotationRecord]) -> Result<Vec<u8>, CodecError> {
    let cols = ColumnBuffers::from_records(records);

    let mut directory = Vec::with_capacity(ColumnId::ALL.len());
    let mut payload = Vec::new();
    for id in ColumnId::ALL {
        let (encoding, raw, rows) = cols.body(id);
        let mut crc = Crc::new();
        crc.update(&raw);
        let compressed = compress(&raw)?;

        directory.push((id, encoding, rows, raw.len() as u64, compressed.len() as u64, crc.sum()));
        payload.extend_from_slice(&compressed);
    }

    let mut out = Vec::with_capacity(payload.len() + 256);
    out.write_all(COLUMNAR_MAGIC)?;
    out.write_u16::<LittleEndian>(COLUMNAR_FORMAT_VERSION)?;
    out.write_u64::<LittleEndian>(records.len() as u64)?;
    out.write_u16::<LittleEndian>(directory.len() as u16)?;
    for (id, encoding, rows, raw_len, compressed_len, crc) in directory {
        out.write_u8(id as u8)?;
        out.write_u8(encoding as u8)?;
        out.write_u64::<LittleEndian>(rows)?;
        out.write_u64::<LittleEndian>(raw_len)?;
        out.write_u64::<LittleEndian>(compressed_len)?;
        out.write_u32::<LittleEndian>(crc)?;
    }
    out.extend_from_slice(&payload);

    Ok(out)
}
