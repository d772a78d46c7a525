//! Byte layout of an encoded columnar block.
//!
//! ```text
//! magic "VCOL" | version u16 | record_count u64 | column_count u16
//! directory: column_count x (id u8, encoding u8, rows u64, raw_len u64, compressed_len u64, crc32 u32)
//! payload:   zlib-compressed column bodies, in directory order
//! ```
//!
//! All integers are little endian. Annotation maps are flattened into three
//! levels of columns: per record (key fields, source count), per source
//! entry (name, field count) and per field (name, type tag). Field values
//! live in one column per value type, consumed in field order.

use crate::error::CodecError;

/// Fixed size of the block header.
pub const HEADER_LEN: usize = 4 + 2 + 8 + 2;

/// Fixed size of one directory entry.
pub const ENTRY_LEN: usize = 1 + 1 + 8 + 8 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ColumnId {
    Chrom = 1,
    Position = 2,
    RefAllele = 3,
    AltAllele = 4,
    SourceCount = 5,
    SourceName = 6,
    FieldCount = 7,
    FieldName = 8,
    FieldType = 9,
    FlagValue = 10,
    IntValue = 11,
    FloatValue = 12,
    TextValue = 13,
}

/// Physical type of a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Str,
    U64,
    U32,
    U8,
    I64,
}

impl ColumnKind {
    /// Width in bytes of fixed-width kinds.
    pub fn width(&self) -> Option<u64> {
        match self {
            ColumnKind::Str => None,
            ColumnKind::U64 | ColumnKind::I64 => Some(8),
            ColumnKind::U32 => Some(4),
            ColumnKind::U8 => Some(1),
        }
    }
}

impl ColumnId {
    pub const ALL: [ColumnId; 13] = [
        ColumnId::Chrom,
        ColumnId::Position,
        ColumnId::RefAllele,
        ColumnId::AltAllele,
        ColumnId::SourceCount,
        ColumnId::SourceName,
        ColumnId::FieldCount,
        ColumnId::FieldName,
        ColumnId::FieldType,
        ColumnId::FlagValue,
        ColumnId::IntValue,
        ColumnId::FloatValue,
        ColumnId::TextValue,
    ];

    /// Columns holding exactly one row per record.
    pub const PER_RECORD: [ColumnId; 5] = [
        ColumnId::Chrom,
        ColumnId::Position,
        ColumnId::RefAllele,
        ColumnId::AltAllele,
        ColumnId::SourceCount,
    ];

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnId::Chrom
            | ColumnId::RefAllele
            | ColumnId::AltAllele
            | ColumnId::SourceName
            | ColumnId::FieldName
            | ColumnId::TextValue => ColumnKind::Str,
            ColumnId::Position | ColumnId::FloatValue => ColumnKind::U64,
            ColumnId::SourceCount | ColumnId::FieldCount => ColumnKind::U32,
            ColumnId::FieldType | ColumnId::FlagValue => ColumnKind::U8,
            ColumnId::IntValue => ColumnKind::I64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnId::Chrom => "chrom",
            ColumnId::Position => "pos",
            ColumnId::RefAllele => "ref",
            ColumnId::AltAllele => "alt",
            ColumnId::SourceCount => "source_count",
            ColumnId::SourceName => "source_name",
            ColumnId::FieldCount => "field_count",
            ColumnId::FieldName => "field_name",
            ColumnId::FieldType => "field_type",
            ColumnId::FlagValue => "flag_value",
            ColumnId::IntValue => "int_value",
            ColumnId::FloatValue => "float_value",
            ColumnId::TextValue => "text_value",
        }
    }
}

impl TryFrom<u8> for ColumnId {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ColumnId::ALL
            .iter()
            .copied()
            .find(|c| *c as u8 == value)
            .ok_or_else(|| CodecError::CorruptArtifact(format!("unknown column id {}", value)))
    }
}

/// How a column body is laid out before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Values back to back (strings as u32 length + bytes).
    Plain = 0,
    /// A string dictionary followed by one u32 index per row.
    Dictionary = 1,
}

impl TryFrom<u8> for Encoding {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encoding::Plain),
            1 => Ok(Encoding::Dictionary),
            _ => Err(CodecError::CorruptArtifact(format!(
                "unknown column encoding {}",
                value
            ))),
        }
    }
}

/// Type tag of one annotation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldTag {
    Null = 0,
    Flag = 1,
    Integer = 2,
    Float = 3,
    Text = 4,
}

impl TryFrom<u8> for FieldTag {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FieldTag::Null),
            1 => Ok(FieldTag::Flag),
            2 => Ok(FieldTag::Integer),
            3 => Ok(FieldTag::Float),
            4 => Ok(FieldTag::Text),
            _ => Err(CodecError::CorruptArtifact(format!(
                "unknown field type tag {}",
                value
            ))),
        }
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEntry {
    pub id: ColumnId,
    pub encoding: Encoding,
    pub rows: u64,
    pub raw_len: u64,
    pub compressed_len: u64,
    pub crc32: u32,
    /// Byte offset of the compressed body within the block.
    pub offset: usize,
}

/// Decoded values of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Str(Vec<String>),
    U64(Vec<u64>),
    U32(Vec<u32>),
    U8(Vec<u8>),
    I64(Vec<i64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Str(v) => v.len(),
            Column::U64(v) => v.len(),
            Column::U32(v) => v.len(),
            Column::U8(v) => v.len(),
            Column::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
