//! Row encode/decode (schema-driven Compact format).
//!
//! The page codec in [`crate::innodb::record`] only understands the shape
//! of a compact record (header, null bitmap, variable-length lengths); it
//! has no idea what a row's columns mean. This module is the layer above
//! that knows a [`Schema`] and can turn a [`Row`] into the bytes
//! [`crate::innodb::record::CompactRecordHeader`] and friends expect, and
//! back again — the piece the teacher never needed because it only ever
//! read records it did not have to also produce.

use std::cmp::Ordering;

use byteorder::{BigEndian, ByteOrder};

use crate::innodb::constants::REC_N_NEW_EXTRA_BYTES;
use crate::innodb::record::{read_variable_field_lengths, write_variable_field_lengths, CompactRecordHeader};
use crate::EngineError;

/// Column storage kinds this engine supports. Deliberately small: the spec's
/// row layer exists to drive the B+-tree, not to be a general type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Fixed-width 8-byte signed integer.
    BigInt,
    /// Variable-length UTF-8 text, stored length-prefixed.
    VarChar,
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn big_int(name: impl Into<String>) -> Self {
        ColumnDef { name: name.into(), col_type: ColumnType::BigInt, nullable: false }
    }

    pub fn varchar(name: impl Into<String>, nullable: bool) -> Self {
        ColumnDef { name: name.into(), col_type: ColumnType::VarChar, nullable }
    }
}

/// A table's column layout. Column 0 is always the clustering key, matching
/// InnoDB's rule that the clustered index orders rows by primary key.
#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Schema { columns }
    }

    fn nullable_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().enumerate().filter(|(_, c)| c.nullable).map(|(i, _)| i)
    }

    fn variable_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.col_type == ColumnType::VarChar)
            .map(|(i, _)| i)
    }
}

/// One column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    BigInt(i64),
    VarChar(String),
    Null,
}

impl Value {
    /// Ordering key comparison. Only defined between values of the same
    /// variant; comparing across variants is a schema-mismatch bug in the
    /// caller, not a data condition, so it panics rather than returning a
    /// confusing ordering.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::VarChar(a), Value::VarChar(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => panic!("compared values of different column types"),
        }
    }
}

/// One row: a tuple of values positionally matching a [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    /// The clustering key: column 0's value.
    pub fn primary_key(&self) -> &Value {
        &self.values[0]
    }
}

/// A row plus the bytes of its encoded record, ready to be copied into a
/// page at a chosen offset.
pub struct EncodedRecord {
    /// The full record: 5-byte header, then the record body, in one buffer.
    /// `body_offset` marks where the record origin (the part a next-record
    /// pointer refers to) begins within this buffer.
    pub bytes: Vec<u8>,
    pub body_offset: usize,
}

impl EncodedRecord {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode `row` into a standalone record buffer. `heap_no` and `next_offset`
/// populate the compact record header; the caller (the B+-tree leaf-page
/// writer) is responsible for choosing both once it knows where the record
/// will land among its neighbors.
pub fn encode_row(schema: &Schema, row: &Row, heap_no: u16, next_offset: i16) -> Result<EncodedRecord, EngineError> {
    if row.values.len() != schema.columns.len() {
        return Err(EngineError::PageCorrupted(0));
    }

    let nullable: Vec<usize> = schema.nullable_indices().collect();
    let nulls: Vec<bool> = nullable.iter().map(|&i| row.values[i] == Value::Null).collect();

    let mut var_lengths = Vec::new();
    let mut body = Vec::new();
    for (i, col) in schema.columns.iter().enumerate() {
        let value = &row.values[i];
        match (col.col_type, value) {
            (ColumnType::BigInt, Value::BigInt(v)) => {
                let mut buf = [0u8; 8];
                BigEndian::write_i64(&mut buf, *v);
                body.extend_from_slice(&buf);
            }
            (ColumnType::BigInt, Value::Null) if col.nullable => {}
            (ColumnType::VarChar, Value::VarChar(s)) => {
                var_lengths.push(s.len());
                body.extend_from_slice(s.as_bytes());
            }
            (ColumnType::VarChar, Value::Null) if col.nullable => {
                var_lengths.push(0);
            }
            _ => return Err(EngineError::PageCorrupted(0)),
        }
    }

    let null_bitmap_bytes = nullable.len().div_ceil(8);
    let var_lengths_bytes: usize = var_lengths
        .iter()
        .map(|&len| if len > 0x7F { 2 } else { 1 })
        .sum();
    let prefix_len = null_bitmap_bytes + var_lengths_bytes;

    let mut bytes = vec![0u8; REC_N_NEW_EXTRA_BYTES + prefix_len + body.len()];
    let record_origin = REC_N_NEW_EXTRA_BYTES + prefix_len;

    let header = CompactRecordHeader {
        n_owned: 0,
        delete_mark: false,
        min_rec: false,
        heap_no,
        rec_type: crate::innodb::record::RecordType::Ordinary,
        next_offset,
    };
    header.encode(&mut bytes[0..REC_N_NEW_EXTRA_BYTES]);

    write_variable_field_lengths(&mut bytes, record_origin, &nulls, &var_lengths);
    bytes[record_origin..].copy_from_slice(&body);

    Ok(EncodedRecord { bytes, body_offset: REC_N_NEW_EXTRA_BYTES })
}

/// Decode a row out of a page at `record_origin`, given the schema that
/// produced it.
pub fn decode_row(schema: &Schema, page_data: &[u8], record_origin: usize) -> Result<Row, EngineError> {
    let nullable: Vec<usize> = schema.nullable_indices().collect();
    let variable: Vec<usize> = schema.variable_indices().collect();

    let (nulls, var_lengths) =
        read_variable_field_lengths(page_data, record_origin, nullable.len(), variable.len())
            .ok_or(EngineError::PageCorrupted(0))?;

    let mut null_flags = vec![false; schema.columns.len()];
    for (slot, &col_idx) in nullable.iter().enumerate() {
        null_flags[col_idx] = nulls[slot];
    }
    let mut var_len_by_col = vec![0usize; schema.columns.len()];
    for (slot, &col_idx) in variable.iter().enumerate() {
        var_len_by_col[col_idx] = var_lengths[slot];
    }

    let mut pos = record_origin;
    let mut values = Vec::with_capacity(schema.columns.len());
    for (i, col) in schema.columns.iter().enumerate() {
        if null_flags[i] {
            values.push(Value::Null);
            continue;
        }
        match col.col_type {
            ColumnType::BigInt => {
                if pos + 8 > page_data.len() {
                    return Err(EngineError::PageCorrupted(0));
                }
                values.push(Value::BigInt(BigEndian::read_i64(&page_data[pos..pos + 8])));
                pos += 8;
            }
            ColumnType::VarChar => {
                let len = var_len_by_col[i];
                if pos + len > page_data.len() {
                    return Err(EngineError::PageCorrupted(0));
                }
                let s = String::from_utf8_lossy(&page_data[pos..pos + len]).into_owned();
                values.push(Value::VarChar(s));
                pos += len;
            }
        }
    }

    Ok(Row { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::big_int("id"),
            ColumnDef::varchar("name", true),
        ])
    }

    #[test]
    fn encode_decode_round_trips() {
        let schema = schema();
        let row = Row::new(vec![Value::BigInt(42), Value::VarChar("hello".into())]);
        let encoded = encode_row(&schema, &row, 2, 0).unwrap();

        let mut page = vec![0u8; 200];
        let origin = 100;
        let start = origin - encoded.body_offset;
        page[start..start + encoded.len()].copy_from_slice(&encoded.bytes);

        let decoded = decode_row(&schema, &page, origin).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn null_varchar_round_trips() {
        let schema = schema();
        let row = Row::new(vec![Value::BigInt(1), Value::Null]);
        let encoded = encode_row(&schema, &row, 2, 0).unwrap();

        let mut page = vec![0u8; 200];
        let origin = 100;
        let start = origin - encoded.body_offset;
        page[start..start + encoded.len()].copy_from_slice(&encoded.bytes);

        let decoded = decode_row(&schema, &page, origin).unwrap();
        assert_eq!(decoded.values[1], Value::Null);
    }

    #[test]
    fn primary_key_is_column_zero() {
        let row = Row::new(vec![Value::BigInt(7), Value::VarChar("x".into())]);
        assert_eq!(row.primary_key(), &Value::BigInt(7));
    }

    #[test]
    fn compare_orders_bigints_numerically() {
        assert_eq!(Value::BigInt(1).compare(&Value::BigInt(2)), Ordering::Less);
        assert_eq!(Value::BigInt(5).compare(&Value::BigInt(5)), Ordering::Equal);
    }
}
