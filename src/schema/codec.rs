//! Binary record codec
//!
//! Records are encoded in schema order with no per-value type tags; the
//! schema drives decoding.
//!
//! ```text
//! string / bytes : u32 LE length + raw bytes
//! int            : i64 LE
//! float          : f64 bits, u64 LE (lossless, NaN payloads included)
//! optional       : u8 presence flag (0 = null, 1 = present) + value
//! sequence       : u32 LE count + items
//! record         : fields in order
//! ```

use std::io::{self, Cursor, Read};

use super::types::{Field, FieldType, Schema};
use super::value::{Record, Value};
use crate::storage::{StoreError, StoreResult};

/// Encodes a record laid out by `schema`
pub fn encode_record(schema: &Schema, record: &Record) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    encode_fields(&schema.fields, record, &mut buf)?;
    Ok(buf)
}

/// Decodes a record laid out by `schema`, requiring every byte to be consumed
pub fn decode_record(schema: &Schema, data: &[u8]) -> StoreResult<Record> {
    let mut cursor = Cursor::new(data);
    let record = decode_fields(&schema.fields, &mut cursor)
        .map_err(|e| StoreError::data_corruption(format!("Failed to decode record: {}", e)))?;
    if cursor.position() as usize != data.len() {
        return Err(StoreError::data_corruption(format!(
            "Record has {} trailing bytes",
            data.len() - cursor.position() as usize
        )));
    }
    Ok(record)
}

fn encode_fields(fields: &[Field], record: &Record, buf: &mut Vec<u8>) -> StoreResult<()> {
    if record.len() != fields.len() {
        return Err(StoreError::invalid_record(format!(
            "Record has {} values, schema defines {} fields",
            record.len(),
            fields.len()
        )));
    }
    for (field, value) in fields.iter().zip(record.values()) {
        encode_value(&field.field_type, value, buf)?;
    }
    Ok(())
}

fn encode_len(len: usize, buf: &mut Vec<u8>) -> StoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| StoreError::invalid_record(format!("Value length {} exceeds u32", len)))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn encode_value(field_type: &FieldType, value: &Value, buf: &mut Vec<u8>) -> StoreResult<()> {
    match (field_type, value) {
        (FieldType::String, Value::String(s)) => {
            encode_len(s.len(), buf)?;
            buf.extend_from_slice(s.as_bytes());
        }
        (FieldType::Bytes, Value::Bytes(b)) => {
            encode_len(b.len(), buf)?;
            buf.extend_from_slice(b);
        }
        (FieldType::Int, Value::Int(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (FieldType::Float, Value::Float(v)) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
        (FieldType::Optional { .. }, Value::Null) => buf.push(0),
        (FieldType::Optional { inner }, v) => {
            buf.push(1);
            encode_value(inner, v, buf)?;
        }
        (FieldType::Sequence { element_type }, Value::Sequence(items)) => {
            encode_len(items.len(), buf)?;
            for item in items {
                encode_value(element_type, item, buf)?;
            }
        }
        (FieldType::Record { fields }, Value::Record(record)) => encode_fields(fields, record, buf)?,
        (t, v) => {
            return Err(StoreError::invalid_record(format!(
                "Cannot encode {} as {}",
                v.type_name(),
                t.type_name()
            )))
        }
    }
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = read_u32(cursor)? as u64;
    // Reject lengths the buffer cannot hold before allocating
    let available = remaining(cursor);
    if len > available {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("length {} exceeds remaining {} bytes", len, available),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
}

fn decode_fields(fields: &[Field], cursor: &mut Cursor<&[u8]>) -> io::Result<Record> {
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        values.push(decode_value(&field.field_type, cursor)?);
    }
    Ok(Record::new(values))
}

fn decode_value(field_type: &FieldType, cursor: &mut Cursor<&[u8]>) -> io::Result<Value> {
    Ok(match field_type {
        FieldType::String => {
            let bytes = read_bytes(cursor)?;
            Value::String(String::from_utf8(bytes).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e))
            })?)
        }
        FieldType::Bytes => Value::Bytes(read_bytes(cursor)?),
        FieldType::Int => Value::Int(read_u64(cursor)? as i64),
        FieldType::Float => Value::Float(f64::from_bits(read_u64(cursor)?)),
        FieldType::Optional { inner } => {
            let mut flag = [0u8; 1];
            cursor.read_exact(&mut flag)?;
            match flag[0] {
                0 => Value::Null,
                1 => decode_value(inner, cursor)?,
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Invalid presence flag {}", other),
                    ))
                }
            }
        }
        FieldType::Sequence { element_type } => {
            let count = read_u32(cursor)? as usize;
            let mut items = Vec::with_capacity(count.min(remaining(cursor) as usize));
            for _ in 0..count {
                items.push(decode_value(element_type, cursor)?);
            }
            Value::Sequence(items)
        }
        FieldType::Record { fields } => Value::Record(decode_fields(fields, cursor)?),
    })
}
