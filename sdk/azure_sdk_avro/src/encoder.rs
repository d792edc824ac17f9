//! Binary encoding, the inverse of [`crate::decoder`].

use std::io::Write;

use crate::error::{AvroError, AvroResult};
use crate::schema::{Names, Schema};
use crate::value::Value;

/// Writes Avro primitives to a byte sink.
#[derive(Debug)]
pub struct BinaryEncoder<W> {
    writer: W,
}

impl<W: Write> BinaryEncoder<W> {
    /// Encode into `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Null takes no bytes.
    pub fn write_null(&mut self) -> AvroResult<()> {
        Ok(())
    }

    /// A single byte, `0` or `1`.
    pub fn write_boolean(&mut self, value: bool) -> AvroResult<()> {
        self.write_raw(&[u8::from(value)])
    }

    /// Same encoding as [`write_long`](Self::write_long).
    pub fn write_int(&mut self, value: i32) -> AvroResult<()> {
        self.write_long(i64::from(value))
    }

    /// Zig-zag variable-length encoding, at most 10 bytes.
    pub fn write_long(&mut self, value: i64) -> AvroResult<()> {
        let mut n = ((value << 1) ^ (value >> 63)) as u64;
        let mut buf = [0u8; 10];
        let mut len = 0;
        while n & !0x7f != 0 {
            buf[len] = (n as u8 & 0x7f) | 0x80;
            n >>= 7;
            len += 1;
        }
        buf[len] = n as u8;
        self.write_raw(&buf[..=len])
    }

    /// 4 bytes, little-endian IEEE 754.
    pub fn write_float(&mut self, value: f32) -> AvroResult<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// 8 bytes, little-endian IEEE 754.
    pub fn write_double(&mut self, value: f64) -> AvroResult<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// A long length followed by the bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> AvroResult<()> {
        self.write_long(value.len() as i64)?;
        self.write_raw(value)
    }

    /// Length-prefixed UTF-8.
    pub fn write_utf8(&mut self, value: &str) -> AvroResult<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> AvroResult<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }
}

/// Writes [`Value`]s according to a schema.
#[derive(Debug, Clone)]
pub struct DatumWriter {
    schema: Schema,
    names: Names,
}

impl DatumWriter {
    /// A writer for values of `schema`.
    pub fn new(schema: Schema) -> Self {
        let names = schema.names();
        Self { schema, names }
    }

    /// Encode `value` against the writer's schema.
    ///
    /// # Errors
    ///
    /// Returns [`AvroError::TypeMismatch`] when `value` does not fit the schema.
    pub fn write<W: Write>(&self, value: &Value, encoder: &mut BinaryEncoder<W>) -> AvroResult<()> {
        self.write_data(&self.schema, value, encoder)
    }

    /// Encode `value` against `schema`, which may be any part of the writer's
    /// schema.
    pub fn write_data<W: Write>(
        &self,
        schema: &Schema,
        value: &Value,
        encoder: &mut BinaryEncoder<W>,
    ) -> AvroResult<()> {
        match (schema, value) {
            (Schema::Ref(_), _) => self.write_data(self.names.resolve(schema)?, value, encoder),
            (Schema::Union(branches), Value::Union { index, value }) => {
                let branch = branches.get(*index).ok_or_else(|| {
                    AvroError::resolution(
                        format!(
                            "Can't access branch index {index} for union with {} branches",
                            branches.len()
                        ),
                        schema,
                    )
                })?;
                encoder.write_long(*index as i64)?;
                self.write_data(branch, value, encoder)
            }
            (Schema::Union(branches), plain) => {
                let index = branches
                    .iter()
                    .position(|b| self.accepts(b, plain))
                    .ok_or_else(|| mismatch(schema, plain))?;
                encoder.write_long(index as i64)?;
                self.write_data(&branches[index], plain, encoder)
            }
            (_, Value::Union { value, .. }) => self.write_data(schema, value, encoder),
            (Schema::Null, Value::Null) => encoder.write_null(),
            (Schema::Boolean, Value::Boolean(b)) => encoder.write_boolean(*b),
            (Schema::Int, Value::Int(i)) => encoder.write_int(*i),
            (Schema::Long, Value::Long(l)) => encoder.write_long(*l),
            (Schema::Long, Value::Int(i)) => encoder.write_long(i64::from(*i)),
            (Schema::Float, Value::Float(f)) => encoder.write_float(*f),
            (Schema::Double, Value::Double(d)) => encoder.write_double(*d),
            (Schema::Bytes, Value::Bytes(b)) => encoder.write_bytes(b),
            (Schema::String, Value::String(s)) => encoder.write_utf8(s),
            (Schema::Fixed(fixed), Value::Fixed(bytes)) if bytes.len() == fixed.size => {
                encoder.write_raw(bytes)
            }
            (Schema::Enum(en), Value::Enum(symbol)) => {
                let index = en
                    .symbols
                    .iter()
                    .position(|s| s == symbol)
                    .ok_or_else(|| mismatch(schema, value))?;
                encoder.write_int(index as i32)
            }
            (Schema::Array(items), Value::Array(values)) => {
                if !values.is_empty() {
                    encoder.write_long(values.len() as i64)?;
                    for item in values {
                        self.write_data(items, item, encoder)?;
                    }
                }
                encoder.write_long(0)
            }
            (Schema::Map(values_schema), Value::Map(entries)) => {
                if !entries.is_empty() {
                    encoder.write_long(entries.len() as i64)?;
                    for (key, item) in entries {
                        encoder.write_utf8(key)?;
                        self.write_data(values_schema, item, encoder)?;
                    }
                }
                encoder.write_long(0)
            }
            (Schema::Record(record), Value::Record(fields)) => {
                for field in &record.fields {
                    let (_, field_value) = fields
                        .iter()
                        .find(|(name, _)| name == &field.name)
                        .ok_or_else(|| AvroError::TypeMismatch {
                            expected: format!("field '{}'", field.name),
                            found: "missing field".into(),
                        })?;
                    self.write_data(&field.schema, field_value, encoder)?;
                }
                Ok(())
            }
            _ => Err(mismatch(schema, value)),
        }
    }

    /// Whether `value` can be written with `schema` without an explicit
    /// union index.
    fn accepts(&self, schema: &Schema, value: &Value) -> bool {
        let schema = match self.names.resolve(schema) {
            Ok(s) => s,
            Err(_) => return false,
        };
        matches!(
            (schema, value),
            (Schema::Null, Value::Null)
                | (Schema::Boolean, Value::Boolean(_))
                | (Schema::Int, Value::Int(_))
                | (Schema::Long, Value::Long(_) | Value::Int(_))
                | (Schema::Float, Value::Float(_))
                | (Schema::Double, Value::Double(_))
                | (Schema::Bytes, Value::Bytes(_))
                | (Schema::String, Value::String(_))
                | (Schema::Fixed(_), Value::Fixed(_))
                | (Schema::Enum(_), Value::Enum(_))
                | (Schema::Array(_), Value::Array(_))
                | (Schema::Map(_), Value::Map(_))
                | (Schema::Record(_), Value::Record(_))
        )
    }
}

fn mismatch(schema: &Schema, value: &Value) -> AvroError {
    AvroError::TypeMismatch {
        expected: schema.kind().to_string(),
        found: value.kind().to_string(),
    }
}
