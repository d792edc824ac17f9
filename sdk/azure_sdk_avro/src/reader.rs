//! Writer-schema driven datum reading.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use crate::decoder::BinaryDecoder;
use crate::error::{AvroError, AvroResult};
use crate::schema::{EnumSchema, Names, RecordSchema, Schema};
use crate::value::Value;

/// Reads values written with a known schema.
///
/// # Example
/// ```
/// use std::io::Cursor;
/// use azure_sdk_avro::{BinaryDecoder, DatumReader, Schema, Value};
///
/// let reader = DatumReader::new(Schema::parse_str(r#"["null", "string"]"#).unwrap());
/// let mut decoder = BinaryDecoder::new(Cursor::new(vec![0x02, 0x08, b't', b'e', b's', b't']));
/// let value = reader.read(&mut decoder).unwrap();
/// assert_eq!(value, Value::union(1, Value::String("test".into())));
/// ```
#[derive(Debug, Clone)]
pub struct DatumReader {
    writer_schema: Schema,
    names: Names,
}

impl DatumReader {
    pub fn new(writer_schema: Schema) -> Self {
        let names = writer_schema.names();
        Self {
            writer_schema,
            names,
        }
    }

    pub fn writer_schema(&self) -> &Schema {
        &self.writer_schema
    }

    /// Read one datum with the writer schema.
    pub fn read<R: Read + Seek>(&self, decoder: &mut BinaryDecoder<R>) -> AvroResult<Value> {
        self.read_data(&self.writer_schema, decoder)
    }

    /// Skip one datum, leaving the decoder where [`read`](Self::read)
    /// would have.
    pub fn skip<R: Read + Seek>(&self, decoder: &mut BinaryDecoder<R>) -> AvroResult<()> {
        self.skip_data(&self.writer_schema, decoder)
    }

    pub fn read_data<R: Read + Seek>(
        &self,
        schema: &Schema,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<Value> {
        Ok(match schema {
            Schema::Null => {
                decoder.read_null()?;
                Value::Null
            }
            Schema::Boolean => Value::Boolean(decoder.read_boolean()?),
            Schema::Int => Value::Int(decoder.read_int()?),
            Schema::Long => Value::Long(decoder.read_long()?),
            Schema::Float => Value::Float(decoder.read_float()?),
            Schema::Double => Value::Double(decoder.read_double()?),
            Schema::Bytes => Value::Bytes(decoder.read_bytes()?),
            Schema::String => Value::String(decoder.read_utf8()?),
            Schema::Fixed(fixed) => Value::Fixed(decoder.read(fixed.size)?),
            Schema::Enum(en) => self.read_enum(schema, en, decoder)?,
            Schema::Array(items) => self.read_array(items, decoder)?,
            Schema::Map(values) => self.read_map(values, decoder)?,
            Schema::Union(branches) => self.read_union(schema, branches, decoder)?,
            Schema::Record(record) => self.read_record(record, decoder)?,
            Schema::Ref(_) => {
                let resolved = self.names.resolve(schema)?;
                self.read_data(resolved, decoder)?
            }
        })
    }

    pub fn skip_data<R: Read + Seek>(
        &self,
        schema: &Schema,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<()> {
        match schema {
            Schema::Null => decoder.skip_null(),
            Schema::Boolean => decoder.skip_boolean(),
            Schema::Int => decoder.skip_int(),
            Schema::Long => decoder.skip_long(),
            Schema::Float => decoder.skip_float(),
            Schema::Double => decoder.skip_double(),
            Schema::Bytes => decoder.skip_bytes(),
            Schema::String => decoder.skip_utf8(),
            Schema::Fixed(fixed) => decoder.skip(fixed.size as i64),
            Schema::Enum(_) => decoder.skip_int(),
            Schema::Array(items) => self.skip_blocks(decoder, |decoder| self.skip_data(items, decoder)),
            Schema::Map(values) => self.skip_blocks(decoder, |decoder| {
                decoder.skip_utf8()?;
                self.skip_data(values, decoder)
            }),
            Schema::Union(branches) => {
                let index = self.union_branch(schema, branches.len(), decoder)?;
                self.skip_data(&branches[index], decoder)
            }
            Schema::Record(record) => record
                .fields
                .iter()
                .try_for_each(|field| self.skip_data(&field.schema, decoder)),
            Schema::Ref(_) => {
                let resolved = self.names.resolve(schema)?;
                self.skip_data(resolved, decoder)
            }
        }
    }

    fn read_enum<R: Read + Seek>(
        &self,
        schema: &Schema,
        en: &EnumSchema,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<Value> {
        // Written as an int, but any out-of-range index is a resolution error.
        let index = decoder.read_long()?;
        usize::try_from(index)
            .ok()
            .and_then(|i| en.symbols.get(i))
            .map(|symbol| Value::Enum(symbol.clone()))
            .ok_or_else(|| {
                AvroError::resolution(
                    format!(
                        "Can't access enum index {index} for enum with {} symbols",
                        en.symbols.len()
                    ),
                    schema,
                )
            })
    }

    fn read_array<R: Read + Seek>(
        &self,
        items: &Schema,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<Value> {
        let mut out = Vec::new();
        while let Some(count) = block_count(decoder)? {
            out.reserve(count.min(1024));
            for _ in 0..count {
                out.push(self.read_data(items, decoder)?);
            }
        }
        Ok(Value::Array(out))
    }

    fn read_map<R: Read + Seek>(
        &self,
        values: &Schema,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<Value> {
        let mut out = BTreeMap::new();
        while let Some(count) = block_count(decoder)? {
            for _ in 0..count {
                let key = decoder.read_utf8()?;
                let value = self.read_data(values, decoder)?;
                out.insert(key, value);
            }
        }
        Ok(Value::Map(out))
    }

    fn read_union<R: Read + Seek>(
        &self,
        schema: &Schema,
        branches: &[Schema],
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<Value> {
        let index = self.union_branch(schema, branches.len(), decoder)?;
        let value = self.read_data(&branches[index], decoder)?;
        Ok(Value::union(index, value))
    }

    fn read_record<R: Read + Seek>(
        &self,
        record: &RecordSchema,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<Value> {
        let fields = record
            .fields
            .iter()
            .map(|field| Ok((field.name.clone(), self.read_data(&field.schema, decoder)?)))
            .collect::<AvroResult<Vec<_>>>()?;
        Ok(Value::Record(fields))
    }

    fn union_branch<R: Read + Seek>(
        &self,
        schema: &Schema,
        branch_count: usize,
        decoder: &mut BinaryDecoder<R>,
    ) -> AvroResult<usize> {
        let index = decoder.read_long()?;
        usize::try_from(index)
            .ok()
            .filter(|i| *i < branch_count)
            .ok_or_else(|| {
                AvroError::resolution(
                    format!(
                        "Can't access branch index {index} for union with {branch_count} branches"
                    ),
                    schema,
                )
            })
    }

    /// Skip array or map blocks. A block written with a negative count
    /// carries its byte size, so it is skipped in one seek.
    fn skip_blocks<R, F>(&self, decoder: &mut BinaryDecoder<R>, mut skip_item: F) -> AvroResult<()>
    where
        R: Read + Seek,
        F: FnMut(&mut BinaryDecoder<R>) -> AvroResult<()>,
    {
        loop {
            let count = decoder.read_long()?;
            if count == 0 {
                return Ok(());
            }
            if count < 0 {
                let size = decoder.read_long()?;
                if size < 0 {
                    return Err(AvroError::NegativeLength(size));
                }
                decoder.skip(size)?;
            } else {
                for _ in 0..count {
                    skip_item(decoder)?;
                }
            }
        }
    }
}

/// Read the next block header. `None` marks the end of the blocks; a
/// negative count is followed by a byte size that reading ignores.
fn block_count<R: Read + Seek>(decoder: &mut BinaryDecoder<R>) -> AvroResult<Option<usize>> {
    let count = decoder.read_long()?;
    if count == 0 {
        return Ok(None);
    }
    if count < 0 {
        decoder.read_long()?;
    }
    Ok(Some(count.unsigned_abs() as usize))
}
