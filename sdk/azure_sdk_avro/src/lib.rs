//! # Azure SDK Avro
//!
//! Binary Avro decoding for Azure services that publish Avro data, such as
//! blob change feeds and query results.
//!
//! Decoding is driven by the writer schema. [`DatumReader`] reads a value
//! from a [`BinaryDecoder`] and can skip values while leaving the decoder
//! exactly where a read would. [`DataFileReader`] iterates the records of
//! an object container file. [`DatumWriter`] produces the same encoding.
//!
//! ```
//! use std::io::Cursor;
//! use azure_sdk_avro::{BinaryDecoder, DatumReader, Schema, Value};
//!
//! let schema = Schema::parse_str(r#"{"type": "array", "items": "int"}"#)?;
//! let mut decoder = BinaryDecoder::new(Cursor::new(vec![0x04, 0x02, 0x04, 0x00]));
//! let value = DatumReader::new(schema).read(&mut decoder)?;
//! assert_eq!(value, Value::Array(vec![Value::Int(1), Value::Int(2)]));
//! # Ok::<(), azure_sdk_avro::AvroError>(())
//! ```

pub mod datafile;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod reader;
pub mod schema;
pub mod value;

pub use datafile::DataFileReader;
pub use decoder::BinaryDecoder;
pub use encoder::{BinaryEncoder, DatumWriter};
pub use error::{AvroError, AvroResult};
pub use reader::DatumReader;
pub use schema::Schema;
pub use value::Value;
