use thiserror::Error;

/// Errors raised while parsing schemas or decoding and encoding Avro data.
///
/// A decode error is fatal for the value being read; no partial value is
/// returned.
#[derive(Error, Debug)]
pub enum AvroError {
    /// The source ended before the requested bytes could be read.
    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Invalid value for boolean: {0}")]
    InvalidBoolean(u8),

    /// A varint ran past 10 bytes and cannot fit in 64 bits.
    #[error("Invalid varint encoding")]
    InvalidVarint,

    /// A decoded `long` does not fit the `int` it was read as.
    #[error("Value {0} is out of range for int")]
    IntOutOfRange(i64),

    #[error("Negative length: {0}")]
    NegativeLength(i64),

    /// String bytes were not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// The data does not fit the writer schema (enum index or union branch
    /// out of range).
    #[error("{message}\nWriter's Schema: {writer_schema}")]
    SchemaResolution {
        message: String,
        writer_schema: String,
    },

    /// A named type reference that the schema never defines.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// The schema JSON is not a valid Avro schema.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A value does not match the schema it is being written with.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The object container file does not start with `Obj\x01`.
    #[error("Invalid magic bytes: expected 'Obj\\x01', found {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A data block did not end with the file's sync marker.
    #[error("Sync marker mismatch after block {block}")]
    SyncMismatch { block: usize },
}

/// Result type alias for Avro operations.
pub type AvroResult<T> = std::result::Result<T, AvroError>;

impl AvroError {
    pub(crate) fn resolution(message: impl Into<String>, writer_schema: &crate::Schema) -> Self {
        Self::SchemaResolution {
            message: message.into(),
            writer_schema: writer_schema.pretty_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Schema;

    #[test]
    fn resolution_error_includes_pretty_schema() {
        let schema = Schema::parse_str(r#"{"type": "enum", "name": "Color", "symbols": ["RED"]}"#)
            .unwrap();
        let err = AvroError::resolution("Can't access enum index 3", &schema);

        let text = err.to_string();
        assert!(text.starts_with("Can't access enum index 3"));
        assert!(text.contains("Writer's Schema"));
        assert!(text.contains("\"symbols\""));
        assert!(text.contains('\n'));
    }

    #[test]
    fn utf8_errors_convert() {
        let err: AvroError = String::from_utf8(vec![0xff]).unwrap_err().into();
        assert!(matches!(err, AvroError::Encoding(_)));
    }
}
