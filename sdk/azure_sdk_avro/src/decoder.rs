//! Binary decoding of Avro primitives.
//!
//! `int` and `long` values use zig-zag varints: 7 data bits per byte, low
//! bits first, continuation in the high bit, then `(n >> 1) ^ -(n & 1)`.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{AvroError, AvroResult};

/// Reads Avro primitives from a seekable byte source.
#[derive(Debug)]
pub struct BinaryDecoder<R> {
    reader: R,
}

impl<R: Read + Seek> BinaryDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// `UnexpectedEof` when fewer than `n` bytes remain.
    pub fn read(&mut self, n: usize) -> AvroResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(n.min(64 * 1024));
        let read = (&mut self.reader).take(n as u64).read_to_end(&mut buf)?;
        if read != n {
            return Err(AvroError::UnexpectedEof);
        }
        Ok(buf)
    }

    fn read_byte(&mut self) -> AvroResult<u8> {
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte).map_err(eof)?;
        Ok(byte[0])
    }

    /// `null` occupies zero bytes.
    pub fn read_null(&mut self) -> AvroResult<()> {
        Ok(())
    }

    pub fn read_boolean(&mut self) -> AvroResult<bool> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AvroError::InvalidBoolean(other)),
        }
    }

    /// Read a `long` and narrow it to `i32`.
    pub fn read_int(&mut self) -> AvroResult<i32> {
        let value = self.read_long()?;
        i32::try_from(value).map_err(|_| AvroError::IntOutOfRange(value))
    }

    pub fn read_long(&mut self) -> AvroResult<i64> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_byte()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 64 {
                return Err(AvroError::InvalidVarint);
            }
        }
        Ok(((result >> 1) as i64) ^ -((result & 1) as i64))
    }

    pub fn read_float(&mut self) -> AvroResult<f32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf).map_err(eof)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_double(&mut self) -> AvroResult<f64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf).map_err(eof)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// A `long` length followed by that many bytes.
    pub fn read_bytes(&mut self) -> AvroResult<Vec<u8>> {
        let len = self.read_length()?;
        self.read(len)
    }

    pub fn read_utf8(&mut self) -> AvroResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|err| {
            tracing::error!(error = %err, "invalid UTF-8 in Avro string");
            AvroError::Encoding(err)
        })
    }

    pub fn skip_null(&mut self) -> AvroResult<()> {
        Ok(())
    }

    pub fn skip_boolean(&mut self) -> AvroResult<()> {
        self.skip(1)
    }

    pub fn skip_int(&mut self) -> AvroResult<()> {
        self.skip_long()
    }

    pub fn skip_long(&mut self) -> AvroResult<()> {
        self.read_long().map(drop)
    }

    pub fn skip_float(&mut self) -> AvroResult<()> {
        self.skip(4)
    }

    pub fn skip_double(&mut self) -> AvroResult<()> {
        self.skip(8)
    }

    pub fn skip_bytes(&mut self) -> AvroResult<()> {
        let len = self.read_long()?;
        if len < 0 {
            return Err(AvroError::NegativeLength(len));
        }
        self.skip(len)
    }

    pub fn skip_utf8(&mut self) -> AvroResult<()> {
        self.skip_bytes()
    }

    /// Move forward `n` bytes without reading them.
    pub fn skip(&mut self, n: i64) -> AvroResult<()> {
        self.reader.seek(SeekFrom::Current(n))?;
        Ok(())
    }

    /// Current position in the source.
    pub fn tell(&mut self) -> AvroResult<u64> {
        Ok(self.reader.stream_position()?)
    }

    fn read_length(&mut self) -> AvroResult<usize> {
        let len = self.read_long()?;
        usize::try_from(len).map_err(|_| AvroError::NegativeLength(len))
    }
}

fn eof(err: std::io::Error) -> AvroError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        AvroError::UnexpectedEof
    } else {
        AvroError::Io(err)
    }
}
