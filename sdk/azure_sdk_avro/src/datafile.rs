//! Avro object container files.
//!
//! A file is the magic bytes `Obj\x01`, a metadata map holding the writer
//! schema (`avro.schema`) and codec (`avro.codec`), a 16-byte sync marker,
//! then data blocks of `(count, size, payload, sync)`.

use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::decoder::BinaryDecoder;
use crate::error::{AvroError, AvroResult};
use crate::reader::DatumReader;
use crate::schema::Schema;
use crate::value::Value;

/// Identifies an object container file.
pub const AVRO_MAGIC: [u8; 4] = [b'O', b'b', b'j', 0x01];

/// Length of the marker that ends the header and every block.
pub const SYNC_SIZE: usize = 16;

/// Metadata key holding the writer schema as JSON.
pub const SCHEMA_KEY: &str = "avro.schema";
/// Metadata key naming the block compression codec.
pub const CODEC_KEY: &str = "avro.codec";

/// Iterates the records of an object container file.
///
/// Only the `null` codec is supported. A block's sync marker is checked
/// when the block after it is requested, so every record of a block is
/// yielded before a corrupt marker is reported.
pub struct DataFileReader<R> {
    decoder: BinaryDecoder<R>,
    datum_reader: DatumReader,
    metadata: HashMap<String, Vec<u8>>,
    sync_marker: [u8; SYNC_SIZE],
    remaining_in_block: u64,
    sync_pending: bool,
    block: usize,
    done: bool,
}

impl<R: Read + Seek> DataFileReader<R> {
    /// Read the file header.
    ///
    /// # Errors
    ///
    /// - `InvalidMagic` if the file does not start with `Obj\x01`
    /// - `MissingMetadata` if the header has no `avro.schema`
    /// - `UnsupportedCodec` for any codec other than `null`
    pub fn new(reader: R) -> AvroResult<Self> {
        let mut decoder = BinaryDecoder::new(reader);

        let magic = decoder.read(AVRO_MAGIC.len())?;
        if magic != AVRO_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&magic);
            return Err(AvroError::InvalidMagic(found));
        }

        let metadata = read_metadata(&mut decoder)?;

        let schema_bytes = metadata
            .get(SCHEMA_KEY)
            .ok_or_else(|| AvroError::MissingMetadata(SCHEMA_KEY.to_string()))?;
        let schema = Schema::parse_str(&String::from_utf8(schema_bytes.clone())?)?;

        match metadata.get(CODEC_KEY).map(|c| String::from_utf8_lossy(c)) {
            None => {}
            Some(codec) if codec == "null" => {}
            Some(codec) => return Err(AvroError::UnsupportedCodec(codec.into_owned())),
        }

        let mut sync_marker = [0u8; SYNC_SIZE];
        sync_marker.copy_from_slice(&decoder.read(SYNC_SIZE)?);

        tracing::debug!(
            schema = %schema.kind(),
            metadata_keys = metadata.len(),
            "opened Avro container"
        );

        Ok(Self {
            decoder,
            datum_reader: DatumReader::new(schema),
            metadata,
            sync_marker,
            remaining_in_block: 0,
            sync_pending: false,
            block: 0,
            done: false,
        })
    }

    /// The writer schema from the header.
    pub fn schema(&self) -> &Schema {
        self.datum_reader.writer_schema()
    }

    /// Raw header metadata for `key`.
    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.metadata.get(key).map(Vec::as_slice)
    }

    /// The marker every block must end with.
    pub fn sync_marker(&self) -> &[u8; SYNC_SIZE] {
        &self.sync_marker
    }

    /// Start the next block. `false` at a clean end of file.
    fn next_block(&mut self) -> AvroResult<bool> {
        loop {
            let start = self.decoder.tell()?;
            let count = match self.decoder.read_long() {
                Ok(count) => count,
                Err(AvroError::UnexpectedEof) => {
                    if self.decoder.tell()? == start {
                        return Ok(false);
                    }
                    return Err(AvroError::UnexpectedEof);
                }
                Err(err) => return Err(err),
            };
            let size = self.decoder.read_long()?;
            if count < 0 {
                return Err(AvroError::NegativeLength(count));
            }
            if size < 0 {
                return Err(AvroError::NegativeLength(size));
            }
            self.block += 1;
            tracing::trace!(block = self.block, count, size, "reading Avro block");
            if count > 0 {
                self.remaining_in_block = count as u64;
                return Ok(true);
            }
            // Empty block still ends with a sync marker.
            self.check_sync()?;
        }
    }

    fn check_sync(&mut self) -> AvroResult<()> {
        let sync = self.decoder.read(SYNC_SIZE)?;
        if sync != self.sync_marker {
            return Err(AvroError::SyncMismatch { block: self.block });
        }
        Ok(())
    }

    fn next_record(&mut self) -> AvroResult<Option<Value>> {
        if self.remaining_in_block == 0 {
            if self.sync_pending {
                self.sync_pending = false;
                self.check_sync()?;
            }
            if !self.next_block()? {
                return Ok(None);
            }
        }
        let value = self.datum_reader.read(&mut self.decoder)?;
        self.remaining_in_block -= 1;
        self.sync_pending = self.remaining_in_block == 0;
        Ok(Some(value))
    }
}

impl<R: Read + Seek> Iterator for DataFileReader<R> {
    type Item = AvroResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<R> std::fmt::Debug for DataFileReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFileReader")
            .field("schema", self.datum_reader.writer_schema())
            .field("block", &self.block)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

fn read_metadata<R: Read + Seek>(decoder: &mut BinaryDecoder<R>) -> AvroResult<HashMap<String, Vec<u8>>> {
    let mut metadata = HashMap::new();
    loop {
        let count = decoder.read_long()?;
        if count == 0 {
            return Ok(metadata);
        }
        if count < 0 {
            decoder.read_long()?;
        }
        for _ in 0..count.unsigned_abs() {
            let key = decoder.read_utf8()?;
            let value = decoder.read_bytes()?;
            metadata.insert(key, value);
        }
    }
}
