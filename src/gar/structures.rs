use std::ops::Range;

use super::cursor::ByteCursor;
use super::error::{GarError, GarResult};
use super::inflate::PrefixOrder;
use super::keystream::{Calibration, KeyMode};

/// Container header - 4 bytes, `0xCABCAB` magic over a version byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u32,
    pub version: u8,
}

impl ContainerHeader {
    pub const MAGIC: u32 = 0xCABCAB;
    pub const VERSION: u8 = 1;
    pub const SIZE: usize = 4;

    pub fn from_word(word: u32) -> Self {
        Self {
            magic: word >> 8,
            version: (word & 0xff) as u8,
        }
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> GarResult<Self> {
        let header = Self::from_word(cursor.read_u32_be()?);
        if header.magic != Self::MAGIC {
            return Err(GarError::BadMagic(header.magic));
        }
        if header.version != Self::VERSION {
            return Err(GarError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }
}

/// Compression methods named by the payload envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Deflate => 1,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Payload envelope - 12 bytes in clear at the start of every record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub header_length: u16,
    pub compression_method: CompressionMethod,
    /// Monotonic pseudo-timestamp; doubles as the keystream seed.
    pub checksum: u32,
    pub uncompressed_length: u32,
}

impl EnvelopeHeader {
    pub const SIZE: usize = 12;

    pub fn read(cursor: &mut ByteCursor<'_>) -> GarResult<Self> {
        let header_length = cursor.read_u16_be()?;
        let method = cursor.read_u16_be()?;
        if header_length as usize != Self::SIZE || method != 1 {
            return Err(GarError::UnsupportedEnvelope {
                header_length,
                compression_method: method,
            });
        }

        Ok(Self {
            header_length,
            compression_method: CompressionMethod::from_u16(method),
            checksum: cursor.read_u32_be()?,
            uncompressed_length: cursor.read_u32_be()?,
        })
    }
}

/// One record as laid out in the container, borrowed from its buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    /// Position in the container, starting at 0.
    pub index: usize,
    /// Offset of the record's `filename_length` field.
    pub offset: u64,
    pub raw_filename: &'a [u8],
    pub compressed_length: u32,
    pub payload: &'a [u8],
    /// Offset of the first payload byte.
    pub payload_offset: u64,
}

impl RawRecord<'_> {
    /// Filename decoded for display; invalid UTF-8 is replaced.
    pub fn filename(&self) -> String {
        String::from_utf8_lossy(self.raw_filename).to_string()
    }

    pub fn envelope(&self) -> GarResult<EnvelopeHeader> {
        let mut cursor = ByteCursor::with_base(self.payload, self.payload_offset);
        EnvelopeHeader::read(&mut cursor)
    }

    pub fn span(&self) -> RecordSpan {
        let start = self.payload_offset as usize;
        let name_start = self.offset as usize + 4;
        RecordSpan {
            index: self.index,
            offset: self.offset,
            filename: name_start..name_start + self.raw_filename.len(),
            payload: start..start + self.payload.len(),
        }
    }

    /// Metadata available without decoding the body.
    pub fn info(&self) -> GarResult<RecordInfo> {
        let envelope = self
            .envelope()
            .map_err(|e| e.in_record(self.index, &self.filename()))?;
        Ok(RecordInfo {
            index: self.index,
            offset: self.offset,
            filename: self.filename(),
            compressed_length: self.compressed_length,
            envelope,
        })
    }
}

/// Byte ranges of a record inside its container buffer.
///
/// Spans let a caller find every record boundary in one sequential pass
/// and then decode records independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpan {
    pub index: usize,
    pub offset: u64,
    pub filename: Range<usize>,
    pub payload: Range<usize>,
}

impl RecordSpan {
    /// Rebuild the borrowed record this span was taken from.
    ///
    /// Returns `None` if the span does not fit inside `buffer`.
    pub fn record<'a>(&self, buffer: &'a [u8]) -> Option<RawRecord<'a>> {
        let raw_filename = buffer.get(self.filename.clone())?;
        let payload = buffer.get(self.payload.clone())?;
        Some(RawRecord {
            index: self.index,
            offset: self.offset,
            raw_filename,
            compressed_length: u32::try_from(payload.len()).ok()?,
            payload,
            payload_offset: self.payload.start as u64,
        })
    }
}

/// Listing entry for a record whose body has not been decoded.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub index: usize,
    pub offset: u64,
    pub filename: String,
    pub compressed_length: u32,
    pub envelope: EnvelopeHeader,
}

/// A fully recovered embedded file.
#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub index: usize,
    pub offset: u64,
    pub filename: String,
    pub raw_filename: Vec<u8>,
    pub compressed_length: u32,
    /// Uncompressed length declared by the envelope.
    pub declared_length: u32,
    pub recovered_length: u32,
    pub contents: Vec<u8>,
    /// The envelope's checksum field; a pseudo-timestamp, never validated.
    pub envelope_checksum: u32,
    /// Keystream mapping that recovered this file.
    pub calibration: Calibration,
}

impl DecodedFile {
    /// Stored size as a percentage of the original size.
    pub fn ratio(&self) -> f64 {
        if self.declared_length == 0 {
            return 100.0;
        }
        100.0 * f64::from(self.compressed_length) / f64::from(self.declared_length)
    }
}

/// Default cap on a single recovered file.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Decoder settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub key_mode: KeyMode,
    /// Restrict probing to one length-prefix byte order.
    pub prefix_order: Option<PrefixOrder>,
    /// Refuse records declaring more than this many uncompressed bytes.
    pub max_file_size: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            key_mode: KeyMode::Auto,
            prefix_order: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl DecodeOptions {
    pub fn with_key_mode(mut self, key_mode: KeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }

    pub fn with_prefix_order(mut self, prefix_order: Option<PrefixOrder>) -> Self {
        self.prefix_order = prefix_order;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_word_splits_magic_and_version() {
        let header = ContainerHeader::from_word(0xCABCAB01);
        assert_eq!(header.magic, 0xCABCAB);
        assert_eq!(header.version, 1);
    }

    #[test]
    fn envelope_fields_are_big_endian() {
        let data = [
            0x00, 0x0c, 0x00, 0x01, 0x54, 0x80, 0x2a, 0x11, 0x00, 0x00, 0x01, 0x00,
        ];
        let envelope = EnvelopeHeader::read(&mut ByteCursor::new(&data)).unwrap();
        assert_eq!(envelope.header_length, 12);
        assert_eq!(envelope.compression_method, CompressionMethod::Deflate);
        assert_eq!(envelope.checksum, 0x5480_2a11);
        assert_eq!(envelope.uncompressed_length, 256);
    }

    #[test]
    fn envelope_rejects_other_methods_and_lengths() {
        for (header_length, method) in [(12u16, 2u16), (16, 1), (0, 0)] {
            let mut data = Vec::new();
            data.extend(header_length.to_be_bytes());
            data.extend(method.to_be_bytes());
            data.extend([0u8; 8]);
            let err = EnvelopeHeader::read(&mut ByteCursor::new(&data)).unwrap_err();
            assert!(matches!(
                err,
                GarError::UnsupportedEnvelope { header_length: h, compression_method: m }
                    if h == header_length && m == method
            ));
        }
    }

    #[test]
    fn span_round_trips_to_record() {
        let buffer: Vec<u8> = (0..40).collect();
        let record = RawRecord {
            index: 2,
            offset: 10,
            raw_filename: &buffer[14..17],
            compressed_length: 5,
            payload: &buffer[21..26],
            payload_offset: 21,
        };
        let span = record.span();
        assert_eq!(span.filename, 14..17);
        assert_eq!(span.payload, 21..26);

        let back = span.record(&buffer).unwrap();
        assert_eq!(back.raw_filename, record.raw_filename);
        assert_eq!(back.payload, record.payload);
        assert_eq!(back.compressed_length, 5);
        assert!(span.record(&buffer[..20]).is_none());
    }
}
