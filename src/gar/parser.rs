//! GAR container walker and per-record decode pipeline.
//!
//! ## Parsing Strategy
//!
//! A GAR file has no directory, record count, or end marker. The parser
//! reads the 4-byte header once and then takes records one at a time until
//! fewer than 4 bytes are left:
//!
//! 1. `filename_length` (u32 BE) and the filename bytes
//! 2. `compressed_length` (u32 BE) and that many payload bytes
//!
//! Every boundary depends on the previous length field being right, so
//! the first malformed record ends the walk.
//!
//! Decoding a record reads the clear envelope at the start of its payload,
//! recovers the keystream, deobfuscates the body and inflates it.

use tracing::{debug, warn};

use super::cipher;
use super::cursor::ByteCursor;
use super::error::{GarError, GarResult};
use super::inflate::inflate_body;
use super::keystream::{Calibration, KeyMode, SeedInputs};
use super::structures::*;

/// A GAR container being walked record by record.
///
/// Iterating yields `Result<RawRecord>`; after the first error the
/// iterator is exhausted.
#[derive(Debug, Clone)]
pub struct Container<'a> {
    cursor: ByteCursor<'a>,
    header: ContainerHeader,
    next_index: usize,
    poisoned: bool,
}

impl<'a> Container<'a> {
    /// Validate the header and position the walk at the first record.
    ///
    /// # Errors
    ///
    /// [`GarError::BadMagic`], [`GarError::UnsupportedVersion`], or
    /// [`GarError::TruncatedInput`] when the buffer is shorter than a header.
    pub fn open(buffer: &'a [u8]) -> GarResult<Self> {
        let mut cursor = ByteCursor::new(buffer);
        let header = ContainerHeader::read(&mut cursor)?;
        debug!(version = header.version, size = buffer.len(), "opened GAR container");
        Ok(Self {
            cursor,
            header,
            next_index: 0,
            poisoned: false,
        })
    }

    pub fn header(&self) -> ContainerHeader {
        self.header
    }

    /// Read the next record, or `None` once the container is exhausted.
    ///
    /// Fewer than 4 remaining bytes means there are no more records. A
    /// record cut short anywhere after its first field is an error, and no
    /// partial record is returned.
    pub fn next_record(&mut self) -> GarResult<Option<RawRecord<'a>>> {
        if self.poisoned {
            return Ok(None);
        }
        if self.cursor.remaining() < 4 {
            if !self.cursor.at_end() {
                warn!(
                    offset = self.cursor.offset(),
                    trailing = self.cursor.remaining(),
                    "ignoring trailing bytes after last record"
                );
            }
            return Ok(None);
        }

        let result = self.read_record();
        if result.is_err() {
            self.poisoned = true;
        }
        result.map(Some)
    }

    fn read_record(&mut self) -> GarResult<RawRecord<'a>> {
        let index = self.next_index;
        let offset = self.cursor.offset();

        let filename_length = self.cursor.read_u32_be()? as usize;
        let raw_filename = self.cursor.read_bytes(filename_length)?;
        let compressed_length = self.cursor.read_u32_be()?;
        let payload_offset = self.cursor.offset();
        let payload = self.cursor.read_bytes(compressed_length as usize)?;

        self.next_index += 1;
        let record = RawRecord {
            index,
            offset,
            raw_filename,
            compressed_length,
            payload,
            payload_offset,
        };
        debug!(
            index,
            offset,
            filename = %record.filename(),
            compressed_length,
            "read GAR record"
        );
        Ok(record)
    }

    /// Find every record boundary without decoding anything.
    pub fn spans(mut self) -> GarResult<Vec<RecordSpan>> {
        let mut spans = Vec::new();
        while let Some(record) = self.next_record()? {
            spans.push(record.span());
        }
        Ok(spans)
    }

    /// Metadata for every record, read from the clear envelopes only.
    pub fn infos(mut self) -> GarResult<Vec<RecordInfo>> {
        let mut infos = Vec::new();
        while let Some(record) = self.next_record()? {
            infos.push(record.info()?);
        }
        Ok(infos)
    }
}

impl<'a> Iterator for Container<'a> {
    type Item = GarResult<RawRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

impl RawRecord<'_> {
    /// Recover this record's file.
    pub fn decode(&self, options: &DecodeOptions) -> GarResult<DecodedFile> {
        self.decode_with_hint(options, None)
    }

    /// Recover this record's file, trying `hint` before other calibrations.
    pub fn decode_with_hint(
        &self,
        options: &DecodeOptions,
        hint: Option<Calibration>,
    ) -> GarResult<DecodedFile> {
        let filename = self.filename();
        self.decode_inner(&filename, options, hint)
            .map_err(|e| e.in_record(self.index, &filename))
    }

    fn decode_inner(
        &self,
        filename: &str,
        options: &DecodeOptions,
        hint: Option<Calibration>,
    ) -> GarResult<DecodedFile> {
        let mut cursor = ByteCursor::with_base(self.payload, self.payload_offset);
        let envelope = EnvelopeHeader::read(&mut cursor)?;

        if u64::from(envelope.uncompressed_length) > options.max_file_size {
            return Err(GarError::FileTooLarge {
                declared: u64::from(envelope.uncompressed_length),
                limit: options.max_file_size,
            });
        }

        let body_offset = cursor.offset();
        let body = cursor.rest();
        let inputs = SeedInputs {
            timestamp: envelope.checksum,
            uncompressed_length: envelope.uncompressed_length,
            compressed_length: self.compressed_length,
            body_length: body.len() as u32,
        };

        let calibration = match options.key_mode {
            KeyMode::Fixed(calibration) => calibration,
            KeyMode::Auto => Calibration::probe(&inputs, body, hint, options.prefix_order)
                .ok_or_else(|| GarError::KeystreamUnresolved {
                    filename: filename.to_string(),
                })?,
        };

        let plain = cipher::deobfuscate(body, &mut calibration.scheme.seed(&inputs));
        let contents = inflate_body(
            &plain,
            envelope.uncompressed_length,
            calibration.prefix_order,
            body_offset,
        )?;

        debug!(
            index = self.index,
            filename,
            declared = envelope.uncompressed_length,
            %calibration,
            "decoded GAR record"
        );

        Ok(DecodedFile {
            index: self.index,
            offset: self.offset,
            filename: filename.to_string(),
            raw_filename: self.raw_filename.to_vec(),
            compressed_length: self.compressed_length,
            declared_length: envelope.uncompressed_length,
            recovered_length: contents.len() as u32,
            contents,
            envelope_checksum: envelope.checksum,
            calibration,
        })
    }
}

/// Lazy decoder over a container's records.
///
/// Remembers the last calibration that worked so records written by the
/// same device skip the full probe. Stops after the first error.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    container: Container<'a>,
    options: DecodeOptions,
    hint: Option<Calibration>,
    failed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(container: Container<'a>, options: DecodeOptions) -> Self {
        Self {
            container,
            options,
            hint: None,
            failed: false,
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = GarResult<DecodedFile>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.container.next_record() {
            Ok(Some(record)) => record.decode_with_hint(&self.options, self.hint),
            Ok(None) => return None,
            Err(e) => Err(e),
        };
        match &result {
            Ok(file) => self.hint = Some(file.calibration),
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

/// Open `buffer` and decode its records lazily.
///
/// # Example
///
/// ```no_run
/// use rungar::gar::{DecodeOptions, decode_files};
///
/// let data = std::fs::read("export.GAR")?;
/// for file in decode_files(&data, DecodeOptions::default())? {
///     let file = file?;
///     println!("{}: {} bytes", file.filename, file.recovered_length);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn decode_files(buffer: &[u8], options: DecodeOptions) -> GarResult<Decoder<'_>> {
    Ok(Decoder::new(Container::open(buffer)?, options))
}
