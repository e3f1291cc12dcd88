use thiserror::Error;

/// Errors raised while decoding a GAR container.
///
/// Every variant is terminal: the format has no resync markers, so the
/// first failure ends the walk over the container.
#[derive(Debug, Error)]
pub enum GarError {
    /// The top 24 bits of the container header are not `0xCABCAB`.
    #[error("Not a GAR file (magic {0:#08x})")]
    BadMagic(u32),

    /// The container version byte is not one this crate understands.
    #[error("Unsupported GAR version: {0}")]
    UnsupportedVersion(u8),

    /// The buffer ran out in the middle of a field.
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput {
        offset: u64,
        needed: u64,
        remaining: u64,
    },

    /// The payload envelope header is not the 12-byte Deflate header.
    #[error(
        "Unsupported payload envelope (header length {header_length}, compression method {compression_method})"
    )]
    UnsupportedEnvelope {
        header_length: u16,
        compression_method: u16,
    },

    /// A declared length disagrees with the data it describes.
    #[error("Length mismatch: declared {declared} bytes, found {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    /// The zlib header check or the Adler-32 trailer did not validate.
    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The Deflate blocks themselves are malformed.
    #[error("Corrupt deflate stream: {0}")]
    CorruptDeflate(String),

    /// The envelope declares more output than the decoder is allowed to produce.
    #[error("Declared size {declared} exceeds the {limit}-byte limit")]
    FileTooLarge { declared: u64, limit: u64 },

    /// No seed scheme produced a plausible body for this record.
    #[error("Could not derive the keystream for \"{filename}\"")]
    KeystreamUnresolved { filename: String },

    /// A failure inside a specific record.
    #[error("Record {index} (\"{filename}\"): {source}")]
    Record {
        index: usize,
        filename: String,
        #[source]
        source: Box<GarError>,
    },
}

impl GarError {
    /// Attach the record position and name to an error raised while decoding it.
    pub(crate) fn in_record(self, index: usize, filename: &str) -> Self {
        match self {
            GarError::Record { .. } => self,
            other => GarError::Record {
                index,
                filename: filename.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, looking through any record context.
    pub fn kind(&self) -> &GarError {
        match self {
            GarError::Record { source, .. } => source.kind(),
            other => other,
        }
    }
}

pub type GarResult<T> = Result<T, GarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_context_is_not_nested() {
        let err = GarError::UnsupportedVersion(2)
            .in_record(3, "a.jpg")
            .in_record(4, "b.jpg");
        match &err {
            GarError::Record { index, filename, .. } => {
                assert_eq!(*index, 3);
                assert_eq!(filename, "a.jpg");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.kind(), GarError::UnsupportedVersion(2)));
    }

    #[test]
    fn messages_name_the_values() {
        let err = GarError::BadMagic(0xaaaaaa);
        assert_eq!(err.to_string(), "Not a GAR file (magic 0xaaaaaa)");

        let err = GarError::LengthMismatch {
            declared: 100,
            actual: 99,
        };
        assert_eq!(err.to_string(), "Length mismatch: declared 100 bytes, found 99");
    }
}
