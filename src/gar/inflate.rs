//! Payload decompression.
//!
//! A deobfuscated body follows Qt's `qCompress` framing: a 4-byte copy of
//! the uncompressed length, then a zlib stream. The zlib header and Adler-32
//! trailer are checked here rather than by the inflater so that integrity
//! failures surface as [`GarError::ChecksumMismatch`] instead of a generic
//! backend error.

use std::fmt;
use std::str::FromStr;

use adler2::Adler32;
use flate2::{Decompress, FlushDecompress, Status};
use tracing::warn;

use super::cursor::ByteCursor;
use super::error::{GarError, GarResult};

/// Bytes of known plaintext at the start of every body: length prefix plus
/// the two zlib header bytes.
pub const PROBE_LEN: usize = 6;

/// Output chunk size for the inflate loop.
const INFLATE_CHUNK: usize = 32 * 1024;

/// Upper bound on the up-front output reservation, as a multiple of the
/// compressed stream length. Larger outputs grow as they are produced.
const RESERVE_RATIO: usize = 4;

/// Byte order of the `qCompress` length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefixOrder {
    #[default]
    Little,
    Big,
}

impl PrefixOrder {
    pub fn decode(self, bytes: [u8; 4]) -> u32 {
        match self {
            PrefixOrder::Little => u32::from_le_bytes(bytes),
            PrefixOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub fn encode(self, value: u32) -> [u8; 4] {
        match self {
            PrefixOrder::Little => value.to_le_bytes(),
            PrefixOrder::Big => value.to_be_bytes(),
        }
    }

    fn read(self, cursor: &mut ByteCursor<'_>) -> GarResult<u32> {
        match self {
            PrefixOrder::Little => cursor.read_u32_le(),
            PrefixOrder::Big => cursor.read_u32_be(),
        }
    }
}

impl FromStr for PrefixOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "le" | "little" => Ok(PrefixOrder::Little),
            "be" | "big" => Ok(PrefixOrder::Big),
            other => Err(format!("unknown byte order '{other}'")),
        }
    }
}

impl fmt::Display for PrefixOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOrder::Little => f.write_str("le"),
            PrefixOrder::Big => f.write_str("be"),
        }
    }
}

/// Validate a zlib CMF/FLG pair (RFC 1950 section 2.2).
///
/// Any failure is a [`GarError::ChecksumMismatch`] carrying the header word
/// as `actual` and `expected: 0`.
fn check_zlib_header(cmf: u8, flg: u8) -> GarResult<()> {
    let word = u16::from(cmf) << 8 | u16::from(flg);
    let deflate = cmf & 0x0f == 8 && cmf >> 4 <= 7;
    let no_dictionary = flg & 0x20 == 0;
    if word % 31 != 0 || !deflate || !no_dictionary {
        return Err(GarError::ChecksumMismatch {
            expected: 0,
            actual: u32::from(word),
        });
    }
    Ok(())
}

/// Whether `head` looks like the start of a body for a file of `declared` bytes.
pub fn plausible_body_head(head: &[u8], declared: u32, order: PrefixOrder) -> bool {
    if head.len() < PROBE_LEN {
        return false;
    }
    let prefix = order.decode([head[0], head[1], head[2], head[3]]);
    prefix == declared && check_zlib_header(head[4], head[5]).is_ok()
}

/// Inflate a deobfuscated body into exactly `declared` bytes.
///
/// `base` is the body's offset in the container, used only in error reports.
/// Output is capped at `declared`, so a stream that would grow past the
/// declared size stops early with [`GarError::LengthMismatch`].
pub fn inflate_body(
    body: &[u8],
    declared: u32,
    order: PrefixOrder,
    base: u64,
) -> GarResult<Vec<u8>> {
    let mut cursor = ByteCursor::with_base(body, base);

    let prefix = order.read(&mut cursor)?;
    if prefix != declared {
        return Err(GarError::LengthMismatch {
            declared: u64::from(declared),
            actual: u64::from(prefix),
        });
    }

    let header = cursor.read_bytes(2)?;
    check_zlib_header(header[0], header[1])?;

    let stream_base = cursor.offset();
    let stream = cursor.rest();
    let declared = declared as usize;

    let mut de = Decompress::new(false);
    let mut buf = vec![0u8; INFLATE_CHUNK.min(declared.max(1))];
    let mut out = Vec::with_capacity(declared.min(stream.len().saturating_mul(RESERVE_RATIO)));
    let mut adler = Adler32::new();
    let mut in_pos = 0usize;

    loop {
        let before_in = de.total_in();
        let before_out = de.total_out();

        let status = de
            .decompress(&stream[in_pos..], &mut buf, FlushDecompress::None)
            .map_err(|e| GarError::CorruptDeflate(e.to_string()))?;

        let consumed = (de.total_in() - before_in) as usize;
        let produced = (de.total_out() - before_out) as usize;
        in_pos += consumed;

        if produced != 0 {
            if out.len() + produced > declared {
                return Err(GarError::LengthMismatch {
                    declared: declared as u64,
                    actual: (out.len() + produced) as u64,
                });
            }
            adler.write_slice(&buf[..produced]);
            out.extend_from_slice(&buf[..produced]);
        }

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if consumed == 0 && produced == 0 {
                    if in_pos >= stream.len() {
                        return Err(GarError::TruncatedInput {
                            offset: stream_base + in_pos as u64,
                            needed: 1,
                            remaining: 0,
                        });
                    }
                    return Err(GarError::CorruptDeflate("inflate stalled".into()));
                }
            }
        }
    }

    let mut trailer = ByteCursor::with_base(&stream[in_pos..], stream_base + in_pos as u64);
    let expected = trailer.read_u32_be()?;
    let actual = adler.checksum();
    if expected != actual {
        return Err(GarError::ChecksumMismatch { expected, actual });
    }
    if !trailer.at_end() {
        warn!(
            trailing = trailer.remaining(),
            "ignoring bytes after zlib trailer"
        );
    }

    if out.len() != declared {
        return Err(GarError::LengthMismatch {
            declared: declared as u64,
            actual: out.len() as u64,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gar::test_utils::{qcompress, zlib};

    #[test]
    fn inflates_hundred_as() {
        let data = vec![b'A'; 100];
        for order in [PrefixOrder::Little, PrefixOrder::Big] {
            let body = qcompress(&data, order);
            assert_eq!(inflate_body(&body, 100, order, 0).unwrap(), data);
        }
    }

    #[test]
    fn empty_file() {
        let body = qcompress(b"", PrefixOrder::Little);
        assert!(inflate_body(&body, 0, PrefixOrder::Little, 0).unwrap().is_empty());
    }

    #[test]
    fn prefix_must_match_declared_length() {
        let body = qcompress(&[7u8; 50], PrefixOrder::Little);
        let err = inflate_body(&body, 51, PrefixOrder::Little, 0).unwrap_err();
        assert!(matches!(
            err,
            GarError::LengthMismatch {
                declared: 51,
                actual: 50
            }
        ));
    }

    #[test]
    fn stream_longer_than_declared_is_rejected() {
        let mut body = PrefixOrder::Little.encode(10).to_vec();
        body.extend(zlib(&[1u8; 20]));
        let err = inflate_body(&body, 10, PrefixOrder::Little, 0).unwrap_err();
        assert!(matches!(err, GarError::LengthMismatch { declared: 10, .. }));
    }

    #[test]
    fn stream_shorter_than_declared_is_rejected() {
        let mut body = PrefixOrder::Big.encode(30).to_vec();
        body.extend(zlib(&[1u8; 20]));
        let err = inflate_body(&body, 30, PrefixOrder::Big, 0).unwrap_err();
        assert!(matches!(
            err,
            GarError::LengthMismatch {
                declared: 30,
                actual: 20
            }
        ));
    }

    #[test]
    fn corrupted_trailer_is_checksum_mismatch() {
        let data = b"hello hello hello".to_vec();
        let mut body = qcompress(&data, PrefixOrder::Little);
        let last = body.len() - 1;
        body[last] ^= 0xff;
        let err = inflate_body(&body, data.len() as u32, PrefixOrder::Little, 0).unwrap_err();
        match err {
            GarError::ChecksumMismatch { expected, actual } => {
                assert_eq!(actual, adler2::adler32_slice(&data));
                assert_ne!(expected, actual);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_zlib_header_is_checksum_mismatch() {
        let mut body = qcompress(b"abc", PrefixOrder::Little);
        body[5] ^= 0x01;
        let err = inflate_body(&body, 3, PrefixOrder::Little, 0).unwrap_err();
        assert!(matches!(err, GarError::ChecksumMismatch { .. }));
    }

    #[test]
    fn non_deflate_header_is_checksum_mismatch() {
        // 0x7918 passes FCHECK but names compression method 9.
        for (cmf, flg) in [(0x79u8, 0x18u8), (0x88, 0x1c), (0x78, 0xbb)] {
            let mut body = PrefixOrder::Little.encode(3).to_vec();
            body.extend([cmf, flg]);
            body.extend(&zlib(b"abc")[2..]);
            let err = inflate_body(&body, 3, PrefixOrder::Little, 0).unwrap_err();
            match err {
                GarError::ChecksumMismatch { expected, actual } => {
                    assert_eq!(expected, 0);
                    assert_eq!(actual, u32::from(cmf) << 8 | u32::from(flg));
                }
                other => panic!("unexpected error for {cmf:#04x} {flg:#04x}: {other:?}"),
            }
        }
    }

    #[test]
    fn huge_declared_length_on_tiny_stream() {
        let mut body = PrefixOrder::Little.encode(u32::MAX).to_vec();
        body.extend(zlib(b"abc"));
        let err = inflate_body(&body, u32::MAX, PrefixOrder::Little, 0).unwrap_err();
        assert!(matches!(
            err,
            GarError::LengthMismatch {
                declared: 0xffff_ffff,
                actual: 3
            }
        ));
    }

    #[test]
    fn missing_trailer_is_truncated() {
        let data = vec![3u8; 64];
        let mut body = qcompress(&data, PrefixOrder::Little);
        body.truncate(body.len() - 4);
        let err = inflate_body(&body, 64, PrefixOrder::Little, 0).unwrap_err();
        assert!(matches!(err, GarError::TruncatedInput { needed: 4, .. }));
    }

    #[test]
    fn cut_stream_is_truncated() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
        let body = qcompress(&data, PrefixOrder::Little);
        let cut = &body[..body.len() / 2];
        let err = inflate_body(cut, data.len() as u32, PrefixOrder::Little, 0).unwrap_err();
        assert!(matches!(err, GarError::TruncatedInput { .. }));
    }

    #[test]
    fn body_head_probe() {
        let body = qcompress(b"xyz", PrefixOrder::Big);
        assert!(plausible_body_head(&body, 3, PrefixOrder::Big));
        assert!(!plausible_body_head(&body, 3, PrefixOrder::Little));
        assert!(!plausible_body_head(&body, 4, PrefixOrder::Big));
        assert!(!plausible_body_head(&body[..5], 3, PrefixOrder::Big));
    }

    #[test]
    fn parses_prefix_order() {
        assert_eq!("LE".parse::<PrefixOrder>(), Ok(PrefixOrder::Little));
        assert_eq!("big".parse::<PrefixOrder>(), Ok(PrefixOrder::Big));
        assert!("middle".parse::<PrefixOrder>().is_err());
    }
}
