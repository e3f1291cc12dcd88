//! GAR archive parsing and extraction.
//!
//! GAR is the container Seaward PAT testers use to import and export
//! filesets: typically one `.SSS` results file and a handful of JPEGs.
//!
//! ## Architecture
//!
//! - [`cursor`]: bounds-checked big-endian reader over the loaded buffer
//! - [`structures`]: header, envelope and record types
//! - [`parser`]: record walker and the per-record decode pipeline
//! - [`keystream`]: xorshift128 generator and per-record seeding
//! - [`cipher`]: the additive byte-wise obfuscation layer
//! - [`inflate`]: `qCompress` framing and zlib inflate with integrity checks
//! - [`extractor`]: high-level extraction API for end users
//!
//! ## GAR Format Overview
//!
//! ```text
//! u32 BE   0xCABCAB << 8 | version (1)
//! repeated until end of file:
//!   u32 BE   filename length, then filename bytes
//!   u32 BE   payload length, then payload:
//!     u16 BE   envelope length (12)
//!     u16 BE   compression method (1 = deflate)
//!     u32 BE   pseudo-timestamp ("checksum")
//!     u32 BE   uncompressed length
//!     ...      body, each byte plus one keystream byte (mod 256):
//!                u32      uncompressed length again
//!                ...      zlib stream
//! ```
//!
//! There is no end marker, record count, or whole-file checksum; the zlib
//! Adler-32 trailer is the only integrity check.
//!
//! ## Limitations
//!
//! - Read-only: there is no GAR writer
//! - No resynchronisation after a damaged record

pub mod cipher;
pub mod cursor;
mod error;
mod extractor;
pub mod inflate;
pub mod keystream;
mod parser;
mod structures;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{GarError, GarResult};
pub use extractor::GarExtractor;
pub use inflate::PrefixOrder;
pub use keystream::{
    Calibration, KeyMode, LengthSource, SeedCombine, SeedInputs, SeedScheme, SeedWord, Xorshift128,
};
pub use parser::{Container, Decoder, decode_files};
pub use structures::*;
