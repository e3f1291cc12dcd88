//! # rungar
//!
//! A Rust extractor for Seaward GAR archives, with HTTP URL support.
//!
//! GAR files bundle the results of a PAT (portable appliance testing)
//! session: a structured `.SSS` file and any JPEG photos. Each embedded
//! file is zlib-compressed and then obscured with an additive keystream
//! from a per-record seeded xorshift generator. This crate walks the
//! container, recovers the keystream, and inflates each file.
//!
//! ## Features
//!
//! - Decode GAR files from the local filesystem or HTTP/HTTPS URLs
//! - Lazy, record-at-a-time decoding with strict length and Adler-32 checks
//! - Automatic keystream calibration against each body's known plaintext
//! - Concurrent decoding of independent records
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rungar::{GarExtractor, LocalFileReader};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new("export.GAR".as_ref())?);
//!     let extractor = GarExtractor::new(reader);
//!
//!     for file in extractor.extract_all().await? {
//!         println!("{}: {} bytes", file.filename, file.recovered_length);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod gar;
pub mod io;

pub use cli::Cli;
pub use gar::{DecodeOptions, DecodedFile, GarError, GarExtractor, decode_files};
pub use io::{HttpReader, LocalFileReader, ReadAt};
