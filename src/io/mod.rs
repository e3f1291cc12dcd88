mod http;
mod local;

pub use http::HttpReader;
pub use local::LocalFileReader;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::debug;

/// Largest single read issued by [`read_all`].
const READ_CHUNK: usize = 1024 * 1024;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Load a whole source into memory.
///
/// GAR records can only be found by walking the file from the front, so
/// the decoder always works on the complete buffer.
pub async fn read_all<R: ReadAt + ?Sized>(reader: &R) -> Result<Vec<u8>> {
    let size = usize::try_from(reader.size())?;
    let mut data = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
        let end = (filled + READ_CHUNK).min(size);
        let n = reader.read_at(filled as u64, &mut data[filled..end]).await?;
        if n == 0 {
            bail!("Source ended after {filled} of {size} bytes");
        }
        filled += n;
    }

    debug!(size, "loaded source into memory");
    Ok(data)
}
