use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::ReadAt;
use anyhow::{Result, anyhow, bail};

/// HTTP reader for remote GAR files
///
/// Uses Range requests when the server advertises them; otherwise the
/// whole body is fetched once on first read and served from memory.
pub struct HttpReader {
    client: Client,
    url: String,
    size: u64,
    ranged: bool,
    body: OnceCell<Vec<u8>>,
    max_retry: u32,
}

impl HttpReader {
    /// Create a new HTTP reader
    ///
    /// This sends a HEAD request to learn the file size and whether Range
    /// requests are supported
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Self::with_client(client, url).await
    }

    /// Like [`HttpReader::new`], with a caller-configured client.
    pub async fn with_client(client: Client, url: String) -> Result<Self> {
        let resp = client.head(&url).send().await?;
        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        let ranged = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Remote server did not return Content-Length"))?;

        debug!(%url, size, ranged, "opened remote GAR");

        Ok(Self {
            client,
            url,
            size,
            ranged,
            body: OnceCell::new(),
            max_retry: 10,
        })
    }

    /// GET the URL (optionally one byte range), retrying timeouts and connection errors.
    async fn send_with_retry(&self, range: Option<&str>) -> Result<reqwest::Response> {
        let mut retry_count = 0;
        loop {
            let mut request = self.client.get(&self.url);
            if let Some(range) = range {
                request = request.header("Range", range);
            }

            match request.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded");
                    }
                    warn!(retry_count, max_retry = self.max_retry, error = %e, "connection error, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn whole_body(&self) -> Result<&[u8]> {
        let body = self
            .body
            .get_or_try_init(|| async {
                let resp = self.send_with_retry(None).await?;
                if !resp.status().is_success() {
                    bail!("HTTP request failed with status: {}", resp.status());
                }
                Ok::<_, anyhow::Error>(resp.bytes().await?.to_vec())
            })
            .await?;
        Ok(body.as_slice())
    }

    async fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let expected_size = (end - offset + 1) as usize;
        let mut received = 0;

        while received < expected_size {
            let range = format!("bytes={}-{}", offset + received as u64, end);
            let resp = self.send_with_retry(Some(&range)).await?;
            if resp.status() != StatusCode::PARTIAL_CONTENT {
                bail!("HTTP request failed with status: {}", resp.status());
            }

            let bytes = resp.bytes().await?;
            if bytes.is_empty() {
                bail!("Server returned an empty range for {range}");
            }
            let chunk_len = bytes.len().min(expected_size - received);
            buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
            received += chunk_len;
        }

        Ok(received)
    }
}

#[async_trait]
impl ReadAt for HttpReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        if self.ranged {
            return self.read_range(offset, buf).await;
        }

        let body = self.whole_body().await?;
        let start = offset as usize;
        if start >= body.len() {
            return Ok(0);
        }
        let n = buf.len().min(body.len() - start);
        buf[..n].copy_from_slice(&body[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
