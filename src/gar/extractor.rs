use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::debug;

use crate::io::{ReadAt, read_all};
use anyhow::{Context, Result, anyhow};

use super::error::GarResult;
use super::keystream::Calibration;
use super::parser::{Container, decode_files};
use super::structures::{DecodeOptions, DecodedFile, RecordInfo, RecordSpan};

/// GAR file extractor
///
/// Loads the whole container from its source once and decodes records
/// from the in-memory copy.
pub struct GarExtractor<R: ReadAt> {
    reader: Arc<R>,
    options: DecodeOptions,
    data: OnceCell<Arc<[u8]>>,
}

impl<R: ReadAt> GarExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self::with_options(reader, DecodeOptions::default())
    }

    pub fn with_options(reader: Arc<R>, options: DecodeOptions) -> Self {
        Self {
            reader,
            options,
            data: OnceCell::new(),
        }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// The container bytes, read from the source on first use
    pub async fn data(&self) -> Result<Arc<[u8]>> {
        let data = self
            .data
            .get_or_try_init(|| async { read_all(self.reader.as_ref()).await.map(Arc::from) })
            .await?;
        Ok(data.clone())
    }

    /// List all records without decoding their bodies
    pub async fn list_records(&self) -> Result<Vec<RecordInfo>> {
        let data = self.data().await?;
        Ok(Container::open(&data)?.infos()?)
    }

    /// Decode every record in container order, stopping at the first error
    pub async fn extract_all(&self) -> Result<Vec<DecodedFile>> {
        let data = self.data().await?;
        let files = decode_files(&data, self.options)?.collect::<GarResult<Vec<_>>>()?;
        Ok(files)
    }

    /// Decode records on blocking worker threads, at most `jobs` at a time
    ///
    /// Boundaries are found in one sequential pass first. The first record
    /// is decoded alone so its keystream calibration can seed the others.
    /// Files come back in container order; if any record fails, the error
    /// for the earliest failing record is returned.
    pub async fn extract_all_concurrent(&self, jobs: usize) -> Result<Vec<DecodedFile>> {
        let data = self.data().await?;
        let spans = Container::open(&data)?.spans()?;
        let Some((first, rest)) = spans.split_first() else {
            return Ok(Vec::new());
        };

        let options = self.options;
        let head = {
            let data = data.clone();
            let first = first.clone();
            tokio::task::spawn_blocking(move || decode_span(&data, &first, &options, None))
                .await??
        };
        let hint = Some(head.calibration);

        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let mut tasks = JoinSet::new();
        for span in rest.iter().cloned() {
            let data = data.clone();
            let permit = permits.clone().acquire_owned().await?;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                (span.index, decode_span(&data, &span, &options, hint))
            });
        }
        debug!(records = spans.len(), jobs, "decoding records concurrently");

        let mut results = Vec::with_capacity(rest.len());
        while let Some(joined) = tasks.join_next().await {
            results.push(joined?);
        }
        results.sort_by_key(|(index, _)| *index);

        let mut files = Vec::with_capacity(spans.len());
        files.push(head);
        for (_, result) in results {
            files.push(result?);
        }
        Ok(files)
    }

    /// Write a decoded file to disk
    pub async fn extract_to_file(&self, file: &DecodedFile, output_path: &Path) -> Result<()> {
        // Create parent directories if needed
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut out = fs::File::create(output_path)
            .await
            .with_context(|| format!("Cannot create {}", output_path.display()))?;
        out.write_all(&file.contents).await?;
        out.flush().await?;

        Ok(())
    }

    /// Write a decoded file to stdout
    pub async fn extract_to_stdout(&self, file: &DecodedFile) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&file.contents).await?;
        stdout.flush().await?;

        Ok(())
    }
}

fn decode_span(
    data: &[u8],
    span: &RecordSpan,
    options: &DecodeOptions,
    hint: Option<Calibration>,
) -> Result<DecodedFile> {
    let record = span
        .record(data)
        .ok_or_else(|| anyhow!("Record {} lies outside the container", span.index))?;
    Ok(record.decode_with_hint(options, hint)?)
}
