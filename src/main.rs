//! Main entry point for the rungar CLI application.
//!
//! This binary lists and extracts the files bundled in a GAR archive,
//! read from the local filesystem or an HTTP URL.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rungar::gar::RecordInfo;
use rungar::{Cli, DecodedFile, GarExtractor, HttpReader, LocalFileReader, ReadAt};

/// Application entry point.
///
/// Parses command-line arguments, sets up logging, and dispatches on
/// whether the input is a local file or HTTP URL.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.is_http_url() {
        let reader = Arc::new(HttpReader::new(cli.file.clone()).await?);
        process_gar(reader, &cli).await
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_gar(reader, &cli).await
    }
}

/// Process a GAR archive based on CLI options.
///
/// - List mode (`-l` or `-v`): display archive contents
/// - Extract mode: decode and write files matching the filters
async fn process_gar<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let extractor = GarExtractor::with_options(reader, cli.decode_options()?);

    if cli.list && cli.verbose == 0 {
        return list_names(&extractor).await;
    }
    if cli.verbose > 0 {
        return list_verbose(&extractor, cli.jobs).await;
    }

    // Every record has to be decoded anyway: a GAR file can only be
    // walked front to back and the last record's body ends the file.
    let files = decode_all(&extractor, cli.jobs).await?;
    info!(files = files.len(), "decoded archive");

    let selected: Vec<_> = files.iter().filter(|f| is_selected(&f.filename, cli)).collect();

    let multiple_files = cli.pipe && selected.len() > 1;
    for file in selected {
        extract_file(&extractor, file, cli, multiple_files).await?;
    }

    Ok(())
}

async fn decode_all<R: ReadAt + 'static>(
    extractor: &GarExtractor<R>,
    jobs: usize,
) -> Result<Vec<DecodedFile>> {
    if jobs > 1 {
        extractor.extract_all_concurrent(jobs).await
    } else {
        extractor.extract_all().await
    }
}

/// Whether `name` passes the positional selection and `-x` exclusions.
fn is_selected(name: &str, cli: &Cli) -> bool {
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, name)
            } else {
                name == f || base_name(name) == *f
            }
        });
        if !matches {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|x| name.contains(x.as_str()) || glob_match(x, name))
}

/// Print one filename per line, read from the clear record headers.
async fn list_names<R: ReadAt + 'static>(extractor: &GarExtractor<R>) -> Result<()> {
    for info in extractor.list_records().await? {
        println!("{}", info.filename);
    }
    Ok(())
}

/// Print a table of every record, decoding each one to confirm it is intact.
async fn list_verbose<R: ReadAt + 'static>(extractor: &GarExtractor<R>, jobs: usize) -> Result<()> {
    let infos = extractor.list_records().await?;
    let files = decode_all(extractor, jobs).await?;

    println!(
        "{:>10}  {:>10}  {:>6}  {:>10}  Name",
        "Length", "Size", "Cmpr", "Timestamp"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;

    for (info, file) in infos.iter().zip(&files) {
        print_row(info, file);
        total_uncompressed += u64::from(file.recovered_length);
        total_compressed += u64::from(file.compressed_length);
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>10}  {} files",
        total_uncompressed,
        total_compressed,
        format_ratio(total_compressed, total_uncompressed),
        "",
        files.len()
    );
    if let Some(first) = files.first() {
        info!(calibration = %first.calibration, "keystream");
    }

    Ok(())
}

fn print_row(info: &RecordInfo, file: &DecodedFile) {
    println!(
        "{:>10}  {:>10}  {}  {:#010x}  {}",
        file.recovered_length,
        info.compressed_length,
        format_ratio(u64::from(file.compressed_length), u64::from(file.declared_length)),
        info.envelope.checksum,
        info.filename
    );
}

/// Stored size as a percentage of the original, as the PAT software reports it.
fn format_ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return "     -".to_string();
    }
    format!("{:>5.1}%", 100.0 * compressed as f64 / uncompressed as f64)
}

/// Write a single decoded file.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in the stored name
/// - Overwrite control (`-n`, `-o`): Handle existing files
async fn extract_file<R: ReadAt + 'static>(
    extractor: &GarExtractor<R>,
    file: &DecodedFile,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    if cli.pipe {
        if show_filename {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(format!("--- {} ---\n", file.filename).as_bytes())
                .await?;
        }
        return extractor.extract_to_stdout(file).await;
    }

    let relative = stored_path(&file.filename, cli.junk_paths)?;
    let output_path = match &cli.extract_dir {
        Some(dir) => PathBuf::from(dir).join(relative),
        None => relative,
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", file.filename);
            }
            return Ok(());
        }

        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", file.filename);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  inflating: {}", file.filename);
    }

    extractor.extract_to_file(file, &output_path).await
}

/// Relative output path for a stored name.
///
/// GAR names come from Windows-based tooling, so both separators are
/// honoured. Names that would escape the output directory are refused.
fn stored_path(name: &str, junk_paths: bool) -> Result<PathBuf> {
    let normalized = name.replace('\\', "/");
    if junk_paths {
        let base = base_name(&normalized);
        if base.is_empty() || base == ".." || base == "." {
            bail!("Refusing to write {name:?}: no usable file name");
        }
        return Ok(PathBuf::from(base));
    }

    let path = PathBuf::from(&normalized);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => bail!("Refusing to write {name:?}: path leaves the output directory"),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("Refusing to write {name:?}: no usable file name");
    }
    Ok(out)
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// Matching is ASCII case-insensitive, since the testers store names
/// in upper case (`IMG_0001.JPG`, `RESULTS.SSS`).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let text_chars: Vec<char> = text.to_ascii_lowercase().chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero or more characters
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}
