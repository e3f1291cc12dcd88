use clap::Parser;

use crate::gar::{
    Calibration, DEFAULT_MAX_FILE_SIZE, DecodeOptions, KeyMode, LengthSource, PrefixOrder,
    SeedCombine, SeedScheme, SeedWord,
};

#[derive(Parser, Debug)]
#[command(name = "rungar")]
#[command(version)]
#[command(about = "Extract Seaward GAR PAT-testing archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  rungar export.GAR -d out          extract every file into out/\n  \
  rungar -p export.GAR '*.SSS'      send the results file to stdout\n  \
  rungar -l https://example.com/export.GAR   list files from a remote GAR")]
pub struct Cli {
    /// GAR file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely; repeat for more log output
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Decode records on this many threads
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub jobs: usize,

    /// State word seeded from the record timestamp (x, y, z, w)
    #[arg(long, value_name = "WORD", requires = "length_word")]
    pub timestamp_word: Option<SeedWord>,

    /// State word seeded from the record length (x, y, z, w)
    #[arg(long, value_name = "WORD", requires = "timestamp_word")]
    pub length_word: Option<SeedWord>,

    /// How seed values merge with the default state (replace, xor)
    #[arg(long, value_name = "MODE", default_value = "replace")]
    pub seed_combine: SeedCombine,

    /// Length that seeds the keystream (uncompressed, compressed, body)
    #[arg(long, value_name = "SOURCE", default_value = "uncompressed")]
    pub length_source: LengthSource,

    /// Byte order of the body's length prefix (le, be); probed if omitted
    #[arg(long, value_name = "ORDER")]
    pub prefix_order: Option<PrefixOrder>,

    /// Refuse files declaring more than this many bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_size: u64,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.is_very_quiet() || self.pipe {
            return "error";
        }
        match self.verbose {
            0 if self.quiet > 0 => "error",
            0 | 1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }

    /// A fixed keystream mapping, when both seed words were given.
    pub fn calibration(&self) -> Option<Calibration> {
        let scheme = SeedScheme {
            timestamp_word: self.timestamp_word?,
            length_word: self.length_word?,
            combine: self.seed_combine,
            length_source: self.length_source,
        };
        Some(Calibration {
            scheme,
            prefix_order: self.prefix_order.unwrap_or_default(),
        })
    }

    pub fn decode_options(&self) -> anyhow::Result<DecodeOptions> {
        let key_mode = match self.calibration() {
            Some(calibration) if !calibration.scheme.is_valid() => {
                anyhow::bail!("--timestamp-word and --length-word must name different words")
            }
            Some(calibration) => KeyMode::Fixed(calibration),
            None => KeyMode::Auto,
        };
        Ok(DecodeOptions::default()
            .with_key_mode(key_mode)
            .with_prefix_order(self.prefix_order)
            .with_max_file_size(self.max_size))
    }
}
