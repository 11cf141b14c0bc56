//! Command-line interface definitions for drivedupe.
//!
//! # Example
//!
//! ```bash
//! # Hash a directory and report duplicate groups
//! drivedupe scan ~/Downloads
//!
//! # BLAKE3, 8 workers, JSON report
//! drivedupe scan ~/Downloads --algorithm blake3 --workers 8 --output json
//!
//! # Only images of at least 1 MiB
//! drivedupe scan ~/Pictures --mime 'image/*' --min-size 1MiB
//! ```

use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::hasher::HashAlgorithm;

/// Content-hash duplicate finder with tracked, cancellable operations.
#[derive(Debug, Parser)]
#[command(name = "drivedupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print errors as JSON objects on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "DRIVEDUPE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Hash a directory and report duplicate files
    Scan(ScanArgs),
    /// List the supported hash algorithms
    Algorithms,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Hashing worker threads (0 = one per CPU)
    #[arg(short = 'j', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Content hash algorithm
    #[arg(long, value_name = "NAME", value_parser = parse_algorithm)]
    pub algorithm: Option<HashAlgorithm>,

    /// Retries per file for transient read errors
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Ignore files smaller than this (e.g. 4KiB, 1MB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,

    /// Do not hash files larger than this (0 = no limit)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_file_size: Option<u64>,

    /// Only group files of this mime type; `type/*` matches a family.
    /// Repeatable.
    #[arg(long = "mime", value_name = "TYPE")]
    pub mime_types: Vec<String>,

    /// Only group files with this extension. Repeatable.
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Report only the N groups wasting the most space
    #[arg(long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Rehash files that already have a digest
    #[arg(long)]
    pub force: bool,

    /// Follow symbolic links while walking
    #[arg(long)]
    pub follow_symlinks: bool,
}

/// Output format for scan results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a human-readable size into bytes.
///
/// Decimal (`KB`, `MB`) and binary (`KiB`, `MiB`) units are accepted; a bare
/// number is bytes.
///
/// ```
/// use drivedupe::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// assert_eq!(parse_size("1MB").unwrap(), 1_000_000);
/// ```
///
/// # Errors
///
/// Returns a message for empty input, negative numbers or unknown units.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Size cannot be negative".to_string());
    }
    s.parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("Invalid size '{s}': {e}"))
}

/// Parse an algorithm name, suggesting the closest match on a typo.
///
/// # Errors
///
/// Returns the unknown-algorithm message.
pub fn parse_algorithm(s: &str) -> Result<HashAlgorithm, String> {
    s.parse::<HashAlgorithm>().map_err(|e| e.to_string())
}
