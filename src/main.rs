//! Mach-O Annotate CLI
//!
//! Command-line tool for listing the portions of a Mach-O file and looking
//! up the decoded field at given file offsets.

use clap::{Parser, ValueEnum};
use macho_annotate::formatter::{HumanFormatter, JsonFormatter, Report, ReportFormatter, ShortFormatter};
use macho_annotate::{parse_bytes_with_options, CancelToken, Capabilities, DecodeOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Byte-range addressable Mach-O decoder.
///
/// Lists every decoded portion of each file and, for each `--offset`,
/// the field covering that byte.
#[derive(Parser, Debug)]
#[command(name = "macho-annotate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file(s) to decode
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// File offset to look up, decimal or 0x-prefixed hex (repeatable)
    #[arg(short, long = "offset", value_parser = parse_offset)]
    offsets: Vec<u64>,

    /// How often waiters re-check for cancellation, in milliseconds
    #[arg(long, default_value = "50")]
    poll_interval_ms: u64,

    /// Skip demangling of C-string sections
    #[arg(long)]
    no_demangle: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output lookups)
    #[arg(short, long)]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
    /// Tab-separated lines
    Short,
}

fn parse_offset(raw: &str) -> Result<u64, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid offset '{raw}': {e}"))
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging if verbose
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("macho_annotate=debug")
            .init();
    }

    let options = DecodeOptions::batch()
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_demangling(!args.no_demangle);

    let formatter: Box<dyn ReportFormatter> = match args.format {
        OutputFormat::Human if args.quiet => Box::new(HumanFormatter::quiet()),
        OutputFormat::Human if args.verbose => Box::new(HumanFormatter::verbose()),
        OutputFormat::Human => Box::new(HumanFormatter::new()),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Short => Box::new(ShortFormatter::new()),
    };

    let mut success = true;

    for path in &args.files {
        match annotate_file(path, &options, &args.offsets, args.verbose, formatter.as_ref()) {
            Ok(()) => {}
            Err(e) => {
                if !args.quiet {
                    eprintln!("Error decoding {}: {}", path.display(), e);
                }
                success = false;
            }
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn annotate_file(
    path: &Path,
    options: &DecodeOptions,
    offsets: &[u64],
    verbose: bool,
    formatter: &dyn ReportFormatter,
) -> anyhow::Result<()> {
    let data = std::fs::read(path)?;
    let file = parse_bytes_with_options(data, options, Capabilities::none())?;
    let report = Report::collect(&file, offsets, verbose, &CancelToken::new());
    print!("{}", formatter.format_report(&report, path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["macho-annotate", "test.bin"]).unwrap();
        assert_eq!(args.files.len(), 1);
        assert!(!args.verbose);
        assert!(args.offsets.is_empty());
    }

    #[test]
    fn test_multiple_files() {
        let args = Args::try_parse_from(["macho-annotate", "a.bin", "b.bin"]).unwrap();
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_format_options() {
        let args = Args::try_parse_from(["macho-annotate", "-f", "json", "test.bin"]).unwrap();
        assert!(matches!(args.format, OutputFormat::Json));
    }

    #[test]
    fn test_offsets_accept_hex_and_decimal() {
        let args =
            Args::try_parse_from(["macho-annotate", "-o", "0x40", "--offset", "184", "test.bin"]).unwrap();
        assert_eq!(args.offsets, vec![0x40, 184]);
        assert!(Args::try_parse_from(["macho-annotate", "-o", "0xZZ", "test.bin"]).is_err());
    }

    #[test]
    fn test_decode_flags() {
        let args =
            Args::try_parse_from(["macho-annotate", "--no-demangle", "--poll-interval-ms", "5", "x"]).unwrap();
        assert!(args.no_demangle);
        assert_eq!(args.poll_interval_ms, 5);
    }
}
