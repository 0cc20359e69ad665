//! Ferroscan command-line scanner.

use clap::{Parser, ValueEnum};
use ferroscan::core::config::Config;
use ferroscan::core::types::{AlertPolicy, Verdict};
use ferroscan::session::ScanSession;
use ferroscan::signatures::{LoadOptions, SignatureSet};
use ferroscan::utils::logging::{init_logging, LogConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "ferroscan")]
#[command(about = "Signature-based file scanner with recursive archive extraction")]
#[command(version)]
struct Cli {
    /// Signature database file or directory; may be given multiple times
    #[arg(short = 'd', long = "database", required = true)]
    databases: Vec<PathBuf>,

    /// Report every firing signature instead of stopping at the first
    #[arg(long)]
    allmatch: bool,

    /// Load unsigned bytecode databases (.cbc)
    #[arg(long = "bytecode-unsigned")]
    bytecode_unsigned: bool,

    /// Optional configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Files or directories to scan
    #[arg(required = true)]
    targets: Vec<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonReport {
    target: String,
    verdict: Verdict,
    matches: Vec<JsonMatch>,
}

#[derive(Serialize)]
struct JsonMatch {
    layer: String,
    signature: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = if cli.quiet {
        LogConfig::quiet()
    } else if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(log_config);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(Verdict::Error.exit_code());
        }
    };

    let options = LoadOptions {
        bytecode_unsigned: cli.bytecode_unsigned,
    };
    let set = match SignatureSet::load(&cli.databases, &options) {
        Ok(set) => set,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(Verdict::Error.exit_code());
        }
    };
    let signature_count = set.len();

    let policy = if cli.allmatch {
        AlertPolicy::AllMatch
    } else {
        config.default_policy
    };
    let session = ScanSession::new(Arc::new(set), config).with_policy(policy);

    let mut verdict = Verdict::Clean;
    let mut files_scanned = 0u64;
    let mut infected_files = 0u64;
    let mut reports = Vec::new();

    for target in collect_targets(&cli.targets) {
        match session.scan_file(&target) {
            Ok(result) => {
                if cli.format == OutputFormat::Text {
                    for m in &result.matches {
                        println!("{}: {}", m.layer_path, m.report_line());
                    }
                } else {
                    reports.push(JsonReport {
                        target: target.display().to_string(),
                        verdict: result.verdict,
                        matches: result
                            .matches
                            .iter()
                            .map(|m| JsonMatch {
                                layer: m.layer_path.clone(),
                                signature: m.report_line(),
                            })
                            .collect(),
                    });
                }
                files_scanned += result.files_scanned;
                if result.verdict == Verdict::Infected {
                    infected_files += 1;
                }
                verdict = verdict.merge(result.verdict);
            }
            Err(e) => {
                log::error!("{}", e);
                verdict = verdict.merge(Verdict::Error);
            }
        }
    }

    match cli.format {
        OutputFormat::Text => {
            println!("\n----------- SCAN SUMMARY -----------");
            println!("Known signatures: {}", signature_count);
            println!("Scanned files: {}", files_scanned);
            println!("Infected files: {}", infected_files);
        }
        OutputFormat::Json => match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                log::error!("Failed to serialize report: {}", e);
                verdict = verdict.merge(Verdict::Error);
            }
        },
    }

    ExitCode::from(verdict.exit_code())
}

fn load_config(cli: &Cli) -> ferroscan::Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Expand directory targets into the files beneath them.
fn collect_targets(targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for target in targets {
        if target.is_dir() {
            for entry in WalkDir::new(target)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(target.clone());
        }
    }
    files
}
