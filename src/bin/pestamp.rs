//! Stamps application metadata into Windows executables and copies the other binaries of a bundle.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use pestamp::{bundle, AppConfig, BundleTarget, Stamper};

const EXIT_TARGET_FAILED: u8 = 1;
const EXIT_INVALID_INPUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(version, about = "Stamp icon and version resources into Windows executables")]
struct Args {
    /// Path to the application configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Directory the icon path is resolved against (defaults to the directory of the configuration file)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Windows executable to stamp, as SOURCE=DESTINATION
    #[arg(long, value_parser = parse_target)]
    windows: Vec<(PathBuf, PathBuf)>,

    /// Binary to copy unchanged, as SOURCE=DESTINATION
    #[arg(long, value_parser = parse_target)]
    copy: Vec<(PathBuf, PathBuf)>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn parse_target(value: &str) -> Result<(PathBuf, PathBuf), String> {
    match value.split_once('=') {
        Some((source, destination)) if !source.is_empty() && !destination.is_empty() => {
            Ok((PathBuf::from(source), PathBuf::from(destination)))
        }
        _ => Err(format!("expected SOURCE=DESTINATION, got {:?}", value)),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp(None)
        .init();

    let metadata = match AppConfig::parse_file(&args.config).and_then(|config| config.binary_metadata()) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("{}: {}", args.config.display(), e);
            return ExitCode::from(EXIT_INVALID_INPUT);
        }
    };
    let base_dir = args
        .base_dir
        .or_else(|| args.config.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stamper = Stamper::new(metadata).with_base_dir(base_dir);

    let targets = args
        .windows
        .into_iter()
        .map(|(source, destination)| BundleTarget::windows(source, destination))
        .chain(
            args.copy
                .into_iter()
                .map(|(source, destination)| BundleTarget::verbatim(source, destination)),
        )
        .collect::<Vec<_>>();
    if targets.is_empty() {
        error!("no targets given, use --windows or --copy");
        return ExitCode::from(EXIT_INVALID_INPUT);
    }

    let total = targets.len();
    let report = bundle(&stamper, targets);
    for (target, warning) in report.warnings() {
        warn!("{}: {}", target.destination.display(), warning);
    }
    let failed = report.failures().count();
    for (target, error) in report.failures() {
        error!("{}: {}", target.destination.display(), error);
    }
    info!("{} of {} targets written", total - failed, total);

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TARGET_FAILED)
    }
}
