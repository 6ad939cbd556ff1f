//! `replink` — upload a directory tree to a MicroPython board.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use replink_channel::{Channel, ChannelConfig, ReceiveMode};
use replink_runner::job::{SmashPolicy, TransferJob};
use replink_runner::upload;

#[derive(Parser, Debug)]
#[command(name = "replink", version, about = "Upload files to a MicroPython device over its serial REPL")]
struct Args {
    /// Serial port (e.g. COM3, /dev/ttyUSB0)
    port: String,

    /// Local directory to upload (default: current directory)
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Basenames to exclude
    #[arg(short = 'e', long = "exclude", default_values_t = default_excludes())]
    exclude: Vec<String>,

    /// Only upload these basenames (if set)
    #[arg(short = 'i', long = "include")]
    include: Vec<String>,

    /// Do not remove comments/blank lines
    #[arg(long)]
    no_smash: bool,

    /// Smash level (1=blank lines, 2=full comments, 3=inline comments)
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=3))]
    smash_level: u8,

    /// Show what would be uploaded without uploading
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn default_excludes() -> Vec<String> {
    vec!["__pycache__".to_string(), ".git".to_string()]
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let source_root = args
        .directory
        .unwrap_or_else(|| PathBuf::from("."));

    let mut job = TransferJob::new(source_root);
    job.excludes = args.exclude.into_iter().collect();
    job.includes = args.include.into_iter().collect();
    job.smash = if args.no_smash {
        SmashPolicy::Off
    } else {
        // The range check on the flag makes this infallible.
        SmashPolicy::from_level(args.smash_level).unwrap_or(SmashPolicy::CommentLines)
    };
    job.dry_run = args.dry_run;

    // Configuration problems should surface before the port is touched.
    if let Err(e) = upload::validate(&job) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let mut channel = Channel::new(ChannelConfig::default());
    if !args.dry_run {
        if let Err(e) = channel.connect(&args.port, ReceiveMode::Polling) {
            error!("cannot connect: {}", e);
            return ExitCode::FAILURE;
        }
    }

    match upload::run(&job, &mut channel) {
        Ok(report) if report.is_success() => {
            info!(
                "done: {} files, {} directories, {} bytes",
                report.stats.files_uploaded, report.stats.dirs_created, report.stats.bytes_sent
            );
            ExitCode::SUCCESS
        }
        Ok(report) => {
            for (path, reason) in &report.failed_files {
                error!("failed: {} ({})", path.display(), reason);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("upload failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
