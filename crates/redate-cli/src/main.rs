use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use redate_core::date::json::{parse_epoch, timestamp_from_sidecar};
use redate_core::engine::MetadataEngine;
use redate_core::repair::DateRepairer;
use redate_core::verify::{self, CheckedField};
use redate_core::{
    CanonicalDate, CancellationToken, EngineConfig, ExifTool, ProcessControl, RepairOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "redate", version, about = "Restore capture dates on Google Photos Takeout exports")]
struct Cli {
    /// Path to the exiftool executable
    #[arg(long, global = true, env = "REDATE_EXIFTOOL", default_value = "exiftool")]
    exiftool: PathBuf,

    /// Seconds a single exiftool call may take before it counts as failed
    #[arg(long, global = true, env = "REDATE_TASK_TIMEOUT", default_value_t = 300)]
    task_timeout: u64,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Repair every photo and video in a folder using their JSON sidecars
    Repair {
        /// Folder holding the exported media and .json sidecars
        folder: PathBuf,

        /// Worker threads (0 = one per core)
        #[arg(short, long, default_value_t = 0)]
        jobs: usize,

        /// Leave file modification times alone
        #[arg(long)]
        no_mtime: bool,

        /// Do not write .redate-report.json
        #[arg(long)]
        no_report: bool,
    },
    /// Repair a single file with an explicit timestamp or sidecar
    File {
        /// Folder that receives the working/success/error subfolders
        base: PathBuf,

        /// File to repair
        file: PathBuf,

        /// Capture time in epoch seconds
        #[arg(conflicts_with = "sidecar", required_unless_present = "sidecar")]
        timestamp: Option<String>,

        /// Read photoTakenTime from this JSON sidecar instead
        #[arg(long)]
        sidecar: Option<PathBuf>,
    },
    /// Show the date fields exiftool reports for a file
    Inspect {
        file: PathBuf,

        /// Also report which fields carry this epoch-seconds capture time
        #[arg(long)]
        timestamp: Option<i64>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let t_total = Instant::now();

    let engine_config = EngineConfig {
        exiftool_path: cli.exiftool.clone(),
        task_timeout_secs: cli.task_timeout,
        extra_args: Vec::new(),
    };
    let engine = ExifTool::spawn(&engine_config)?;
    tracing::info!("Using ExifTool {}", engine.version()?);

    let result = run(cli.command, engine_config, &engine);

    engine.shutdown()?;
    let success = result?;
    eprintln!("Finished in {:.2}s", t_total.elapsed().as_secs_f64());
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn run(command: Command, engine_config: EngineConfig, engine: &ExifTool) -> anyhow::Result<bool> {
    match command {
        Command::Repair {
            folder,
            jobs,
            no_mtime,
            no_report,
        } => {
            let options = RepairOptions {
                folder,
                jobs,
                sync_mtime: !no_mtime,
                write_report: !no_report,
                engine: engine_config,
            };
            repair_folder(&options, engine)
        }
        Command::File {
            base,
            file,
            timestamp,
            sidecar,
        } => {
            let timestamp = match sidecar {
                Some(path) => timestamp_from_sidecar(&path),
                None => timestamp.as_deref().map(str::trim).and_then(parse_epoch),
            };
            let ok = DateRepairer::new(engine)
                .with_sync_mtime(true)
                .repair_file_dates(&base, &file, timestamp);
            eprintln!("{}: {}", file.display(), if ok { "success" } else { "error" });
            Ok(ok)
        }
        Command::Inspect { file, timestamp } => inspect(engine, &file, timestamp),
    }
}

fn repair_folder(options: &RepairOptions, engine: &ExifTool) -> anyhow::Result<bool> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the files in progress...");
        handler_token.cancel();
    })?;
    let control = ProcessControl::new().with_cancel_token(token);

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(200));

    let progress_bar = bar.clone();
    let on_progress = move |_stage: &str, current: u64, total: u64, message: &str| {
        progress_bar.set_length(total);
        progress_bar.set_position(current + 1);
        progress_bar.set_message(message.to_string());
    };
    let result = redate_core::process_folder(options, engine, &control, &on_progress)?;
    bar.finish_and_clear();

    eprintln!(
        "Done! {} media files: {} repaired, {} already correct, {} failed, {} skipped (no sidecar date){}",
        result.total_media,
        result.repaired,
        result.already_correct,
        result.failed,
        result.skipped,
        if result.cancelled { ", cancelled" } else { "" }
    );
    if let Some(path) = &result.report_path {
        eprintln!("Report written to {}", path.display());
    }
    Ok(result.failed == 0 && !result.cancelled)
}

fn inspect(engine: &ExifTool, file: &Path, timestamp: Option<i64>) -> anyhow::Result<bool> {
    let tags = engine.read(file)?;
    println!("{}", file.display());
    for field in CheckedField::ALL {
        for key in field.keys() {
            let value = tags.raw_str(key).unwrap_or_else(|| "-".to_string());
            println!("  {:<26} {}", key, value);
        }
    }

    let Some(timestamp) = timestamp else {
        return Ok(true);
    };
    let date = CanonicalDate::from_epoch_seconds(timestamp)
        .ok_or_else(|| anyhow::anyhow!("invalid timestamp {}", timestamp))?;
    let verification = verify::check_tags(&date, &tags);
    let matched: Vec<String> = verification.matched.iter().map(|f| f.to_string()).collect();
    println!(
        "Expected {}: {}",
        date,
        if verification.is_complete() {
            "all fields match".to_string()
        } else if verification.is_match() {
            format!("partial match ({})", matched.join(", "))
        } else {
            "no match".to_string()
        }
    );
    Ok(verification.is_match())
}
