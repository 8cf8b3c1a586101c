//! gxs - Batch x264 Encoding Pipeline
//!
//! Entry point: parses the command line, loads the application config and
//! runs encodes, profile management or a track probe.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, filter::filter_fn, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use gxs::cli::{Args, Commands, ProfileAction};
use gxs::config::{Config, DEFAULT_CONFIG_FILE};
use gxs::output_log::ConsoleLog;
use gxs::pipeline::{InputQueue, RunOutcome, RunReport};
use gxs::workflow::{EncodeRequest, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config_path = match &args.config {
        Some(path) => Some(path.clone()),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            path.exists().then_some(path)
        }
    };
    let config = match &config_path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    let mut workflow = Workflow::new(config, config_path)?;

    match args.command {
        Commands::Encode {
            inputs,
            profile,
            output_dir,
            lenient,
        } => {
            let queue = Workflow::build_queue(&inputs);
            let request = EncodeRequest {
                profile,
                output_dir,
                lenient,
            };
            run_encode(&mut workflow, queue, request).await?;
        }
        Commands::Batch {
            input_dir,
            profile,
            output_dir,
            lenient,
        } => {
            info!("Processing directory: {}", input_dir.display());
            let queue = Workflow::scan_directory(&input_dir)?;
            let request = EncodeRequest {
                profile,
                output_dir,
                lenient,
            };
            run_encode(&mut workflow, queue, request).await?;
        }
        Commands::Profile { action } => match action {
            ProfileAction::List => {
                let names = workflow.profiles().list()?;
                if names.is_empty() {
                    println!(
                        "No profiles in {}",
                        workflow.profiles().dir().display()
                    );
                } else {
                    for name in names {
                        println!("{}", name);
                    }
                }
            }
            ProfileAction::Init { name, force } => {
                let path = workflow.init_profile(&name, force)?;
                println!("Wrote {}", path.display());
            }
            ProfileAction::Show { name } => {
                println!("{}", workflow.show_profile(&name)?);
            }
        },
        Commands::Probe { input } => {
            let summary = workflow.probe(&input).await?;
            println!(
                "Video language: {}",
                summary.languages.video.as_deref().unwrap_or("unknown")
            );
            if summary.plan.is_empty() {
                println!("No audio tracks found");
            }
            for track in summary.plan.tracks() {
                println!(
                    "Audio stream {} (track {}): language {}",
                    track.sequence,
                    track.track_index,
                    summary
                        .languages
                        .audio(track.sequence - 1)
                        .unwrap_or("unknown")
                );
            }
        }
    }

    Ok(())
}

async fn run_encode(
    workflow: &mut Workflow,
    queue: InputQueue,
    request: EncodeRequest,
) -> Result<()> {
    let console = ConsoleLog::new();
    let report = workflow.encode(queue, request, Box::new(console)).await?;
    print_report(&report);

    match &report.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Halted(reason) => Err(anyhow::anyhow!("Encode halted: {}", reason)),
    }
}

fn print_report(report: &RunReport) {
    println!("\nRun {}", report.run_id);
    for path in &report.encoded {
        println!("  encoded  {}", path.display());
    }
    for skipped in &report.skipped {
        println!("  skipped  {}  ({})", skipped.path.display(), skipped.reason);
    }
    for path in &report.remaining {
        println!("  pending  {}", path.display());
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".gxs").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "gxs.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Status lines are already printed by the console output log
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(filter_fn(|meta| meta.target() != "gxs::status"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("gxs.log").display()
    );

    Ok(())
}
