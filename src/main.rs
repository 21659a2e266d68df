use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use ripd::adapters;
use ripd::config::AppConfig;
use ripd::context::AppContext;
use ripd::core::events::JobEventPayload;
use ripd::core::models::{DiscType, JobStatus};
use ripd::logging::{self, LogConfig};

#[derive(Parser)]
#[command(name = "ripd")]
#[command(about = "Automated optical disc backup", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated drives and stages instead of real hardware
    #[arg(long, global = true)]
    simulation: bool,

    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List known drives with their status
    Drives,
    /// Back up one disc and stream its progress
    Rip {
        /// Disc type tag, e.g. audio_cd, dvd_video, bluray_rom
        #[arg(long)]
        disc_type: String,

        /// Drive to use; picked by capability when omitted
        #[arg(long)]
        drive: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.simulation {
        config.simulation = true;
    }

    logging::init(LogConfig {
        json: cli.json_logs,
        verbose: cli.verbose,
    });

    let provider = adapters::get_provider(config.simulation);
    let ctx = AppContext::new(config, provider);

    match cli.command {
        Commands::Drives => run_drives(&ctx),
        Commands::Rip { disc_type, drive } => run_rip(&ctx, disc_type, drive).await,
    }
}

fn run_drives(ctx: &AppContext) -> Result<()> {
    let drives = ctx.drives.list_drives()?;
    if drives.is_empty() {
        println!("no optical drives found");
        return Ok(());
    }

    for drive in drives {
        let status = match drive.status {
            ripd::core::models::DriveStatus::Idle => "idle",
            ripd::core::models::DriveStatus::Busy => "busy",
            ripd::core::models::DriveStatus::Blacklisted => "blacklisted",
        };
        println!(
            "{:<14} {:<4} {:<12} {:<28} {}",
            drive.path.display(),
            drive.capability,
            status,
            drive.model,
            drive.disc_label.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_rip(ctx: &AppContext, disc_type: String, drive: Option<PathBuf>) -> Result<()> {
    let parsed: DiscType = disc_type
        .parse()
        .map_err(|_| anyhow!("unknown disc type: {}", disc_type))?;

    let drive = match drive {
        Some(path) => path,
        None => ctx
            .drives
            .find_available(parsed.required_capability())?
            .with_context(|| format!("no available {} drive", parsed.required_capability()))?,
    };

    // Subscribe first so no event between start and the loop is lost.
    let mut events = ctx.jobs.subscribe();
    let job_id = ctx.jobs.start_job(&drive, &disc_type)?;
    println!("job {} started on {}", job_id, drive.display());

    let final_status = loop {
        match events.recv().await {
            Ok(event) if event.job_id == job_id => match event.payload {
                JobEventPayload::Log { line } => println!("  {}", line),
                JobEventPayload::Progress { percent } => println!("  [{:>3}%]", percent),
                JobEventPayload::Status { status } => {
                    println!("status: {}", status);
                    if status.is_terminal() {
                        break status;
                    }
                }
            },
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                eprintln!("(skipped {} events)", skipped);
            }
            Err(RecvError::Closed) => bail!("event feed closed before the job finished"),
        }
    };

    if let Some(snapshot) = ctx.jobs.status(&job_id) {
        println!(
            "{} after {:.1}s, output in {}",
            snapshot.status,
            snapshot.elapsed_secs,
            snapshot.output_folder.display()
        );
    }

    if final_status != JobStatus::Completed {
        bail!("job ended with status {}", final_status);
    }
    Ok(())
}
