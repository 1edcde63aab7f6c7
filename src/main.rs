#![forbid(unsafe_code)]

//! `sitl-fleet`: simulator fleet manager binary.
//!
//! Loads configuration, wires the fleet, checkpoint, and scoring components
//! into a trial orchestrator, and runs one subcommand until it finishes or a
//! shutdown signal arrives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use sitl_fleet::config::GlobalConfig;
use sitl_fleet::fleet::FleetManager;
use sitl_fleet::mavlink::UdpChannelFactory;
use sitl_fleet::trial::{FleetSource, Teardown, TrialOrchestrator};
use sitl_fleet::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sitl-fleet", about = "SITL fleet manager", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch a fleet and keep it running until interrupted.
    Launch {
        /// Number of simulators; defaults to `simulation.instance_count`.
        #[arg(long)]
        count: Option<usize>,
        /// Simulation speed factor; defaults to `simulation.speed`.
        #[arg(long)]
        speed: Option<f64>,
        /// Run simulators with their interactive shell attached.
        #[arg(long)]
        foreground: bool,
    },
    /// Print the index to process id mapping of running simulators.
    Discover,
    /// Score a running fleet once.
    Score {
        /// Number of instances to score.
        #[arg(long)]
        count: Option<usize>,
    },
    /// Run one trial and print its report.
    Trial {
        /// JSON file holding an array of parameter vectors.
        #[arg(long, conflicts_with = "repeat")]
        params: Option<PathBuf>,
        /// Fly the default parameter vector on this many instances.
        #[arg(long)]
        repeat: Option<usize>,
        /// Start from the saved fleet image instead of a cold launch.
        #[arg(long)]
        restore: bool,
        /// Snapshot the fleet after scoring instead of only terminating it.
        #[arg(long)]
        snapshot: bool,
    },
    /// Cold-launch, start the mission, and save a fleet image.
    Snapshot {
        /// Number of simulators.
        #[arg(long)]
        count: Option<usize>,
    },
    /// Recover the saved fleet image and restore its simulators.
    Restore {
        /// Number of instances to restore.
        #[arg(long)]
        count: Option<usize>,
    },
    /// Manage the saved fleet image.
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ImageAction {
    /// Copy the live working tree into the image directory.
    Save,
    /// Copy the image directory over the live working tree.
    Recover,
    /// Report files that differ between the image and the working tree.
    Verify,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("sitl-fleet bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    let params = config.load_param_defaults()?;
    info!(params = params.len(), "configuration loaded");

    // ── Wire components ─────────────────────────────────
    let ct = CancellationToken::new();
    let fleet = Arc::new(FleetManager::new(Arc::clone(&config))?);
    let channels = Arc::new(UdpChannelFactory::new(config.simulation.base_port));
    let orchestrator = Arc::new(TrialOrchestrator::new(
        Arc::clone(&config),
        Arc::clone(&fleet),
        channels,
        params,
        ct.clone(),
    ));

    let work_ct = ct.clone();
    let work_orchestrator = Arc::clone(&orchestrator);
    let mut work = tokio::spawn(async move {
        execute(&work_orchestrator, args.command, &work_ct).await
    });

    // ── Run until done or interrupted ───────────────────
    let joined = tokio::select! {
        joined = &mut work => joined,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            fleet.terminate_all().await;
            work.await
        }
    };

    let outcome = joined.map_err(|err| AppError::Fleet(format!("command task failed: {err}")))?;
    if let Err(ref err) = outcome {
        error!(%err, "command failed");
    }
    info!("sitl-fleet shut down");
    outcome
}

async fn execute(
    orchestrator: &TrialOrchestrator,
    command: Command,
    ct: &CancellationToken,
) -> Result<()> {
    let config = Arc::clone(orchestrator.fleet().config());
    let default_count = config.simulation.instance_count;

    match command {
        Command::Launch {
            count,
            speed,
            foreground,
        } => {
            let instances = orchestrator
                .fleet()
                .launch_all(
                    count.unwrap_or(default_count),
                    speed.unwrap_or(config.simulation.speed),
                    !foreground && config.simulation.daemon,
                )
                .await?;
            print_json(&instances)?;
            info!("fleet running; interrupt to stop");
            ct.cancelled().await;
        }
        Command::Discover => {
            print_json(&orchestrator.fleet().discover_process_ids().await)?;
        }
        Command::Score { count } => {
            let report = orchestrator
                .score_running_fleet(count.unwrap_or(default_count))
                .await;
            print_json(&report)?;
        }
        Command::Trial {
            params,
            repeat,
            restore,
            snapshot,
        } => {
            let group = match params {
                Some(path) => load_param_group(&path)?,
                None => vec![
                    orchestrator.params().default_vector();
                    repeat.unwrap_or(default_count)
                ],
            };
            let source = if restore {
                FleetSource::Restore
            } else {
                FleetSource::Cold
            };
            let teardown = if snapshot {
                Teardown::Snapshot
            } else {
                Teardown::Terminate
            };
            let report = orchestrator.run_trial(&group, source, teardown).await?;
            print_json(&report)?;
        }
        Command::Snapshot { count } => {
            let dumped = orchestrator
                .prepare_snapshot(count.unwrap_or(default_count))
                .await?;
            print_json(&dumped)?;
        }
        Command::Restore { count } => {
            let indices: Vec<usize> = (0..count.unwrap_or(default_count)).collect();
            orchestrator.checkpoints().recover_fleet_image().await?;
            let restored = orchestrator
                .checkpoints()
                .restore_all(&indices, orchestrator.fleet())
                .await;
            print_json(&restored)?;
        }
        Command::Image { action } => image_command(orchestrator, action).await?,
    }
    Ok(())
}

async fn image_command(orchestrator: &TrialOrchestrator, action: ImageAction) -> Result<()> {
    let checkpoints = orchestrator.checkpoints();
    match action {
        ImageAction::Save => {
            checkpoints.save_fleet_image().await?;
        }
        ImageAction::Recover => {
            checkpoints.recover_fleet_image().await?;
        }
        ImageAction::Verify => {
            let divergences = checkpoints.verify_fleet_image().await?;
            for entry in &divergences {
                println!("{:?}\t{}", entry.kind, entry.file_path);
            }
            if !divergences.is_empty() {
                warn!(count = divergences.len(), "image verification found divergences");
            }
        }
    }
    Ok(())
}

fn load_param_group(path: &Path) -> Result<Vec<Vec<f32>>> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::Config(format!("failed to read {}: {err}", path.display()))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
