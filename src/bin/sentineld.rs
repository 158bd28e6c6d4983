//! sentineld - Threat Sentinel monitoring daemon
//!
//! This daemon:
//! 1. Opens the configured frame source and detection client
//! 2. Runs analysis cycles on a fixed interval (or once with --once)
//! 3. Classifies detections and dispatches cooldown-gated alerts
//! 4. Keeps the most recent incidents in memory and prints an overview on exit

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use threat_sentinel::{
    build_scheduler, CycleOutcome, Scheduler, SchedulerMode, SentinelConfig, TriggerOutcome,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Periodic frame analysis with threat classification and alerting"
)]
struct Args {
    /// Config file (JSON, or TOML by .toml extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single on-demand analysis cycle and exit.
    #[arg(long)]
    once: bool,

    /// Analysis interval in milliseconds (must respect the configured minimum).
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Print the incident log as JSON on exit.
    #[arg(long)]
    report: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(ms) = args.interval_ms {
        cfg.schedule.interval = Duration::from_millis(ms);
        cfg.scheduler_settings().validate()?;
    }
    if args.once {
        cfg.schedule.auto_analyze = false;
        cfg.schedule.camera_active = true;
    }

    log::info!(
        "sentineld {} source={} detection={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.detection.endpoint
    );
    let scheduler = build_scheduler(&cfg)?;

    if args.once {
        run_once(&scheduler)?;
    } else {
        run_daemon(&scheduler, &cfg)?;
    }

    scheduler.shutdown();
    print_overview(&scheduler)?;
    if args.report {
        let incidents = scheduler.incidents()?;
        println!("{}", serde_json::to_string_pretty(&incidents)?);
    }
    Ok(())
}

fn run_once(scheduler: &Scheduler) -> Result<()> {
    match scheduler.analyze_now()? {
        TriggerOutcome::Completed(report) => match report.outcome {
            CycleOutcome::Completed {
                assessment,
                dispatch,
                ..
            } => {
                println!("{}", assessment.summary_text);
                if let Some(dispatch) = dispatch {
                    println!("alert: {} ({:?})", assessment.dominant_alert, dispatch);
                }
                Ok(())
            }
            CycleOutcome::Failed { error } => Err(anyhow!("analysis failed: {}", error)),
            CycleOutcome::Skipped { reason } => Err(anyhow!("analysis skipped: {:?}", reason)),
        },
        TriggerOutcome::Busy => Err(anyhow!("an analysis cycle is already running")),
        TriggerOutcome::CameraInactive => Err(anyhow!("camera is off")),
    }
}

fn run_daemon(scheduler: &Scheduler, cfg: &SentinelConfig) -> Result<()> {
    if scheduler.mode()? != SchedulerMode::AutoRunning {
        scheduler.set_camera_active(true)?;
        scheduler.start_auto()?;
    }
    log::info!(
        "sentineld running every {}ms (minimum {}ms)",
        cfg.schedule.interval.as_millis(),
        cfg.schedule.min_interval.as_millis()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping analysis...");

    let stats = scheduler.stats();
    log::info!(
        "cycles started={} completed={} failed={} skipped={} dropped={}",
        stats.cycles_started,
        stats.cycles_completed,
        stats.cycles_failed,
        stats.cycles_skipped,
        stats.triggers_dropped
    );
    Ok(())
}

fn print_overview(scheduler: &Scheduler) -> Result<()> {
    let overview = scheduler.overview()?;
    if overview.is_empty() {
        eprintln!("no incidents recorded");
        return Ok(());
    }
    eprintln!("incident overview:");
    for entry in overview {
        eprintln!(
            "  {:<20} fire={} smoke={} crowd={} peak_density={:.0}%",
            entry.location,
            entry.fire_sightings,
            entry.smoke_sightings,
            entry.crowd_sightings,
            entry.peak_crowd_density * 100.0
        );
    }
    Ok(())
}
