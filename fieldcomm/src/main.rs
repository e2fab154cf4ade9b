/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use fieldcomm::clock;
use fieldcomm::config::CommConfigManager;
use fieldcomm::system::CommSystem;

/// Period of the link status report.
const STATUS_REPORT: Duration = Duration::from_secs(60);

// ── CLI argument definition ───────────────────────────────────────────────────

/// Field controller communication daemon.
///
/// Example:
///   fieldcomm --config /etc/fieldcomm/links.yaml --log-dir /var/log/fieldcomm
#[derive(Debug, Parser)]
#[command(
    name = "fieldcomm",
    about = "Polls field controllers over TCP/UDP links",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML link/controller configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Directory of per-link debug log toggle files (overrides the file).
    #[arg(short = 'l', long = "log-dir")]
    log_dir: Option<PathBuf>,

    /// Directory for sample snapshots (overrides the file).
    #[arg(short = 's', long = "sample-dir")]
    sample_dir: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        config     = %cli.config.display(),
        log_dir    = ?cli.log_dir,
        sample_dir = ?cli.sample_dir,
        "fieldcomm starting up"
    );

    // ── Load configuration ────────────────────────────────────────────────────
    let mut cfg = CommConfigManager::new();
    if let Some(dir) = cli.log_dir {
        cfg.set_log_dir(dir);
    }
    if let Some(dir) = cli.sample_dir {
        cfg.set_sample_dir(dir);
    }
    if let Err(e) = cfg.load_from_file(&cli.config) {
        error!("Failed to load configuration: {:#}", e);
        process::exit(1);
    }
    if cfg.sample_dir().is_none() {
        warn!("No sample directory configured, samples will not be written");
    }

    // ── Build and start ───────────────────────────────────────────────────────
    let mut system = match CommSystem::build(&cfg, clock::system_clock()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build comm system: {:#}", e);
            process::exit(1);
        }
    };
    if let Err(e) = system.start_sampling() {
        error!("Failed to start sampling: {:#}", e);
        process::exit(1);
    }

    // ── Run until interrupted ─────────────────────────────────────────────────
    let mut report = tokio::time::interval(STATUS_REPORT);
    report.tick().await;
    loop {
        tokio::select! {
            _ = report.tick() => {
                for name in system.link_names() {
                    if let Some(s) = system.link_status(name) {
                        info!(link = %s.name, status = %s.status, load = s.load, queued = s.queue_len, "link status");
                    }
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("Cannot listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("fieldcomm shutting down");
    // Joins the poller threads.
    let stopped = tokio::task::spawn_blocking(move || system.shutdown()).await;
    if let Err(e) = stopped {
        error!("Shutdown did not complete: {}", e);
    }
}
