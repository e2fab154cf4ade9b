/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Gate arm controller simulator.
//!
//! Answers `@<drop>?`, `@<drop>O` and `@<drop>C` requests with a status line
//! for every gate in the scenario.  Commands start a movement that completes
//! after the gate's travel time; gates in local control or with a fault code
//! ignore them.
//!
//! Scenario file:
//!
//! ```yaml
//! gates:
//!   - drop: 5
//!     position: closed
//!     travel_s: 6
//!   - drop: 6
//!     position: open
//!     local_control: true
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fieldcomm::comm::gate::{GateCommand, GateStatus, MAX_DROP};

#[derive(Debug, Parser)]
#[command(name = "gate-sim", about = "Simulates ASCII gate arm controllers", long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(short, long, default_value_t = 4002)]
    port: u16,

    /// YAML scenario; without one a single closed gate at drop 1 is simulated.
    #[arg(long)]
    scenario: Option<PathBuf>,
}

// ── Scenario ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    gates: Vec<GateEntry>,
}

#[derive(Debug, Deserialize)]
struct GateEntry {
    drop: u16,
    #[serde(default = "default_position")]
    position: Position,
    #[serde(default = "default_travel_s")]
    travel_s: u64,
    #[serde(default)]
    local_control: bool,
    #[serde(default)]
    fault_code: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Position {
    Open,
    Closed,
}

fn default_position() -> Position {
    Position::Closed
}

fn default_travel_s() -> u64 {
    6
}

fn load_scenario(path: &Path) -> Result<Vec<GateEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read scenario file: {}", path.display()))?;
    let file: ScenarioFile = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse scenario file: {}", path.display()))?;
    for g in &file.gates {
        if g.drop == 0 || g.drop > MAX_DROP {
            bail!("gate drop {} out of range 1..={}", g.drop, MAX_DROP);
        }
    }
    Ok(file.gates)
}

// ── Simulated gate ────────────────────────────────────────────────────────────

// Wire positions.
const OPENING: u32 = 1;
const OPEN: u32 = 2;
const CLOSING: u32 = 3;
const CLOSED: u32 = 4;

struct Gate {
    position: u32,
    moving: Option<(GateCommand, Instant)>,
    travel: Duration,
    local_control: bool,
    fault_code: u32,
}

impl Gate {
    fn from_entry(e: &GateEntry) -> Self {
        Self {
            position: match e.position {
                Position::Open => OPEN,
                Position::Closed => CLOSED,
            },
            moving: None,
            travel: Duration::from_secs(e.travel_s),
            local_control: e.local_control,
            fault_code: e.fault_code,
        }
    }

    fn command(&mut self, cmd: GateCommand) {
        if self.local_control || self.fault_code != 0 {
            return;
        }
        let (moving, done) = match cmd {
            GateCommand::Open => (OPENING, OPEN),
            GateCommand::Close => (CLOSING, CLOSED),
        };
        if self.position != done {
            self.position = moving;
            self.moving = Some((cmd, Instant::now()));
        }
    }

    fn status(&mut self) -> GateStatus {
        if let Some((cmd, started)) = self.moving {
            if started.elapsed() >= self.travel {
                self.position = match cmd {
                    GateCommand::Open => OPEN,
                    GateCommand::Close => CLOSED,
                };
                self.moving = None;
            }
        }
        GateStatus {
            position: self.position,
            fault_code: self.fault_code,
            local_control: self.local_control,
        }
    }
}

type Gates = Arc<Mutex<HashMap<u16, Gate>>>;

/// Split `@<drop><code>` into its parts.
fn parse_request(line: &str) -> Option<(u16, char)> {
    let body = line.strip_prefix('@')?;
    let code = body.chars().last()?;
    let drop = body[..body.len() - code.len_utf8()].parse().ok()?;
    Some((drop, code))
}

async fn serve(stream: TcpStream, gates: Gates) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if rd.read_until(b'\r', &mut buf).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        let Some((drop, code)) = parse_request(line) else {
            warn!(%line, "unparsable request");
            continue;
        };
        let reply = {
            let mut gates = gates.lock().await;
            let Some(gate) = gates.get_mut(&drop) else {
                debug!(drop, "no gate at drop");
                continue;
            };
            match code {
                '?' => {}
                'O' => gate.command(GateCommand::Open),
                'C' => gate.command(GateCommand::Close),
                other => {
                    warn!(drop, code = %other, "unknown request code");
                    continue;
                }
            }
            gate.status().encode(drop)
        };
        wr.write_all(format!("{}\r\n", reply).as_bytes()).await?;
        debug!(drop, %reply, "answered");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let entries = match &cli.scenario {
        Some(path) => load_scenario(path)?,
        None => vec![GateEntry {
            drop: 1,
            position: Position::Closed,
            travel_s: default_travel_s(),
            local_control: false,
            fault_code: 0,
        }],
    };
    let gates: Gates = Arc::new(Mutex::new(
        entries.iter().map(|e| (e.drop, Gate::from_entry(e))).collect(),
    ));

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Cannot listen on {}", addr))?;
    info!(%addr, gates = entries.len(), "gate-sim listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "client connected");
        let gates = Arc::clone(&gates);
        tokio::spawn(async move {
            match serve(stream, gates).await {
                Ok(()) => info!(%peer, "client disconnected"),
                Err(e) => warn!(%peer, "connection closed: {:#}", e),
            }
        });
    }
}
