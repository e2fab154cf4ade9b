/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Vehicle detector simulator.
//!
//! Listens on TCP and answers FT1.2 requests for any drop address:
//!
//! * link reset → acknowledge, next request starts a fresh FCB sequence
//! * request data → up to four synthetic vehicles, or "no data"
//! * request data with the previous FCB → the previous answer again
//!
//! ```text
//! detector-sim --port 4001 --interval-ms 1500
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use fieldcomm::comm::ft12::{self, Frame};
use fieldcomm::comm::tdc::{self, VehicleInfo};

#[derive(Debug, Parser)]
#[command(name = "detector-sim", about = "Simulates FT1.2 vehicle detectors", long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    #[arg(short, long, default_value_t = 4001)]
    port: u16,

    /// Mean time between simulated vehicles.
    #[arg(long = "interval-ms", default_value_t = 2000)]
    interval_ms: u64,

    /// Vehicle record size: 6, 7 or 11 bytes.
    #[arg(long = "record-size", default_value_t = 7)]
    record_size: usize,

    /// Drop every Nth answer to exercise FCB retries (0 = never).
    #[arg(long = "drop-every", default_value_t = 0)]
    drop_every: u32,
}

// ── Simulated detector ────────────────────────────────────────────────────────

const SPEEDS: [u8; 8] = [88, 92, 75, 104, 96, 61, 83, 110];

struct Detector {
    count: u32,
    last_fcb: Option<bool>,
    last_answer: Option<Vec<u8>>,
    reported_at: Instant,
    answers: u32,
}

impl Detector {
    fn new() -> Self {
        Self {
            count: 0,
            last_fcb: None,
            last_answer: None,
            reported_at: Instant::now(),
            answers: 0,
        }
    }

    fn reset(&mut self) {
        self.last_fcb = None;
        self.last_answer = None;
    }

    /// Vehicles that passed since the last report, at most four.
    fn passed(&mut self, interval: Duration) -> Vec<VehicleInfo> {
        let elapsed = self.reported_at.elapsed();
        let n = (elapsed.as_millis() / interval.as_millis().max(1)) as usize;
        let n = n.min(tdc::MAX_VEHICLES);
        if n == 0 {
            return Vec::new();
        }
        self.reported_at = Instant::now();
        let gap = u16::try_from(elapsed.as_millis() / n as u128).unwrap_or(u16::MAX);
        (0..n)
            .map(|i| {
                let k = (self.count as usize + i) % SPEEDS.len();
                VehicleInfo {
                    speed_kph: SPEEDS[k],
                    class_lane: 0x10 | (k % 2 + 1) as u8,
                    duration_ms: 120 + 20 * k as u16,
                    gap_ms: gap,
                    length_dm: Some(40 + k as u8),
                    sync_stamp: Some(0),
                }
            })
            .collect()
    }

    fn answer(&mut self, frame: &Frame, cli: &Cli) -> Result<Vec<u8>> {
        let (Some(ctrl), Some(address)) = (frame.ctrl(), frame.address()) else {
            bail!("acknowledge frame sent to a detector");
        };
        let drop = u16::from(address);
        match ctrl & ft12::FUNC_MASK {
            tdc::FUNC_RESET_LINK => {
                self.reset();
                Ok(Frame::Ack.encode())
            }
            tdc::FUNC_REQUEST_DATA => {
                let fcb = ctrl & ft12::CTRL_FCB != 0;
                if ctrl & ft12::CTRL_FCV != 0 && self.last_fcb == Some(fcb) {
                    if let Some(prev) = &self.last_answer {
                        debug!(drop, "repeating previous answer");
                        return Ok(prev.clone());
                    }
                }
                let vehicles = self.passed(Duration::from_millis(cli.interval_ms));
                let out = if vehicles.is_empty() {
                    ft12::encode_short(tdc::RSP_NO_DATA, drop)?
                } else {
                    self.count = self.count.wrapping_add(vehicles.len() as u32);
                    let data = tdc::encode_traffic(0, self.count, &vehicles, cli.record_size);
                    ft12::encode_long(tdc::RSP_USER_DATA, drop, &data)?
                };
                self.last_fcb = Some(fcb);
                self.last_answer = Some(out.clone());
                Ok(out)
            }
            other => bail!("unsupported function {:#04x}", other),
        }
    }
}

// ── Frame reading ─────────────────────────────────────────────────────────────

/// Read one request frame; `None` on a clean end of stream.
async fn read_request(rd: &mut TcpStream) -> Result<Option<Frame>> {
    let mut id = [0_u8; 1];
    if rd.read(&mut id).await? == 0 {
        return Ok(None);
    }
    let frame = match id[0] {
        ft12::ACK => Frame::Ack,
        ft12::START_SHORT => {
            let mut b = [0_u8; 4];
            rd.read_exact(&mut b).await?;
            let [ctrl, address, cs, end] = b;
            if end != ft12::END || cs != ft12::checksum(&[ctrl, address]) {
                bail!("corrupt short frame {:02x?}", b);
            }
            Frame::Short { ctrl, address }
        }
        ft12::START_LONG => {
            let mut hdr = [0_u8; 3];
            rd.read_exact(&mut hdr).await?;
            let len = usize::from(hdr[0]);
            if hdr[0] != hdr[1] || hdr[2] != ft12::START_LONG || len < 2 {
                bail!("corrupt long frame header {:02x?}", hdr);
            }
            let mut body = vec![0_u8; len + 2];
            rd.read_exact(&mut body).await?;
            if body[len + 1] != ft12::END || body[len] != ft12::checksum(&body[..len]) {
                bail!("corrupt long frame body");
            }
            Frame::Long {
                ctrl: body[0],
                address: body[1],
                data: body[2..len].to_vec(),
            }
        }
        other => bail!("unexpected frame id {:#04x}", other),
    };
    Ok(Some(frame))
}

async fn serve(mut stream: TcpStream, cli: &Cli) -> Result<()> {
    let mut detectors: HashMap<u8, Detector> = HashMap::new();
    while let Some(frame) = read_request(&mut stream).await? {
        let Some(address) = frame.address() else {
            continue;
        };
        let det = detectors.entry(address).or_insert_with(Detector::new);
        let answer = det.answer(&frame, cli)?;
        det.answers += 1;
        if cli.drop_every > 0 && det.answers % cli.drop_every == 0 {
            debug!(drop = address, "withholding answer");
            continue;
        }
        stream.write_all(&answer).await?;
        debug!(drop = address, count = det.count, bytes = answer.len(), "answered");
    }
    Ok(())
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
    if !tdc::RECORD_SIZES.contains(&cli.record_size) {
        bail!("record size must be one of {:?}", tdc::RECORD_SIZES);
    }
    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Cannot listen on {}", addr))?;
    info!(%addr, interval_ms = cli.interval_ms, "detector-sim listening");

    let cli = Arc::new(cli);
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "client connected");
        let cli = Arc::clone(&cli);
        tokio::spawn(async move {
            match serve(stream, &cli).await {
                Ok(()) => info!(%peer, "client disconnected"),
                Err(e) => warn!(%peer, "connection closed: {:#}", e),
            }
        });
    }
}
