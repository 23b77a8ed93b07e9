//! main.rs — device-sim entry point
//!
//! Runs the complete bridge pipeline against scripted hardware: a simulated
//! shot timer plus N simulated plate sensors behind the transport contract.
//! Useful for development without radios, log tooling smoke runs, and
//! demonstrating the T0 → HIT → correlation flow end to end:
//!
//! ```text
//! device-sim --sensors 2 --shots 5 --strings 2
//! plate-ingest logs/bridge_$(date +%Y%m%d).ndjson --db logs/bridge.db
//! plate-report --db logs/bridge.db
//! ```
//!
//! With `--config` the simulator honors a real bridge config file (macs,
//! plates, detector tuning, logging) and merely stands in for the radios.

mod backend;
mod devices;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use plate_bridge::bridge::Bridge;
use plate_bridge::config::{load_config, AppCfg, DetectorCfg, LoggingCfg, SensorCfg, TimerCfg};

use backend::SimBackend;
use devices::{ImpactModel, StringPlan};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "device-sim", about = "Plate bridge against simulated timer + sensors")]
struct Args {
    /// Bridge config file; omit to synthesize one
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Simulated plate count (ignored with --config)
    #[arg(long, default_value_t = 1)]
    sensors: usize,
    /// Shots per string
    #[arg(long, default_value_t = 3)]
    shots: u8,
    /// Seconds between shots
    #[arg(long, default_value_t = 2.0)]
    shot_interval_s: f64,
    /// Strings of shots to run before going silent
    #[arg(long, default_value_t = 1)]
    strings: u32,
    /// Seconds from connect to the start tone
    #[arg(long, default_value_t = 3.0)]
    start_delay_s: f64,
    /// Drop each sensor link after this many seconds (reconnect exercise)
    #[arg(long)]
    flap_after_s: Option<f64>,
    /// Log directory (ignored with --config)
    #[arg(long, default_value = "./logs")]
    log_dir: String,
    /// Stop after this many seconds; 0 runs until Ctrl-C
    #[arg(long, default_value_t = 0.0)]
    run_for_s: f64,
}

fn synth_cfg(args: &Args) -> AppCfg {
    let sensors = (0..args.sensors.max(1))
        .map(|i| SensorCfg {
            plate: format!("P{}", i + 1),
            adapter: "sim0".into(),
            mac: format!("F8:FE:92:31:12:{:02X}", 0xe0 + i as u8),
            notify_uuid: "0000ffe4-0000-1000-8000-00805f9a34fb".into(),
            config_uuid: None,
            idle_reconnect_sec: 15.0,
            keepalive_batt_sec: 60.0,
            reconnect_initial_sec: 2.0,
            reconnect_max_sec: 20.0,
            reconnect_jitter_sec: 1.0,
        })
        .collect();
    AppCfg {
        amg: TimerCfg {
            adapter: "sim0".into(),
            mac: Some("60:09:C3:1F:DC:1A".into()),
            name: Some("AMG LAB COMM DC1A".into()),
            start_uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".into(),
            write_uuid: Some("6e400002-b5a3-f393-e0a9-e50e24dcca9e".into()),
            init_cmds: Vec::new(),
            commands: Default::default(),
            debug_raw: false,
            reconnect_initial_sec: 2.0,
            reconnect_max_sec: 20.0,
            reconnect_jitter_sec: 1.0,
        },
        sensors,
        detector: DetectorCfg::default(),
        logging: LoggingCfg {
            dir: args.log_dir.clone(),
            ..LoggingCfg::default()
        },
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "device_sim=info,plate_bridge=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => synth_cfg(&args),
    };
    cfg.validate()?;

    let plan = StringPlan {
        start_delay: Duration::from_secs_f64(args.start_delay_s.max(0.0)),
        shot_interval: Duration::from_secs_f64(args.shot_interval_s.max(0.05)),
        shots: args.shots,
        end_delay: Duration::from_millis(1500),
        strings: args.strings,
    };
    let timer_mac = cfg.amg.mac.clone().unwrap_or_else(|| "60:09:C3:1F:DC:1A".into());
    let timer_name = cfg.amg.name.clone().unwrap_or_else(|| "AMG LAB COMM DC1A".into());
    let sensor_macs: Vec<String> = cfg.sensors.iter().map(|s| s.mac.clone()).collect();

    info!(
        sensors = sensor_macs.len(),
        shots = plan.shots,
        strings = plan.strings,
        "device-sim starting"
    );

    let backend = Arc::new(SimBackend::new(
        &timer_mac,
        &timer_name,
        &sensor_macs,
        plan,
        ImpactModel::default(),
        args.flap_after_s.map(Duration::from_secs_f64),
    ));

    // Fatal here (bad config already handled above): un-openable log dir.
    let bridge = Bridge::new(cfg)?;
    info!(session_id = bridge.session_id(), "logging session");

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let stop_for_signal = stop_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        let _ = stop_for_signal.send(true);
    });
    if args.run_for_s > 0.0 {
        let stop_for_deadline = stop_tx.clone();
        let run_for = Duration::from_secs_f64(args.run_for_s);
        tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            let _ = stop_for_deadline.send(true);
        });
    }

    bridge.run(backend, stop_rx).await
}
