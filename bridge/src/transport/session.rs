//! Per-device transport session.
//!
//! One session task per logical device (the timer, or each plate sensor).
//! The task owns the device handle for its whole life and runs the
//! connect → subscribe → pump → reconnect loop:
//!
//!   1. Connect ladder: direct by address (3 tries across `Busy`), then short
//!      targeted discovery toggling the address-type hint, then full passive
//!      discovery matched by address or name substring. Every rung holds the
//!      process-wide discovery gate.
//!   2. Pump: forward notifications (in transport order) to the orchestrator
//!      channel, run the battery keepalive, and force a reconnect when the
//!      stream goes idle.
//!   3. Backoff: on any failure, sleep `min(max, backoff) + jitter` and grow
//!      `backoff = min(max, max(1, backoff * 1.7))`; reset after a
//!      successful connect.
//!
//! Sessions never call back into the orchestrator synchronously; everything
//! flows through the [`SessionMsg`] channel, and a full channel blocks the
//! pump rather than dropping events.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    discovery_gate, AddressTypeHint, GattBackend, GattDevice, Notification, TransportError,
    BATTERY_LEVEL_UUID,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(12);
const BUSY_RETRY_PAUSE: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Session wiring ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Timer,
    Sensor,
}

/// Reconnect/backoff tuning, straight from config (seconds).
#[derive(Debug, Clone)]
pub struct BackoffCfg {
    pub initial_sec: f64,
    pub max_sec: f64,
    pub jitter_sec: f64,
}

/// A post-connect command already rendered to wire bytes.
#[derive(Debug, Clone)]
pub struct RenderedCmd {
    pub payload: Vec<u8>,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Source id on every message: `"timer"` or the plate label.
    pub label: String,
    pub role: DeviceRole,
    pub adapter: String,
    pub address: Option<String>,
    /// Case-insensitive name substring used by full discovery when no
    /// address is configured (timer only).
    pub name_hint: Option<String>,
    pub notify_uuid: String,
    pub write_uuid: Option<String>,
    pub init_cmds: Vec<RenderedCmd>,
    /// Force a reconnect after this much notification silence.
    pub idle_reconnect: Option<Duration>,
    /// Cadence of benign battery reads; pure keepalive traffic.
    pub keepalive_batt: Option<Duration>,
    /// Read and report the battery level once after connect.
    pub battery_snapshot: bool,
    pub backoff: BackoffCfg,
}

/// Everything a session tells the orchestrator.
#[derive(Debug)]
pub enum LinkEvent {
    Connecting,
    Connected,
    ConnectFailed { error: String },
    Disconnected { reason: &'static str },
    Battery { pct: Option<u8> },
    WriteOk { hex: String },
    WriteFailed { error: String },
    Notification(Notification),
}

#[derive(Debug)]
pub struct SessionMsg {
    pub label: String,
    pub role: DeviceRole,
    pub event: LinkEvent,
}

async fn send(tx: &mpsc::Sender<SessionMsg>, cfg: &SessionConfig, event: LinkEvent) -> bool {
    tx.send(SessionMsg {
        label: cfg.label.clone(),
        role: cfg.role,
        event,
    })
    .await
    .is_ok()
}

// ── Session loop ──────────────────────────────────────────────────────────────

/// Run one device session until shutdown. Never returns early on link
/// failures; every error is reported upstream and retried under backoff.
pub async fn run_session<B: GattBackend>(
    backend: Arc<B>,
    cfg: SessionConfig,
    tx: mpsc::Sender<SessionMsg>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = cfg.backoff.initial_sec.max(0.0);
    let max_backoff = cfg.backoff.max_sec.max(backoff);

    loop {
        if *shutdown.borrow() {
            return;
        }
        if !send(&tx, &cfg, LinkEvent::Connecting).await {
            return;
        }

        match establish(backend.as_ref(), &cfg).await {
            Ok(mut device) => {
                backoff = cfg.backoff.initial_sec.max(0.0);
                if !send(&tx, &cfg, LinkEvent::Connected).await {
                    device.disconnect().await;
                    return;
                }
                match device.subscribe(&cfg.notify_uuid).await {
                    Ok(rx) => {
                        run_init_cmds(&mut device, &cfg, &tx).await;
                        if cfg.battery_snapshot {
                            let pct = device
                                .read(BATTERY_LEVEL_UUID, READ_TIMEOUT)
                                .await
                                .ok()
                                .and_then(|v| v.first().copied());
                            send(&tx, &cfg, LinkEvent::Battery { pct }).await;
                        }
                        let reason = pump(&mut device, rx, &cfg, &tx, &mut shutdown).await;
                        device.disconnect().await;
                        let alive = send(&tx, &cfg, LinkEvent::Disconnected { reason }).await;
                        if reason == "shutdown" || !alive {
                            return;
                        }
                    }
                    Err(e) => {
                        device.disconnect().await;
                        warn!(label = %cfg.label, error = %e, "subscribe failed");
                        if !send(&tx, &cfg, LinkEvent::ConnectFailed { error: e.to_string() }).await {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(label = %cfg.label, error = %e, transient = e.is_transient(), "connect ladder exhausted");
                if !send(&tx, &cfg, LinkEvent::ConnectFailed { error: e.to_string() }).await {
                    return;
                }
            }
        }

        let jitter = if cfg.backoff.jitter_sec > 0.0 {
            rand::thread_rng().gen_range(0.0..cfg.backoff.jitter_sec)
        } else {
            0.0
        };
        let delay = Duration::from_secs_f64(backoff.min(max_backoff) + jitter);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
        backoff = (backoff * 1.7).max(1.0).min(max_backoff);
    }
}

// ── Connect ladder ────────────────────────────────────────────────────────────

async fn establish<B: GattBackend>(backend: &B, cfg: &SessionConfig) -> Result<B::Device, TransportError> {
    // Rung 1: direct connect by address. `Busy` means another stack
    // operation is mid-flight; pause and retry in place.
    if let Some(addr) = &cfg.address {
        for attempt in 1..=3u8 {
            let outcome = {
                let _gate = discovery_gate().await;
                backend.connect(&cfg.adapter, addr, AddressTypeHint::Public, CONNECT_TIMEOUT).await
            };
            match outcome {
                Ok(device) => return Ok(device),
                Err(TransportError::Busy) if attempt < 3 => {
                    debug!(label = %cfg.label, attempt, "stack busy, pausing before direct retry");
                    tokio::time::sleep(BUSY_RETRY_PAUSE).await;
                }
                Err(e) => {
                    debug!(label = %cfg.label, error = %e, "direct connect failed");
                    break;
                }
            }
        }

        // Rung 2: short targeted discovery, toggling the address-type hint
        // between the two stacks' variants.
        for hint in [AddressTypeHint::Public, AddressTypeHint::Random] {
            let resolved = {
                let _gate = discovery_gate().await;
                backend.resolve(&cfg.adapter, addr, hint, RESOLVE_TIMEOUT).await
            };
            match resolved {
                Ok(Some(peer)) => {
                    let connected = {
                        let _gate = discovery_gate().await;
                        backend.connect(&cfg.adapter, &peer.address, hint, CONNECT_TIMEOUT).await
                    };
                    match connected {
                        Ok(device) => return Ok(device),
                        Err(e) => debug!(label = %cfg.label, error = %e, ?hint, "resolved but connect failed"),
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(label = %cfg.label, error = %e, ?hint, "resolution scan failed"),
            }
        }
    }

    // Rung 3: full passive discovery. Address match is case-insensitive;
    // the timer may instead match on a name substring.
    let peers = {
        let _gate = discovery_gate().await;
        backend.discover(&cfg.adapter, DISCOVER_TIMEOUT).await?
    };
    if let Some(peer) = peers.into_iter().find(|p| matches_target(p, cfg)) {
        let _gate = discovery_gate().await;
        return backend.connect(&cfg.adapter, &peer.address, AddressTypeHint::Public, CONNECT_TIMEOUT).await;
    }
    Err(TransportError::NotFound)
}

fn matches_target(peer: &super::PeerInfo, cfg: &SessionConfig) -> bool {
    if let Some(addr) = &cfg.address {
        return peer.address.eq_ignore_ascii_case(addr);
    }
    if let Some(hint) = &cfg.name_hint {
        let hint = hint.to_lowercase();
        return peer.name.as_deref().map_or(false, |n| n.to_lowercase().contains(&hint));
    }
    false
}

// ── Post-connect commands ─────────────────────────────────────────────────────

async fn run_init_cmds<D: GattDevice>(device: &mut D, cfg: &SessionConfig, tx: &mpsc::Sender<SessionMsg>) {
    if cfg.init_cmds.is_empty() {
        return;
    }
    let Some(write_uuid) = &cfg.write_uuid else {
        send(tx, cfg, LinkEvent::WriteFailed { error: "no write characteristic configured".into() }).await;
        return;
    };
    for cmd in &cfg.init_cmds {
        if cmd.delay > Duration::ZERO {
            tokio::time::sleep(cmd.delay).await;
        }
        match device.write(write_uuid, &cmd.payload, true, WRITE_TIMEOUT).await {
            Ok(()) => {
                send(tx, cfg, LinkEvent::WriteOk { hex: hex::encode(&cmd.payload) }).await;
            }
            Err(e) => {
                send(tx, cfg, LinkEvent::WriteFailed { error: e.to_string() }).await;
            }
        }
    }
}

// ── Notification pump ─────────────────────────────────────────────────────────

async fn pump<D: GattDevice>(
    device: &mut D,
    mut rx: mpsc::Receiver<Notification>,
    cfg: &SessionConfig,
    tx: &mpsc::Sender<SessionMsg>,
    shutdown: &mut watch::Receiver<bool>,
) -> &'static str {
    let mut keepalive = cfg
        .keepalive_batt
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));
    let mut last_activity = Instant::now();

    loop {
        let idle_deadline = cfg.idle_reconnect.map(|d| last_activity + d);
        let idle_sleep = async {
            match idle_deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let keepalive_tick = async {
            match keepalive.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(n) => {
                    last_activity = Instant::now();
                    // A full channel blocks here; backpressure must reach the
                    // transport instead of dropping events.
                    if !send(tx, cfg, LinkEvent::Notification(n)).await {
                        return "shutdown";
                    }
                }
                None => return "link_lost",
            },
            _ = idle_sleep => return "idle_timeout",
            _ = keepalive_tick => {
                // Traffic, not data: errors are swallowed.
                let _ = device.read(BATTERY_LEVEL_UUID, READ_TIMEOUT).await;
            }
            _ = shutdown.changed() => return "shutdown",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
