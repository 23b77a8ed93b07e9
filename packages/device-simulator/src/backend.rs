//! backend.rs — transport backend over scripted devices
//!
//! Implements the bridge's `GattBackend` contract with in-process simulated
//! peripherals, so the complete pipeline (session ladder, keepalive,
//! classifier, detector, logger) runs without hardware. A broadcast channel
//! carries shot instants from the timer script to every connected plate so
//! impacts land shortly after their shot frames, exactly as in the field.
//!
//! Link-flap injection closes a sensor's notification stream after a
//! configurable uptime; the bridge's reconnect machinery takes it from there.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use plate_bridge::transport::{
    monotonic_ns, AddressTypeHint, GattBackend, GattDevice, Notification, PeerInfo, TransportError,
    BATTERY_LEVEL_UUID,
};

use crate::devices::{shot_frame, string_end_frame, t0_frame, vibration_frame, ImpactModel, StringPlan};

const CONNECT_LATENCY: Duration = Duration::from_millis(50);
const RESOLVE_LATENCY: Duration = Duration::from_millis(100);
const DISCOVER_LATENCY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimRole {
    Timer,
    Sensor,
}

pub struct SimBackend {
    peers: Vec<PeerInfo>,
    roles: HashMap<String, SimRole>,
    plan: StringPlan,
    impact: ImpactModel,
    /// Close each sensor link after this uptime (reconnect exercise).
    flap_after: Option<Duration>,
    shot_tx: broadcast::Sender<()>,
}

impl SimBackend {
    pub fn new(
        timer_mac: &str,
        timer_name: &str,
        sensor_macs: &[String],
        plan: StringPlan,
        impact: ImpactModel,
        flap_after: Option<Duration>,
    ) -> Self {
        let (shot_tx, _) = broadcast::channel(64);
        let mut peers = vec![PeerInfo {
            address: timer_mac.to_string(),
            name: Some(timer_name.to_string()),
            rssi: Some(-55),
        }];
        let mut roles = HashMap::new();
        roles.insert(timer_mac.to_lowercase(), SimRole::Timer);
        for mac in sensor_macs {
            peers.push(PeerInfo {
                address: mac.clone(),
                name: Some("WTVB01-BT50".to_string()),
                rssi: Some(-62),
            });
            roles.insert(mac.to_lowercase(), SimRole::Sensor);
        }
        Self { peers, roles, plan, impact, flap_after, shot_tx }
    }
}

#[async_trait]
impl GattBackend for SimBackend {
    type Device = SimDevice;

    async fn connect(
        &self,
        _adapter: &str,
        address: &str,
        _hint: AddressTypeHint,
        _timeout: Duration,
    ) -> Result<SimDevice, TransportError> {
        tokio::time::sleep(CONNECT_LATENCY).await;
        let role = self
            .roles
            .get(&address.to_lowercase())
            .copied()
            .ok_or(TransportError::NotFound)?;
        debug!(address, ?role, "sim connect");
        Ok(SimDevice {
            role,
            plan: self.plan.clone(),
            impact: self.impact.clone(),
            flap_after: self.flap_after,
            shot_tx: self.shot_tx.clone(),
            stream: None,
        })
    }

    async fn resolve(
        &self,
        _adapter: &str,
        address: &str,
        _hint: AddressTypeHint,
        _timeout: Duration,
    ) -> Result<Option<PeerInfo>, TransportError> {
        tokio::time::sleep(RESOLVE_LATENCY).await;
        Ok(self.peers.iter().find(|p| p.address.eq_ignore_ascii_case(address)).cloned())
    }

    async fn discover(&self, _adapter: &str, _timeout: Duration) -> Result<Vec<PeerInfo>, TransportError> {
        tokio::time::sleep(DISCOVER_LATENCY).await;
        Ok(self.peers.clone())
    }
}

pub struct SimDevice {
    role: SimRole,
    plan: StringPlan,
    impact: ImpactModel,
    flap_after: Option<Duration>,
    shot_tx: broadcast::Sender<()>,
    stream: Option<tokio::task::JoinHandle<()>>,
}

fn note(payload: Vec<u8>) -> Notification {
    Notification { monotonic_ns: monotonic_ns(), payload }
}

#[async_trait]
impl GattDevice for SimDevice {
    async fn subscribe(&mut self, _characteristic: &str) -> Result<mpsc::Receiver<Notification>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        let handle = match self.role {
            SimRole::Timer => tokio::spawn(run_timer_script(tx, self.plan.clone(), self.shot_tx.clone())),
            SimRole::Sensor => tokio::spawn(run_sensor_stream(
                tx,
                self.impact.clone(),
                self.shot_tx.subscribe(),
                self.flap_after,
            )),
        };
        self.stream = Some(handle);
        Ok(rx)
    }

    async fn read(&mut self, characteristic: &str, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if characteristic == BATTERY_LEVEL_UUID {
            return Ok(vec![86]);
        }
        Ok(Vec::new())
    }

    async fn write(
        &mut self,
        _characteristic: &str,
        _payload: &[u8],
        _response: bool,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(handle) = self.stream.take() {
            handle.abort();
        }
    }
}

// ── Device scripts ────────────────────────────────────────────────────────────

/// Run the configured strings of shots, then hold the link open silently.
async fn run_timer_script(tx: mpsc::Sender<Notification>, plan: StringPlan, shot_tx: broadcast::Sender<()>) {
    let split_cs = (plan.shot_interval.as_secs_f64() * 100.0).round() as u16;
    for string_idx in 0..plan.strings {
        let tail = (string_idx % 250 + 1) as u8;
        tokio::time::sleep(plan.start_delay).await;
        if tx.send(note(t0_frame(tail).to_vec())).await.is_err() {
            return;
        }
        for shot in 1..=plan.shots {
            tokio::time::sleep(plan.shot_interval).await;
            let t_cs = split_cs.saturating_mul(shot as u16);
            let frame = shot_frame(shot, t_cs, split_cs, split_cs, tail);
            if tx.send(note(frame.to_vec())).await.is_err() {
                return;
            }
            let _ = shot_tx.send(());
        }
        tokio::time::sleep(plan.end_delay).await;
        if tx.send(note(string_end_frame(tail).to_vec())).await.is_err() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// 100 Hz amplitude stream: Gaussian noise floor plus ring-down bursts a
/// flight delay after each shot. Returning closes the notification channel,
/// which the session reports as a lost link.
async fn run_sensor_stream(
    tx: mpsc::Sender<Notification>,
    impact: ImpactModel,
    mut shot_rx: broadcast::Receiver<()>,
    flap_after: Option<Duration>,
) {
    let mut rng = StdRng::from_entropy();
    let mut pending: VecDeque<f64> = VecDeque::new();
    let mut ticker = tokio::time::interval(impact.dt);
    let started = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let extra = pending.pop_front().unwrap_or(0.0);
                let amp = impact.noise(&mut rng) + extra;
                if tx.send(note(vibration_frame(amp, 21.5).to_vec())).await.is_err() {
                    return;
                }
                if flap_after.is_some_and(|flap| started.elapsed() >= flap) {
                    debug!("sim sensor link flap");
                    return;
                }
            }
            result = shot_rx.recv() => {
                if result.is_ok() {
                    for _ in 0..impact.flight_samples() {
                        pending.push_back(0.0);
                    }
                    pending.extend(impact.burst());
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use plate_bridge::bridge::Bridge;
    use plate_bridge::config::{AppCfg, DetectorCfg, LogMode, LoggingCfg, SensorCfg, TimerCfg};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::watch;

    const TIMER_MAC: &str = "60:09:C3:1F:DC:1A";
    const SENSOR_MAC: &str = "F8:FE:92:31:12:E3";

    fn sim_cfg(dir: &std::path::Path) -> AppCfg {
        AppCfg {
            amg: TimerCfg {
                adapter: "sim0".into(),
                mac: Some(TIMER_MAC.into()),
                name: None,
                start_uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".into(),
                write_uuid: None,
                init_cmds: Vec::new(),
                commands: Default::default(),
                debug_raw: false,
                reconnect_initial_sec: 0.2,
                reconnect_max_sec: 1.0,
                reconnect_jitter_sec: 0.0,
            },
            sensors: vec![SensorCfg {
                plate: "P1".into(),
                adapter: "sim0".into(),
                mac: SENSOR_MAC.into(),
                notify_uuid: "0000ffe4-0000-1000-8000-00805f9a34fb".into(),
                config_uuid: None,
                idle_reconnect_sec: 15.0,
                keepalive_batt_sec: 60.0,
                reconnect_initial_sec: 0.2,
                reconnect_max_sec: 1.0,
                reconnect_jitter_sec: 0.0,
            }],
            detector: DetectorCfg::default(),
            logging: LoggingCfg {
                dir: dir.display().to_string(),
                file_prefix: "simtest".into(),
                mode: LogMode::Verbose,
                dual_file: false,
                ..LoggingCfg::default()
            },
        }
    }

    fn quick_plan() -> StringPlan {
        StringPlan {
            start_delay: Duration::from_millis(500),
            shot_interval: Duration::from_millis(500),
            shots: 2,
            end_delay: Duration::from_millis(300),
            strings: 1,
        }
    }

    fn read_events(dir: &std::path::Path) -> Vec<Value> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if !name.starts_with("simtest_") || name.len() <= "simtest_YYYYMMDD.ndjson".len() {
                continue;
            }
            for line in std::fs::read_to_string(&path).expect("read").lines() {
                if !line.trim().is_empty() {
                    out.push(serde_json::from_str(line).expect("json"));
                }
            }
        }
        out
    }

    async fn run_bridge_for(cfg: AppCfg, backend: SimBackend, virtual_secs: u64) {
        let bridge = Bridge::new(cfg).expect("bridge");
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(bridge.run(Arc::new(backend), stop_rx));
        tokio::time::sleep(Duration::from_secs(virtual_secs)).await;
        let _ = stop_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(60), run).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_pipeline_produces_t0_hits_and_session_end() {
        let tmp = tempfile::tempdir().expect("tmp");
        let backend = SimBackend::new(
            TIMER_MAC,
            "AMG LAB COMM DC1A",
            &[SENSOR_MAC.to_string()],
            quick_plan(),
            ImpactModel::default(),
            None,
        );
        run_bridge_for(sim_cfg(tmp.path()), backend, 8).await;

        let events = read_events(tmp.path());
        assert!(events.iter().any(|e| e["msg"] == "Timer_connected"));
        assert!(events.iter().any(|e| e["msg"] == "Sensor_connected"));
        assert!(events.iter().any(|e| e["msg"] == "Sensor_battery"));

        let t0 = events.iter().find(|e| e["msg"] == "T0").expect("t0 event");
        assert_eq!(t0["t_rel_ms"], 0.0);

        let shots: Vec<_> = events.iter().filter(|e| e["msg"] == "Timer_SHOT").collect();
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0]["data"]["amg"]["shot_idx"], 1);

        let hits: Vec<_> = events.iter().filter(|e| e["msg"] == "Sensor_HIT").collect();
        assert!(!hits.is_empty(), "expected at least one hit");
        for hit in &hits {
            assert_eq!(hit["plate"], "P1");
            assert!(hit["t_rel_ms"].as_f64().expect("t_rel") > 0.0);
            assert!(hit["data"]["dur_ms"].as_f64().expect("dur") >= 30.0);
        }

        assert!(events.iter().any(|e| e["msg"] == "String_END"));
        let end = events.iter().find(|e| e["msg"] == "Timer_SESSION_END").expect("session end");
        assert_eq!(end["data"]["reason"], "arrow");

        assert!(events.iter().any(|e| e["msg"] == "alive"));
    }

    #[tokio::test(start_paused = true)]
    async fn link_flap_triggers_reconnect() {
        let tmp = tempfile::tempdir().expect("tmp");
        let backend = SimBackend::new(
            TIMER_MAC,
            "AMG LAB COMM DC1A",
            &[SENSOR_MAC.to_string()],
            quick_plan(),
            ImpactModel::default(),
            Some(Duration::from_secs(2)),
        );
        run_bridge_for(sim_cfg(tmp.path()), backend, 8).await;

        let events = read_events(tmp.path());
        let connected = events.iter().filter(|e| e["msg"] == "Sensor_connected").count();
        assert!(connected >= 2, "expected a reconnect, saw {connected} connects");
        assert!(events
            .iter()
            .any(|e| e["msg"] == "Sensor_disconnected" && e["data"]["reason"] == "link_lost"));
    }
}
