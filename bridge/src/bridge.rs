//! Bridge orchestrator.
//!
//! Owns the process main loop: one transport session per configured device,
//! one hit detector per plate, the shared event logger, and the T0 session
//! state. Sessions deliver raw bytes and link events over a channel; the
//! orchestrator classifies timer frames, feeds sensor amplitudes through the
//! detectors, and writes structured events.
//!
//! ## Session lifecycle
//! A `T0` signal opens a shot session (stamping the monotonic clock);
//! `ARROW_END` / `TIMEOUT_END` close it with a `Timer_SESSION_END` record.
//! A disconnect never closes a session; only explicit signals or the next
//! `T0` do. The first `T0` after connect also synthesizes `Timer_START_BTN`
//! since the start button itself is not observable on the wire.
//!
//! ## Ordering
//! Per device, notifications are handled in transport order and `seq`
//! assignment follows handling order. Across devices no order is guaranteed;
//! correlation later relies on timestamps alone.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use frame_types::{classify_signals, TimerSignal, VibrationFrame};

use crate::commands::render_init_cmds;
use crate::config::{AppCfg, SensorCfg, TimerCfg};
use crate::detector::HitDetector;
use crate::logger::{record, NdjsonLogger};
use crate::transport::session::{
    run_session, BackoffCfg, DeviceRole, LinkEvent, SessionConfig, SessionMsg,
};
use crate::transport::{monotonic_ns, GattBackend, Notification};

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Nominal sensor sample spacing (100 Hz stream).
const SENSOR_DT_MS: f64 = 10.0;
/// Stream telemetry cadence: every N samples or after a silence gap.
const STREAM_STATUS_SAMPLES: u64 = 200;
const STREAM_STATUS_GAP_NS: u64 = 2_000_000_000;
/// Buffer status debug cadence (suppressed in regular mode unless whitelisted).
const BUFFER_STATUS_SAMPLES: u64 = 100;

#[derive(Debug, Default)]
struct StreamStats {
    samples: u64,
    amp_sum: f64,
    last_status_ns: u64,
    buffered: u64,
}

pub struct Bridge {
    cfg: AppCfg,
    logger: NdjsonLogger,
    detectors: HashMap<String, HitDetector>,
    stream_stats: HashMap<String, StreamStats>,
    connected_sensors: BTreeSet<String>,
    /// Monotonic stamp of the current session's T0, if one is open.
    t0_ns: Option<u64>,
    pending_session: bool,
}

impl Bridge {
    /// Build detectors and open the log files. An un-openable log directory
    /// is a fatal startup error.
    pub fn new(cfg: AppCfg) -> std::io::Result<Self> {
        let logger = NdjsonLogger::new(&cfg.logging)?;
        let detectors = cfg
            .sensors
            .iter()
            .map(|s| (s.plate.clone(), HitDetector::new(cfg.detector.clone())))
            .collect();
        let mut bridge = Self {
            cfg,
            logger,
            detectors,
            stream_stats: HashMap::new(),
            connected_sensors: BTreeSet::new(),
            t0_ns: None,
            pending_session: false,
        };
        let plates: Vec<&str> = bridge.cfg.sensors.iter().map(|s| s.plate.as_str()).collect();
        bridge.logger.write(record(
            "info",
            "Bridge_start",
            json!({"sensors": plates, "timer": bridge.cfg.amg.mac.clone().or_else(|| bridge.cfg.amg.name.clone())}),
        ));
        Ok(bridge)
    }

    pub fn session_id(&self) -> &str {
        self.logger.session_id()
    }

    /// Main loop: spawn one session task per device, then fold link events
    /// and the heartbeat until shutdown.
    pub async fn run<B: GattBackend>(
        mut self,
        backend: Arc<B>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<SessionMsg>(256);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_session(
            backend.clone(),
            timer_session_cfg(&self.cfg.amg),
            tx.clone(),
            shutdown.clone(),
        )));
        for sensor in &self.cfg.sensors {
            tasks.push(tokio::spawn(run_session(
                backend.clone(),
                sensor_session_cfg(sensor),
                tx.clone(),
                shutdown.clone(),
            )));
        }
        drop(tx);
        info!(sensors = self.cfg.sensors.len(), "bridge running");

        let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(msg) => self.handle_msg(msg),
                    None => break,
                },
                _ = heartbeat.tick() => self.write_heartbeat(),
                _ = shutdown.changed() => break,
            }
        }

        // Sessions watch the same shutdown signal; give them a grace period
        // to disconnect cleanly, then cut stragglers loose.
        drop(rx);
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.logger.flush();
        info!("bridge stopped");
        Ok(())
    }

    fn handle_msg(&mut self, msg: SessionMsg) {
        match msg.role {
            DeviceRole::Timer => self.handle_timer_event(msg.event),
            DeviceRole::Sensor => self.handle_sensor_event(&msg.label, msg.event),
        }
    }

    // ── Timer stream ──────────────────────────────────────────────────────────

    fn handle_timer_event(&mut self, event: LinkEvent) {
        let amg = &self.cfg.amg;
        let target = amg.mac.clone().or_else(|| amg.name.clone());
        match event {
            LinkEvent::Connecting => self.logger.write(record(
                "info",
                "Timer_connecting",
                json!({"adapter": amg.adapter, "target": target, "start_uuid": amg.start_uuid}),
            )),
            LinkEvent::Connected => self.logger.write(record(
                "info",
                "Timer_connected",
                json!({
                    "adapter": amg.adapter,
                    "mac": amg.mac,
                    "device_category": "Smart Timer",
                    "device_id": amg.mac.as_deref().map(device_id),
                    "start_uuid": amg.start_uuid,
                    "subscribed": true,
                }),
            )),
            LinkEvent::ConnectFailed { error } => self.logger.write(record(
                "error",
                "Timer_connect_failed",
                json!({"adapter": amg.adapter, "mac": amg.mac, "error": error}),
            )),
            LinkEvent::Disconnected { reason } => self.logger.write(record(
                "info",
                "Timer_disconnected",
                json!({"adapter": amg.adapter, "target": target, "reason": reason}),
            )),
            LinkEvent::Battery { .. } => {}
            LinkEvent::WriteOk { hex } => self.logger.write(record(
                "debug",
                "amg_write_init",
                json!({"len": hex.len() / 2, "hex": hex}),
            )),
            LinkEvent::WriteFailed { error } => {
                self.logger.write(record("error", "amg_write_failed", json!({"error": error})))
            }
            LinkEvent::Notification(n) => self.handle_timer_frame(&n),
        }
    }

    fn handle_timer_frame(&mut self, n: &Notification) {
        let raw_hex = hex::encode(&n.payload);
        if self.cfg.amg.debug_raw {
            self.logger.write(record("debug", "Shot_raw", json!({"raw": raw_hex})));
        }
        for signal in classify_signals(&n.payload) {
            match signal {
                TimerSignal::T0 => {
                    // No explicit start-button frame exists; the first T0 of a
                    // string stands in for it.
                    if !self.pending_session {
                        self.pending_session = true;
                        self.logger.write(record(
                            "event",
                            "Timer_START_BTN",
                            json!({"hex": raw_hex, "method": "inferred_at_t0"}),
                        ));
                    }
                    self.t0_ns = Some(n.monotonic_ns);
                    let mut rec = record("event", "T0", json!({"hex": raw_hex}));
                    rec.insert("t_rel_ms".into(), json!(0.0));
                    self.logger.write(rec);
                }
                TimerSignal::ShotRaw => {
                    let mut rec = record("event", "Timer_SHOT", json!({"hex": raw_hex}));
                    if let Some(t_rel) = self.t_rel_ms(n.monotonic_ns) {
                        rec.insert("t_rel_ms".into(), json!(t_rel));
                    }
                    self.logger.write(rec);
                }
                TimerSignal::ArrowEnd => {
                    self.logger.write(record("event", "String_END", json!({"hex": raw_hex})));
                    self.end_session("arrow");
                }
                TimerSignal::TimeoutEnd => {
                    self.logger.write(record("event", "String_TIMEOUT_END", json!({"hex": raw_hex})));
                    self.end_session("timeout");
                }
            }
        }
    }

    fn end_session(&mut self, reason: &str) {
        self.logger.write(record("event", "Timer_SESSION_END", json!({"reason": reason})));
        self.t0_ns = None;
        self.pending_session = false;
    }

    // ── Sensor streams ────────────────────────────────────────────────────────

    fn handle_sensor_event(&mut self, plate: &str, event: LinkEvent) {
        let (adapter, mac, notify_uuid) = self
            .cfg
            .sensors
            .iter()
            .find(|s| s.plate == plate)
            .map(|s| (s.adapter.clone(), s.mac.clone(), s.notify_uuid.clone()))
            .unwrap_or_default();
        match event {
            LinkEvent::Connecting => self.logger.write(record(
                "info",
                "Sensor_connecting",
                json!({"plate": plate, "adapter": adapter, "mac": mac}),
            )),
            LinkEvent::Connected => {
                self.connected_sensors.insert(plate.to_string());
                self.logger.write(record(
                    "info",
                    "Sensor_connected",
                    json!({"plate": plate, "adapter": adapter, "mac": mac, "notify_uuid": notify_uuid}),
                ));
            }
            LinkEvent::ConnectFailed { error } => self.logger.write(record(
                "error",
                "Sensor_connect_failed",
                json!({"plate": plate, "adapter": adapter, "mac": mac, "error": error}),
            )),
            LinkEvent::Disconnected { reason } => {
                self.connected_sensors.remove(plate);
                self.logger.write(record(
                    "info",
                    "Sensor_disconnected",
                    json!({"plate": plate, "reason": reason}),
                ));
            }
            LinkEvent::Battery { pct } => self.logger.write(record(
                "info",
                "Sensor_battery",
                json!({"plate": plate, "battery_pct": pct}),
            )),
            LinkEvent::WriteOk { hex } => self.logger.write(record(
                "debug",
                "sensor_write",
                json!({"plate": plate, "hex": hex}),
            )),
            LinkEvent::WriteFailed { error } => self.logger.write(record(
                "error",
                "sensor_write_failed",
                json!({"plate": plate, "error": error}),
            )),
            LinkEvent::Notification(n) => self.handle_sensor_frame(plate, &n),
        }
    }

    fn handle_sensor_frame(&mut self, plate: &str, n: &Notification) {
        if n.payload.is_empty() {
            return;
        }
        let amp = frame_types::amplitude(&n.payload);
        let parsed = VibrationFrame::decode(&n.payload).ok();

        let Some(detector) = self.detectors.get_mut(plate) else {
            warn!(plate, "notification from unconfigured plate");
            return;
        };
        let hit = detector.update(amp, SENSOR_DT_MS);

        if let Some(hit) = hit {
            // Hits outside an open session have no T0 to relate to and are
            // intentionally not logged as events.
            if let Some(t_rel) = self.t_rel_ms(n.monotonic_ns) {
                let mut rec = record("event", "Sensor_HIT", serde_json::to_value(&hit).unwrap_or(Value::Null));
                rec.insert("plate".into(), json!(plate));
                rec.insert("t_rel_ms".into(), json!(t_rel));
                self.logger.write(rec);
            }
        }

        self.update_stream_stats(plate, amp, n.monotonic_ns, parsed);
    }

    fn update_stream_stats(&mut self, plate: &str, amp: f64, ts_ns: u64, parsed: Option<VibrationFrame>) {
        let mut buffer_rec = None;
        let mut stream_rec = None;
        {
            let stats = self.stream_stats.entry(plate.to_string()).or_insert_with(|| StreamStats {
                last_status_ns: ts_ns,
                ..StreamStats::default()
            });
            stats.samples += 1;
            stats.amp_sum += amp;
            stats.buffered += 1;

            if stats.buffered >= BUFFER_STATUS_SAMPLES {
                buffer_rec = Some(record(
                    "debug",
                    "bt50_buffer_status",
                    json!({"plate": plate, "buffered": stats.buffered, "current_amp": amp}),
                ));
                stats.buffered = 0;
            }

            if stats.samples >= STREAM_STATUS_SAMPLES
                || ts_ns.saturating_sub(stats.last_status_ns) > STREAM_STATUS_GAP_NS
            {
                let avg = stats.amp_sum / stats.samples.max(1) as f64;
                let mut data = json!({
                    "plate": plate,
                    "samples": stats.samples,
                    "avg_amp": (avg * 1000.0).round() / 1000.0,
                });
                if let (Some(frame), Some(obj)) = (parsed, data.as_object_mut()) {
                    obj.insert("vx".into(), json!(frame.vx));
                    obj.insert("vy".into(), json!(frame.vy));
                    obj.insert("vz".into(), json!(frame.vz));
                    obj.insert("temp_c".into(), json!(frame.temp_c));
                }
                stats.samples = 0;
                stats.amp_sum = 0.0;
                stats.last_status_ns = ts_ns;
                stream_rec = Some(record("info", "sensor_stream", data));
            }
        }
        if let Some(rec) = buffer_rec {
            self.logger.write(rec);
        }
        if let Some(rec) = stream_rec {
            self.logger.write(rec);
        }
    }

    // ── Heartbeat & helpers ───────────────────────────────────────────────────

    fn write_heartbeat(&mut self) {
        let mut rec = record(
            "status",
            "alive",
            json!({"sensors": self.connected_sensors.iter().collect::<Vec<_>>()}),
        );
        if let Some(t_rel) = self.t_rel_ms(monotonic_ns()) {
            rec.insert("t_rel_ms".into(), json!(t_rel));
        }
        self.logger.write(rec);
    }

    fn t_rel_ms(&self, now_ns: u64) -> Option<f64> {
        self.t0_ns.map(|t0| (now_ns as i128 - t0 as i128) as f64 / 1e6)
    }
}

fn device_id(mac: &str) -> String {
    let tail: String = mac.chars().rev().take(5).collect();
    tail.chars().rev().filter(|c| *c != ':').collect()
}

// ── Config → session wiring ───────────────────────────────────────────────────

fn timer_session_cfg(amg: &TimerCfg) -> SessionConfig {
    SessionConfig {
        label: "timer".into(),
        role: DeviceRole::Timer,
        adapter: amg.adapter.clone(),
        address: amg.mac.clone(),
        name_hint: amg.name.clone(),
        notify_uuid: amg.start_uuid.clone(),
        write_uuid: amg.write_uuid.clone(),
        init_cmds: render_init_cmds(&amg.init_cmds),
        idle_reconnect: None,
        keepalive_batt: None,
        battery_snapshot: false,
        backoff: BackoffCfg {
            initial_sec: amg.reconnect_initial_sec,
            max_sec: amg.reconnect_max_sec,
            jitter_sec: amg.reconnect_jitter_sec,
        },
    }
}

fn sensor_session_cfg(sensor: &SensorCfg) -> SessionConfig {
    SessionConfig {
        label: sensor.plate.clone(),
        role: DeviceRole::Sensor,
        adapter: sensor.adapter.clone(),
        address: Some(sensor.mac.clone()),
        name_hint: None,
        notify_uuid: sensor.notify_uuid.clone(),
        write_uuid: sensor.config_uuid.clone(),
        init_cmds: Vec::new(),
        idle_reconnect: Some(Duration::from_secs_f64(sensor.idle_reconnect_sec.max(0.1))),
        keepalive_batt: Some(Duration::from_secs_f64(sensor.keepalive_batt_sec.max(1.0))),
        battery_snapshot: true,
        backoff: BackoffCfg {
            initial_sec: sensor.reconnect_initial_sec,
            max_sec: sensor.reconnect_max_sec,
            jitter_sec: sensor.reconnect_jitter_sec,
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorCfg, LogMode, LoggingCfg};
    use frame_types::TimerFrame;
    use serde_json::Value;

    fn test_cfg(dir: &std::path::Path) -> AppCfg {
        AppCfg {
            amg: TimerCfg {
                adapter: "hci0".into(),
                mac: Some("60:09:C3:1F:DC:1A".into()),
                name: None,
                start_uuid: "6e400003-b5a3-f393-e0a9-e50e24dcca9e".into(),
                write_uuid: None,
                init_cmds: Vec::new(),
                commands: Default::default(),
                debug_raw: false,
                reconnect_initial_sec: 2.0,
                reconnect_max_sec: 20.0,
                reconnect_jitter_sec: 1.0,
            },
            sensors: vec![SensorCfg {
                plate: "P1".into(),
                adapter: "hci0".into(),
                mac: "F8:FE:92:31:12:E3".into(),
                notify_uuid: "0000ffe4-0000-1000-8000-00805f9a34fb".into(),
                config_uuid: None,
                idle_reconnect_sec: 15.0,
                keepalive_batt_sec: 60.0,
                reconnect_initial_sec: 2.0,
                reconnect_max_sec: 20.0,
                reconnect_jitter_sec: 1.0,
            }],
            detector: DetectorCfg::default(),
            logging: LoggingCfg {
                dir: dir.display().to_string(),
                file_prefix: "bridge_test".into(),
                mode: LogMode::Verbose,
                dual_file: false,
                ..LoggingCfg::default()
            },
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
            if !name.starts_with("bridge_test_") || name.len() <= "bridge_test_YYYYMMDD.ndjson".len() {
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

    fn timer_msg(ts: u64, payload: Vec<u8>) -> SessionMsg {
        SessionMsg {
            label: "timer".into(),
            role: DeviceRole::Timer,
            event: LinkEvent::Notification(Notification { monotonic_ns: ts, payload }),
        }
    }

    fn sensor_msg(ts: u64, payload: Vec<u8>) -> SessionMsg {
        SessionMsg {
            label: "P1".into(),
            role: DeviceRole::Sensor,
            event: LinkEvent::Notification(Notification { monotonic_ns: ts, payload }),
        }
    }

    fn vib(vx: f64) -> Vec<u8> {
        VibrationFrame {
            vx,
            vy: 0.0,
            vz: 0.0,
            adx: 0.0,
            ady: 0.0,
            adz: 0.0,
            temp_c: 21.0,
            dx: 0.0,
            dy: 0.0,
            dz: 0.0,
            hzx: 0.0,
            hzy: 0.0,
            hzz: 0.0,
        }
        .encode()
        .to_vec()
    }

    fn t0_frame() -> Vec<u8> {
        let mut f = vec![0u8; TimerFrame::LEN];
        f[0] = 0x01;
        f[1] = 0x05;
        f[13] = 0x07;
        f
    }

    fn end_frame() -> Vec<u8> {
        let mut f = vec![0u8; TimerFrame::LEN];
        f[0] = 0x01;
        f[1] = 0x09;
        f[5] = 0x01; // not the legacy T0 shape
        f
    }

    /// Feed a full scripted string through the orchestrator: warm-up noise,
    /// T0, an impact, then the string end.
    #[test]
    fn t0_hit_and_session_end_flow() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut bridge = Bridge::new(test_cfg(tmp.path())).expect("bridge");

        let mut ts: u64 = 1_000_000_000;
        let step = 10_000_000u64; // 10 ms

        // Warm-up noise arms the detector before any session opens.
        for _ in 0..40 {
            bridge.handle_msg(sensor_msg(ts, vib(1.0)));
            ts += step;
        }

        let t0_ts = ts;
        bridge.handle_msg(timer_msg(t0_ts, t0_frame()));

        // Impact burst followed by ring-down back to the noise floor.
        for vx in [50.0, 30.0, 20.0, 10.0, 5.0] {
            bridge.handle_msg(sensor_msg(ts, vib(vx)));
            ts += step;
        }
        for _ in 0..40 {
            bridge.handle_msg(sensor_msg(ts, vib(1.0)));
            ts += step;
        }

        bridge.handle_msg(timer_msg(ts, end_frame()));

        // A second impact after the string ended must not log a hit.
        for vx in [50.0, 30.0, 20.0, 10.0, 5.0] {
            bridge.handle_msg(sensor_msg(ts, vib(vx)));
            ts += step;
        }
        for _ in 0..60 {
            bridge.handle_msg(sensor_msg(ts, vib(1.0)));
            ts += step;
        }

        let events = read_events(tmp.path());

        let start_btn = events.iter().find(|e| e["msg"] == "Timer_START_BTN").expect("start btn");
        assert_eq!(start_btn["data"]["method"], "inferred_at_t0");

        let t0 = events.iter().find(|e| e["msg"] == "T0").expect("t0");
        assert_eq!(t0["t_rel_ms"], 0.0);

        let hits: Vec<_> = events.iter().filter(|e| e["msg"] == "Sensor_HIT").collect();
        assert_eq!(hits.len(), 1, "one in-session hit expected");
        assert_eq!(hits[0]["plate"], "P1");
        assert!(hits[0]["t_rel_ms"].as_f64().expect("t_rel") > 0.0);
        assert_eq!(hits[0]["data"]["peak"], 50.0);
        assert!(hits[0]["data"]["dur_ms"].as_f64().expect("dur") >= 30.0);

        assert!(events.iter().any(|e| e["msg"] == "String_END"));
        let end = events.iter().find(|e| e["msg"] == "Timer_SESSION_END").expect("end");
        assert_eq!(end["data"]["reason"], "arrow");
    }

    #[test]
    fn shot_frames_log_enriched_records() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut bridge = Bridge::new(test_cfg(tmp.path())).expect("bridge");

        bridge.handle_msg(timer_msg(1_000_000_000, t0_frame()));
        let shot = hex::decode("01030202015c01a800b4015c0102").expect("hex");
        bridge.handle_msg(timer_msg(2_000_000_000, shot));

        let events = read_events(tmp.path());
        let rec = events.iter().find(|e| e["msg"] == "Timer_SHOT").expect("shot");
        assert_eq!(rec["data"]["amg"]["shot_idx"], 2);
        assert_eq!(rec["data"]["amg"]["T_s"], 3.48);
        assert_eq!(rec["t_rel_ms"], 1000.0);
    }

    #[test]
    fn connect_lifecycle_records_and_heartbeat_population() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut bridge = Bridge::new(test_cfg(tmp.path())).expect("bridge");

        bridge.handle_msg(SessionMsg {
            label: "P1".into(),
            role: DeviceRole::Sensor,
            event: LinkEvent::Connected,
        });
        bridge.handle_msg(SessionMsg {
            label: "P1".into(),
            role: DeviceRole::Sensor,
            event: LinkEvent::Battery { pct: Some(85) },
        });
        bridge.write_heartbeat();
        bridge.handle_msg(SessionMsg {
            label: "P1".into(),
            role: DeviceRole::Sensor,
            event: LinkEvent::Disconnected { reason: "idle_timeout" },
        });
        bridge.write_heartbeat();

        let events = read_events(tmp.path());
        let connected = events.iter().find(|e| e["msg"] == "Sensor_connected").expect("connected");
        assert_eq!(connected["data"]["mac"], "F8:FE:92:31:12:E3");
        let battery = events.iter().find(|e| e["msg"] == "Sensor_battery").expect("battery");
        assert_eq!(battery["data"]["battery_pct"], 85);

        let beats: Vec<_> = events.iter().filter(|e| e["msg"] == "alive").collect();
        assert_eq!(beats.len(), 2);
        assert_eq!(beats[0]["data"]["sensors"][0], "P1");
        assert!(beats[1]["data"]["sensors"].as_array().expect("sensors").is_empty());

        assert!(events.iter().any(|e| e["msg"] == "Sensor_disconnected"
            && e["data"]["reason"] == "idle_timeout"));
    }

    #[test]
    fn device_id_is_last_five_mac_chars_sans_colons() {
        assert_eq!(device_id("60:09:C3:1F:DC:1A"), "DC1A");
        assert_eq!(device_id("1A"), "1A");
    }
}
