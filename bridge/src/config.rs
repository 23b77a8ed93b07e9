//! Bridge configuration.
//!
//! Loaded from a single YAML file with four sections: `amg` (the timer),
//! `sensors` (one entry per plate), `detector` and `logging`. Numeric tuning
//! fields accept either numbers or strings ("8.0") since operators routinely
//! template these files from shell environments.

use std::collections::HashMap;
use std::path::Path;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

// ── Coercing numeric deserializers ────────────────────────────────────────────

fn coerce_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(v) => Ok(v),
        Raw::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, got {s:?}"))),
    }
}

fn coerce_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Num(f64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Int(v) => Ok(v),
        Raw::Num(v) if v >= 0.0 => Ok(v as u64),
        Raw::Num(v) => Err(D::Error::custom(format!("expected a non-negative integer, got {v}"))),
        Raw::Str(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("expected an integer, got {s:?}"))),
    }
}

// ── Timer (AMG) ───────────────────────────────────────────────────────────────

/// One post-connect command: inline text or dash/space/colon separated hex,
/// with an optional pause before the write.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitCmd {
    pub text: Option<String>,
    pub hex: Option<String>,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Named command template, e.g. `beep: { hex: "A1-B2" }` or
/// `set_sensitivity: { hex_template: "AA-55-{level:02X}" }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandSpec {
    pub text: Option<String>,
    pub hex: Option<String>,
    pub hex_template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerCfg {
    pub adapter: String,
    pub mac: Option<String>,
    pub name: Option<String>,
    pub start_uuid: String,
    pub write_uuid: Option<String>,
    /// Commands written right after subscribe, in order.
    #[serde(default)]
    pub init_cmds: Vec<InitCmd>,
    /// Named command/template map for operator tooling. Canonical payloads
    /// (BEEP, power-off) are supplied here, never hard-coded.
    #[serde(default)]
    pub commands: HashMap<String, CommandSpec>,
    /// Emit a `Shot_raw` debug record for every timer notification.
    #[serde(default)]
    pub debug_raw: bool,
    #[serde(default = "d_reconnect_initial", deserialize_with = "coerce_f64")]
    pub reconnect_initial_sec: f64,
    #[serde(default = "d_reconnect_max", deserialize_with = "coerce_f64")]
    pub reconnect_max_sec: f64,
    #[serde(default = "d_reconnect_jitter", deserialize_with = "coerce_f64")]
    pub reconnect_jitter_sec: f64,
}

// ── Sensors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SensorCfg {
    /// Human-visible plate label grouping all records from this sensor.
    pub plate: String,
    pub adapter: String,
    pub mac: String,
    pub notify_uuid: String,
    pub config_uuid: Option<String>,
    /// Force a reconnect when the stream goes quiet for this long.
    #[serde(default = "d_idle_reconnect", deserialize_with = "coerce_f64")]
    pub idle_reconnect_sec: f64,
    /// Benign battery read cadence; traffic only, the value is incidental.
    #[serde(default = "d_keepalive_batt", deserialize_with = "coerce_f64")]
    pub keepalive_batt_sec: f64,
    #[serde(default = "d_reconnect_initial", deserialize_with = "coerce_f64")]
    pub reconnect_initial_sec: f64,
    #[serde(default = "d_reconnect_max", deserialize_with = "coerce_f64")]
    pub reconnect_max_sec: f64,
    #[serde(default = "d_reconnect_jitter", deserialize_with = "coerce_f64")]
    pub reconnect_jitter_sec: f64,
}

// ── Detector ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorCfg {
    /// Power ratio (amp^2 / baseline) opening a ring.
    #[serde(rename = "triggerHigh", default = "d_trigger_high", deserialize_with = "coerce_f64")]
    pub trigger_high: f64,
    /// Power ratio closing a ring.
    #[serde(rename = "triggerLow", default = "d_trigger_low", deserialize_with = "coerce_f64")]
    pub trigger_low: f64,
    #[serde(default = "d_ring_min_ms", deserialize_with = "coerce_u64")]
    pub ring_min_ms: u64,
    #[serde(default = "d_dead_time_ms", deserialize_with = "coerce_u64")]
    pub dead_time_ms: u64,
    /// Settling time before the detector may arm.
    #[serde(default = "d_warmup_ms", deserialize_with = "coerce_u64")]
    pub warmup_ms: u64,
    /// Minimum baseline power for the trigger ratio to be meaningful.
    #[serde(default = "d_baseline_min", deserialize_with = "coerce_f64")]
    pub baseline_min: f64,
    /// Absolute amplitude floor; guards against low-noise spikes.
    #[serde(default = "d_min_amp", deserialize_with = "coerce_f64")]
    pub min_amp: f64,
}

impl Default for DetectorCfg {
    fn default() -> Self {
        Self {
            trigger_high: d_trigger_high(),
            trigger_low: d_trigger_low(),
            ring_min_ms: d_ring_min_ms(),
            dead_time_ms: d_dead_time_ms(),
            warmup_ms: d_warmup_ms(),
            baseline_min: d_baseline_min(),
            min_amp: d_min_amp(),
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Suppress debug-level noise unless whitelisted or carrying a meaningful
    /// amplitude; drop empty heartbeats.
    Regular,
    /// Emit everything.
    Verbose,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingCfg {
    #[serde(default = "d_log_dir")]
    pub dir: String,
    #[serde(default = "d_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "d_log_mode")]
    pub mode: LogMode,
    /// Message names emitted even in regular mode.
    #[serde(default)]
    pub verbose_whitelist: Vec<String>,
    /// Write a compact main log plus a full debug log under `dir/debug`.
    #[serde(default = "d_true")]
    pub dual_file: bool,
    #[serde(default = "d_debug_subdir")]
    pub debug_subdir: String,
    /// Reported amplitudes at or below this are treated as zero when filtering.
    #[serde(default = "d_amp_threshold", deserialize_with = "coerce_f64")]
    pub current_amp_threshold: f64,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            dir: d_log_dir(),
            file_prefix: d_file_prefix(),
            mode: d_log_mode(),
            verbose_whitelist: Vec::new(),
            dual_file: true,
            debug_subdir: d_debug_subdir(),
            current_amp_threshold: d_amp_threshold(),
        }
    }
}

// ── App config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AppCfg {
    pub amg: TimerCfg,
    #[serde(default)]
    pub sensors: Vec<SensorCfg>,
    #[serde(default)]
    pub detector: DetectorCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
}

impl AppCfg {
    /// Field checks beyond what serde enforces. Fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.amg.adapter.trim().is_empty() {
            return Err(ConfigError::Missing("amg.adapter"));
        }
        if self.amg.start_uuid.trim().is_empty() {
            return Err(ConfigError::Missing("amg.start_uuid"));
        }
        if self.amg.mac.as_deref().map_or(true, str::is_empty)
            && self.amg.name.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::Missing("amg.mac or amg.name"));
        }
        for s in &self.sensors {
            if s.plate.trim().is_empty() {
                return Err(ConfigError::Missing("sensors[].plate"));
            }
            if s.mac.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("sensor {}: mac is empty", s.plate)));
            }
            if s.notify_uuid.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("sensor {}: notify_uuid is empty", s.plate)));
            }
        }
        if self.detector.trigger_low > self.detector.trigger_high {
            return Err(ConfigError::Invalid(format!(
                "detector: triggerLow {} above triggerHigh {}",
                self.detector.trigger_low, self.detector.trigger_high
            )));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<AppCfg, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let cfg: AppCfg = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

// ── Defaults ──────────────────────────────────────────────────────────────────

fn d_reconnect_initial() -> f64 { 2.0 }
fn d_reconnect_max() -> f64 { 20.0 }
fn d_reconnect_jitter() -> f64 { 1.0 }
fn d_idle_reconnect() -> f64 { 15.0 }
fn d_keepalive_batt() -> f64 { 60.0 }
fn d_trigger_high() -> f64 { 8.0 }
fn d_trigger_low() -> f64 { 2.0 }
fn d_ring_min_ms() -> u64 { 30 }
fn d_dead_time_ms() -> u64 { 100 }
fn d_warmup_ms() -> u64 { 300 }
fn d_baseline_min() -> f64 { 1e-4 }
fn d_min_amp() -> f64 { 1.0 }
fn d_log_dir() -> String { "./logs".into() }
fn d_file_prefix() -> String { "bridge".into() }
fn d_log_mode() -> LogMode { LogMode::Regular }
fn d_debug_subdir() -> String { "debug".into() }
fn d_amp_threshold() -> f64 { 1e-6 }
fn d_true() -> bool { true }

// ── Tests ─────────────────────────────────────────────────────────────────────
