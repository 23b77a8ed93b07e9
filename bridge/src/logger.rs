//! Structured NDJSON event logging.
//!
//! Append-only, one JSON object per line. Every record gets an incrementing
//! `seq`, a human clock `hms`, the per-run `session_id`, `pid` and
//! `schema: "v1"`. Machine timestamps (`ts_ms`, ISO wall clock) are stripped
//! if a caller attached them; the log keeps only the human-friendly clock and
//! relies on `t_rel_ms` for analysis.
//!
//! ## Dual-file mode
//! The main file receives the filter-accepted subset; a full debug copy goes
//! to `dir/<debug_subdir>/`. File names are time-coded
//! (`<prefix>_YYYYMMDD_HHMMSS.ndjson`) with a daily alias
//! (`<prefix>_YYYYMMDD.ndjson`, hardlink preferred) so follow-mode tooling
//! has a stable path. Day rollover is checked at each write.
//!
//! ## Invariants
//! - `(session_id, seq)` uniquely identifies a record; `seq` is strictly
//!   monotonic per logger instance.
//! - Write failures never propagate to producers; they fall back to stderr.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde_json::{json, Map, Value};

use frame_types::TimerFrame;

use crate::config::{LogMode, LoggingCfg};

/// One in-flight log record (a JSON object).
pub type Record = Map<String, Value>;

/// Convenience constructor for the common `{type, msg, data}` shape.
pub fn record(kind: &str, msg: &str, data: Value) -> Record {
    let mut rec = Record::new();
    rec.insert("type".into(), json!(kind));
    rec.insert("msg".into(), json!(msg));
    rec.insert("data".into(), data);
    rec
}

pub struct NdjsonLogger {
    dir: PathBuf,
    prefix: String,
    mode: LogMode,
    whitelist: HashSet<String>,
    amp_threshold: f64,
    dual_file: bool,
    debug_dir: PathBuf,
    session_id: String,
    pid: u32,
    seq: u64,
    rot_day: String,
    main: Option<File>,
    main_path: Option<PathBuf>,
    debug: Option<File>,
    debug_path: Option<PathBuf>,
}

impl NdjsonLogger {
    /// Create the log directory (and debug subdirectory) and open the first
    /// pair of time-coded files. An un-openable directory is fatal.
    pub fn new(cfg: &LoggingCfg) -> std::io::Result<Self> {
        let dir = PathBuf::from(&cfg.dir);
        fs::create_dir_all(&dir)?;
        let debug_dir = dir.join(&cfg.debug_subdir);

        let session_id = std::env::var("SESSION_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..12].to_string());

        let mut logger = Self {
            dir,
            prefix: cfg.file_prefix.clone(),
            mode: cfg.mode,
            whitelist: cfg.verbose_whitelist.iter().cloned().collect(),
            amp_threshold: cfg.current_amp_threshold,
            dual_file: cfg.dual_file,
            debug_dir,
            session_id,
            pid: std::process::id(),
            seq: 0,
            rot_day: String::new(),
            main: None,
            main_path: None,
            debug: None,
            debug_path: None,
        };
        logger.rotate()?;
        Ok(logger)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn main_path(&self) -> Option<&Path> {
        self.main_path.as_deref()
    }

    /// Open a fresh pair of time-coded files and refresh the daily aliases.
    fn rotate(&mut self) -> std::io::Result<()> {
        let now = Local::now();
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let day = stamp[..8].to_string();

        let path = self.dir.join(format!("{}_{stamp}.ndjson", self.prefix));
        self.main = Some(OpenOptions::new().create(true).append(true).open(&path)?);
        self.main_path = Some(path.clone());

        self.debug = None;
        self.debug_path = None;
        if self.dual_file {
            // Debug log is best effort; the main log must not depend on it.
            if fs::create_dir_all(&self.debug_dir).is_ok() {
                let dpath = self.debug_dir.join(format!("{}_debug_{stamp}.ndjson", self.prefix));
                match OpenOptions::new().create(true).append(true).open(&dpath) {
                    Ok(f) => {
                        self.debug = Some(f);
                        self.debug_path = Some(dpath);
                    }
                    Err(e) => eprintln!("plate-bridge: cannot open debug log: {e}"),
                }
            }
        }

        maintain_alias(&path, &self.dir.join(format!("{}_{day}.ndjson", self.prefix)));
        if let Some(dpath) = &self.debug_path {
            maintain_alias(dpath, &self.debug_dir.join(format!("{}_debug_{day}.ndjson", self.prefix)));
        }

        self.rot_day = day;
        Ok(())
    }

    /// Append one record. Filtering decides main-file admission only; the
    /// debug file (when enabled) receives everything. Never fails outward.
    pub fn write(&mut self, mut rec: Record) {
        let allow_main = self.filter_allows(&rec);
        enrich_timer_fields(&mut rec);

        self.seq += 1;
        let now = Local::now();
        rec.entry("hms")
            .or_insert_with(|| json!(now.format("%H:%M:%S%.3f").to_string()));
        // Machine timestamps are never emitted, even if a caller attached them.
        rec.remove("ts_ms");
        rec.remove("t_iso");
        rec.entry("seq").or_insert_with(|| json!(self.seq));
        rec.entry("schema").or_insert_with(|| json!("v1"));
        rec.entry("session_id").or_insert_with(|| json!(self.session_id.clone()));
        rec.entry("pid").or_insert_with(|| json!(self.pid));

        if now.format("%Y%m%d").to_string() != self.rot_day {
            if let Err(e) = self.rotate() {
                eprintln!("plate-bridge: log rotation failed: {e}");
            }
        }

        let line = Value::Object(rec).to_string();
        if self.dual_file {
            append_line(&mut self.debug, &line);
        }
        if allow_main {
            append_line(&mut self.main, &line);
        }
    }

    /// Best-effort durability on shutdown.
    pub fn flush(&mut self) {
        if let Some(f) = &mut self.main {
            let _ = f.sync_data();
        }
        if let Some(f) = &mut self.debug {
            let _ = f.sync_data();
        }
    }

    /// Regular-mode suppression rules. Verbose mode admits everything.
    fn filter_allows(&self, rec: &Record) -> bool {
        if self.mode == LogMode::Verbose {
            return true;
        }
        let typ = rec.get("type").and_then(Value::as_str);
        let msg = rec.get("msg").and_then(Value::as_str);
        let data = rec.get("data").and_then(Value::as_object);

        // Empty heartbeats are pure noise in regular runs.
        if typ == Some("status") && msg == Some("alive") {
            if let Some(sensors) = data.and_then(|d| d.get("sensors")).and_then(Value::as_array) {
                if sensors.is_empty() {
                    return false;
                }
            }
        }

        if typ == Some("debug") {
            let whitelisted = msg.map_or(false, |m| self.whitelist.contains(m));
            // High-rate buffer telemetry only passes when explicitly asked for.
            if msg == Some("bt50_buffer_status") && !whitelisted {
                return false;
            }
            match data.and_then(|d| d.get("current_amp")) {
                // Zero-ish amplitudes are suppressed; meaningful ones pass
                // regardless of the whitelist.
                Some(Value::Number(n)) => {
                    if n.as_f64().map_or(false, |ca| ca.abs() <= self.amp_threshold) {
                        return false;
                    }
                }
                Some(_) => {}
                None => {
                    if !whitelisted {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl Drop for NdjsonLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

fn append_line(file: &mut Option<File>, line: &str) {
    if let Some(f) = file {
        if let Err(e) = writeln!(f, "{line}") {
            // Event loss must not propagate; leave a trace on stderr.
            eprintln!("plate-bridge: log write failed: {e}");
        }
    }
}

/// Keep `<prefix>_YYYYMMDD.ndjson` pointing at the current time-coded file.
/// Hardlink when the filesystem allows it, symlink otherwise; as a last
/// resort the alias merely exists (not kept in sync).
fn maintain_alias(target: &Path, alias: &Path) {
    let _ = fs::remove_file(alias);
    if fs::hard_link(target, alias).is_ok() {
        return;
    }
    #[cfg(unix)]
    {
        let abs = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
        if std::os::unix::fs::symlink(abs, alias).is_ok() {
            return;
        }
    }
    let _ = File::create(alias);
}

/// When a record carries a raw timer payload (`data.hex` / `data.payload`),
/// attach the decoded timing fields as `data.amg` so logs are directly
/// consumable and the correlator can match shots.
fn enrich_timer_fields(rec: &mut Record) {
    let Some(data) = rec.get_mut("data").and_then(Value::as_object_mut) else {
        return;
    };
    let Some(hex_payload) = data
        .get("hex")
        .or_else(|| data.get("payload"))
        .and_then(Value::as_str)
        .map(str::to_owned)
    else {
        return;
    };
    let cleaned = hex_payload
        .trim()
        .trim_start_matches("0x")
        .replace([' ', '-', ':'], "")
        .to_lowercase();
    let Ok(bytes) = hex::decode(&cleaned) else {
        return;
    };
    let Ok(frame) = TimerFrame::decode(&bytes) else {
        return;
    };
    if let Ok(amg) = serde_json::to_value(frame.shot_record()) {
        data.insert("amg".into(), amg);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingCfg;

    fn test_cfg(dir: &Path, mode: LogMode, dual: bool) -> LoggingCfg {
        LoggingCfg {
            dir: dir.display().to_string(),
            file_prefix: "bridge_test".into(),
            mode,
            dual_file: dual,
            ..LoggingCfg::default()
        }
    }

    fn read_lines(dir: &Path, prefix: &str) -> Vec<Value> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            // Skip daily aliases: stamped files carry two underscores past the prefix.
            if !name.starts_with(prefix) || !name.ends_with(".ndjson") {
                continue;
            }
            if name.len() <= prefix.len() + "_YYYYMMDD.ndjson".len() {
                continue;
            }
            for line in fs::read_to_string(&path).expect("read").lines() {
                if !line.trim().is_empty() {
                    out.push(serde_json::from_str(line).expect("json line"));
                }
            }
        }
        out
    }

    #[test]
    fn regular_mode_filters_debug_from_main_only() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Regular, true)).expect("logger");
        logger.write(record("info", "op_info", json!({"a": 1})));
        logger.write(record("debug", "op_debug", json!({"a": 2})));

        let main = read_lines(tmp.path(), "bridge_test");
        assert!(main.iter().any(|r| r["msg"] == "op_info"));
        assert!(!main.iter().any(|r| r["msg"] == "op_debug"));

        let debug = read_lines(&tmp.path().join("debug"), "bridge_test_debug");
        assert!(debug.iter().any(|r| r["msg"] == "op_info"));
        assert!(debug.iter().any(|r| r["msg"] == "op_debug"));
    }

    #[test]
    fn empty_heartbeats_suppressed_in_main_kept_in_debug() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Regular, true)).expect("logger");
        logger.write(record("status", "alive", json!({"sensors": []})));
        logger.write(record("status", "alive", json!({"sensors": ["P1"]})));

        let main = read_lines(tmp.path(), "bridge_test");
        let alive: Vec<_> = main.iter().filter(|r| r["msg"] == "alive").collect();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0]["data"]["sensors"][0], "P1");

        let debug = read_lines(&tmp.path().join("debug"), "bridge_test_debug");
        assert_eq!(debug.iter().filter(|r| r["msg"] == "alive").count(), 2);
    }

    #[test]
    fn machine_timestamps_are_stripped_everywhere() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Verbose, true)).expect("logger");
        let mut rec = record("info", "test", json!({"a": 1}));
        rec.insert("ts_ms".into(), json!(123456789.0));
        rec.insert("t_iso".into(), json!("2025-09-05T16:11:25.413Z"));
        logger.write(rec);

        for lines in [
            read_lines(tmp.path(), "bridge_test"),
            read_lines(&tmp.path().join("debug"), "bridge_test_debug"),
        ] {
            assert!(!lines.is_empty());
            for r in lines {
                assert!(r.get("ts_ms").is_none());
                assert!(r.get("t_iso").is_none());
                assert!(r.get("hms").is_some());
                assert_eq!(r["schema"], "v1");
                assert!(r.get("seq").is_some() && r.get("session_id").is_some() && r.get("pid").is_some());
            }
        }
    }

    #[test]
    fn timer_hex_payloads_gain_amg_fields() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Verbose, false)).expect("logger");
        logger.write(record("event", "Timer_SHOT", json!({"hex": "01 03 02 02 01 5c 01 a8 00 b4 01 5c 01 02"})));
        // Non-timer payloads pass through untouched.
        logger.write(record("event", "odd", json!({"hex": "5561"})));

        let lines = read_lines(tmp.path(), "bridge_test");
        let shot = lines.iter().find(|r| r["msg"] == "Timer_SHOT").expect("shot");
        assert_eq!(shot["data"]["amg"]["shot_idx"], 2);
        assert_eq!(shot["data"]["amg"]["T_s"], 3.48);
        assert_eq!(shot["data"]["amg"]["tail_hex"], "0x02");
        let odd = lines.iter().find(|r| r["msg"] == "odd").expect("odd");
        assert!(odd["data"].get("amg").is_none());
    }

    #[test]
    fn current_amp_gates_debug_records() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Regular, false)).expect("logger");
        logger.write(record("debug", "sample", json!({"current_amp": 0.0})));
        logger.write(record("debug", "sample", json!({"current_amp": 0.5})));
        logger.write(record("debug", "bt50_buffer_status", json!({"current_amp": 0.5})));

        let lines = read_lines(tmp.path(), "bridge_test");
        let samples: Vec<_> = lines.iter().filter(|r| r["msg"] == "sample").collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0]["data"]["current_amp"], 0.5);
        // Buffer status stays suppressed without a whitelist entry.
        assert!(!lines.iter().any(|r| r["msg"] == "bt50_buffer_status"));
    }

    #[test]
    fn whitelist_admits_named_debug_messages() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut cfg = test_cfg(tmp.path(), LogMode::Regular, false);
        cfg.verbose_whitelist = vec!["bt50_buffer_status".into()];
        let mut logger = NdjsonLogger::new(&cfg).expect("logger");
        logger.write(record("debug", "bt50_buffer_status", json!({"buffered": 12})));

        let lines = read_lines(tmp.path(), "bridge_test");
        assert!(lines.iter().any(|r| r["msg"] == "bt50_buffer_status"));
    }

    #[test]
    fn seq_is_strictly_monotonic() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Verbose, false)).expect("logger");
        for i in 0..5 {
            logger.write(record("info", &format!("m{i}"), json!({})));
        }
        let mut seqs: Vec<u64> = read_lines(tmp.path(), "bridge_test")
            .iter()
            .map(|r| r["seq"].as_u64().unwrap())
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn daily_alias_tracks_current_file() {
        let tmp = tempfile::tempdir().expect("tmp");
        let mut logger = NdjsonLogger::new(&test_cfg(tmp.path(), LogMode::Verbose, false)).expect("logger");
        logger.write(record("info", "hello", json!({})));

        let day = Local::now().format("%Y%m%d").to_string();
        let alias = tmp.path().join(format!("bridge_test_{day}.ndjson"));
        let text = fs::read_to_string(&alias).expect("alias readable");
        assert!(text.contains("hello"));
    }
}
