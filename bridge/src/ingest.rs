//! NDJSON → SQLite ingestion.
//!
//! Loads line-delimited event logs into the embedded `events` table. The
//! unique `(session_id, seq)` index plus `INSERT OR IGNORE` makes ingestion
//! idempotent: re-running over the same file adds no rows. Unparseable lines
//! are skipped, never fatal.
//!
//! The logger intentionally emits no machine timestamps, so `ts_ms` is
//! derived at ingest time: record `ts_ms` if one exists, else `t_rel_ms`,
//! else the ingest wall clock.
//!
//! Follow mode tails the current daily alias (reopening across day
//! rollovers) and commits after each successful parse.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, Connection};
use serde_json::Value;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
  id INTEGER PRIMARY KEY,
  seq INTEGER NOT NULL,
  ts_ms REAL NOT NULL,
  type TEXT NOT NULL,
  msg TEXT,
  plate TEXT,
  t_rel_ms REAL,
  session_id TEXT,
  pid INTEGER,
  schema TEXT,
  data_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts_ms);
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_sess_seq ON events(session_id, seq);
"#;

/// Open (creating directories as needed) and migrate the events database.
pub fn ensure_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

fn compute_ts_ms(rec: &Value) -> f64 {
    rec.get("ts_ms")
        .and_then(Value::as_f64)
        .or_else(|| rec.get("t_rel_ms").and_then(Value::as_f64))
        .unwrap_or_else(wall_clock_ms)
}

/// Insert one parsed record. Duplicate `(session_id, seq)` pairs are ignored.
pub fn ingest_record(conn: &Connection, rec: &Value) -> Result<()> {
    let data_json = rec
        .get("data")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()))
        .to_string();
    conn.execute(
        "INSERT OR IGNORE INTO events(seq, ts_ms, type, msg, plate, t_rel_ms, session_id, pid, schema, data_json) \
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            rec.get("seq").and_then(Value::as_i64).unwrap_or(0),
            compute_ts_ms(rec),
            rec.get("type").and_then(Value::as_str).unwrap_or("unknown"),
            rec.get("msg").and_then(Value::as_str),
            rec.get("plate").and_then(Value::as_str),
            rec.get("t_rel_ms").and_then(Value::as_f64),
            rec.get("session_id").and_then(Value::as_str),
            rec.get("pid").and_then(Value::as_i64),
            rec.get("schema").and_then(Value::as_str),
            data_json,
        ],
    )?;
    Ok(())
}

/// Ingest a whole NDJSON file forward. Returns the number of parseable
/// records processed (not necessarily inserted; duplicates are ignored).
pub fn ingest_file(
    conn: &Connection,
    path: &Path,
    session: Option<&str>,
    limit: Option<usize>,
) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut n = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(rec) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if let Some(want) = session {
            if rec.get("session_id").and_then(Value::as_str) != Some(want) {
                continue;
            }
        }
        ingest_record(conn, &rec)?;
        n += 1;
        if limit.is_some_and(|cap| n >= cap) {
            break;
        }
    }
    Ok(n)
}

/// Today's daily alias for a log prefix.
pub fn current_daily_file(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}_{}.ndjson", Local::now().format("%Y%m%d")))
}

/// Tail the current daily file, ingesting lines as they appear. Day rollover
/// switches to the new file and reads it from the beginning. Runs until
/// `stop` flips true.
pub fn follow(
    conn: &Connection,
    dir: &Path,
    prefix: &str,
    poll: Duration,
    from_start: bool,
    stop: &AtomicBool,
) -> Result<usize> {
    let mut current = current_daily_file(dir, prefix);
    let mut reader: Option<BufReader<File>> = None;
    let mut first_open = true;
    let mut n = 0usize;

    while !stop.load(Ordering::Relaxed) {
        let fresh = current_daily_file(dir, prefix);
        if fresh != current {
            reader = None;
            current = fresh;
        }

        if reader.is_none() {
            match File::open(&current) {
                Ok(mut file) => {
                    if first_open && !from_start {
                        file.seek(SeekFrom::End(0))?;
                    }
                    first_open = false;
                    reader = Some(BufReader::new(file));
                }
                Err(_) => {
                    // No file yet (early boot); wait for the bridge to create it.
                    std::thread::sleep(poll);
                    continue;
                }
            }
        }

        let Some(r) = reader.as_mut() else { continue };
        let mut line = String::new();
        match r.read_line(&mut line) {
            Ok(0) => std::thread::sleep(poll),
            Ok(read) => {
                if !line.ends_with('\n') {
                    // Partial line mid-write: rewind and retry once complete.
                    r.seek_relative(-(read as i64))?;
                    std::thread::sleep(poll);
                    continue;
                }
                if let Ok(rec) = serde_json::from_str::<Value>(line.trim()) {
                    ingest_record(conn, &rec)?;
                    n += 1;
                }
            }
            Err(_) => std::thread::sleep(poll),
        }
    }
    Ok(n)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn row_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0)).expect("count")
    }

    fn write_log(path: &Path, lines: &[Value]) {
        let mut f = File::create(path).expect("create");
        for l in lines {
            writeln!(f, "{l}").expect("write");
        }
    }

    #[test]
    fn reingesting_the_same_file_adds_no_rows() {
        let tmp = tempfile::tempdir().expect("tmp");
        let log = tmp.path().join("bridge.ndjson");
        write_log(
            &log,
            &[
                json!({"seq": 1, "type": "event", "msg": "T0", "session_id": "S1", "t_rel_ms": 0.0}),
                json!({"seq": 2, "type": "event", "msg": "Sensor_HIT", "session_id": "S1", "t_rel_ms": 12.5, "plate": "P1"}),
                json!({"seq": 3, "type": "status", "msg": "alive", "session_id": "S1"}),
            ],
        );
        let conn = ensure_db(&tmp.path().join("bridge.db")).expect("db");
        assert_eq!(ingest_file(&conn, &log, None, None).expect("first"), 3);
        assert_eq!(row_count(&conn), 3);
        assert_eq!(ingest_file(&conn, &log, None, None).expect("second"), 3);
        assert_eq!(row_count(&conn), 3);
    }

    #[test]
    fn ts_ms_falls_back_to_t_rel_then_wall_clock() {
        let tmp = tempfile::tempdir().expect("tmp");
        let log = tmp.path().join("bridge.ndjson");
        write_log(
            &log,
            &[
                json!({"seq": 1, "type": "event", "msg": "T0", "session_id": "S1", "t_rel_ms": 42.5}),
                json!({"seq": 2, "type": "info", "msg": "Bridge_start", "session_id": "S1"}),
            ],
        );
        let conn = ensure_db(&tmp.path().join("bridge.db")).expect("db");
        ingest_file(&conn, &log, None, None).expect("ingest");

        let from_rel: f64 = conn
            .query_row("SELECT ts_ms FROM events WHERE seq = 1", [], |r| r.get(0))
            .expect("row");
        assert_eq!(from_rel, 42.5);

        let from_wall: f64 = conn
            .query_row("SELECT ts_ms FROM events WHERE seq = 2", [], |r| r.get(0))
            .expect("row");
        // Wall clock fallback: any plausible epoch-milliseconds value.
        assert!(from_wall > 1.0e12);
    }

    #[test]
    fn bad_lines_are_skipped_and_filters_apply() {
        let tmp = tempfile::tempdir().expect("tmp");
        let log = tmp.path().join("bridge.ndjson");
        let mut f = File::create(&log).expect("create");
        writeln!(f, "{}", json!({"seq": 1, "type": "event", "session_id": "S1"})).expect("w");
        writeln!(f, "this is not json").expect("w");
        writeln!(f, "{}", json!({"seq": 2, "type": "event", "session_id": "S2"})).expect("w");
        writeln!(f, "{}", json!({"seq": 3, "type": "event", "session_id": "S2"})).expect("w");
        drop(f);

        let conn = ensure_db(&tmp.path().join("bridge.db")).expect("db");
        let n = ingest_file(&conn, &log, Some("S2"), Some(1)).expect("ingest");
        assert_eq!(n, 1);
        let sid: String = conn
            .query_row("SELECT session_id FROM events", [], |r| r.get(0))
            .expect("row");
        assert_eq!(sid, "S2");
    }

    #[test]
    fn data_object_is_stored_compact() {
        let tmp = tempfile::tempdir().expect("tmp");
        let conn = ensure_db(&tmp.path().join("bridge.db")).expect("db");
        let rec = json!({
            "seq": 1, "type": "event", "msg": "Sensor_HIT", "session_id": "S1",
            "data": {"peak": 12.5, "rms": 3.0, "dur_ms": 60.0}
        });
        ingest_record(&conn, &rec).expect("insert");
        let data: String = conn
            .query_row("SELECT data_json FROM events", [], |r| r.get(0))
            .expect("row");
        let parsed: Value = serde_json::from_str(&data).expect("json");
        assert_eq!(parsed["peak"], 12.5);
        assert!(!data.contains(' '), "compact serialization expected");
    }

    #[test]
    fn follow_picks_up_appended_lines() {
        let tmp = tempfile::tempdir().expect("tmp");
        let dir = tmp.path().to_path_buf();
        let log = current_daily_file(&dir, "bridge");
        write_log(&log, &[json!({"seq": 1, "type": "event", "session_id": "S1"})]);

        let db_path = tmp.path().join("bridge.db");
        let stop = std::sync::Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let dir_thread = dir.clone();
        let handle = std::thread::spawn(move || {
            let conn = ensure_db(&db_path).expect("db");
            follow(&conn, &dir_thread, "bridge", Duration::from_millis(20), true, &stop_thread).expect("follow")
        });

        std::thread::sleep(Duration::from_millis(150));
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&log).expect("open");
            writeln!(f, "{}", json!({"seq": 2, "type": "event", "session_id": "S1"})).expect("append");
        }
        std::thread::sleep(Duration::from_millis(250));
        stop.store(true, Ordering::Relaxed);
        let ingested = handle.join().expect("join");
        assert_eq!(ingested, 2);

        let conn = ensure_db(&tmp.path().join("bridge.db")).expect("db");
        assert_eq!(row_count(&conn), 2);
    }
}
