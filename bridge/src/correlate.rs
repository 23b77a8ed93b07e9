//! Timing correlation between timer starts and plate impacts.
//!
//! Per session, pairs each `T0` with at most one subsequent `HIT` inside a
//! bounded lag window. When both records carry decoded timer fields
//! (`data.amg`), a *strong* match on `shot_idx` or `tail_hex` is preferred
//! and mismatching candidates are passed over; records without timer fields
//! on either side fall back to the earliest in-window candidate (*weak*
//! match). A consumed HIT can never satisfy a later T0.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;

/// One matched `(T0, HIT)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub session_id: String,
    pub t0_seq: i64,
    pub t0_ts_ms: f64,
    pub hit_seq: i64,
    pub hit_ts_ms: f64,
    pub offset_ms: f64,
}

#[derive(Debug, Clone, Default)]
struct AmgKey {
    shot_idx: Option<i64>,
    tail_hex: Option<String>,
}

impl AmgKey {
    fn from_data_json(data_json: &str) -> Option<Self> {
        let data: Value = serde_json::from_str(data_json).ok()?;
        let amg = data.get("amg")?;
        Some(Self {
            shot_idx: amg.get("shot_idx").and_then(Value::as_i64),
            tail_hex: amg.get("tail_hex").and_then(Value::as_str).map(str::to_owned),
        })
    }

    /// Strong-match rule: same shot index or same string id.
    fn matches(&self, other: &Self) -> bool {
        let shot = self.shot_idx.is_some() && self.shot_idx == other.shot_idx;
        let tail = self.tail_hex.is_some() && self.tail_hex == other.tail_hex;
        shot || tail
    }
}

#[derive(Debug)]
struct EventRow {
    seq: i64,
    ts_ms: f64,
    amg: Option<AmgKey>,
}

/// Fetch T0/HIT rows and run the per-session matcher. `session` narrows to
/// one session; otherwise all sessions are processed independently.
pub fn generate_matches(
    conn: &Connection,
    session: Option<&str>,
    max_lag_ms: f64,
) -> Result<Vec<MatchRecord>> {
    // Both the bridge vocabulary (T0 / Sensor_HIT) and the bare legacy names
    // are accepted.
    let base = "SELECT seq, ts_ms, session_id, msg, data_json FROM events \
                WHERE msg IN ('T0', 'Timer_T0', 'HIT', 'Sensor_HIT')";
    let mut per_session: BTreeMap<String, (Vec<EventRow>, Vec<EventRow>)> = BTreeMap::new();

    let mut load = |sql: &str, params: &[&dyn rusqlite::ToSql]| -> Result<()> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(0)?;
            let ts_ms: f64 = row.get(1)?;
            let session_id: Option<String> = row.get(2)?;
            let msg: String = row.get(3)?;
            let data_json: Option<String> = row.get(4)?;
            let event = EventRow {
                seq,
                ts_ms,
                amg: data_json.as_deref().and_then(AmgKey::from_data_json),
            };
            let bucket = per_session.entry(session_id.unwrap_or_default()).or_default();
            if msg == "T0" || msg == "Timer_T0" {
                bucket.0.push(event);
            } else {
                bucket.1.push(event);
            }
        }
        Ok(())
    };

    match session {
        Some(s) => load(&format!("{base} AND session_id = ?1 ORDER BY ts_ms"), &[&s])?,
        None => load(&format!("{base} ORDER BY ts_ms"), &[])?,
    }

    let mut matches = Vec::new();
    for (session_id, (t0s, hits)) in &per_session {
        let mut used = vec![false; hits.len()];
        for t0 in t0s {
            let mut chosen = None;
            for (i, hit) in hits.iter().enumerate() {
                if used[i] || hit.ts_ms <= t0.ts_ms {
                    continue;
                }
                let offset = hit.ts_ms - t0.ts_ms;
                if offset > max_lag_ms {
                    break; // hits are time-ordered; nothing further can fit
                }
                match (&t0.amg, &hit.amg) {
                    (Some(t0_amg), Some(hit_amg)) => {
                        if t0_amg.matches(hit_amg) {
                            chosen = Some((i, offset));
                            break;
                        }
                        // Mismatching shot stays available for its own T0.
                    }
                    (None, None) => {
                        chosen = Some((i, offset));
                        break;
                    }
                    // One-sided timer fields: ambiguous, skip the candidate.
                    _ => {}
                }
            }
            if let Some((i, offset)) = chosen {
                used[i] = true;
                matches.push(MatchRecord {
                    session_id: session_id.clone(),
                    t0_seq: t0.seq,
                    t0_ts_ms: t0.ts_ms,
                    hit_seq: hits[i].seq,
                    hit_ts_ms: hits[i].ts_ms,
                    offset_ms: offset,
                });
            }
        }
    }
    Ok(matches)
}

// ── Summary & CSV ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub matches: usize,
    pub sessions: usize,
    pub mean_ms: f64,
    pub stddev_ms: f64,
}

pub fn summarize(matches: &[MatchRecord]) -> Summary {
    if matches.is_empty() {
        return Summary { matches: 0, sessions: 0, mean_ms: 0.0, stddev_ms: 0.0 };
    }
    let n = matches.len();
    let sessions = matches
        .iter()
        .map(|m| m.session_id.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    let mean = matches.iter().map(|m| m.offset_ms).sum::<f64>() / n as f64;
    let var = matches.iter().map(|m| (m.offset_ms - mean).powi(2)).sum::<f64>() / n as f64;
    Summary { matches: n, sessions, mean_ms: mean, stddev_ms: var.sqrt() }
}

/// Write matches as CSV with millisecond fields at 3 decimals.
pub fn write_csv(matches: &[MatchRecord], out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let mut f = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    writeln!(f, "session_id,t0_seq,t0_ts_ms,hit_seq,hit_ts_ms,offset_ms")?;
    for m in matches {
        writeln!(
            f,
            "{},{},{:.3},{},{:.3},{:.3}",
            m.session_id, m.t0_seq, m.t0_ts_ms, m.hit_seq, m.hit_ts_ms, m.offset_ms
        )?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
