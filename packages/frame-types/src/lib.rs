//! # frame-types
//!
//! Shared wire-frame structures for the plate bridge.
//!
//! These types are used by:
//! - `bridge`: decoding notification payloads into events and amplitudes
//! - `device-simulator`: producing byte-accurate frames without hardware
//!
//! ## Frame catalogue
//!
//! - **Timer frame**: 14 bytes. Five header bytes `b0..b4`, four little-endian
//!   unsigned 16-bit words `p1..p4` (hundredths of a second for shot records),
//!   one trailer byte (the power-cycle-scoped string id).
//! - **Vibration frame**: 28-byte payload opening with the magic `0x55 0x61`,
//!   then thirteen little-endian words reinterpreted as signed 16-bit.
//!
//! ## Invariants
//! - Decoding never panics; short or mis-tagged payloads return `MalformedFrame`.
//! - Re-encoding a decoded timer frame reproduces the input byte-for-byte.
//! - No checksum is verified here; the transport layer supplies integrity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload too short, wrong length, or missing the expected header magic.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}

// ── Timer frames ──────────────────────────────────────────────────────────────

/// Timer status/event frames carry `0x01` in the first byte.
pub const TIMER_STATUS: u8 = 0x01;
/// Subtype byte (`b1`) values observed on the timer notify characteristic.
pub const SUBTYPE_START: u8 = 0x05;
pub const SUBTYPE_SHOT: u8 = 0x03;
pub const SUBTYPE_TIMEOUT: u8 = 0x08;
pub const SUBTYPE_STRING_END: u8 = 0x09;

/// One 14-byte timer notification, split into raw fields.
///
/// For shot records (`b1 == 0x03`): `b2 == b3` is the shot index, `p1` is the
/// cumulative time T_n x100, `p2` the split x100, `p3` the first-shot time
/// x100 and `p4` duplicates `p1`. `tail` identifies the string of shots and
/// changes across timer power cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFrame {
    pub b0: u8,
    pub b1: u8,
    pub b2: u8,
    pub b3: u8,
    pub b4: u8,
    pub p1: u16,
    pub p2: u16,
    pub p3: u16,
    pub p4: u16,
    pub tail: u8,
}

impl TimerFrame {
    pub const LEN: usize = 14;

    /// Decode exactly 14 bytes into a frame. Length is the only gate; unknown
    /// subtypes still decode so the classifier can inspect them.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() != Self::LEN {
            return Err(FrameError::MalformedFrame("timer frame must be 14 bytes"));
        }
        let word = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);
        Ok(Self {
            b0: payload[0],
            b1: payload[1],
            b2: payload[2],
            b3: payload[3],
            b4: payload[4],
            p1: word(5),
            p2: word(7),
            p3: word(9),
            p4: word(11),
            tail: payload[13],
        })
    }

    /// Inverse of [`TimerFrame::decode`]; reproduces the wire bytes exactly.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.b0;
        out[1] = self.b1;
        out[2] = self.b2;
        out[3] = self.b3;
        out[4] = self.b4;
        out[5..7].copy_from_slice(&self.p1.to_le_bytes());
        out[7..9].copy_from_slice(&self.p2.to_le_bytes());
        out[9..11].copy_from_slice(&self.p3.to_le_bytes());
        out[11..13].copy_from_slice(&self.p4.to_le_bytes());
        out[13] = self.tail;
        out
    }

    /// Shot-record heuristic from field captures: subtype 0x03, duplicated
    /// shot index, non-zero cumulative time.
    pub fn is_shot(&self) -> bool {
        self.b1 == SUBTYPE_SHOT && self.b2 == self.b3 && self.p1 > 0
    }

    /// Friendly decode of the timing fields, attached to log records as
    /// `data.amg` so downstream tooling can match shots without re-parsing hex.
    pub fn shot_record(&self) -> ShotRecord {
        ShotRecord {
            shot_idx: self.b2,
            t_s: f64::from(self.p1) / 100.0,
            split_s: f64::from(self.p2) / 100.0,
            first_s: f64::from(self.p3) / 100.0,
            tail_hex: format!("0x{:02x}", self.tail),
            raw_hex: hex::encode(self.encode()),
        }
    }
}

/// Decoded timing fields of a timer frame, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    pub shot_idx: u8,
    #[serde(rename = "T_s")]
    pub t_s: f64,
    pub split_s: f64,
    pub first_s: f64,
    /// String id trailer byte, e.g. `"0x02"`.
    pub tail_hex: String,
    pub raw_hex: String,
}

// ── Timer signal classification ───────────────────────────────────────────────

/// Closed set of recognized timer signals. Frames outside this set classify
/// to an empty list; power-off is inferred from disconnects, never from bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerSignal {
    /// Start tone; opens a shot session.
    T0,
    /// Individual shot record.
    ShotRaw,
    /// String finished normally (all arrows scored).
    ArrowEnd,
    /// String finished by timer timeout.
    TimeoutEnd,
}

impl TimerSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerSignal::T0 => "T0",
            TimerSignal::ShotRaw => "SHOT_RAW",
            TimerSignal::ArrowEnd => "ARROW_END",
            TimerSignal::TimeoutEnd => "TIMEOUT_END",
        }
    }
}

impl std::fmt::Display for TimerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw timer notification to the signals it carries, in rule order.
/// One frame can yield several signals; unknown frames yield none.
pub fn classify_signals(payload: &[u8]) -> Vec<TimerSignal> {
    let mut out = Vec::new();
    if payload.is_empty() || payload[0] != TIMER_STATUS {
        return out;
    }
    // T0: explicit subtype 0x01 0x05, or the legacy 14-byte form where the
    // word region bytes 5..13 are all zero.
    let explicit_t0 = payload.len() >= 2 && payload[1] == SUBTYPE_START;
    let legacy_t0 = payload.len() == TimerFrame::LEN && payload[5..13].iter().all(|b| *b == 0);
    if explicit_t0 || legacy_t0 {
        out.push(TimerSignal::T0);
    }
    if payload.len() >= 2 {
        match payload[1] {
            SUBTYPE_SHOT => out.push(TimerSignal::ShotRaw),
            SUBTYPE_STRING_END => out.push(TimerSignal::ArrowEnd),
            SUBTYPE_TIMEOUT => out.push(TimerSignal::TimeoutEnd),
            _ => {}
        }
    }
    out
}

// ── Vibration frames ──────────────────────────────────────────────────────────

/// Vibration frame header magic.
pub const VIBRATION_HDR: u8 = 0x55;
pub const VIBRATION_FLAG: u8 = 0x61;
/// Decoded prefix length; longer notifications are accepted and truncated.
pub const VIBRATION_FRAME_LEN: usize = 28;

/// One decoded vibration sensor notification, in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VibrationFrame {
    /// Velocity, mm/s
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    /// Angle, degrees (s16 / 32768 * 180)
    pub adx: f64,
    pub ady: f64,
    pub adz: f64,
    /// Temperature, Celsius (s16 / 100)
    pub temp_c: f64,
    /// Displacement, micrometers
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// Dominant frequency, Hz (per vendor docs; not validated here)
    pub hzx: f64,
    pub hzy: f64,
    pub hzz: f64,
}

impl VibrationFrame {
    /// Decode the first 28 bytes of a notification. Requires the `0x55 0x61`
    /// magic; trailing bytes beyond 28 are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < VIBRATION_FRAME_LEN {
            return Err(FrameError::MalformedFrame("vibration frame shorter than 28 bytes"));
        }
        if payload[0] != VIBRATION_HDR || payload[1] != VIBRATION_FLAG {
            return Err(FrameError::MalformedFrame("vibration frame missing 0x55 0x61 magic"));
        }
        // Thirteen LE words, each reinterpreted as two's-complement.
        let s16 = |i: usize| i16::from_le_bytes([payload[2 + 2 * i], payload[3 + 2 * i]]);
        let angle = |i: usize| f64::from(s16(i)) / 32768.0 * 180.0;
        Ok(Self {
            vx: f64::from(s16(0)),
            vy: f64::from(s16(1)),
            vz: f64::from(s16(2)),
            adx: angle(3),
            ady: angle(4),
            adz: angle(5),
            temp_c: f64::from(s16(6)) / 100.0,
            dx: f64::from(s16(7)),
            dy: f64::from(s16(8)),
            dz: f64::from(s16(9)),
            hzx: f64::from(s16(10)),
            hzy: f64::from(s16(11)),
            hzz: f64::from(s16(12)),
        })
    }

    /// Euclidean magnitude of the velocity vector, mm/s. This is the scalar
    /// amplitude the hit detector consumes.
    pub fn velocity_magnitude(&self) -> f64 {
        (self.vx * self.vx + self.vy * self.vy + self.vz * self.vz).sqrt()
    }

    /// Build the 28 wire bytes for this frame, inverting the decode scales.
    /// Values outside the s16 range saturate. Used by the device simulator.
    pub fn encode(&self) -> [u8; VIBRATION_FRAME_LEN] {
        fn clamp_s16(v: f64) -> i16 {
            v.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        }
        let words: [i16; 13] = [
            clamp_s16(self.vx),
            clamp_s16(self.vy),
            clamp_s16(self.vz),
            clamp_s16(self.adx / 180.0 * 32768.0),
            clamp_s16(self.ady / 180.0 * 32768.0),
            clamp_s16(self.adz / 180.0 * 32768.0),
            clamp_s16(self.temp_c * 100.0),
            clamp_s16(self.dx),
            clamp_s16(self.dy),
            clamp_s16(self.dz),
            clamp_s16(self.hzx),
            clamp_s16(self.hzy),
            clamp_s16(self.hzz),
        ];
        let mut out = [0u8; VIBRATION_FRAME_LEN];
        out[0] = VIBRATION_HDR;
        out[1] = VIBRATION_FLAG;
        for (i, w) in words.iter().enumerate() {
            out[2 + 2 * i..4 + 2 * i].copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}

/// Reduce an arbitrary sensor notification to a scalar amplitude.
///
/// Structured frames use the velocity magnitude. Anything the codec rejects
/// falls back to a byte-energy proxy so unknown frames still feed the
/// detector baseline instead of starving it.
pub fn amplitude(payload: &[u8]) -> f64 {
    match VibrationFrame::decode(payload) {
        Ok(frame) => frame.velocity_magnitude(),
        Err(_) => byte_energy(payload),
    }
}

/// Pseudo-RMS over raw payload bytes: sqrt(mean(b_i^2)).
pub fn byte_energy(payload: &[u8]) -> f64 {
    if payload.is_empty() {
        return 0.0;
    }
    let sum: f64 = payload.iter().map(|b| f64::from(*b) * f64::from(*b)).sum();
    (sum / payload.len() as f64).sqrt()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
