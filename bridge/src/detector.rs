//! Per-sensor online impact detection.
//!
//! Envelope + hysteresis + ring-min + dead-time over a scalar amplitude
//! stream at a nominal 100 Hz (10 ms steps). Pure state machine: no clocks,
//! no I/O, cannot fail. The orchestrator owns one detector per plate and
//! feeds it in notification order.
//!
//! ## State machine
//! - `idle → ring` when armed, `amp >= min_amp`, the power ratio
//!   `amp^2 / baseline` clears `trigger_high`, and the dead time has elapsed.
//! - `ring → idle` when the ratio drops to `trigger_low` and the ring has
//!   lasted at least `ring_min_ms`; emits one [`Hit`].
//!
//! The baseline is an EMA of sample power, updated only while
//! `|amp| <= 2 * min_amp` so impacts cannot contaminate it. Arming is a
//! one-shot latch once the warm-up has elapsed and the baseline is
//! meaningful.

use serde::Serialize;

use crate::config::DetectorCfg;

/// Ratio denominator guard.
const EPS: f64 = 1e-9;
/// Baseline power at power-on; small but non-zero so ratios stay finite.
const INITIAL_IDLE_RMS: f64 = 1e-6;
/// Stands in for "no hit yet" so the first qualifying ring can start.
const NEVER_HIT_MS: f64 = 1e9;

/// One detected impact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    /// Largest amplitude seen during the ring.
    pub peak: f64,
    /// RMS amplitude over the ring.
    pub rms: f64,
    /// Ring length, `count * dt_ms`.
    pub dur_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Ring,
}

#[derive(Debug)]
pub struct HitDetector {
    params: DetectorCfg,
    state: State,
    /// Rolling baseline power (EMA of amp^2 over calm samples).
    idle_rms: f64,
    since_last_hit_ms: f64,
    elapsed_ms: f64,
    armed: bool,
    // Current-ring accumulators
    peak: f64,
    sum_sq: f64,
    count: u64,
}

impl HitDetector {
    pub fn new(params: DetectorCfg) -> Self {
        Self {
            params,
            state: State::Idle,
            idle_rms: INITIAL_IDLE_RMS,
            since_last_hit_ms: NEVER_HIT_MS,
            elapsed_ms: 0.0,
            armed: false,
            peak: 0.0,
            sum_sq: 0.0,
            count: 0,
        }
    }

    /// True once the warm-up and baseline gates have both passed.
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Current baseline power estimate.
    pub fn baseline(&self) -> f64 {
        self.idle_rms
    }

    /// Push one amplitude sample taken `dt_ms` after the previous one.
    /// Returns a completed [`Hit`] when a ring closes.
    pub fn update(&mut self, amp: f64, dt_ms: f64) -> Option<Hit> {
        self.elapsed_ms += dt_ms;
        self.since_last_hit_ms += dt_ms;

        let env = amp.abs();

        // Only calm samples feed the baseline; impacts must not drag it up.
        if env <= self.params.min_amp * 2.0 {
            self.idle_rms = 0.99 * self.idle_rms + 0.01 * (amp * amp);
        }

        if !self.armed
            && self.elapsed_ms >= self.params.warmup_ms as f64
            && self.idle_rms >= self.params.baseline_min
        {
            self.armed = true;
        }

        let pow_ratio = (env * env) / (self.idle_rms + EPS);

        match self.state {
            State::Idle => {
                if self.armed
                    && env >= self.params.min_amp
                    && pow_ratio >= self.params.trigger_high
                    && self.since_last_hit_ms >= self.params.dead_time_ms as f64
                {
                    self.state = State::Ring;
                    self.peak = env;
                    self.sum_sq = env * env;
                    self.count = 1;
                }
                None
            }
            State::Ring => {
                self.peak = self.peak.max(env);
                self.sum_sq += env * env;
                self.count += 1;
                let dur_ms = self.count as f64 * dt_ms;
                if pow_ratio <= self.params.trigger_low && dur_ms >= self.params.ring_min_ms as f64 {
                    let rms = (self.sum_sq / self.count.max(1) as f64).sqrt();
                    self.state = State::Idle;
                    self.since_last_hit_ms = 0.0;
                    return Some(Hit {
                        peak: self.peak,
                        rms,
                        dur_ms,
                    });
                }
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
