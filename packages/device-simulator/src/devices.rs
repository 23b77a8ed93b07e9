//! devices.rs — Scripted device models
//!
//! Pure frame/schedule building for the simulated timer and plate sensors.
//! The timer runs strings of shots on a fixed cadence; each shot fires an
//! impact burst on the sensors after a short flight delay. Amplitudes ride
//! on a Gaussian noise floor so detector warm-up and baseline tracking see
//! realistic input.

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use frame_types::{TimerFrame, VibrationFrame, SUBTYPE_SHOT, SUBTYPE_START, SUBTYPE_STRING_END, TIMER_STATUS};

// ── Timer scripting ───────────────────────────────────────────────────────────

/// One string of shots as the timer would run it.
#[derive(Debug, Clone)]
pub struct StringPlan {
    /// Connect (or previous string end) → start tone.
    pub start_delay: Duration,
    pub shot_interval: Duration,
    pub shots: u8,
    /// Last shot → string-end frame.
    pub end_delay: Duration,
    /// Strings to run before going silent.
    pub strings: u32,
}

impl Default for StringPlan {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(3),
            shot_interval: Duration::from_secs(2),
            shots: 3,
            end_delay: Duration::from_millis(1500),
            strings: 1,
        }
    }
}

pub fn t0_frame(tail: u8) -> [u8; TimerFrame::LEN] {
    TimerFrame {
        b0: TIMER_STATUS,
        b1: SUBTYPE_START,
        b2: 0,
        b3: 0,
        b4: 0,
        p1: 0,
        p2: 0,
        p3: 0,
        p4: 0,
        tail,
    }
    .encode()
}

/// Shot record frame: duplicated shot index, times in hundredths.
pub fn shot_frame(idx: u8, t_cs: u16, split_cs: u16, first_cs: u16, tail: u8) -> [u8; TimerFrame::LEN] {
    TimerFrame {
        b0: TIMER_STATUS,
        b1: SUBTYPE_SHOT,
        b2: idx,
        b3: idx,
        b4: 0x01,
        p1: t_cs,
        p2: split_cs,
        p3: first_cs,
        p4: t_cs,
        tail,
    }
    .encode()
}

pub fn string_end_frame(tail: u8) -> [u8; TimerFrame::LEN] {
    TimerFrame {
        b0: TIMER_STATUS,
        b1: SUBTYPE_STRING_END,
        b2: 0,
        b3: 0,
        b4: 0x01,
        p1: 0x0001, // not the legacy all-zero T0 shape
        p2: 0,
        p3: 0,
        p4: 0,
        tail,
    }
    .encode()
}

// ── Sensor impact model ───────────────────────────────────────────────────────

/// Amplitude model for one plate: Gaussian noise floor plus geometric
/// ring-down bursts when a shot lands.
#[derive(Debug, Clone)]
pub struct ImpactModel {
    /// Mean of the noise floor, mm/s.
    pub noise_floor: f64,
    pub noise_sigma: f64,
    /// Initial burst amplitude, mm/s.
    pub peak: f64,
    /// Per-sample decay factor (0..1).
    pub decay: f64,
    /// Shot → plate impact delay.
    pub flight_delay: Duration,
    /// Sample spacing of the 100 Hz stream.
    pub dt: Duration,
}

impl Default for ImpactModel {
    fn default() -> Self {
        Self {
            noise_floor: 1.2,
            noise_sigma: 0.3,
            peak: 60.0,
            decay: 0.55,
            flight_delay: Duration::from_millis(30),
            dt: Duration::from_millis(10),
        }
    }
}

impl ImpactModel {
    /// Ring-down amplitudes until the burst sinks into the noise floor.
    pub fn burst(&self) -> Vec<f64> {
        let mut out = Vec::new();
        let mut amp = self.peak;
        while amp > self.noise_floor {
            out.push(amp);
            amp *= self.decay;
        }
        out
    }

    /// Samples of pure flight time before the burst arrives.
    pub fn flight_samples(&self) -> usize {
        (self.flight_delay.as_secs_f64() / self.dt.as_secs_f64()).round() as usize
    }

    pub fn noise<R: Rng>(&self, rng: &mut R) -> f64 {
        let dist = Normal::new(self.noise_floor, self.noise_sigma).unwrap_or_else(|_| {
            // sigma <= 0 degenerates to the floor itself
            Normal::new(self.noise_floor, f64::MIN_POSITIVE).expect("valid sigma")
        });
        dist.sample(rng).abs()
    }
}

/// Wire bytes for one sensor sample. The amplitude is spread over fixed
/// direction cosines so the decoded velocity magnitude reproduces it.
pub fn vibration_frame(amp: f64, temp_c: f64) -> [u8; 28] {
    VibrationFrame {
        vx: amp * 0.6,
        vy: amp * 0.48,
        vz: amp * 0.64,
        adx: 0.0,
        ady: 0.0,
        adz: 1.5,
        temp_c,
        dx: 0.0,
        dy: 0.0,
        dz: 0.0,
        hzx: 0.0,
        hzy: 0.0,
        hzz: 0.0,
    }
    .encode()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use frame_types::{classify_signals, TimerSignal};

    #[test]
    fn scripted_frames_classify_as_their_signals() {
        assert_eq!(classify_signals(&t0_frame(1)), vec![TimerSignal::T0]);
        assert_eq!(classify_signals(&shot_frame(2, 348, 168, 436, 1)), vec![TimerSignal::ShotRaw]);
        assert_eq!(classify_signals(&string_end_frame(1)), vec![TimerSignal::ArrowEnd]);
    }

    #[test]
    fn shot_frame_decodes_to_matching_record() {
        let frame = TimerFrame::decode(&shot_frame(2, 348, 168, 436, 9)).expect("decode");
        assert!(frame.is_shot());
        let rec = frame.shot_record();
        assert_eq!(rec.shot_idx, 2);
        assert_eq!(rec.t_s, 3.48);
        assert_eq!(rec.tail_hex, "0x09");
    }

    #[test]
    fn burst_decays_below_the_noise_floor() {
        let model = ImpactModel::default();
        let burst = model.burst();
        assert!(burst.len() >= 4);
        assert_eq!(burst[0], 60.0);
        for pair in burst.windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert!(*burst.last().expect("nonempty") > model.noise_floor);
    }

    #[test]
    fn vibration_frame_preserves_amplitude() {
        let decoded = VibrationFrame::decode(&vibration_frame(50.0, 21.5)).expect("decode");
        let mag = decoded.velocity_magnitude();
        // Integer quantization allows a small error.
        assert!((mag - 50.0).abs() < 1.0, "magnitude {mag}");
        assert!((decoded.temp_c - 21.5).abs() < 0.01);
    }
}
