//! Tempo setting and tick/time conversion.

use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, Result};

pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 420;
pub const DEFAULT_BPM: u32 = 120;
pub const MICROS_PER_MINUTE: u32 = 60_000_000;
pub const DEFAULT_MICROS_PER_BEAT: u32 = MICROS_PER_MINUTE / DEFAULT_BPM;

/// BPM together with its derived microseconds-per-beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoSetting {
    bpm: u32,
    micros_per_beat: u32,
}

impl Default for TempoSetting {
    fn default() -> Self {
        TempoSetting {
            bpm: DEFAULT_BPM,
            micros_per_beat: DEFAULT_MICROS_PER_BEAT,
        }
    }
}

impl TempoSetting {
    /// User-selected tempo, limited to 20..=420 BPM.
    pub fn from_bpm(bpm: u32) -> Result<Self> {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(BridgeError::Configuration(format!(
                "Tempo must be {}-{} BPM, got {}",
                MIN_BPM, MAX_BPM, bpm
            )));
        }
        Ok(TempoSetting {
            bpm,
            micros_per_beat: MICROS_PER_MINUTE / bpm,
        })
    }

    /// Tempo taken from a file's tempo meta event. The BPM is derived and not
    /// range-limited, since files may carry any tempo.
    pub fn from_micros_per_beat(micros_per_beat: u32) -> Self {
        let micros_per_beat = micros_per_beat.max(1);
        TempoSetting {
            bpm: MICROS_PER_MINUTE / micros_per_beat,
            micros_per_beat,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    /// Exact BPM implied by the microseconds-per-beat.
    pub fn exact_bpm(&self) -> f64 {
        MICROS_PER_MINUTE as f64 / self.micros_per_beat as f64
    }

    pub fn micros_per_beat(&self) -> u32 {
        self.micros_per_beat
    }

    /// Wall-clock length of `delta_ticks` at this tempo.
    pub fn ticks_to_duration(&self, delta_ticks: u64, ticks_per_beat: u32) -> Duration {
        ticks_to_duration(delta_ticks, ticks_per_beat, self.micros_per_beat)
    }
}

impl fmt::Display for TempoSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BPM", self.bpm)
    }
}

/// `delta_ticks * micros_per_beat / ticks_per_beat` microseconds, computed in
/// integer nanoseconds.
pub fn ticks_to_duration(delta_ticks: u64, ticks_per_beat: u32, micros_per_beat: u32) -> Duration {
    if ticks_per_beat == 0 {
        return Duration::ZERO;
    }
    let nanos = delta_ticks as u128 * micros_per_beat as u128 * 1_000 / ticks_per_beat as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
