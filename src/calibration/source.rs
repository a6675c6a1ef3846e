//! Device-side calibration source
//!
//! The converter polls a [`CalibrationSource`] once per processing cycle.
//! [`StaticCalibrationSource`] is an in-memory implementation for running
//! without hardware.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Analog front-end gain setting of an ADC channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMode {
    /// Wide input range (±25 V on the M2K)
    #[default]
    Low,
    /// Narrow input range (±2.5 V on the M2K)
    High,
}

/// Live calibration values reported by the acquisition device
pub trait CalibrationSource: Send + Sync {
    /// Correction gain of `channel`
    fn chn_correction_gain(&self, channel: usize) -> f64;

    /// Filter compensation factor for the given sample rate
    fn comp_table(&self, sample_rate: f64) -> f64;

    /// Front-end gain setting of `channel`
    fn chn_hw_gain_mode(&self, channel: usize) -> GainMode;

    /// Front-end gain value for a gain setting
    fn gain_at(&self, mode: GainMode) -> f64;

    /// Current sample rate in Hz
    fn sample_rate(&self) -> f64;
}

/// Which channels are refreshed from the source each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshScope {
    /// Channel 0 only
    #[default]
    FirstChannel,
    /// Every channel
    AllChannels,
}

impl RefreshScope {
    /// Channel indices to refresh for a converter with `channels` channels
    pub fn channels(self, channels: usize) -> Range<usize> {
        match self {
            RefreshScope::FirstChannel => 0..channels.min(1),
            RefreshScope::AllChannels => 0..channels,
        }
    }
}

pub const M2K_LOW_GAIN: f64 = 0.02;
pub const M2K_HIGH_GAIN: f64 = 0.21;

/// Filter compensation by sample rate for the M2K decimation chain
pub const M2K_FILTER_COMPENSATION: [(f64, f64); 6] = [
    (100e6, 1.00),
    (10e6, 1.05),
    (1e6, 1.10),
    (100e3, 1.15),
    (10e3, 1.20),
    (1e3, 1.26),
];

struct StaticState {
    correction_gains: Vec<f64>,
    gain_modes: Vec<GainMode>,
    compensation: Vec<(f64, f64)>,
    sample_rate: f64,
}

/// In-memory calibration source with settable values
///
/// Out-of-range channels report a correction gain of 1.0 and low gain.
/// Correction-gain polls are counted per channel.
pub struct StaticCalibrationSource {
    state: Mutex<StaticState>,
    polls: Vec<AtomicU64>,
}

impl StaticCalibrationSource {
    pub fn new(channels: usize) -> Self {
        Self {
            state: Mutex::new(StaticState {
                correction_gains: vec![1.0; channels],
                gain_modes: vec![GainMode::Low; channels],
                compensation: M2K_FILTER_COMPENSATION.to_vec(),
                sample_rate: 100e6,
            }),
            polls: (0..channels).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StaticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_correction_gain(&self, channel: usize, gain: f64) {
        if let Some(slot) = self.state().correction_gains.get_mut(channel) {
            *slot = gain;
        }
    }

    pub fn set_gain_mode(&self, channel: usize, mode: GainMode) {
        if let Some(slot) = self.state().gain_modes.get_mut(channel) {
            *slot = mode;
        }
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.state().sample_rate = sample_rate;
    }

    /// Replace the (sample rate, compensation) table
    pub fn set_compensation_table(&self, table: Vec<(f64, f64)>) {
        self.state().compensation = table;
    }

    /// Number of times the correction gain of `channel` was read
    pub fn polls(&self, channel: usize) -> u64 {
        self.polls
            .get(channel)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }
}

impl CalibrationSource for StaticCalibrationSource {
    fn chn_correction_gain(&self, channel: usize) -> f64 {
        if let Some(count) = self.polls.get(channel) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.state()
            .correction_gains
            .get(channel)
            .copied()
            .unwrap_or(1.0)
    }

    /// Exact-rate lookup; rates missing from the table are uncompensated
    fn comp_table(&self, sample_rate: f64) -> f64 {
        self.state()
            .compensation
            .iter()
            .find(|(rate, _)| *rate == sample_rate)
            .map_or(1.0, |(_, comp)| *comp)
    }

    fn chn_hw_gain_mode(&self, channel: usize) -> GainMode {
        self.state()
            .gain_modes
            .get(channel)
            .copied()
            .unwrap_or_default()
    }

    fn gain_at(&self, mode: GainMode) -> f64 {
        match mode {
            GainMode::Low => M2K_LOW_GAIN,
            GainMode::High => M2K_HIGH_GAIN,
        }
    }

    fn sample_rate(&self) -> f64 {
        self.state().sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_scope_ranges() {
        assert_eq!(RefreshScope::FirstChannel.channels(4), 0..1);
        assert_eq!(RefreshScope::AllChannels.channels(4), 0..4);
        assert_eq!(RefreshScope::default(), RefreshScope::FirstChannel);
    }

    #[test]
    fn test_static_source_values() {
        let source = StaticCalibrationSource::new(2);
        source.set_correction_gain(1, 0.97);
        source.set_gain_mode(1, GainMode::High);
        source.set_sample_rate(1e6);

        assert_eq!(source.chn_correction_gain(0), 1.0);
        assert_eq!(source.chn_correction_gain(1), 0.97);
        assert_eq!(source.gain_at(source.chn_hw_gain_mode(0)), M2K_LOW_GAIN);
        assert_eq!(source.gain_at(source.chn_hw_gain_mode(1)), M2K_HIGH_GAIN);
        assert_eq!(source.comp_table(source.sample_rate()), 1.10);
        assert_eq!(source.comp_table(123.0), 1.0);
        assert_eq!(source.polls(1), 1);
    }

    #[test]
    fn test_static_source_out_of_range() {
        let source = StaticCalibrationSource::new(1);
        source.set_correction_gain(5, 2.0);
        assert_eq!(source.chn_correction_gain(5), 1.0);
        assert_eq!(source.chn_hw_gain_mode(5), GainMode::Low);
        assert_eq!(source.polls(5), 0);
    }
}
