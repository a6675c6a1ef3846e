//! Calibration estimation from captured reference data
//!
//! The offset procedure captures with the inputs grounded; the gain
//! procedure captures a known reference voltage. Both work on averaged raw
//! codes, converted with the front-end constants only.

use super::store::CalibrationStore;
use crate::nodes::adc_conv::{CODE_HALF_SCALE, FRONTEND_GAIN, REFERENCE_SCALE};
use crate::{ConvError, Result};
use tracing::{debug, info};

/// Full-scale input range seen by the offset DAC, in volts
pub const OFFSET_RANGE: f64 = 3.192;
/// Offset code placing the ADC at mid-scale
pub const OFFSET_MIDSCALE: i32 = 2048;
/// Reference voltage applied during gain calibration
pub const DEFAULT_GAIN_REFERENCE: f64 = 0.46172;

/// Mean of a capture, `None` when empty
pub fn average(samples: &[f32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64).sum();
    Some(sum / samples.len() as f64)
}

/// Convert a raw code to volts ignoring the hardware gain
pub fn raw_to_volts(code: f64, correction_gain: f64) -> f64 {
    code * REFERENCE_SCALE / (CODE_HALF_SCALE * FRONTEND_GAIN) * correction_gain
}

/// Offset code that cancels a measured grounded-input voltage
pub fn offset_code_from_volts(volts: f64) -> i32 {
    (OFFSET_MIDSCALE as f64 - volts * 4096.0 * FRONTEND_GAIN / OFFSET_RANGE) as i32
}

/// Correction gain mapping a measured reference back to its nominal value
pub fn correction_gain_from_volts(reference: f64, measured: f64) -> f64 {
    reference / measured
}

/// Estimates ADC offset codes and correction gains from captures
#[derive(Debug, Clone, Copy)]
pub struct AdcCalibrator {
    reference: f64,
}

impl Default for AdcCalibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl AdcCalibrator {
    pub fn new() -> Self {
        Self {
            reference: DEFAULT_GAIN_REFERENCE,
        }
    }

    /// With a custom gain reference voltage
    pub fn with_reference(mut self, reference: f64) -> Self {
        self.reference = reference;
        self
    }

    pub fn reference(&self) -> f64 {
        self.reference
    }

    /// Offset code from a capture taken with the input grounded.
    /// The averaged code is truncated to an integer code before conversion.
    pub fn estimate_offset(&self, grounded_codes: &[f32]) -> Result<i32> {
        let avg = average(grounded_codes).ok_or(ConvError::EmptyCapture)?;
        let volts = raw_to_volts(avg.trunc(), 1.0);
        let code = offset_code_from_volts(volts);
        debug!("Offset estimate: avg={} volts={} code={}", avg, volts, code);
        Ok(code)
    }

    /// Refine an offset code by searching `span + 1` codes centered on `center`.
    ///
    /// `capture` applies a candidate code and returns a grounded capture.
    /// The candidate whose capture averages closest to zero wins; ties keep
    /// the lower code. A search window that leaves the `i32` range fails
    /// with `ConvError::OffsetSearchRange`.
    pub fn fine_tune_offset<F>(&self, center: i32, span: u32, mut capture: F) -> Result<i32>
    where
        F: FnMut(i32) -> Vec<f32>,
    {
        let out_of_range = || ConvError::OffsetSearchRange { center, span };
        let first = i32::try_from(span / 2)
            .ok()
            .and_then(|half| center.checked_sub(half))
            .ok_or_else(out_of_range)?;
        i32::try_from(span)
            .ok()
            .and_then(|width| first.checked_add(width))
            .ok_or_else(out_of_range)?;

        let mut best: Option<(i32, f64)> = None;
        for candidate in (0..=span).map(|i| first + i as i32) {
            let avg = average(&capture(candidate))
                .ok_or(ConvError::EmptyCapture)?
                .abs();
            if best.is_none_or(|(_, best_avg)| avg < best_avg) {
                best = Some((candidate, avg));
            }
        }

        // span + 1 >= 1 candidates, so best is always set
        best.map(|(code, _)| code).ok_or(ConvError::EmptyCapture)
    }

    /// Correction gain from a capture of the reference voltage
    pub fn estimate_gain(&self, reference_codes: &[f32]) -> Result<f64> {
        let avg = average(reference_codes).ok_or(ConvError::EmptyCapture)?;
        let measured = raw_to_volts(avg, 1.0);
        if measured == 0.0 {
            return Err(ConvError::DegenerateMeasurement);
        }
        let gain = correction_gain_from_volts(self.reference, measured);
        debug!("Gain estimate: measured={} V gain={}", measured, gain);
        Ok(gain)
    }

    /// Store an estimated correction gain for a channel
    pub fn apply_gain(&self, store: &CalibrationStore, channel: usize, gain: f64) {
        info!("ch{} correction gain -> {}", channel, gain);
        store.set_correction_gain(channel, gain as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[1.0, 2.0, 3.0, 6.0]), Some(3.0));
    }

    #[test]
    fn test_raw_to_volts_full_code() {
        assert_relative_eq!(raw_to_volts(2048.0, 1.0), 0.6, max_relative = 1e-12);
        assert_relative_eq!(raw_to_volts(2048.0, 0.5), 0.3, max_relative = 1e-12);
    }

    #[test]
    fn test_offset_code() {
        assert_eq!(offset_code_from_volts(0.0), 2048);
        // 60 mV is ~100.09 offset codes
        assert_eq!(offset_code_from_volts(0.06), 1947);
        // Truncation toward zero
        assert_eq!(offset_code_from_volts(-0.0001), 2048);
    }

    #[test]
    fn test_estimate_offset_grounded() {
        let calibrator = AdcCalibrator::new();
        assert_eq!(calibrator.estimate_offset(&[0.0; 16]).unwrap(), 2048);

        // A bias of 10.5 codes truncates to 10 and moves the offset down
        let capture = [10.0, 11.0, 10.0, 11.0];
        let code = calibrator.estimate_offset(&capture).unwrap();
        let expected = offset_code_from_volts(raw_to_volts(10.0, 1.0));
        assert_eq!(code, expected);
        assert!(code < 2048);
    }

    #[test]
    fn test_estimate_gain() {
        let calibrator = AdcCalibrator::new();
        // Nominal reference reads back exactly
        let nominal_code = DEFAULT_GAIN_REFERENCE / raw_to_volts(1.0, 1.0);
        let gain = calibrator.estimate_gain(&[nominal_code as f32; 8]).unwrap();
        assert_abs_diff_eq!(gain, 1.0, epsilon = 1e-6);

        let low_code = (nominal_code * 0.9) as f32;
        let low = calibrator.estimate_gain(&[low_code; 8]).unwrap();
        assert_relative_eq!(low, 1.0 / 0.9, max_relative = 1e-5);
    }

    #[test]
    fn test_estimate_errors() {
        let calibrator = AdcCalibrator::new();
        assert!(matches!(
            calibrator.estimate_offset(&[]),
            Err(ConvError::EmptyCapture)
        ));
        assert!(matches!(
            calibrator.estimate_gain(&[]),
            Err(ConvError::EmptyCapture)
        ));
        assert!(matches!(
            calibrator.estimate_gain(&[1.0, -1.0]),
            Err(ConvError::DegenerateMeasurement)
        ));
    }

    #[test]
    fn test_fine_tune_picks_smallest_average() {
        let calibrator = AdcCalibrator::new();
        // Residual is zero at code 2051
        let mut tried = Vec::new();
        let best = calibrator
            .fine_tune_offset(2048, 20, |code| {
                tried.push(code);
                vec![(code - 2051) as f32; 4]
            })
            .unwrap();
        assert_eq!(best, 2051);
        assert_eq!(tried.len(), 21);
        assert_eq!(tried.first(), Some(&2038));
        assert_eq!(tried.last(), Some(&2058));
    }

    #[test]
    fn test_fine_tune_window_outside_code_range() {
        let calibrator = AdcCalibrator::new();
        let mut captures = 0;
        let result = calibrator.fine_tune_offset(i32::MAX - 1, 4, |_| {
            captures += 1;
            vec![1.0]
        });
        assert!(matches!(
            result,
            Err(ConvError::OffsetSearchRange { center, span: 4 }) if center == i32::MAX - 1
        ));
        assert_eq!(captures, 0);

        assert!(matches!(
            calibrator.fine_tune_offset(i32::MIN + 1, 4, |_| vec![1.0]),
            Err(ConvError::OffsetSearchRange { .. })
        ));
        assert!(matches!(
            calibrator.fine_tune_offset(0, u32::MAX, |_| vec![1.0]),
            Err(ConvError::OffsetSearchRange { .. })
        ));
    }

    #[test]
    fn test_fine_tune_window_at_code_limit() {
        let calibrator = AdcCalibrator::new();
        let best = calibrator
            .fine_tune_offset(i32::MAX - 2, 4, |code| vec![(i32::MAX - code) as f32])
            .unwrap();
        assert_eq!(best, i32::MAX);
    }

    #[test]
    fn test_fine_tune_empty_capture() {
        let calibrator = AdcCalibrator::new();
        assert!(matches!(
            calibrator.fine_tune_offset(2048, 4, |_| Vec::new()),
            Err(ConvError::EmptyCapture)
        ));
    }

    #[test]
    fn test_apply_gain() {
        let store = CalibrationStore::new(2);
        let calibrator = AdcCalibrator::new().with_reference(0.5);
        assert_eq!(calibrator.reference(), 0.5);
        calibrator.apply_gain(&store, 1, 1.25);
        assert_eq!(store.correction_gain(1), 1.25);
        assert_eq!(store.correction_gain(0), 1.0);
    }
}
