//! Linear conversion between raw ADC codes and volts
//!
//! ```text
//! volts  = (s * 0.78) / (2048 * 1.3 * g_h) * g_c * g_f + o
//! sample = (volts - o) / (g_c * g_f) * (2048 * 1.3 * g_h) / 0.78
//! ```
//!
//! Arithmetic is done in `f64` and narrowed to `f32`. Zero gains are not
//! trapped: the result follows IEEE-754 division (±inf, or NaN for 0/0).

use crate::calibration::ChannelCalibration;

/// 11-bit code magnitude range assumed by the formula
pub const CODE_HALF_SCALE: f64 = (1 << 11) as f64;
/// Front-end divider ratio
pub const FRONTEND_GAIN: f64 = 1.3;
/// ADC reference scaling in volts
pub const REFERENCE_SCALE: f64 = 0.78;

/// Convert a raw ADC code to volts
#[inline]
pub fn sample_to_volts(
    sample: f32,
    correction_gain: f32,
    filter_compensation: f32,
    offset: f32,
    hardware_gain: f32,
) -> f32 {
    ((sample as f64 * REFERENCE_SCALE) / (CODE_HALF_SCALE * FRONTEND_GAIN * hardware_gain as f64)
        * correction_gain as f64
        * filter_compensation as f64
        + offset as f64) as f32
}

/// Convert volts to a raw ADC code
#[inline]
pub fn volts_to_sample(
    volts: f32,
    correction_gain: f32,
    filter_compensation: f32,
    offset: f32,
    hardware_gain: f32,
) -> f32 {
    ((volts as f64 - offset as f64) / (correction_gain as f64 * filter_compensation as f64)
        * (CODE_HALF_SCALE * FRONTEND_GAIN * hardware_gain as f64)
        / REFERENCE_SCALE) as f32
}

/// A per-sample transform parameterized by one channel's calibration
pub type Transform = fn(f32, &ChannelCalibration) -> f32;

/// Conversion direction, fixed for the lifetime of a converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Raw ADC codes in, volts out
    SampleToVolts,
    /// Volts in, raw ADC codes out
    VoltsToSample,
}

impl Direction {
    pub fn from_inverse(inverse: bool) -> Self {
        if inverse {
            Direction::VoltsToSample
        } else {
            Direction::SampleToVolts
        }
    }

    pub fn is_inverse(self) -> bool {
        self == Direction::VoltsToSample
    }

    /// Resolve the direction to its transform once, ahead of a sample loop
    pub fn transform(self) -> Transform {
        match self {
            Direction::SampleToVolts => |s: f32, cal: &ChannelCalibration| {
                sample_to_volts(
                    s,
                    cal.correction_gain,
                    cal.filter_compensation,
                    cal.offset,
                    cal.hardware_gain,
                )
            },
            Direction::VoltsToSample => |v: f32, cal: &ChannelCalibration| {
                volts_to_sample(
                    v,
                    cal.correction_gain,
                    cal.filter_compensation,
                    cal.offset,
                    cal.hardware_gain,
                )
            },
        }
    }

    pub fn apply(self, value: f32, calibration: &ChannelCalibration) -> f32 {
        (self.transform())(value, calibration)
    }
}
