//! Calibration handling for ADC channels
//!
//! - [`CalibrationStore`]: shared per-channel calibration values
//! - [`CalibrationSource`]: live values reported by the acquisition device
//! - [`estimate`]: offset and gain estimation from reference captures

pub mod estimate;
mod source;
mod store;

pub use estimate::AdcCalibrator;
pub use source::{
    CalibrationSource, GainMode, M2K_FILTER_COMPENSATION, M2K_HIGH_GAIN, M2K_LOW_GAIN,
    RefreshScope, StaticCalibrationSource,
};
pub use store::{
    CalibrationStore, ChannelCalibration, DEFAULT_CORRECTION_GAIN, DEFAULT_FILTER_COMPENSATION,
    DEFAULT_HARDWARE_GAIN, DEFAULT_OFFSET,
};
