//! ADC sample/voltage conversion

mod converter;
mod engine;

pub use converter::AdcSampleConv;
pub use engine::{
    CODE_HALF_SCALE, Direction, FRONTEND_GAIN, REFERENCE_SCALE, Transform, sample_to_volts,
    volts_to_sample,
};
