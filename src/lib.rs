//! Multi-channel ADC sample/voltage conversion on a streaming node runtime
//!
//! Converts raw ADC codes to volts (or back) using per-channel calibration
//! that other threads may change while the stream is running.
//!
//! # Architecture
//!
//! - **AdcSampleConv**: N-in/N-out converter node with a shared calibration store
//! - **CalibrationStore**: per-channel gains and offsets, lock-free for readers
//! - **CalibrationSource**: device values pulled into the store every cycle
//! - **Scheduler**: thread-per-node runtime over crossbeam channels
//!
//! # Example
//!
//! ```no_run
//! use adc_sample_conv::{AdcSampleConv, BatchCollector, Pipeline, RawFileSource};
//!
//! let conv = AdcSampleConv::new(2, None, false)?;
//! let calibration = conv.calibration();
//! let sink = BatchCollector::new(2);
//! let volts = sink.handle();
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("source", RawFileSource::open("capture.raw", 2, 1024)?)?;
//! pipeline.add_process("conv", conv)?;
//! pipeline.add_process("sink", sink)?;
//! for ch in 0..2 {
//!     pipeline.connect("source", &format!("out{ch}"), "conv", &format!("in{ch}"))?;
//!     pipeline.connect("conv", &format!("out{ch}"), "sink", &format!("in{ch}"))?;
//! }
//!
//! let scheduler = pipeline.build()?;
//! calibration.set_offset(1, -0.012);
//! scheduler.wait();
//! # drop(volts);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod calibration;
pub mod nodes;
pub mod runtime;

pub use calibration::{
    AdcCalibrator, CalibrationSource, CalibrationStore, ChannelCalibration, GainMode,
    RefreshScope, StaticCalibrationSource,
};

pub use nodes::{AdcSampleConv, BatchCollector, BatchSource, Direction, RawFileSource};

pub use runtime::{
    BuildError, ConnectionError, InputPort, OutputPort, Pipeline, PortDirection, PortSchema,
    ProcessNode, SampleBatch, Scheduler, WorkError, WorkResult, register_type,
};

#[derive(Error, Debug)]
pub enum ConvError {
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid capture: {0}")]
    InvalidCapture(String),

    #[error("Capture contains no samples")]
    EmptyCapture,

    #[error("Measured reference is zero volts")]
    DegenerateMeasurement,

    #[error("Offset search window of {span} around {center} leaves the code range")]
    OffsetSearchRange { center: i32, span: u32 },
}

pub type Result<T> = std::result::Result<T, ConvError>;
