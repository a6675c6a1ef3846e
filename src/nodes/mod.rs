//! Processing nodes
//!
//! - **Sources**: [`BatchSource`] (in-memory), [`RawFileSource`] (capture files)
//! - **Converters**: [`AdcSampleConv`]
//! - **Sinks**: [`BatchCollector`]
//!
//! Every node exchanges [`SampleBatch`] values, one batch per channel per
//! cycle, on ports named `in0..` / `out0..`.
//!
//! # Examples
//!
//! ```ignore
//! use adc_sample_conv::nodes::{AdcSampleConv, BatchCollector, BatchSource};
//! use adc_sample_conv::runtime::Pipeline;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("source", BatchSource::new(vec![vec![2048.0; 64]], 16)?)?;
//! pipeline.add_process("conv", AdcSampleConv::new(1, None, false)?)?;
//! pipeline.add_process("sink", BatchCollector::new(1))?;
//! pipeline.connect("source", "out0", "conv", "in0")?;
//! pipeline.connect("conv", "out0", "sink", "in0")?;
//! pipeline.build()?.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adc_conv;
mod collector;
mod memory_source;
mod raw_file;

pub use adc_conv::{AdcSampleConv, Direction};
pub use collector::{BatchCollector, CollectedSamples};
pub use memory_source::BatchSource;
pub use raw_file::RawFileSource;

pub use crate::runtime::SampleBatch;
