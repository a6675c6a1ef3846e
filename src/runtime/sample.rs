//! Core data types for streaming sample batches

use std::fmt;
use std::sync::Arc;

/// A fixed-length batch of `f32` values from a single channel
///
/// One batch per channel flows through each processing cycle. The batch
/// length is chosen by the producer; converters keep it unchanged.
///
/// `position` is the stream index of the first value, so consumers can
/// reassemble a channel and line up channels that were batched the same way.
/// Data is shared via `Arc` so broadcasting a batch to several consumers
/// does not copy the samples.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBatch {
    /// Sample values, ADC codes or volts depending on the producer
    pub data: Arc<[f32]>,
    /// Stream index of `data[0]` (0-based)
    pub position: u64,
}

impl SampleBatch {
    /// Create a new batch
    pub fn new(data: impl Into<Arc<[f32]>>, position: u64) -> Self {
        Self {
            data: data.into(),
            position,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The position one past the last sample in this batch
    #[inline]
    pub fn end_position(&self) -> u64 {
        self.position + self.data.len() as u64
    }
}

impl fmt::Display for SampleBatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SampleBatch[pos={}, samples={}]",
            self.position,
            self.data.len()
        )
    }
}
