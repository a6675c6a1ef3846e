//! Raw capture file source
//!
//! A capture is a flat sequence of frames; each frame holds one
//! little-endian `f32` per channel:
//!
//! ```text
//! ch0[0] ch1[0] .. chN[0] ch0[1] ch1[1] .. chN[1] ..
//! ```

use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::runtime::sample::SampleBatch;
use crate::{ConvError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Streams an interleaved capture file as per-channel batches
pub struct RawFileSource {
    name: String,
    reader: BufReader<File>,
    channels: usize,
    batch_len: usize,
    total_frames: u64,
    position: u64,
    frame_buffer: Vec<u8>,
}

impl RawFileSource {
    /// Open a capture with `channels` interleaved channels
    ///
    /// Fails if the file size is not a whole number of frames.
    pub fn open(path: impl AsRef<Path>, channels: usize, batch_len: usize) -> Result<Self> {
        if channels == 0 {
            return Err(ConvError::InvalidChannelCount(channels));
        }

        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let frame_bytes = (channels * SAMPLE_BYTES) as u64;
        if size % frame_bytes != 0 {
            return Err(ConvError::InvalidCapture(format!(
                "{}: {} bytes is not a multiple of the {}-byte frame",
                path.display(),
                size,
                frame_bytes
            )));
        }

        let total_frames = size / frame_bytes;
        info!(
            "Opened {}: {} channels, {} samples per channel",
            path.display(),
            channels,
            total_frames
        );

        Ok(Self {
            name: "raw_file_source".to_string(),
            reader: BufReader::new(file),
            channels,
            batch_len: batch_len.max(1),
            total_frames,
            position: 0,
            frame_buffer: Vec::new(),
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Samples per channel in the capture
    pub fn total_samples(&self) -> u64 {
        self.total_frames
    }

    /// Read the next `frames` frames and split them by channel
    fn read_batch(&mut self, frames: usize) -> std::io::Result<Vec<Vec<f32>>> {
        self.frame_buffer.resize(frames * self.channels * SAMPLE_BYTES, 0);
        self.reader.read_exact(&mut self.frame_buffer)?;

        let mut channels = vec![Vec::with_capacity(frames); self.channels];
        for (i, bytes) in self.frame_buffer.chunks_exact(SAMPLE_BYTES).enumerate() {
            let value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            channels[i % self.channels].push(value);
        }
        Ok(channels)
    }
}

impl ProcessNode for RawFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        PortSchema::numbered::<SampleBatch>("out", self.channels, PortDirection::Output)
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let senders: Vec<_> = outputs
            .iter()
            .map(|port| port.get::<SampleBatch>())
            .collect();

        let remaining = self.total_frames - self.position;
        if remaining == 0 {
            debug!("[{}] End of file at sample {}", self.name, self.position);
            for sender in senders.iter().flatten() {
                sender.close();
            }
            return Err(WorkError::Shutdown);
        }

        let frames = remaining.min(self.batch_len as u64) as usize;
        let batch = self
            .read_batch(frames)
            .map_err(|e| WorkError::NodeError(format!("Read failed: {}", e)))?;

        for (samples, sender) in batch.into_iter().zip(&senders) {
            if let Some(sender) = sender {
                sender.send(SampleBatch::new(samples, self.position))?;
            }
        }

        self.position += frames as u64;
        Ok(frames)
    }
}
