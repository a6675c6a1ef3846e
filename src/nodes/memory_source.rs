//! In-memory multi-channel source

use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::runtime::sample::SampleBatch;
use crate::{ConvError, Result};
use tracing::info;

/// Streams per-channel sample vectors as fixed-size batches
///
/// Every cycle sends one batch per channel, all at the same position. The
/// final batch may be shorter. After the last batch the outputs are closed.
pub struct BatchSource {
    name: String,
    channels: Vec<Vec<f32>>,
    batch_len: usize,
    position: usize,
}

impl BatchSource {
    /// Create a source over `channels`, which must all have the same length
    pub fn new(channels: Vec<Vec<f32>>, batch_len: usize) -> Result<Self> {
        if channels.is_empty() {
            return Err(ConvError::InvalidChannelCount(0));
        }
        let len = channels[0].len();
        if let Some(ch) = channels.iter().position(|c| c.len() != len) {
            return Err(ConvError::InvalidCapture(format!(
                "channel {} has {} samples, expected {}",
                ch,
                channels[ch].len(),
                len
            )));
        }

        Ok(Self {
            name: "batch_source".to_string(),
            channels,
            batch_len: batch_len.max(1),
            position: 0,
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn total_samples(&self) -> usize {
        self.channels[0].len()
    }
}

impl ProcessNode for BatchSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        self.channels.len()
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        PortSchema::numbered::<SampleBatch>("out", self.channels.len(), PortDirection::Output)
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let senders: Vec<_> = outputs
            .iter()
            .map(|port| port.get::<SampleBatch>())
            .collect();

        if self.position >= self.total_samples() {
            info!("[{}] Sent {} samples per channel", self.name, self.position);
            for sender in senders.iter().flatten() {
                sender.close();
            }
            return Err(WorkError::Shutdown);
        }

        let end = (self.position + self.batch_len).min(self.total_samples());
        for (channel, sender) in senders.iter().enumerate() {
            if let Some(sender) = sender {
                let data = &self.channels[channel][self.position..end];
                sender.send(SampleBatch::new(data, self.position as u64))?;
            }
        }

        let sent = end - self.position;
        self.position = end;
        Ok(sent)
    }
}
