//! Collecting sink

use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::runtime::sample::SampleBatch;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Shared per-channel output of a [`BatchCollector`]
pub type CollectedSamples = Arc<Mutex<Vec<Vec<f32>>>>;

/// Sink that appends every received batch to a per-channel vector
///
/// Inputs are `in0..in{N-1}`. Unconnected inputs are skipped. The sink
/// stops once any connected input reaches end of stream.
pub struct BatchCollector {
    name: String,
    collected: CollectedSamples,
    buffers: Vec<VecDeque<SampleBatch>>,
}

impl BatchCollector {
    pub fn new(channels: usize) -> Self {
        Self {
            name: "batch_collector".to_string(),
            collected: Arc::new(Mutex::new(vec![Vec::new(); channels])),
            buffers: (0..channels).map(|_| VecDeque::new()).collect(),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Handle to the collected samples, readable after the pipeline finishes
    pub fn handle(&self) -> CollectedSamples {
        Arc::clone(&self.collected)
    }
}

impl ProcessNode for BatchCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        self.buffers.len()
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        PortSchema::numbered::<SampleBatch>("in", self.buffers.len(), PortDirection::Input)
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut received = 0;
        let mut connected = 0;

        for (channel, (port, buffer)) in inputs.iter().zip(self.buffers.iter_mut()).enumerate() {
            let Some(mut input) = port.get::<SampleBatch>(buffer) else {
                continue;
            };
            connected += 1;

            let batch = match input.recv() {
                Ok(batch) => batch,
                Err(WorkError::Shutdown) => {
                    debug!("[{}] in{} finished", self.name, channel);
                    return Err(WorkError::Shutdown);
                }
                Err(e) => return Err(e),
            };

            received += batch.len();
            let mut collected = self
                .collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            collected[channel].extend_from_slice(batch.as_slice());
        }

        if connected == 0 {
            return Err(WorkError::Shutdown);
        }
        Ok(received)
    }
}
