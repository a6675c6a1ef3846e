//! ADC sample/voltage converter node
//!
//! Converts N channels of `SampleBatch` between raw ADC codes and volts.
//! Calibration lives in a shared [`CalibrationStore`] that other threads may
//! update at any time; an optional [`CalibrationSource`] is polled at the
//! start of every cycle.

use crate::calibration::{CalibrationSource, CalibrationStore, RefreshScope};
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::ports::{PortDirection, PortSchema};
use crate::runtime::sample::SampleBatch;
use crate::{ConvError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use super::engine::Direction;

/// Multi-channel ADC sample/voltage converter
///
/// Inputs: `in0..in{N-1}`, one `SampleBatch` per channel per cycle.
/// Outputs: `out0..out{N-1}`, batches of the same length and position.
///
/// # Example
/// ```ignore
/// let conv = AdcSampleConv::new(2, None, false)?;
/// let calibration = conv.calibration();
/// pipeline.add_process("conv", conv)?;
/// // later, from a settings thread:
/// calibration.set_offset(0, 0.05);
/// ```
pub struct AdcSampleConv {
    name: String,
    channels: usize,
    direction: Direction,
    store: Arc<CalibrationStore>,
    source: Option<Arc<dyn CalibrationSource>>,
    refresh_scope: RefreshScope,

    /// Per-input putback buffers, persisted across work() calls
    channel_buffers: Vec<VecDeque<SampleBatch>>,
    work_call_count: usize,
}

impl AdcSampleConv {
    /// Create a converter
    ///
    /// # Arguments
    ///
    /// * `channels` - Number of channels, fixed for the converter's lifetime
    /// * `source` - Device to poll for calibration on every cycle, if any
    /// * `inverse` - `false` converts codes to volts, `true` volts to codes
    pub fn new(
        channels: usize,
        source: Option<Arc<dyn CalibrationSource>>,
        inverse: bool,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(ConvError::InvalidChannelCount(channels));
        }

        Ok(Self {
            name: "adc_sample_conv".to_string(),
            channels,
            direction: Direction::from_inverse(inverse),
            store: Arc::new(CalibrationStore::new(channels)),
            source,
            refresh_scope: RefreshScope::default(),
            channel_buffers: (0..channels).map(|_| VecDeque::new()).collect(),
            work_call_count: 0,
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Choose which channels are refreshed from the calibration source
    pub fn with_refresh_scope(mut self, scope: RefreshScope) -> Self {
        self.refresh_scope = scope;
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Shared handle to the calibration store
    pub fn calibration(&self) -> Arc<CalibrationStore> {
        Arc::clone(&self.store)
    }

    /// Pull fresh calibration from the source into the store.
    /// Offsets are never taken from the source.
    pub fn refresh_calibration(&self) {
        let Some(source) = &self.source else {
            return;
        };

        let sample_rate = source.sample_rate();
        let filter_compensation = source.comp_table(sample_rate) as f32;

        for channel in self.refresh_scope.channels(self.channels) {
            let correction_gain = source.chn_correction_gain(channel) as f32;
            let hardware_gain = source.gain_at(source.chn_hw_gain_mode(channel)) as f32;
            trace!(
                "[{}] ch{} refresh: gain={} comp={} hw_gain={}",
                self.name,
                channel,
                correction_gain,
                filter_compensation,
                hardware_gain
            );

            self.store.set_correction_gain(channel, correction_gain);
            self.store.set_filter_compensation(channel, filter_compensation);
            self.store.set_hardware_gain(channel, hardware_gain);
        }
    }

    /// Run one processing cycle over caller-owned buffers.
    ///
    /// Converts `inputs[i][..noutput_items]` into `outputs[i][..noutput_items]`
    /// for every channel and returns `noutput_items`. Each channel uses one
    /// calibration snapshot taken at the start of its loop.
    ///
    /// # Panics
    /// Panics if a buffer is shorter than `noutput_items`.
    pub fn process(
        &self,
        noutput_items: usize,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
    ) -> usize {
        self.refresh_calibration();

        let transform = self.direction.transform();
        for (channel, (input, output)) in inputs
            .iter()
            .zip(outputs.iter_mut())
            .take(self.channels)
            .enumerate()
        {
            let Some(calibration) = self.store.snapshot(channel) else {
                continue;
            };
            for (out, &value) in output[..noutput_items]
                .iter_mut()
                .zip(&input[..noutput_items])
            {
                *out = transform(value, &calibration);
            }
        }

        noutput_items
    }

    /// Convert a single channel's batch with that channel's current calibration
    fn convert_batch(&self, channel: usize, batch: &SampleBatch) -> SampleBatch {
        let transform = self.direction.transform();
        let samples: Vec<f32> = match self.store.snapshot(channel) {
            Some(calibration) => batch
                .as_slice()
                .iter()
                .map(|&value| transform(value, &calibration))
                .collect(),
            None => batch.as_slice().to_vec(),
        };
        SampleBatch::new(samples, batch.position)
    }

    /// Send one batch per channel; unconnected outputs are skipped
    fn send_batches(
        outputs: &[OutputPort],
        batches: impl IntoIterator<Item = SampleBatch>,
    ) -> WorkResult {
        for (channel, batch) in batches.into_iter().enumerate() {
            let port = outputs.get(channel);
            if let Some(sender) = port.and_then(OutputPort::get::<SampleBatch>) {
                sender.send(batch)?;
            }
        }
        Ok(())
    }

    /// Close every connected output
    fn close_outputs(outputs: &[OutputPort]) {
        for sender in outputs.iter().filter_map(|port| port.get::<SampleBatch>()) {
            sender.close();
        }
    }
}

impl ProcessNode for AdcSampleConv {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        self.channels
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        PortSchema::numbered::<SampleBatch>("in", self.channels, PortDirection::Input)
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        PortSchema::numbered::<SampleBatch>("out", self.channels, PortDirection::Output)
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        self.work_call_count += 1;

        if self.work_call_count == 1 {
            debug!(
                "[{}] First work() call: {} inputs, {} outputs, {:?}",
                self.name,
                inputs.len(),
                outputs.len(),
                self.direction
            );
        }

        let mut batches = Vec::with_capacity(self.channels);
        let mut finished = None;
        for (channel, buffer) in self.channel_buffers.iter_mut().enumerate() {
            let mut input = match inputs.get(channel) {
                Some(port) => port.get::<SampleBatch>(buffer),
                None => None,
            }
            .ok_or_else(|| WorkError::NodeError(format!("Missing input {}", channel)))?;

            match input.recv() {
                Ok(batch) => batches.push(batch),
                Err(WorkError::Shutdown) => {
                    finished = Some(channel);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // Batches already taken from the lower inputs are still converted
        // and sent before the outputs close
        if let Some(channel) = finished {
            debug!(
                "[{}] in{} finished, forwarding {} pending batches and closing outputs",
                self.name,
                channel,
                batches.len()
            );
            if !batches.is_empty() {
                self.refresh_calibration();
            }
            let pending: Vec<SampleBatch> = batches
                .iter()
                .enumerate()
                .map(|(ch, batch)| self.convert_batch(ch, batch))
                .collect();
            let sent = Self::send_batches(outputs, pending);
            Self::close_outputs(outputs);
            sent?;
            return Err(WorkError::Shutdown);
        }

        let noutput_items = batches[0].len();
        if let Some((channel, batch)) = batches
            .iter()
            .enumerate()
            .find(|(_, batch)| batch.len() != noutput_items)
        {
            return Err(WorkError::NodeError(format!(
                "Batch length mismatch: in0 has {} samples, in{} has {}",
                noutput_items,
                channel,
                batch.len()
            )));
        }

        let mut converted = vec![vec![0.0f32; noutput_items]; self.channels];
        {
            let input_slices: Vec<&[f32]> = batches.iter().map(SampleBatch::as_slice).collect();
            let mut output_slices: Vec<&mut [f32]> =
                converted.iter_mut().map(Vec::as_mut_slice).collect();
            self.process(noutput_items, &input_slices, &mut output_slices);
        }

        Self::send_batches(
            outputs,
            converted
                .into_iter()
                .zip(&batches)
                .map(|(samples, batch)| SampleBatch::new(samples, batch.position)),
        )?;

        Ok(noutput_items)
    }
}
