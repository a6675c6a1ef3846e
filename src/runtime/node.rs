//! Node trait for streaming processing
//!
//! The scheduler calls `work()` on each node in a loop from the node's own
//! thread; one call is one processing cycle.

pub use super::errors::{WorkError, WorkResult};
pub use super::ports::{InputPort, OutputPort, PortSchema};
pub use super::receiver::Receiver;
pub use super::sender::Sender;

/// A processing node that transforms data
/// - Sources have 0 inputs and N outputs
/// - Sinks have N inputs and 0 outputs
/// - Processors have N inputs and M outputs
pub trait ProcessNode: Send {
    /// Debug name for this node
    fn name(&self) -> &str;

    /// Checked by the scheduler before every `work()` call
    fn should_stop(&self) -> bool {
        false
    }

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    fn input_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    /// Read from inputs, process, write to outputs.
    /// Returns the number of items produced.
    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize>;
}
