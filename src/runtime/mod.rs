//! Runtime support for streaming node graphs

pub mod errors;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod receiver;
pub mod sample;
pub mod scheduler;
pub mod sender;
pub mod type_registry;
pub mod watchdog;

pub use errors::{BuildError, ConnectionError, WorkError, WorkResult};
pub use node::ProcessNode;
pub use ports::{InputPort, OutputPort, PortDirection, PortSchema, register_type};
pub use pipeline::Pipeline;
pub use receiver::Receiver;
pub use sample::SampleBatch;
pub use scheduler::Scheduler;
pub use sender::{ChannelMessage, Sender};
pub use watchdog::Watchdog;
