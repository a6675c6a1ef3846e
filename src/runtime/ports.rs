//! Port descriptions and type-erased port endpoints
//!
//! Nodes declare their ports through [`PortSchema`]; the pipeline hands each
//! node one [`InputPort`] / [`OutputPort`] per declared port.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicBool;

use crossbeam_channel::Receiver as CrossbeamReceiver;

pub use super::errors::ConnectionError;
pub use super::pipeline::Pipeline;
pub use super::receiver::Receiver;
pub use super::sender::{ChannelMessage, Sender};
pub use super::type_registry::register_type;
pub use super::watchdog::{Watchdog, WatchdogHandle};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Schema describing a port's metadata
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub index: usize,
    pub direction: PortDirection,
}

impl PortSchema {
    pub fn new<T: 'static>(
        name: impl Into<String>,
        index: usize,
        direction: PortDirection,
    ) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            index,
            direction,
        }
    }

    /// `count` ports named `{prefix}0..{prefix}{count-1}` carrying `T`
    pub fn numbered<T: 'static>(prefix: &str, count: usize, direction: PortDirection) -> Vec<Self> {
        (0..count)
            .map(|i| Self::new::<T>(format!("{}{}", prefix, i), i, direction))
            .collect()
    }
}

/// Type-erased input port wrapping a `crossbeam_channel::Receiver<ChannelMessage<T>>`
pub struct InputPort {
    channel: Box<dyn Any + Send>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: AtomicBool,
}

impl InputPort {
    /// Wrap a type-erased receiver (used by `Pipeline`)
    pub(crate) fn from_type_erased(channel: Box<dyn Any + Send>) -> Self {
        Self {
            channel,
            watchdog_handle: None,
            eos: AtomicBool::new(false),
        }
    }

    /// Wrap a typed receiver directly, e.g. for driving a node by hand
    pub fn new<T: Send + 'static>(receiver: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self::from_type_erased(Box::new(receiver))
    }

    /// An input port with no upstream connection
    pub fn unconnected() -> Self {
        Self::from_type_erased(Box::new(()))
    }

    pub fn with_watchdog(mut self, watchdog: &Watchdog, node_name: &str, port_name: &str) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(node_name, "recv", port_name));
        self
    }

    /// Borrow a `Receiver<T>` for this port.
    ///
    /// Returns None if the port is unconnected or carries another type.
    pub fn get<'a, T: Send + 'static>(
        &'a self,
        buffer: &'a mut VecDeque<T>,
    ) -> Option<Receiver<'a, T>> {
        let receiver = self.channel.downcast_ref::<CrossbeamReceiver<ChannelMessage<T>>>()?;
        Some(Receiver::new(
            receiver,
            buffer,
            self.watchdog_handle.clone(),
            &self.eos,
        ))
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InputPort")
    }
}

/// Type-erased output port wrapping a `Sender<T>`
pub struct OutputPort {
    channel: Box<dyn Any + Send>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl OutputPort {
    /// Wrap a type-erased sender (used by `Pipeline`)
    pub(crate) fn from_type_erased(channel: Box<dyn Any + Send>) -> Self {
        Self {
            channel,
            watchdog_handle: None,
        }
    }

    /// Wrap a typed sender directly
    pub fn new<T: Send + Clone + 'static>(sender: Sender<T>) -> Self {
        Self::from_type_erased(Box::new(sender))
    }

    /// An output port with no downstream connection
    pub fn unconnected() -> Self {
        Self::from_type_erased(Box::new(()))
    }

    pub fn with_watchdog(mut self, watchdog: &Watchdog, node_name: &str, port_name: &str) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(node_name, "send", port_name));
        self
    }

    /// Get a `Sender<T>` for this port (cheap clone of the stored sender).
    ///
    /// Returns None if the port is unconnected or carries another type.
    pub fn get<T: Send + Clone + 'static>(&self) -> Option<Sender<T>> {
        let sender = self.channel.downcast_ref::<Sender<T>>()?;
        Some(match &self.watchdog_handle {
            Some(handle) => sender.with_watchdog(handle.clone()),
            None => sender.clone(),
        })
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputPort")
    }
}
