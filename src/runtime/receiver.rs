//! Channel receiver with a putback buffer and watchdog monitoring
//!
//! [`Receiver`] wraps a `crossbeam_channel::Receiver<ChannelMessage<T>>`,
//! unwraps `ChannelMessage` transparently and latches end-of-stream so
//! every later call returns `Shutdown`.

use crossbeam_channel::{Receiver as CrossbeamReceiver, RecvTimeoutError, TryRecvError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// A single-channel receiver borrowed from an `InputPort` for one `work()` call.
///
/// The putback buffer and end-of-stream flag are owned elsewhere (the node
/// and the port respectively) so they persist across calls.
pub struct Receiver<'a, T> {
    receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
    buffer: &'a mut VecDeque<T>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: &'a AtomicBool,
}

impl<'a, T> Receiver<'a, T> {
    pub fn new(
        receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
        buffer: &'a mut VecDeque<T>,
        watchdog_handle: Option<WatchdogHandle>,
        eos: &'a AtomicBool,
    ) -> Self {
        Self {
            receiver,
            buffer,
            watchdog_handle,
            eos,
        }
    }

    fn unwrap_message(&self, message: ChannelMessage<T>) -> WorkResult<T> {
        match message {
            ChannelMessage::Sample(item) => Ok(item),
            ChannelMessage::EndOfStream => {
                self.eos.store(true, Ordering::Relaxed);
                tracing::debug!("Receiver - EndOfStream received");
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Blocking receive. Returns from the putback buffer first.
    pub fn recv(&mut self) -> WorkResult<T> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(WorkError::Shutdown);
        }

        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }

        let message = {
            let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
            self.receiver.recv()
        };
        match message {
            Ok(message) => self.unwrap_message(message),
            Err(_) => {
                tracing::debug!("Receiver::recv() - channel disconnected, returning Shutdown");
                self.eos.store(true, Ordering::Relaxed);
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(TryRecvError::Disconnected);
        }

        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }

        match self.receiver.try_recv()? {
            ChannelMessage::Sample(item) => Ok(item),
            ChannelMessage::EndOfStream => {
                self.eos.store(true, Ordering::Relaxed);
                Err(TryRecvError::Disconnected)
            }
        }
    }

    /// Receive with a timeout
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(RecvTimeoutError::Disconnected);
        }

        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }

        let message = {
            let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
            self.receiver.recv_timeout(timeout)?
        };
        match message {
            ChannelMessage::Sample(item) => Ok(item),
            ChannelMessage::EndOfStream => {
                self.eos.store(true, Ordering::Relaxed);
                Err(RecvTimeoutError::Disconnected)
            }
        }
    }

    /// Push an item back so the next receive returns it
    pub fn put_back(&mut self, item: T) {
        self.buffer.push_front(item);
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// True once end-of-stream or disconnection has been observed
    pub fn is_finished(&self) -> bool {
        self.eos.load(Ordering::Relaxed)
    }
}
