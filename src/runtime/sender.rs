//! Broadcast sender with watchdog monitoring

use crossbeam_channel::{SendError, Sender as CrossbeamSender};

use super::watchdog::{OperationGuard, WatchdogHandle};

/// Message carried on every runtime channel
///
/// Producers signal the end of a stream explicitly so consumers can tell a
/// finished source from one that is merely slow. Nodes never see this
/// type: `Sender::send()` wraps values and `Receiver::recv()` unwraps them.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    Sample(T),
    EndOfStream,
}

/// Sender that delivers every value to one or more consumers
///
/// Sends go out sequentially from the caller's thread. A blocked
/// destination is reported by the watchdog.
pub struct Sender<T> {
    destinations: Vec<CrossbeamSender<ChannelMessage<T>>>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<T: Clone> Sender<T> {
    pub fn new(destinations: Vec<CrossbeamSender<ChannelMessage<T>>>) -> Self {
        Self {
            destinations,
            watchdog_handle: None,
        }
    }

    /// Copy of this sender that reports to the given watchdog slot
    pub fn with_watchdog(&self, watchdog_handle: WatchdogHandle) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: Some(watchdog_handle),
        }
    }

    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Send a value to all destinations
    ///
    /// Fails only when every destination has disconnected.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);

        let mut any_success = false;
        let mut last_error = None;

        for dest in &self.destinations {
            match dest.send(ChannelMessage::Sample(value.clone())) {
                Ok(()) => any_success = true,
                Err(SendError(ChannelMessage::Sample(v))) => last_error = Some(SendError(v)),
                Err(SendError(ChannelMessage::EndOfStream)) => {}
            }
        }

        if !any_success && let Some(e) = last_error {
            return Err(e);
        }

        Ok(())
    }

    /// Signal end-of-stream to all destinations
    ///
    /// Downstream receivers return `WorkError::Shutdown` once they reach
    /// this marker.
    pub fn close(&self) {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        for dest in &self.destinations {
            let _ = dest.send(ChannelMessage::EndOfStream);
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }
}

impl<T: Clone> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}
