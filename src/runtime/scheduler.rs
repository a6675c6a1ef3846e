//! Thread-per-node scheduler for streaming graphs
//!
//! Spawns a dedicated thread for each node. The thread calls `work()` in a
//! loop until the node asks to stop, the stream shuts down, or the
//! scheduler's stop signal is raised.

use super::errors::WorkError;
use super::node::ProcessNode;
use super::ports::{InputPort, OutputPort};
use super::watchdog::Watchdog;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Runtime scheduler that executes a streaming graph
pub struct Scheduler {
    threads: Vec<(String, JoinHandle<()>)>,
    stop_signal: Arc<AtomicBool>,
    completion_tx: StdSender<String>,
    completion_rx: StdReceiver<String>,
    watchdog: Watchdog,
    watchdog_handle: JoinHandle<()>,
}

impl Scheduler {
    /// Create a scheduler whose watchdog uses the default stall threshold
    pub fn new() -> Self {
        Self::with_watchdog(Watchdog::new())
    }

    /// Create a scheduler whose watchdog warns after `threshold` of blocking
    pub fn with_watchdog_threshold(threshold: Duration) -> Self {
        Self::with_watchdog(Watchdog::with_threshold(threshold))
    }

    fn with_watchdog(watchdog: Watchdog) -> Self {
        let (completion_tx, completion_rx) = channel();
        let watchdog_handle = watchdog.start_monitoring_thread();
        info!(
            "Watchdog enabled - will report operations blocked >{:.1}s",
            watchdog.threshold().as_secs_f64()
        );
        Self {
            threads: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx,
            watchdog,
            watchdog_handle,
        }
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Start a process node in its own thread
    pub fn start_process(
        &mut self,
        mut node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) {
        let stop_signal = Arc::clone(&self.stop_signal);
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("Starting process node: {}", name);

        let handle = thread::spawn(move || {
            let mut items_produced = 0usize;

            loop {
                if stop_signal.load(Ordering::Relaxed) || node.should_stop() {
                    break;
                }

                match node.work(&inputs, &outputs) {
                    Ok(n) => items_produced += n,
                    Err(WorkError::Shutdown) => {
                        debug!("[{}] Upstream finished", thread_name);
                        break;
                    }
                    Err(e) => {
                        error!("[{}] Work error: {}", thread_name, e);
                        break;
                    }
                }
            }

            info!(
                "[{}] Shutdown. Produced {} items.",
                thread_name, items_produced
            );

            // Dropping the ports disconnects neighbours that are still waiting
            drop(outputs);
            drop(inputs);
            drop(node);

            let _ = completion_tx.send(thread_name);
        });

        self.threads.push((name, handle));
    }

    /// Signal all nodes to stop
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Wait for all node threads to complete
    pub fn wait(self) {
        let Scheduler {
            threads,
            completion_tx,
            completion_rx,
            watchdog,
            watchdog_handle,
            ..
        } = self;

        // The channel closes once every node thread has dropped its sender
        drop(completion_tx);

        let total_threads = threads.len();
        let mut completed = 0;

        info!("Waiting for {} threads to complete...", total_threads);

        let mut threads_by_name: HashMap<String, JoinHandle<()>> = threads.into_iter().collect();

        while completed < total_threads {
            let Ok(thread_name) = completion_rx.recv() else {
                break;
            };
            completed += 1;
            if let Some(handle) = threads_by_name.remove(&thread_name) {
                match handle.join() {
                    Ok(_) => info!(
                        "[{}] Thread completed ({}/{})",
                        thread_name, completed, total_threads
                    ),
                    Err(e) => error!(
                        "[{}] Thread panicked ({}/{}): {:?}",
                        thread_name, completed, total_threads, e
                    ),
                }
            }
        }

        // Threads that panicked never reported in
        for (thread_name, handle) in threads_by_name {
            if let Err(e) = handle.join() {
                error!("[{}] Thread panicked: {:?}", thread_name, e);
            }
        }

        info!("All {} threads completed", total_threads);

        watchdog.stop();
        let _ = watchdog_handle.join();
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.threads.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::node::{WorkError, WorkResult};
    use crate::runtime::sender::{ChannelMessage, Sender};
    use crossbeam_channel::bounded;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct CountingSource {
        count: u32,
        max: u32,
    }

    impl ProcessNode for CountingSource {
        fn name(&self) -> &str {
            "counting_source"
        }

        fn num_inputs(&self) -> usize {
            0
        }

        fn num_outputs(&self) -> usize {
            1
        }

        fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
            let output = outputs[0]
                .get::<u32>()
                .ok_or_else(|| WorkError::NodeError("Missing output channel".to_string()))?;

            if self.count < self.max {
                output.send(self.count)?;
                self.count += 1;
                Ok(1)
            } else {
                output.close();
                Err(WorkError::Shutdown)
            }
        }
    }

    struct CollectingSink {
        received: Arc<Mutex<Vec<u32>>>,
        buffer: VecDeque<u32>,
    }

    impl ProcessNode for CollectingSink {
        fn name(&self) -> &str {
            "collecting_sink"
        }

        fn num_inputs(&self) -> usize {
            1
        }

        fn num_outputs(&self) -> usize {
            0
        }

        fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            let mut input = inputs[0]
                .get::<u32>(&mut self.buffer)
                .ok_or_else(|| WorkError::NodeError("Missing input channel".to_string()))?;
            let value = input.recv()?;
            self.received.lock().unwrap().push(value);
            Ok(1)
        }
    }

    struct IdleNode;

    impl ProcessNode for IdleNode {
        fn name(&self) -> &str {
            "idle"
        }

        fn num_inputs(&self) -> usize {
            0
        }

        fn num_outputs(&self) -> usize {
            0
        }

        fn work(&mut self, _inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            thread::sleep(Duration::from_millis(5));
            Ok(0)
        }
    }

    #[test]
    fn test_scheduler_runs_to_completion() {
        let mut scheduler = Scheduler::new();
        let (tx, rx) = bounded::<ChannelMessage<u32>>(10);
        let received = Arc::new(Mutex::new(Vec::new()));

        scheduler.start_process(
            Box::new(CountingSource { count: 0, max: 5 }),
            vec![],
            vec![OutputPort::new(Sender::new(vec![tx]))],
        );
        scheduler.start_process(
            Box::new(CollectingSink {
                received: Arc::clone(&received),
                buffer: VecDeque::new(),
            }),
            vec![InputPort::new(rx)],
            vec![],
        );
        assert_eq!(scheduler.num_threads(), 2);
        assert_eq!(
            scheduler.thread_names(),
            vec!["counting_source".to_string(), "collecting_sink".to_string()]
        );

        scheduler.wait();

        assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stop_signal_ends_idle_node() {
        let mut scheduler = Scheduler::new();
        scheduler.start_process(Box::new(IdleNode), vec![], vec![]);
        thread::sleep(Duration::from_millis(20));
        scheduler.stop();

        let start = std::time::Instant::now();
        scheduler.wait();
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
