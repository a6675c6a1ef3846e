//! Port stall watchdog
//!
//! Each sender/receiver records the start time of its current blocking
//! operation in an atomic. A monitoring thread scans those timestamps and
//! warns once per operation that stays blocked longer than the threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Default time a port may stay blocked before a warning is logged
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(5);

const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

struct PortState {
    /// Start of the current operation in ms, 0 when idle
    last_op_start: AtomicU64,
    has_warned: AtomicBool,
    node_name: String,
    port_name: String,
    operation: &'static str,
}

/// Handle to one port's watchdog slot, held by a `Sender`/`Receiver`
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<PortState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.last_op_start.store(now_millis(), Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {} on port '{}'",
                self.state.node_name, self.state.operation, self.state.port_name
            );
        }
        self.state.last_op_start.store(0, Ordering::Relaxed);
    }

    /// True while an operation is in progress on this port
    pub fn is_busy(&self) -> bool {
        self.state.last_op_start.load(Ordering::Relaxed) != 0
    }
}

/// Shared watchdog state, cloned into every port
#[derive(Clone)]
pub struct Watchdog {
    ports: Arc<Mutex<Vec<Weak<PortState>>>>,
    enabled: Arc<AtomicBool>,
    threshold: Duration,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_STALL_THRESHOLD)
    }

    /// Create a watchdog that warns after `threshold` of blocking
    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            ports: Arc::new(Mutex::new(Vec::new())),
            enabled: Arc::new(AtomicBool::new(true)),
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Register a port for monitoring
    pub fn register_port(
        &self,
        node_name: &str,
        operation: &'static str,
        port_name: &str,
    ) -> WatchdogHandle {
        let state = Arc::new(PortState {
            last_op_start: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            node_name: node_name.to_string(),
            port_name: port_name.to_string(),
            operation,
        });

        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&state));

        WatchdogHandle { state }
    }

    /// Warn about operations blocked longer than the threshold.
    /// Returns the number of ports currently over the threshold.
    pub fn check_for_blocked(&self) -> usize {
        let now = now_millis();
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut blocked = 0;

        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        ports.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.last_op_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_ms = now.saturating_sub(start);
                if duration_ms > threshold_ms {
                    blocked += 1;
                    if !state.has_warned.swap(true, Ordering::Relaxed) {
                        warn!(
                            "BLOCKED: [{}] {} on port '{}' for {:.1}s",
                            state.node_name,
                            state.operation,
                            state.port_name,
                            duration_ms as f64 / 1000.0
                        );
                    }
                }
            }
            true
        });

        blocked
    }

    /// Number of ports still alive
    pub fn num_ports(&self) -> usize {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Start the monitoring thread
    pub fn start_monitoring_thread(&self) -> std::thread::JoinHandle<()> {
        let watchdog = self.clone();
        std::thread::spawn(move || {
            while watchdog.enabled.load(Ordering::Relaxed) {
                std::thread::sleep(SCAN_INTERVAL);
                watchdog.check_for_blocked();
            }
        })
    }

    /// Stop the monitoring thread after its current scan
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard marking one blocking operation on a port
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}
