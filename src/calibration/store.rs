//! Per-channel calibration storage
//!
//! Written from UI threads and the device refresh, read by the converter on
//! every processing cycle.
//!
//! ## Consistency
//!
//! Each scalar lives in its own `AtomicU32` (the bits of an `f32`), so a
//! single value is never torn. Writers are serialized by one store-wide lock,
//! but readers never take it: a cycle that races a writer may see new values
//! for some scalars or channels and old values for others.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

pub const DEFAULT_CORRECTION_GAIN: f32 = 1.0;
pub const DEFAULT_FILTER_COMPENSATION: f32 = 1.0;
pub const DEFAULT_OFFSET: f32 = 0.0;
pub const DEFAULT_HARDWARE_GAIN: f32 = 0.02;

/// Calibration of one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    /// Multiplicative correction for analog/manufacturing variance
    pub correction_gain: f32,
    /// Multiplicative correction for the sample-rate dependent filter response
    pub filter_compensation: f32,
    /// Additive bias in volts
    pub offset: f32,
    /// Front-end gain; divides the raw code
    pub hardware_gain: f32,
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self {
            correction_gain: DEFAULT_CORRECTION_GAIN,
            filter_compensation: DEFAULT_FILTER_COMPENSATION,
            offset: DEFAULT_OFFSET,
            hardware_gain: DEFAULT_HARDWARE_GAIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    CorrectionGain,
    FilterCompensation,
    Offset,
    HardwareGain,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::CorrectionGain => "correction_gain",
            Field::FilterCompensation => "filter_compensation",
            Field::Offset => "offset",
            Field::HardwareGain => "hardware_gain",
        }
    }
}

struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

struct ChannelSlot {
    correction_gain: AtomicF32,
    filter_compensation: AtomicF32,
    offset: AtomicF32,
    hardware_gain: AtomicF32,
}

impl ChannelSlot {
    fn new(calibration: ChannelCalibration) -> Self {
        Self {
            correction_gain: AtomicF32::new(calibration.correction_gain),
            filter_compensation: AtomicF32::new(calibration.filter_compensation),
            offset: AtomicF32::new(calibration.offset),
            hardware_gain: AtomicF32::new(calibration.hardware_gain),
        }
    }

    fn cell(&self, field: Field) -> &AtomicF32 {
        match field {
            Field::CorrectionGain => &self.correction_gain,
            Field::FilterCompensation => &self.filter_compensation,
            Field::Offset => &self.offset,
            Field::HardwareGain => &self.hardware_gain,
        }
    }

    fn load(&self) -> ChannelCalibration {
        ChannelCalibration {
            correction_gain: self.correction_gain.load(),
            filter_compensation: self.filter_compensation.load(),
            offset: self.offset.load(),
            hardware_gain: self.hardware_gain.load(),
        }
    }
}

/// Calibration values for a fixed number of channels
///
/// Channel arguments accept any integer type. An index outside
/// `[0, channels())`, negative ones included, makes getters return `0.0`
/// and setters do nothing.
pub struct CalibrationStore {
    slots: Box<[ChannelSlot]>,
    write_lock: Mutex<()>,
    writes: AtomicU64,
}

impl CalibrationStore {
    /// Create a store with every channel at the default calibration
    pub fn new(channels: usize) -> Self {
        let slots = (0..channels)
            .map(|_| ChannelSlot::new(ChannelCalibration::default()))
            .collect();
        Self {
            slots,
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
        }
    }

    pub fn channels(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, channel: impl TryInto<usize>) -> Option<usize> {
        channel
            .try_into()
            .ok()
            .filter(|&index| index < self.slots.len())
    }

    fn read(&self, channel: impl TryInto<usize>, field: Field) -> f32 {
        self.index(channel)
            .map_or(0.0, |index| self.slots[index].cell(field).load())
    }

    fn write(&self, channel: impl TryInto<usize>, field: Field, value: f32) {
        let Some(index) = self.index(channel) else {
            return;
        };
        let cell = self.slots[index].cell(field);
        if cell.load() != value {
            let _guard = self
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            cell.store(value);
            self.writes.fetch_add(1, Ordering::Relaxed);
            trace!("ch{} {} = {}", index, field.name(), value);
        }
    }

    pub fn set_correction_gain(&self, channel: impl TryInto<usize>, value: f32) {
        self.write(channel, Field::CorrectionGain, value);
    }

    pub fn correction_gain(&self, channel: impl TryInto<usize>) -> f32 {
        self.read(channel, Field::CorrectionGain)
    }

    pub fn set_filter_compensation(&self, channel: impl TryInto<usize>, value: f32) {
        self.write(channel, Field::FilterCompensation, value);
    }

    pub fn filter_compensation(&self, channel: impl TryInto<usize>) -> f32 {
        self.read(channel, Field::FilterCompensation)
    }

    pub fn set_offset(&self, channel: impl TryInto<usize>, value: f32) {
        self.write(channel, Field::Offset, value);
    }

    pub fn offset(&self, channel: impl TryInto<usize>) -> f32 {
        self.read(channel, Field::Offset)
    }

    pub fn set_hardware_gain(&self, channel: impl TryInto<usize>, value: f32) {
        self.write(channel, Field::HardwareGain, value);
    }

    pub fn hardware_gain(&self, channel: impl TryInto<usize>) -> f32 {
        self.read(channel, Field::HardwareGain)
    }

    /// Read all four scalars of a channel.
    ///
    /// The four loads are independent; a concurrent writer may be visible
    /// in some of them only.
    pub fn snapshot(&self, channel: impl TryInto<usize>) -> Option<ChannelCalibration> {
        self.index(channel).map(|index| self.slots[index].load())
    }

    /// Write all four scalars of a channel through the guarded setters
    pub fn set(&self, channel: impl TryInto<usize> + Copy, calibration: ChannelCalibration) {
        self.set_correction_gain(channel, calibration.correction_gain);
        self.set_filter_compensation(channel, calibration.filter_compensation);
        self.set_offset(channel, calibration.offset);
        self.set_hardware_gain(channel, calibration.hardware_gain);
    }

    /// Number of times the write lock has been taken
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CalibrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationStore")
            .field(
                "channels",
                &self.slots.iter().map(ChannelSlot::load).collect::<Vec<_>>(),
            )
            .field("writes", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_defaults() {
        let store = CalibrationStore::new(3);
        assert_eq!(store.channels(), 3);
        for ch in 0..3 {
            assert_eq!(store.correction_gain(ch), 1.0);
            assert_eq!(store.filter_compensation(ch), 1.0);
            assert_eq!(store.offset(ch), 0.0);
            assert_eq!(store.hardware_gain(ch), 0.02);
            assert_eq!(store.snapshot(ch), Some(ChannelCalibration::default()));
        }
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let store = CalibrationStore::new(2);
        store.set_offset(-1, 5.0);
        store.set_offset(2, 5.0);
        store.set_correction_gain(usize::MAX, 3.0);

        assert_eq!(store.offset(0), 0.0);
        assert_eq!(store.offset(1), 0.0);
        assert_eq!(store.offset(-1), 0.0);
        assert_eq!(store.offset(2), 0.0);
        assert_eq!(store.hardware_gain(-1), 0.0);
        assert_eq!(store.snapshot(2), None);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_unchanged_value_skips_lock() {
        let store = CalibrationStore::new(1);
        store.set_hardware_gain(0, 0.02);
        store.set_correction_gain(0, 1.0);
        store.set(0, ChannelCalibration::default());
        assert_eq!(store.write_count(), 0);

        store.set_offset(0, 0.25);
        assert_eq!(store.write_count(), 1);
        store.set_offset(0, 0.25);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.offset(0), 0.25);
    }

    #[test]
    fn test_nan_is_always_rewritten() {
        let store = CalibrationStore::new(1);
        store.set_offset(0, f32::NAN);
        store.set_offset(0, f32::NAN);
        assert_eq!(store.write_count(), 2);
        assert!(store.offset(0).is_nan());
    }

    #[test]
    fn test_channels_are_independent() {
        let store = CalibrationStore::new(2);
        store.set(
            0,
            ChannelCalibration {
                correction_gain: 1.1,
                filter_compensation: 1.2,
                offset: -0.5,
                hardware_gain: 0.21,
            },
        );
        assert_eq!(store.snapshot(1), Some(ChannelCalibration::default()));
        assert_eq!(store.correction_gain(0), 1.1);
        assert_eq!(store.write_count(), 4);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(CalibrationStore::new(4));
        let handles: Vec<_> = (0..4)
            .map(|ch| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 1..=100 {
                        store.set_offset(ch, i as f32);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for ch in 0..4 {
            assert_eq!(store.offset(ch), 100.0);
        }
        assert_eq!(store.write_count(), 400);
    }
}
