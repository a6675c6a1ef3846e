//! Example: Calibration changes while a stream is running
//!
//! Streams a synthetic two-channel capture through the converter while a
//! second thread steps the channel 1 offset. A static device source supplies
//! the channel 0 gain, and a gain estimate from a reference capture is
//! applied before the stream starts.
//!
//! Usage:
//!   cargo run --release --example live_calibration -- --samples 100000 --steps 4

use adc_sample_conv::calibration::estimate::{DEFAULT_GAIN_REFERENCE, raw_to_volts};
use adc_sample_conv::{
    AdcCalibrator, AdcSampleConv, BatchCollector, BatchSource, GainMode, Pipeline, RefreshScope,
    StaticCalibrationSource,
};
use clap::Parser;
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Samples per channel
    #[arg(short, long, default_value = "100000")]
    samples: usize,

    /// Samples per channel per batch
    #[arg(short, long, default_value = "1000")]
    batch_len: usize,

    /// Number of offset steps applied to channel 1
    #[arg(long, default_value = "4")]
    steps: usize,

    /// Offset step in volts
    #[arg(long, default_value = "0.5")]
    step_volts: f32,

    /// Sample rate reported by the device, in Hz
    #[arg(long, default_value = "1000000")]
    sample_rate: f64,

    /// Refresh every channel from the device instead of channel 0 only
    #[arg(long)]
    all_channels: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== Live Calibration Example ===");

    // Reference capture reading 3% low
    let nominal_code = DEFAULT_GAIN_REFERENCE / raw_to_volts(1.0, 1.0);
    let reference = vec![(nominal_code * 0.97) as f32; 256];
    let calibrator = AdcCalibrator::new();
    let gain = calibrator.estimate_gain(&reference)?;
    info!("Estimated correction gain: {:.5}", gain);

    let device = Arc::new(StaticCalibrationSource::new(2));
    device.set_sample_rate(args.sample_rate);
    device.set_correction_gain(0, gain);
    device.set_gain_mode(1, GainMode::High);

    let scope = if args.all_channels {
        RefreshScope::AllChannels
    } else {
        RefreshScope::FirstChannel
    };
    let conv = AdcSampleConv::new(2, Some(device), false)?.with_refresh_scope(scope);
    let calibration = conv.calibration();
    calibrator.apply_gain(&calibration, 1, gain);

    // Channel 0: a slow ramp, channel 1: constant mid-code
    let ramp: Vec<f32> = (0..args.samples)
        .map(|i| (i % 4096) as f32 - 2048.0)
        .collect();
    let constant = vec![1024.0; args.samples];

    let sink = BatchCollector::new(2);
    let volts = sink.handle();

    let mut pipeline = Pipeline::new().with_default_buffer_size(4);
    pipeline.add_process("source", BatchSource::new(vec![ramp, constant], args.batch_len)?)?;
    pipeline.add_process("conv", conv)?;
    pipeline.add_process("sink", sink)?;
    for ch in 0..2 {
        pipeline.connect("source", &format!("out{}", ch), "conv", &format!("in{}", ch))?;
        pipeline.connect("conv", &format!("out{}", ch), "sink", &format!("in{}", ch))?;
    }

    let scheduler = pipeline.build()?;

    let steps = args.steps;
    let step_volts = args.step_volts;
    let stepper = {
        let calibration = Arc::clone(&calibration);
        thread::spawn(move || {
            for step in 1..=steps {
                thread::sleep(Duration::from_millis(5));
                calibration.set_offset(1, step as f32 * step_volts);
                info!("ch1 offset -> {} V", step as f32 * step_volts);
            }
        })
    };

    scheduler.wait();
    if stepper.join().is_err() {
        return Err("offset thread panicked".into());
    }

    let volts = volts.lock().unwrap_or_else(PoisonError::into_inner);
    let mut levels: Vec<f32> = Vec::new();
    for &v in &volts[1] {
        if levels.last().is_none_or(|&last| (last - v).abs() > 1e-4) {
            levels.push(v);
        }
    }
    info!("ch0: {} samples", volts[0].len());
    info!("ch1: {} samples, levels seen: {:?}", volts[1].len(), levels);
    info!("Final calibration: {:?}", calibration);

    Ok(())
}
