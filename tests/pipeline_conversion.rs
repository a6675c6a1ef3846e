//! End-to-end conversion through a running pipeline

use adc_sample_conv::{
    AdcSampleConv, BatchCollector, BatchSource, Pipeline, RawFileSource, RefreshScope,
    StaticCalibrationSource,
};
use approx::assert_abs_diff_eq;
use std::sync::Arc;

fn connect_channels(pipeline: &mut Pipeline, channels: usize) {
    for ch in 0..channels {
        pipeline
            .connect("source", &format!("out{}", ch), "conv", &format!("in{}", ch))
            .unwrap();
        pipeline
            .connect("conv", &format!("out{}", ch), "sink", &format!("in{}", ch))
            .unwrap();
    }
}

#[test]
fn converts_two_channels_with_default_calibration() {
    let channels = vec![vec![2048.0, 1024.0], vec![0.0, 4096.0]];
    let source = BatchSource::new(channels, 2).unwrap();
    let sink = BatchCollector::new(2);
    let volts = sink.handle();

    let mut pipeline = Pipeline::new();
    pipeline.add_process("source", source).unwrap();
    pipeline
        .add_process("conv", AdcSampleConv::new(2, None, false).unwrap())
        .unwrap();
    pipeline.add_process("sink", sink).unwrap();
    connect_channels(&mut pipeline, 2);

    pipeline.build().unwrap().wait();

    let volts = volts.lock().unwrap();
    assert_eq!(volts[0].len(), 2);
    assert_abs_diff_eq!(volts[0][0], 30.0, epsilon = 1e-4);
    assert_abs_diff_eq!(volts[0][1], 15.0, epsilon = 1e-4);
    assert_abs_diff_eq!(volts[1][0], 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(volts[1][1], 60.0, epsilon = 1e-4);
}

#[test]
fn forward_then_inverse_restores_codes() {
    let codes: Vec<f32> = (0..500).map(|i| i as f32 * 8.0 - 2000.0).collect();

    let forward = AdcSampleConv::new(1, None, false).unwrap().with_name("forward");
    let inverse = AdcSampleConv::new(1, None, true).unwrap().with_name("inverse");
    for conv in [&forward, &inverse] {
        conv.calibration().set_offset(0, 0.25);
        conv.calibration().set_correction_gain(0, 0.98);
    }
    let sink = BatchCollector::new(1);
    let restored = sink.handle();

    let mut pipeline = Pipeline::new().with_default_buffer_size(2);
    pipeline
        .add_process("source", BatchSource::new(vec![codes.clone()], 64).unwrap())
        .unwrap();
    pipeline.add_process("forward", forward).unwrap();
    pipeline.add_process("inverse", inverse).unwrap();
    pipeline.add_process("sink", sink).unwrap();
    pipeline.connect("source", "out0", "forward", "in0").unwrap();
    pipeline.connect("forward", "out0", "inverse", "in0").unwrap();
    pipeline.connect("inverse", "out0", "sink", "in0").unwrap();

    pipeline.build().unwrap().wait();

    let restored = restored.lock().unwrap();
    assert_eq!(restored[0].len(), codes.len());
    for (back, code) in restored[0].iter().zip(&codes) {
        assert_abs_diff_eq!(*back, *code, epsilon = 1e-2);
    }
}

#[test]
fn device_refresh_applies_to_first_channel() {
    let device = Arc::new(StaticCalibrationSource::new(2));
    device.set_correction_gain(0, 0.5);
    device.set_correction_gain(1, 0.5);

    let conv = AdcSampleConv::new(2, Some(device), false)
        .unwrap()
        .with_refresh_scope(RefreshScope::FirstChannel);
    let sink = BatchCollector::new(2);
    let volts = sink.handle();

    let mut pipeline = Pipeline::new();
    pipeline
        .add_process("source", BatchSource::new(vec![vec![2048.0; 8]; 2], 4).unwrap())
        .unwrap();
    pipeline.add_process("conv", conv).unwrap();
    pipeline.add_process("sink", sink).unwrap();
    connect_channels(&mut pipeline, 2);

    pipeline.build().unwrap().wait();

    let volts = volts.lock().unwrap();
    assert!(volts[0].iter().all(|&v| (v - 15.0).abs() < 1e-4));
    assert!(volts[1].iter().all(|&v| (v - 30.0).abs() < 1e-4));
}

#[test]
fn converts_raw_capture_file() {
    let path = std::env::temp_dir().join(format!(
        "adc_sample_conv_pipeline_{}.raw",
        std::process::id()
    ));
    let frames: Vec<f32> = (0..100).flat_map(|i| [i as f32, -(i as f32)]).collect();
    let bytes: Vec<u8> = frames.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(&path, bytes).unwrap();

    let sink = BatchCollector::new(2);
    let volts = sink.handle();

    let mut pipeline = Pipeline::new();
    pipeline
        .add_process("source", RawFileSource::open(&path, 2, 16).unwrap())
        .unwrap();
    pipeline
        .add_process("conv", AdcSampleConv::new(2, None, false).unwrap())
        .unwrap();
    pipeline.add_process("sink", sink).unwrap();
    connect_channels(&mut pipeline, 2);

    pipeline.build().unwrap().wait();
    std::fs::remove_file(&path).unwrap();

    // One code is 30 / 2048 V at the default calibration
    let volts = volts.lock().unwrap();
    assert_eq!(volts[0].len(), 100);
    assert_eq!(volts[1].len(), 100);
    assert_abs_diff_eq!(volts[0][99], 99.0 * 30.0 / 2048.0, epsilon = 1e-4);
    assert_abs_diff_eq!(volts[1][99], -99.0 * 30.0 / 2048.0, epsilon = 1e-4);
}
