//! Example: Convert a raw capture file
//!
//! Reads interleaved little-endian f32 ADC codes, converts them to volts and
//! writes one CSV row per sample index.
//!
//! Usage:
//!   cargo run --release --example convert_file -- \
//!       --file capture.raw --channels 2 \
//!       --csv-output volts.csv
//!
//! With calibration overrides:
//!   cargo run --release --example convert_file -- \
//!       --file capture.raw --channels 2 \
//!       --offset 0=0.012 --offset 1=-0.004 --high-gain \
//!       --csv-output volts.csv

use adc_sample_conv::calibration::M2K_HIGH_GAIN;
use adc_sample_conv::runtime::{InputPort, OutputPort, Pipeline, ProcessNode, WorkError, WorkResult};
use adc_sample_conv::{AdcSampleConv, PortDirection, PortSchema, RawFileSource, SampleBatch};
use clap::Parser;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to raw capture file
    #[arg(short, long)]
    file: String,

    /// Number of interleaved channels in the capture
    #[arg(short, long, default_value = "2")]
    channels: usize,

    /// Samples per channel per batch
    #[arg(short, long, default_value = "4096")]
    batch_len: usize,

    /// Convert volts to codes instead of codes to volts
    #[arg(long)]
    inverse: bool,

    /// Use the high front-end gain on every channel
    #[arg(long)]
    high_gain: bool,

    /// Per-channel offset in volts, as CHANNEL=VOLTS (repeatable)
    #[arg(long, value_parser = parse_channel_value)]
    offset: Vec<(usize, f32)>,

    /// Per-channel correction gain, as CHANNEL=GAIN (repeatable)
    #[arg(long, value_parser = parse_channel_value)]
    gain: Vec<(usize, f32)>,

    /// CSV output file path
    #[arg(long)]
    csv_output: String,
}

fn parse_channel_value(arg: &str) -> Result<(usize, f32), String> {
    let (channel, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected CHANNEL=VALUE, got '{}'", arg))?;
    let channel = channel.parse().map_err(|e| format!("bad channel: {}", e))?;
    let value = value.parse().map_err(|e| format!("bad value: {}", e))?;
    Ok((channel, value))
}

/// Sink that writes one CSV row per sample index
struct CsvWriter {
    writer: BufWriter<File>,
    channels: usize,
    buffers: Vec<VecDeque<SampleBatch>>,
    rows: usize,
}

impl CsvWriter {
    fn new(path: &str, channels: usize) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        let header: Vec<String> = (0..channels).map(|ch| format!("ch{}", ch)).collect();
        writeln!(writer, "index,{}", header.join(","))?;
        Ok(Self {
            writer,
            channels,
            buffers: (0..channels).map(|_| VecDeque::new()).collect(),
            rows: 0,
        })
    }
}

impl ProcessNode for CsvWriter {
    fn name(&self) -> &str {
        "csv_writer"
    }

    fn num_inputs(&self) -> usize {
        self.channels
    }

    fn num_outputs(&self) -> usize {
        0 // Sink
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        PortSchema::numbered::<SampleBatch>("in", self.channels, PortDirection::Input)
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut batches = Vec::with_capacity(self.channels);
        for (port, buffer) in inputs.iter().zip(self.buffers.iter_mut()) {
            let mut input = port
                .get::<SampleBatch>(buffer)
                .ok_or_else(|| WorkError::NodeError("Missing input channel".to_string()))?;
            batches.push(input.recv()?);
        }

        let len = batches[0].len();
        for i in 0..len {
            let row: Vec<String> = batches
                .iter()
                .map(|batch| format!("{:.6}", batch.as_slice()[i]))
                .collect();
            let position = batches[0].position as usize + i;
            writeln!(self.writer, "{},{}", position, row.join(","))
                .map_err(|e| WorkError::NodeError(format!("CSV write error: {}", e)))?;
        }

        self.rows += len;
        Ok(len)
    }
}

impl Drop for CsvWriter {
    fn drop(&mut self) {
        info!("[CsvWriter] Wrote {} rows", self.rows);
        let _ = self.writer.flush();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== Convert File Example ===");
    info!("File: {} ({} channels)", args.file, args.channels);

    let conv = AdcSampleConv::new(args.channels, None, args.inverse)?;
    let calibration = conv.calibration();
    for &(channel, offset) in &args.offset {
        calibration.set_offset(channel, offset);
    }
    for &(channel, gain) in &args.gain {
        calibration.set_correction_gain(channel, gain);
    }
    if args.high_gain {
        for channel in 0..args.channels {
            calibration.set_hardware_gain(channel, M2K_HIGH_GAIN as f32);
        }
    }
    info!("Calibration: {:?}", calibration);

    let mut pipeline = Pipeline::new();
    pipeline.add_process(
        "source",
        RawFileSource::open(&args.file, args.channels, args.batch_len)?,
    )?;
    pipeline.add_process("conv", conv)?;
    pipeline.add_process("csv", CsvWriter::new(&args.csv_output, args.channels)?)?;

    for ch in 0..args.channels {
        pipeline.connect("source", &format!("out{}", ch), "conv", &format!("in{}", ch))?;
        pipeline.connect("conv", &format!("out{}", ch), "csv", &format!("in{}", ch))?;
    }

    let scheduler = pipeline.build()?;
    scheduler.wait();

    info!("Output written to {}", args.csv_output);
    Ok(())
}
