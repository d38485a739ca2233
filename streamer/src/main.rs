//! Streams orientation samples from an LPMS sensor to stdout

mod settings;
mod stop;

use std::{net::SocketAddr, path::PathBuf, thread};

use anyhow::{anyhow, Context};
use clap::Parser;
use common::{
    error::LogErrorExt,
    types::{Orientation, Sample},
};
use crossbeam::channel::{self, Receiver, Sender};
use lpms::{Connection, Device, DeviceMode, Sampler};
use tracing::{debug, info, span, Level};

use crate::settings::{SensorSetup, Settings};

const CHANNEL_CAPACITY: usize = 64;
/// Orientation change between samples above which the sensor counts as rotating
const ROTATION_THRESHOLD: f32 = 0.001;

#[derive(Debug, Parser)]
#[command(about = "Streams orientation samples from an LPMS sensor", long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Address of the sensor's stream bridge
    #[arg(short, long)]
    address: Option<SocketAddr>,
    /// Stream frequency in Hz, snapped to the closest supported value
    #[arg(short, long)]
    frequency: Option<u32>,
    /// Comma separated output fields
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,
    #[arg(long)]
    log_level: Option<String>,
    /// Print the raw bytes of every sample
    #[arg(long)]
    raw: bool,
    /// Don't reset the device timestamp before streaming
    #[arg(long)]
    keep_timestamp: bool,
}

struct Reading {
    sample: Sample,
    raw: Option<Vec<u8>>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };
    settings.apply_args(&args);
    let setup = settings.setup().context("Invalid settings")?;

    tracing_subscriber::fmt()
        .with_max_level(settings.level()?)
        .init();
    info!("Starting streamer");

    stop::install_handler()?;

    let mut device = Device::new(settings.address);
    device
        .connect(settings.connect_timeout())
        .with_context(|| format!("Connect to {}", settings.address))?;

    let rst = stream(&mut device, &settings, &setup);
    device.disconnect().log_warn("Disconnect");
    info!("Streamer stopped");

    rst
}

fn stream(
    device: &mut Device<SocketAddr>,
    settings: &Settings,
    setup: &SensorSetup,
) -> anyhow::Result<()> {
    device
        .set_mode(DeviceMode::Command)
        .context("Enter command mode")?;
    configure(device, setup).context("Configure sensor")?;
    device
        .refresh_configuration()
        .context("Read back configuration")?;
    info!(config = ?device.configuration(), "Sensor configured");

    if let Some(status) = device.update_status().log_warn("Read status") {
        debug!(?status, "Sensor status");
    }
    if settings.reset_timestamp {
        device.reset_timestamp().context("Reset timestamp")?;
    }

    device
        .set_mode(DeviceMode::Stream)
        .context("Enter stream mode")?;
    let sampler = device.sampler()?;
    let raw = settings.raw;

    let (tx, rx) = channel::bounded(CHANNEL_CAPACITY);
    thread::scope(|scope| {
        let reader = scope.spawn(move || read_samples(&sampler, raw, tx));
        print_samples(rx);

        match reader.join() {
            Ok(rst) => rst,
            Err(_) => Err(anyhow!("Sampler thread panicked")),
        }
    })
}

fn configure(device: &mut Device<SocketAddr>, setup: &SensorSetup) -> anyhow::Result<()> {
    device.set_filter_mode(setup.filter_mode)?;
    device.set_output_fields(setup.output_fields)?;

    let frequency = device.set_stream_frequency(setup.stream_frequency)?;
    if frequency != setup.stream_frequency {
        info!(
            "Stream frequency {} Hz is not supported, using {frequency} Hz",
            setup.stream_frequency
        );
    }

    if let Some(options) = setup.operation_options {
        device.set_operation_options(options)?;
    }
    if let Some(correction) = setup.magnetometer_correction {
        device.set_magnetometer_correction(correction)?;
    }
    if let Some(alpha) = setup.temporal_filter_alpha {
        device.set_temporal_filter_alpha(alpha)?;
    }

    Ok(())
}

fn read_samples<C: Connection>(
    sampler: &Sampler<C>,
    raw: bool,
    samples: Sender<Reading>,
) -> anyhow::Result<()> {
    let _span = span!(Level::INFO, "Sampler").entered();

    let mut buffer = vec![0; if raw { sampler.layout().raw_data_size() } else { 0 }];
    while !stop::stopped() {
        match sampler.read_sample(raw.then_some(&mut buffer[..])) {
            Ok(sample) => {
                let reading = Reading {
                    sample,
                    raw: raw.then(|| buffer.clone()),
                };
                if samples.send(reading).is_err() {
                    break;
                }
            }
            Err(err) if err.is_recoverable() => debug!("No sample: {err}"),
            Err(err) => return Err(err).context("Read sample"),
        }
    }

    Ok(())
}

fn print_samples(samples: Receiver<Reading>) {
    let mut previous = Orientation::new(0.0, 0.0, 0.0, 0.0);

    for Reading { sample, raw } in samples {
        let orientation = sample.orientation.normalized();
        let rotating = orientation.distance(&previous) > ROTATION_THRESHOLD;
        previous = orientation;

        let state = if rotating { "rotating" } else { "still" };
        match raw {
            Some(raw) => println!(
                "{:>10.3} {orientation} {state:<8} {raw:02x?}",
                sample.timestamp
            ),
            None => println!("{:>10.3} {orientation} {state}", sample.timestamp),
        }
    }
}
