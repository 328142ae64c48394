//! Dispense scan on the lab bench.
//!
//! Powers the axis on, dispenses at one position, sweeps to a second one while
//! printing position, motor current and laser distance, dispenses again and
//! powers the axis off. The axis is powered off even when the scan fails.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hardware::baumer::Om70L;
use hardware::bench::LinearAxis;
use hardware::config::BenchConfig;
use hardware::musashi::Ml808gx;
use hardware::sequence::{run_dispense_scan, ScanEvent, ScanReport};
use hardware::transport::{IpAddress, Link};
use hardware::xenax::XenaxXvi;
use tracing::{info, warn};

/// Dispense scan with a XENAX axis, OM70-L sensor and ML-808GX dispenser
#[derive(Parser, Debug)]
#[command(name = "dispense_scan")]
#[command(about = "Dispense, sweep the axis while logging distance, dispense again")]
#[command(version)]
struct Args {
    /// JSON bench configuration (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Axis link, `host:port` or `/dev/ttyX[@baud]`
    #[arg(long)]
    axis: Option<Link>,

    /// Sensor address, `host:port`
    #[arg(long)]
    sensor: Option<IpAddress>,

    /// Dispenser serial device
    #[arg(long)]
    dispenser: Option<String>,

    /// Dispenser baud rate
    #[arg(long)]
    dispenser_baud: Option<u32>,

    /// Axis speed in inc/s
    #[arg(long)]
    speed: Option<u32>,

    /// Position of the first dispense
    #[arg(long, allow_hyphen_values = true)]
    start: Option<i32>,

    /// Position of the second dispense
    #[arg(long, allow_hyphen_values = true)]
    end: Option<i32>,

    /// Dispenser channel
    #[arg(long)]
    channel: Option<u32>,

    /// Write the samples as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn bench_config(&self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => BenchConfig::default(),
        };
        if let Some(axis) = &self.axis {
            config.axis = axis.clone();
        }
        if let Some(sensor) = &self.sensor {
            config.sensor = sensor.clone();
        }
        if let Some(path) = &self.dispenser {
            config.dispenser.path = path.clone();
        }
        if let Some(baud) = self.dispenser_baud {
            config.dispenser.baud = baud;
        }
        if let Some(speed) = self.speed {
            config.scan.speed = speed;
        }
        if let Some(start) = self.start {
            config.scan.blocking_target = start;
        }
        if let Some(end) = self.end {
            config.scan.scan_target = end;
        }
        if let Some(channel) = self.channel {
            config.scan.channel = Some(channel);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = args.bench_config()?;

    info!("Connecting to axis at {}...", config.axis);
    let mut axis = XenaxXvi::connect(&config.axis)?;
    axis.power_on()?;

    let report = scan(&mut axis, &config);

    if let Err(e) = axis.power_off() {
        warn!("Failed to power off axis: {}", e);
    }

    let report = report?;
    if let Some(path) = &args.output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} samples to {}", report.samples.len(), path.display());
    }

    println!("Done!");
    Ok(())
}

fn scan(axis: &mut dyn LinearAxis, config: &BenchConfig) -> Result<ScanReport> {
    info!("Connecting to distance sensor at {}...", config.sensor);
    let mut sensor = Om70L::connect(&config.sensor)?;

    info!("Opening dispenser on {}...", config.dispenser);
    let mut dispenser = Ml808gx::connect(&config.dispenser)?;

    let report = run_dispense_scan(axis, &mut sensor, &mut dispenser, &config.scan, |event| {
        match event {
            ScanEvent::ChannelParams(params) => println!("Channel parameters: {params}"),
            ScanEvent::Sample(s) => {
                println!("x = {}\td = {}\ti = {}", s.position, s.distance_mm, s.motor_current_ma)
            }
        }
    })?;
    Ok(report)
}
