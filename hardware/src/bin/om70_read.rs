//! Poll a Baumer OM70-L distance sensor and print its measurements.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use hardware::baumer::Om70L;
use hardware::transport::IpAddress;
use tracing::info;

const DEFAULT_ADDRESS: &str = "192.168.2.250:502";

/// Read distances from a Baumer OM70-L laser sensor
#[derive(Parser, Debug)]
#[command(name = "om70_read")]
#[command(about = "Poll a Baumer OM70-L laser distance sensor")]
#[command(version)]
struct Args {
    /// Sensor address, `host:port` (port must be 502)
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    address: IpAddress,

    /// Number of readings (0 = until interrupted)
    #[arg(short, long, default_value = "10")]
    count: u32,

    /// Time between readings in ms
    #[arg(short, long, default_value = "100")]
    interval_ms: u64,

    /// Print every field of the measurement block
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Connecting to OM70-L at {}...", args.address);
    let mut sensor = Om70L::connect(&args.address)?;

    let interval = Duration::from_millis(args.interval_ms);
    let start = Instant::now();
    let mut n = 0;
    while args.count == 0 || n < args.count {
        let m = sensor.measurement()?;
        let t = start.elapsed().as_secs_f64();
        if args.verbose {
            println!(
                "t = {t:.3} s\td = {:.4} mm\tquality = {}\trate = {:.0} Hz\texposure = {:.3}\tdelay = {:.3} ms",
                m.distance_mm, m.quality, m.sample_rate_hz, m.exposure, m.response_delay_ms
            );
        } else {
            println!("t = {t:.3} s\td = {:.4} mm", m.distance_mm);
        }
        n += 1;
        thread::sleep(interval);
    }

    Ok(())
}
