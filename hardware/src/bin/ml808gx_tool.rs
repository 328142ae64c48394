//! CLI tool for the Musashi ML-808GX dispenser.
//!
//! Subcommands:
//! - `params`: Print the parameters of a channel
//! - `set`: Change pressure, duration or delays of a channel
//! - `channel`: Print or select the active channel
//! - `mode`: Switch between manual and timed dispensing
//! - `dispense`: Trigger dispense shots
//! - `vacuum`: Configure the suck-back vacuum

use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hardware::musashi::{Ml808gx, SUPPORTED_BAUD_RATES};
use hardware::transport::{SerialConfig, SerialTransport};
use tracing::info;

const DEFAULT_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD: u32 = 38400;

/// ML-808GX dispenser control tool
#[derive(Parser, Debug)]
#[command(name = "ml808gx_tool")]
#[command(about = "Control tool for the Musashi ML-808GX dispenser")]
#[command(version)]
struct Args {
    /// Serial device
    #[arg(long, global = true, default_value = DEFAULT_PORT)]
    port: String,

    /// Baud rate (9600, 19200 or 38400)
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Channel to act on (defaults to the active one)
    #[arg(short, long, global = true)]
    channel: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the channel parameters
    Params,

    /// Change channel parameters
    Set {
        /// Pressure in kPa
        #[arg(short, long)]
        pressure: Option<f64>,

        /// Dispense duration in ms
        #[arg(short, long)]
        duration: Option<f64>,

        /// On delay in ms (set together with --off-delay)
        #[arg(long, requires = "off_delay")]
        on_delay: Option<f64>,

        /// Off delay in ms (set together with --on-delay)
        #[arg(long, requires = "on_delay")]
        off_delay: Option<f64>,
    },

    /// Print the active channel, or select the one given by --channel
    Channel,

    /// Switch dispense mode
    Mode {
        #[arg(value_enum)]
        mode: Mode,
    },

    /// Trigger dispense shots
    Dispense {
        /// Number of shots
        #[arg(short, long, default_value = "1")]
        shots: u32,

        /// Pause between shots in ms
        #[arg(long, default_value = "500")]
        pause_ms: u64,
    },

    /// Configure the suck-back vacuum
    Vacuum {
        #[arg(value_enum)]
        state: VacuumState,

        /// Vacuum on time in ms (set together with --off-ms)
        #[arg(long, requires = "off_ms")]
        on_ms: Option<u32>,

        /// Vacuum off time in ms (set together with --on-ms)
        #[arg(long, requires = "on_ms")]
        off_ms: Option<u32>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// Dispense while the trigger is held
    Manual,
    /// Dispense for the channel duration on each trigger
    Timed,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VacuumState {
    On,
    Off,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if !SUPPORTED_BAUD_RATES.contains(&args.baud) {
        bail!("Unsupported baud rate {}, use one of {:?}", args.baud, SUPPORTED_BAUD_RATES);
    }

    let config = SerialConfig::new(&args.port, args.baud);
    info!("Opening ML-808GX on {}...", config);
    let mut dispenser = Ml808gx::connect(&config)?;

    if let Some(channel) = args.channel {
        if channel != dispenser.current_channel() {
            dispenser.select_channel(channel)?;
        }
    }

    match args.command {
        Command::Params => cmd_params(&mut dispenser),
        Command::Set {
            pressure,
            duration,
            on_delay,
            off_delay,
        } => cmd_set(&mut dispenser, pressure, duration, on_delay.zip(off_delay)),
        Command::Channel => {
            println!("Channel {}", dispenser.channel()?);
            Ok(())
        }
        Command::Mode { mode } => match mode {
            Mode::Manual => Ok(dispenser.manual_mode()?),
            Mode::Timed => Ok(dispenser.timed_mode()?),
        },
        Command::Dispense { shots, pause_ms } => {
            for shot in 1..=shots {
                dispenser.dispense()?;
                info!("Shot {}/{}", shot, shots);
                if shot < shots {
                    thread::sleep(Duration::from_millis(pause_ms));
                }
            }
            Ok(())
        }
        Command::Vacuum {
            state,
            on_ms,
            off_ms,
        } => {
            if let (Some(on_ms), Some(off_ms)) = (on_ms, off_ms) {
                dispenser.set_vacuum_interval(on_ms, off_ms)?;
            }
            Ok(dispenser.enable_vacuum(matches!(state, VacuumState::On))?)
        }
    }
}

fn cmd_params(dispenser: &mut Ml808gx<SerialTransport>) -> Result<()> {
    let params = dispenser.channel_params()?;
    println!("Channel {}", dispenser.current_channel());
    println!("  Pressure:  {:.1} kPa", params.pressure_kpa);
    println!("  Duration:  {} ms", params.duration_ms);
    println!("  On delay:  {:.1} ms", params.on_delay_ms);
    println!("  Off delay: {:.1} ms", params.off_delay_ms);
    Ok(())
}

fn cmd_set(
    dispenser: &mut Ml808gx<SerialTransport>,
    pressure: Option<f64>,
    duration: Option<f64>,
    delays: Option<(f64, f64)>,
) -> Result<()> {
    if pressure.is_none() && duration.is_none() && delays.is_none() {
        bail!("Nothing to set, give --pressure, --duration or --on-delay/--off-delay");
    }
    if let Some(kpa) = pressure {
        dispenser.set_pressure(kpa)?;
    }
    if let Some(ms) = duration {
        dispenser.set_duration(ms)?;
    }
    if let Some((on_ms, off_ms)) = delays {
        dispenser.set_delays(on_ms, off_ms)?;
    }
    println!("Channel {}: {}", dispenser.current_channel(), dispenser.channel_params()?);
    Ok(())
}
