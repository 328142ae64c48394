//! CLI tool for Jenny Science XENAX Xvi axis controllers.
//!
//! Subcommands:
//! - `status`: Print position, status register and pending errors
//! - `reference`: Reference the axis
//! - `move`: Move to an absolute position
//! - `jog`: Jog in one direction until stopped
//! - `stop`: Stop motion
//! - `power`: Power the motor on or off
//! - `gpio`: Read inputs and drive outputs
//! - `repl`: Interactive command prompt

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hardware::transport::{Link, Transport};
use hardware::xenax::{OutputType, XenaxXvi};
use tracing::info;

/// Default controller address
const DEFAULT_LINK: &str = "192.168.2.100:10001";

/// Number of digital inputs and outputs on the controller
const IO_COUNT: u32 = 8;

/// Most error queue entries printed by `status`
const MAX_ERRORS: usize = 16;

/// XENAX Xvi axis control tool
#[derive(Parser, Debug)]
#[command(name = "xenax_tool")]
#[command(about = "Control tool for Jenny Science XENAX Xvi axis controllers")]
#[command(version)]
struct Args {
    /// Controller link, `host:port` or `/dev/ttyX[@baud]`
    #[arg(long, global = true, default_value = DEFAULT_LINK)]
    link: Link,

    /// Status poll interval in ms for blocking commands
    #[arg(long, global = true, default_value = "100")]
    interval_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print position, status register and pending errors
    Status,

    /// Reference the axis
    Reference {
        /// Timeout in seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Return as soon as referencing started
        #[arg(long)]
        no_wait: bool,
    },

    /// Move to an absolute position
    Move {
        /// Target position in increments
        #[arg(allow_hyphen_values = true)]
        position: i32,

        /// Speed in inc/s
        #[arg(short, long)]
        speed: Option<u32>,

        /// Timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Return as soon as the move started
        #[arg(long)]
        no_wait: bool,
    },

    /// Jog in one direction until `stop`
    Jog {
        #[arg(value_enum)]
        direction: Direction,
    },

    /// Stop motion
    Stop,

    /// Power the motor on or off
    Power {
        #[arg(value_enum)]
        state: PowerState,
    },

    /// Read inputs and outputs, optionally driving one output
    Gpio {
        /// Output to drive (1-8)
        #[arg(short, long, requires = "level")]
        output: Option<u32>,

        /// Level to drive the output to
        #[arg(short, long)]
        level: Option<bool>,

        /// Output driver type for the driven output
        #[arg(long, default_value = "source")]
        output_type: OutputType,
    },

    /// Interactive command prompt
    Repl,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Direction {
    Positive,
    Negative,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PowerState {
    On,
    Off,
    /// Re-enable power after an error without re-referencing
    Continue,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let interval = Duration::from_millis(args.interval_ms);

    info!("Connecting to XENAX at {}...", args.link);
    let mut axis = XenaxXvi::connect(&args.link)?;
    info!("Connected: {}", axis.name());

    match args.command {
        Command::Status => cmd_status(&mut axis),
        Command::Reference { timeout, no_wait } => {
            cmd_reference(&mut axis, interval, Duration::from_secs(timeout), no_wait)
        }
        Command::Move {
            position,
            speed,
            timeout,
            no_wait,
        } => cmd_move(
            &mut axis,
            position,
            speed,
            interval,
            Duration::from_secs(timeout),
            no_wait,
        ),
        Command::Jog { direction } => {
            match direction {
                Direction::Positive => axis.jog_positive()?,
                Direction::Negative => axis.jog_negative()?,
            }
            axis.set_stop_on_drop(false);
            info!("Jogging {:?}, run `stop` to halt", direction);
            Ok(())
        }
        Command::Stop => Ok(axis.stop_motion()?),
        Command::Power { state } => match state {
            PowerState::On => Ok(axis.power_on()?),
            PowerState::Off => Ok(axis.power_off()?),
            PowerState::Continue => Ok(axis.power_continue()?),
        },
        Command::Gpio {
            output,
            level,
            output_type,
        } => cmd_gpio(&mut axis, output, level, output_type),
        Command::Repl => cmd_repl(&mut axis),
    }
}

fn cmd_status<T: Transport>(axis: &mut XenaxXvi<T>) -> Result<()> {
    let status = axis.status_register()?;
    let position = axis.position()?;
    let current = axis.motor_current()?;

    println!("Position:      {position}");
    println!("Motor current: {current} mA");
    println!("Status:        0x{:08X}", status.bits());
    for (name, _) in status.iter_names() {
        println!("  {name}");
    }

    for (code, text) in axis.pending_errors(MAX_ERRORS)? {
        println!("Error {code}: {text}");
    }
    Ok(())
}

fn cmd_reference<T: Transport>(
    axis: &mut XenaxXvi<T>,
    interval: Duration,
    timeout: Duration,
    no_wait: bool,
) -> Result<()> {
    if no_wait {
        axis.reference_axis()?;
        axis.set_stop_on_drop(false);
        info!("Referencing started");
        return Ok(());
    }
    axis.reference_axis_wait(interval, timeout)?;
    info!("Axis referenced at {}", axis.position()?);
    Ok(())
}

fn cmd_move<T: Transport>(
    axis: &mut XenaxXvi<T>,
    position: i32,
    speed: Option<u32>,
    interval: Duration,
    timeout: Duration,
    no_wait: bool,
) -> Result<()> {
    if !axis.is_referenced()? {
        bail!("Axis is not referenced, run `reference` first");
    }
    if let Some(speed) = speed {
        axis.set_speed(speed)?;
    }
    if no_wait {
        axis.move_position(position)?;
        axis.set_stop_on_drop(false);
        info!("Moving to {}", position);
        return Ok(());
    }
    axis.goto_position(position, interval, timeout)?;
    info!("In position at {}", axis.position()?);
    Ok(())
}

fn cmd_gpio<T: Transport>(
    axis: &mut XenaxXvi<T>,
    output: Option<u32>,
    level: Option<bool>,
    output_type: OutputType,
) -> Result<()> {
    if let (Some(output), Some(level)) = (output, level) {
        if !(1..=IO_COUNT).contains(&output) {
            bail!("Output must be between 1 and {IO_COUNT}");
        }
        axis.set_output_type(output, output_type)?;
        axis.set_output(output, level)?;
        info!("Output {} set {}", output, if level { "high" } else { "low" });
    }

    for n in 1..=IO_COUNT {
        let input = axis.input(n)?;
        let output = axis.output(n)?;
        println!("IN{n} = {}\tOUT{n} = {}", u8::from(input), u8::from(output));
    }
    Ok(())
}

fn cmd_repl<T: Transport>(axis: &mut XenaxXvi<T>) -> Result<()> {
    println!("XENAX REPL - Enter ASCII commands, 'quit' to exit");
    println!("Examples: TP, TPSR, G10000, SP25000, PWC");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let cmd = input.trim();
        if cmd.is_empty() {
            continue;
        }

        if cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("exit") {
            println!("Bye!");
            break;
        }

        match axis.raw_query(cmd) {
            Ok(response) if response.is_empty() => println!("OK"),
            Ok(response) => {
                for line in response.lines() {
                    println!("{line}");
                }
            }
            Err(e) => println!("Error: {e}"),
        }
    }

    Ok(())
}
