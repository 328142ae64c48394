//! Dispense scan: dispense at one position, then sweep the axis to a second
//! position while logging distance telemetry, and dispense again.
//!
//! The sequence runs against the [`bench`](crate::bench) traits, so it works
//! with any axis, sensor and dispenser implementation.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::bench::{BenchError, Dispenser, DistanceSensor, LinearAxis};
use crate::musashi::ChannelParams;

/// Errors that abort a scan.
#[derive(Error, Debug)]
pub enum SequenceError {
    #[error(transparent)]
    Device(#[from] BenchError),

    #[error("Axis did not reach {target} within {timeout:?}")]
    ScanTimeout { target: i32, timeout: Duration },
}

/// Result type for sequences.
pub type SequenceResult<T> = Result<T, SequenceError>;

/// Parameters of a dispense scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispenseScan {
    /// Axis speed in inc/s (~µm/s on a LINAX axis)
    pub speed: u32,
    /// Position of the first dispense, reached with a blocking move
    pub blocking_target: i32,
    /// End of the non-blocking sweep and position of the second dispense
    pub scan_target: i32,
    /// Telemetry period during the sweep
    pub poll_interval_ms: u64,
    /// Status poll period for blocking moves and referencing
    pub goto_interval_ms: u64,
    /// Time limit for blocking moves
    pub goto_timeout_ms: u64,
    /// Time limit for referencing an unreferenced axis
    pub reference_timeout_ms: u64,
    /// Time limit for the sweep
    pub scan_timeout_ms: u64,
    /// Dispenser channel to select, or keep the active one
    pub channel: Option<u32>,
}

impl Default for DispenseScan {
    fn default() -> Self {
        Self {
            speed: 25_000,
            blocking_target: 170_000,
            scan_target: 140_000,
            poll_interval_ms: 100,
            goto_interval_ms: 500,
            goto_timeout_ms: 10_000,
            reference_timeout_ms: 30_000,
            scan_timeout_ms: 60_000,
            channel: Some(1),
        }
    }
}

impl DispenseScan {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn goto_interval(&self) -> Duration {
        Duration::from_millis(self.goto_interval_ms)
    }

    pub fn goto_timeout(&self) -> Duration {
        Duration::from_millis(self.goto_timeout_ms)
    }

    pub fn reference_timeout(&self) -> Duration {
        Duration::from_millis(self.reference_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

/// One telemetry point taken during the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScanSample {
    /// Seconds since the sweep started
    pub elapsed_s: f64,
    pub position: i32,
    pub motor_current_ma: i32,
    pub distance_mm: f32,
}

impl fmt::Display for ScanSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t = {:.3} s\tx = {}\td = {:.4}\ti = {}",
            self.elapsed_s, self.position, self.distance_mm, self.motor_current_ma
        )
    }
}

/// Progress reported while a scan runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanEvent<'a> {
    /// Dispenser is set up; sent before the axis moves.
    ChannelParams(&'a ChannelParams),
    /// One telemetry point of the sweep.
    Sample(&'a ScanSample),
}

/// Outcome of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    /// Parameters of the channel used for both dispenses
    pub channel_params: ChannelParams,
    pub samples: Vec<ScanSample>,
}

/// Run the dispense scan.
///
/// `on_event` sees the channel parameters once the dispenser is set up, then
/// every telemetry point as soon as it is taken. Powering the axis on and off
/// is left to the caller.
pub fn run_dispense_scan<A, S, D, F>(
    axis: &mut A,
    sensor: &mut S,
    dispenser: &mut D,
    plan: &DispenseScan,
    mut on_event: F,
) -> SequenceResult<ScanReport>
where
    A: LinearAxis + ?Sized,
    S: DistanceSensor + ?Sized,
    D: Dispenser + ?Sized,
    F: FnMut(ScanEvent<'_>),
{
    if let Some(channel) = plan.channel {
        dispenser.select_channel(channel)?;
    }
    dispenser.timed_mode()?;
    let channel_params = dispenser.channel_params()?;
    info!("Dispenser parameters: {}", channel_params);
    on_event(ScanEvent::ChannelParams(&channel_params));

    if !axis.is_referenced()? {
        info!("Axis not referenced, referencing");
        axis.reference(plan.goto_interval(), plan.reference_timeout())?;
    }

    axis.set_speed(plan.speed)?;

    info!("Moving to {}", plan.blocking_target);
    axis.goto_position(plan.blocking_target, plan.goto_interval(), plan.goto_timeout())?;
    dispenser.dispense()?;

    info!("Scanning to {}", plan.scan_target);
    let start = Instant::now();
    axis.move_position(plan.scan_target)?;

    let mut samples = Vec::new();
    while !axis.in_position()? {
        let sample = ScanSample {
            elapsed_s: start.elapsed().as_secs_f64(),
            position: axis.position()?,
            motor_current_ma: axis.motor_current()?,
            distance_mm: sensor.distance_mm()?,
        };
        debug!("{}", sample);
        on_event(ScanEvent::Sample(&sample));
        samples.push(sample);

        if start.elapsed() > plan.scan_timeout() {
            return Err(SequenceError::ScanTimeout {
                target: plan.scan_target,
                timeout: plan.scan_timeout(),
            });
        }
        thread::sleep(plan.poll_interval());
    }

    dispenser.dispense()?;
    info!("Scan finished with {} samples", samples.len());

    Ok(ScanReport {
        channel_params,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::BenchResult;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Axis that reaches its scan target after a fixed number of polls.
    struct FakeAxis {
        log: Log,
        referenced: bool,
        position: i32,
        polls_until_in_position: usize,
    }

    impl LinearAxis for FakeAxis {
        fn power_on(&mut self) -> BenchResult<()> {
            self.log.borrow_mut().push("power_on".into());
            Ok(())
        }

        fn power_off(&mut self) -> BenchResult<()> {
            self.log.borrow_mut().push("power_off".into());
            Ok(())
        }

        fn is_referenced(&mut self) -> BenchResult<bool> {
            Ok(self.referenced)
        }

        fn reference(&mut self, _interval: Duration, _timeout: Duration) -> BenchResult<()> {
            self.log.borrow_mut().push("reference".into());
            self.referenced = true;
            Ok(())
        }

        fn set_speed(&mut self, inc_per_sec: u32) -> BenchResult<()> {
            self.log.borrow_mut().push(format!("speed {inc_per_sec}"));
            Ok(())
        }

        fn goto_position(
            &mut self,
            position: i32,
            _interval: Duration,
            _timeout: Duration,
        ) -> BenchResult<()> {
            self.log.borrow_mut().push(format!("goto {position}"));
            self.position = position;
            Ok(())
        }

        fn move_position(&mut self, position: i32) -> BenchResult<()> {
            self.log.borrow_mut().push(format!("move {position}"));
            Ok(())
        }

        fn position(&mut self) -> BenchResult<i32> {
            self.position -= 1000;
            Ok(self.position)
        }

        fn in_position(&mut self) -> BenchResult<bool> {
            if self.polls_until_in_position == 0 {
                return Ok(true);
            }
            self.polls_until_in_position -= 1;
            Ok(false)
        }

        fn motor_current(&mut self) -> BenchResult<i32> {
            Ok(150)
        }
    }

    struct FakeSensor {
        distance: f32,
    }

    impl DistanceSensor for FakeSensor {
        fn distance_mm(&mut self) -> BenchResult<f32> {
            self.distance += 0.5;
            Ok(self.distance)
        }
    }

    struct FakeDispenser {
        log: Log,
        fail_dispense: bool,
    }

    impl Dispenser for FakeDispenser {
        fn select_channel(&mut self, channel: u32) -> BenchResult<()> {
            self.log.borrow_mut().push(format!("channel {channel}"));
            Ok(())
        }

        fn timed_mode(&mut self) -> BenchResult<()> {
            self.log.borrow_mut().push("timed".into());
            Ok(())
        }

        fn channel_params(&mut self) -> BenchResult<ChannelParams> {
            Ok(ChannelParams {
                pressure_kpa: 50.0,
                duration_ms: 100.0,
                on_delay_ms: 0.0,
                off_delay_ms: 0.0,
            })
        }

        fn dispense(&mut self) -> BenchResult<()> {
            if self.fail_dispense {
                return Err(BenchError::Device("nozzle clogged".into()));
            }
            self.log.borrow_mut().push("dispense".into());
            Ok(())
        }
    }

    fn fast_plan() -> DispenseScan {
        DispenseScan {
            poll_interval_ms: 1,
            goto_interval_ms: 1,
            ..DispenseScan::default()
        }
    }

    fn fakes(log: &Log, referenced: bool, polls: usize) -> (FakeAxis, FakeSensor, FakeDispenser) {
        (
            FakeAxis {
                log: log.clone(),
                referenced,
                position: 0,
                polls_until_in_position: polls,
            },
            FakeSensor { distance: 10.0 },
            FakeDispenser {
                log: log.clone(),
                fail_dispense: false,
            },
        )
    }

    #[test]
    fn test_default_plan_matches_demo() {
        let plan = DispenseScan::default();
        assert_eq!(plan.speed, 25_000);
        assert_eq!(plan.blocking_target, 170_000);
        assert_eq!(plan.scan_target, 140_000);
        assert_eq!(plan.poll_interval(), Duration::from_millis(100));
        assert_eq!(plan.goto_timeout(), Duration::from_secs(10));
        assert_eq!(plan.channel, Some(1));
    }

    #[test]
    fn test_scan_call_order() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, true, 3);

        let mut seen = 0;
        let mut params_seen = 0;
        let report = run_dispense_scan(
            &mut axis,
            &mut sensor,
            &mut dispenser,
            &fast_plan(),
            |event| match event {
                ScanEvent::ChannelParams(_) => params_seen += 1,
                ScanEvent::Sample(_) => seen += 1,
            },
        )
        .unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "channel 1",
                "timed",
                "speed 25000",
                "goto 170000",
                "dispense",
                "move 140000",
                "dispense",
            ]
        );
        assert_eq!(seen, 3);
        assert_eq!(params_seen, 1);
        assert_eq!(report.samples.len(), 3);
        assert_eq!(report.samples[0].position, 169_000);
        assert_eq!(report.samples[2].distance_mm, 11.5);
        assert_eq!(report.samples[1].motor_current_ma, 150);
        assert!(report.samples[0].elapsed_s <= report.samples[2].elapsed_s);
        assert_eq!(report.channel_params.duration_ms, 100.0);
    }

    #[test]
    fn test_unreferenced_axis_is_referenced_first() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, false, 0);

        let report =
            run_dispense_scan(&mut axis, &mut sensor, &mut dispenser, &fast_plan(), |_| {})
                .unwrap();

        assert!(report.samples.is_empty());
        let log = log.borrow();
        let reference = log.iter().position(|l| l == "reference").unwrap();
        let speed = log.iter().position(|l| l == "speed 25000").unwrap();
        assert!(reference < speed);
    }

    #[test]
    fn test_without_channel_keeps_active_channel() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, true, 0);
        let plan = DispenseScan {
            channel: None,
            ..fast_plan()
        };

        run_dispense_scan(&mut axis, &mut sensor, &mut dispenser, &plan, |_| {}).unwrap();
        assert_eq!(log.borrow()[0], "timed");
    }

    #[test]
    fn test_scan_timeout() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, true, usize::MAX);
        let plan = DispenseScan {
            scan_timeout_ms: 5,
            ..fast_plan()
        };

        let err = run_dispense_scan(&mut axis, &mut sensor, &mut dispenser, &plan, |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            SequenceError::ScanTimeout {
                target: 140_000,
                ..
            }
        ));
        assert_eq!(log.borrow().iter().filter(|l| *l == "dispense").count(), 1);
    }

    #[test]
    fn test_device_error_aborts() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, true, 0);
        dispenser.fail_dispense = true;

        let err = run_dispense_scan(&mut axis, &mut sensor, &mut dispenser, &fast_plan(), |_| {})
            .unwrap_err();
        assert_eq!(err.to_string(), "Device error: nozzle clogged");
        assert!(!log.borrow().iter().any(|l| l.starts_with("move")));
    }

    #[test]
    fn test_trait_objects_accepted() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, true, 1);
        let axis: &mut dyn LinearAxis = &mut axis;
        let sensor: &mut dyn DistanceSensor = &mut sensor;
        let dispenser: &mut dyn Dispenser = &mut dispenser;

        let report = run_dispense_scan(axis, sensor, dispenser, &fast_plan(), |_| {}).unwrap();
        assert_eq!(report.samples.len(), 1);
    }

    #[test]
    fn test_channel_params_reported_before_motion() {
        let log = Log::default();
        let (mut axis, mut sensor, mut dispenser) = fakes(&log, false, 1);

        let events = log.clone();
        run_dispense_scan(&mut axis, &mut sensor, &mut dispenser, &fast_plan(), |event| {
            if let ScanEvent::ChannelParams(params) = event {
                events.borrow_mut().push(format!("params {}", params));
            }
        })
        .unwrap();

        let log = log.borrow();
        assert_eq!(log[2], "params (50.0 kPa, 100 ms, 0.0 ms, 0.0 ms)");
        let params = log.iter().position(|l| l.starts_with("params")).unwrap();
        let reference = log.iter().position(|l| l == "reference").unwrap();
        let dispense = log.iter().position(|l| l == "dispense").unwrap();
        assert!(params < reference);
        assert!(params < dispense);
    }

    #[test]
    fn test_sample_display() {
        let sample = ScanSample {
            elapsed_s: 0.25,
            position: 150_000,
            motor_current_ma: 120,
            distance_mm: 42.5,
        };
        assert_eq!(
            sample.to_string(),
            "t = 0.250 s\tx = 150000\td = 42.5000\ti = 120"
        );
    }

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let plan: DispenseScan = serde_json::from_str(r#"{"speed": 1000, "channel": null}"#).unwrap();
        assert_eq!(plan.speed, 1000);
        assert_eq!(plan.channel, None);
        assert_eq!(plan.scan_target, 140_000);
    }
}
