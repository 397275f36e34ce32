// Control command router
//
// Expands one ControlCommand from the network into a fixed sequence of
// bridge calls: motors array, servos array, legacy left/right, legacy pan/tilt.
// Each call is attempted even if an earlier one failed.

use tracing::{info, warn};

use crate::messages::ControlCommand;
use crate::motor::mixing::{LEFT_MOTORS, RIGHT_MOTORS};
use crate::motor::{BridgeError, CommandBridge, Direction};

/// Pan/tilt values below this look like angles rather than pulse widths
const MIN_PLAUSIBLE_PULSE_US: i64 = 500;

const PAN_CHANNEL: i64 = 0;
const TILT_CHANNEL: i64 = 1;

/// One bridge call made while routing a command
#[derive(Debug)]
pub struct Outcome {
    pub description: String,
    pub result: Result<String, BridgeError>,
}

/// Everything attempted for one ControlCommand, in order
#[derive(Debug, Default)]
pub struct RouteReport {
    pub outcomes: Vec<Outcome>,
}

impl RouteReport {
    fn record(&mut self, description: String, result: Result<String, BridgeError>) {
        if let Err(e) = &result {
            warn!("{} failed: {}", description, e);
        }
        self.outcomes.push(Outcome {
            description,
            result,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_ok(&self) -> bool {
        self.failures().next().is_none()
    }

    /// True if any call lost the link to the board
    pub fn has_fatal(&self) -> bool {
        self.failures()
            .any(|o| o.result.as_ref().is_err_and(BridgeError::is_fatal))
    }
}

/// Route one control command onto the bridge
pub fn dispatch(bridge: &CommandBridge, cmd: &ControlCommand) -> RouteReport {
    let mut report = RouteReport::default();

    if cmd.is_stop() {
        report.record("MOTOR ALL STOP".to_string(), bridge.stop_all());
        warn!("Emergency stop executed");
        return report;
    }

    if let Some(motors) = &cmd.motors {
        for (index, &speed) in motors.iter().enumerate() {
            drive_motor(bridge, &mut report, index, speed);
        }
    }

    if let Some(servos) = &cmd.servos {
        for (channel, &pulse_us) in servos.iter().enumerate() {
            report.record(
                format!("servo {} -> {}us", channel, pulse_us),
                bridge.set_servo(channel as i64, pulse_us),
            );
        }
    }

    if cmd.motor_left.is_some() || cmd.motor_right.is_some() {
        let left = cmd.motor_left.unwrap_or(0.0);
        let right = cmd.motor_right.unwrap_or(0.0);
        for index in LEFT_MOTORS {
            drive_motor(bridge, &mut report, index, left);
        }
        for index in RIGHT_MOTORS {
            drive_motor(bridge, &mut report, index, right);
        }
    }

    for (channel, name, value) in [
        (PAN_CHANNEL, "pan", cmd.servo_pan),
        (TILT_CHANNEL, "tilt", cmd.servo_tilt),
    ] {
        let Some(pulse_us) = value else { continue };
        // Legacy clients may still send angles (0-180); forwarded as-is
        if pulse_us < MIN_PLAUSIBLE_PULSE_US {
            warn!(
                "Legacy {} value {} is below {}us; it may be an angle, not a pulse width",
                name, pulse_us, MIN_PLAUSIBLE_PULSE_US
            );
        }
        report.record(
            format!("servo {} ({}) -> {}us", channel, name, pulse_us),
            bridge.set_servo(channel, pulse_us),
        );
    }

    if !report.outcomes.is_empty() {
        info!(
            "Routed {:?} command: {} call(s), {} failed",
            cmd.kind,
            report.outcomes.len(),
            report.failures().count()
        );
    }
    report
}

fn drive_motor(bridge: &CommandBridge, report: &mut RouteReport, index: usize, speed: f32) {
    let target = index.to_string();
    if speed == 0.0 {
        report.record(format!("motor {} stop", index), bridge.motor_stop(&target));
        return;
    }
    let direction = if speed > 0.0 {
        Direction::Forward
    } else {
        Direction::Backward
    };
    report.record(
        format!("motor {} {} {:.2}", index, direction, speed.abs()),
        bridge.motor_run(&target, direction.as_str(), Some(speed.abs())),
    );
}
