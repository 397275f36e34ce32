// MotionDriver line protocol
//
// One ASCII command per line, one response line per command:
//   PING                                        -> PONG
//   MOTOR <0-5|ALL> START|STOP                  -> OK | ERR ...
//   MOTOR <0-5|ALL> FORWARD|BACKWARD [0.00-1.00] -> OK | ERR ...
//   S <channel 0-15> <pulse_us>                 -> OK | ERR ...
//   SWEEP ON|OFF [range]                        -> OK | ERR ...
//   LOG ON|OFF                                  -> OK | ERR ...

use std::fmt;
use std::str::FromStr;

/// Number of drive motors on the board (indices 0..=5)
pub const MOTOR_COUNT: u8 = 6;

/// Highest servo channel accepted by the board
pub const MAX_SERVO_CHANNEL: u8 = 15;

/// Validation errors, raised before anything is written to the link
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid motor target {0:?}: expected an index 0-5 or ALL")]
    InvalidTarget(String),

    #[error("Invalid direction {0:?}: expected FORWARD or BACKWARD")]
    InvalidDirection(String),

    #[error("Speed {0} out of range: expected 0.0-1.0")]
    InvalidSpeed(f32),

    #[error("Servo channel {0} out of range: expected 0-15")]
    InvalidChannel(i64),

    #[error("Servo pulse width {0} must be positive")]
    InvalidPulse(i64),

    #[error("Invalid sweep range {0:?}: expected ALL, [ALL], N or N-M")]
    InvalidSweepRange(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Which motor(s) a MOTOR command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorTarget {
    Index(u8),
    All,
}

impl MotorTarget {
    pub fn index(index: usize) -> Result<Self> {
        if index < MOTOR_COUNT as usize {
            Ok(Self::Index(index as u8))
        } else {
            Err(ProtocolError::InvalidTarget(index.to_string()))
        }
    }
}

impl FromStr for MotorTarget {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if upper == "ALL" || upper == "[ALL]" {
            return Ok(Self::All);
        }
        if upper.is_empty() || !upper.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidTarget(s.to_string()));
        }
        // "05" is index 5; overlong digit strings fail the parse and are rejected
        match upper.parse::<usize>() {
            Ok(index) => Self::index(index).map_err(|_| ProtocolError::InvalidTarget(s.to_string())),
            Err(_) => Err(ProtocolError::InvalidTarget(s.to_string())),
        }
    }
}

impl fmt::Display for MotorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::All => f.write_str("ALL"),
        }
    }
}

/// Spin direction of a motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
        }
    }
}

impl FromStr for Direction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("FORWARD") {
            Ok(Self::Forward)
        } else if trimmed.eq_ignore_ascii_case("BACKWARD") {
            Ok(Self::Backward)
        } else {
            Err(ProtocolError::InvalidDirection(s.to_string()))
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized motor speed in [0.0, 1.0]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed(f32);

impl Speed {
    pub fn new(value: f32) -> Result<Self> {
        // NaN fails the range check as well
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ProtocolError::InvalidSpeed(value))
        }
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Sweep range token, kept verbatim once it has been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepRange(String);

impl FromStr for SweepRange {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let is_number = |t: &str| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit());
        let valid = s.eq_ignore_ascii_case("ALL")
            || s.eq_ignore_ascii_case("[ALL]")
            || is_number(s)
            || s.split_once('-')
                .is_some_and(|(lo, hi)| is_number(lo) && is_number(hi));

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ProtocolError::InvalidSweepRange(s.to_string()))
        }
    }
}

impl fmt::Display for SweepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a MOTOR command asks the addressed motor(s) to do
#[derive(Debug, Clone, PartialEq)]
pub enum MotorAction {
    Start,
    Stop,
    Run {
        direction: Direction,
        speed: Option<Speed>,
    },
}

/// A single validated command line for the MotionDriver board.
///
/// Only the constructors below produce values of this type, so anything that
/// reaches the transport has already passed range checks. `Display` renders the
/// line without its terminating newline; the transport appends exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum WireCommand {
    Ping,
    Motor {
        target: MotorTarget,
        action: MotorAction,
    },
    Servo {
        channel: u8,
        pulse_us: u32,
    },
    Sweep {
        enabled: bool,
        range: Option<SweepRange>,
    },
    Log {
        enabled: bool,
    },
}

impl WireCommand {
    pub fn ping() -> Self {
        Self::Ping
    }

    /// `MOTOR <target> FORWARD|BACKWARD [speed]`
    pub fn motor_run(target: &str, direction: &str, speed: Option<f32>) -> Result<Self> {
        let target = target.parse()?;
        let direction = direction.parse()?;
        let speed = speed.map(Speed::new).transpose()?;
        Ok(Self::Motor {
            target,
            action: MotorAction::Run { direction, speed },
        })
    }

    pub fn motor_start(target: &str) -> Result<Self> {
        Ok(Self::Motor {
            target: target.parse()?,
            action: MotorAction::Start,
        })
    }

    pub fn motor_stop(target: &str) -> Result<Self> {
        Ok(Self::Motor {
            target: target.parse()?,
            action: MotorAction::Stop,
        })
    }

    /// Stop every motor; cannot fail validation
    pub fn stop_all() -> Self {
        Self::Motor {
            target: MotorTarget::All,
            action: MotorAction::Stop,
        }
    }

    /// `S <channel> <pulse_us>`
    pub fn servo(channel: i64, pulse_us: i64) -> Result<Self> {
        if !(0..=MAX_SERVO_CHANNEL as i64).contains(&channel) {
            return Err(ProtocolError::InvalidChannel(channel));
        }
        let pulse = u32::try_from(pulse_us)
            .ok()
            .filter(|&p| p > 0)
            .ok_or(ProtocolError::InvalidPulse(pulse_us))?;

        Ok(Self::Servo {
            channel: channel as u8,
            pulse_us: pulse,
        })
    }

    /// `SWEEP ON|OFF [range]`; an empty range is the same as none
    pub fn sweep(enabled: bool, range: Option<&str>) -> Result<Self> {
        let range = match range.map(str::trim) {
            Some(r) if !r.is_empty() => Some(r.parse()?),
            _ => None,
        };
        Ok(Self::Sweep { enabled, range })
    }

    pub fn log(enabled: bool) -> Self {
        Self::Log { enabled }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "ON" } else { "OFF" }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("PING"),
            Self::Motor { target, action } => match action {
                MotorAction::Start => write!(f, "MOTOR {} START", target),
                MotorAction::Stop => write!(f, "MOTOR {} STOP", target),
                MotorAction::Run {
                    direction,
                    speed: Some(speed),
                } => write!(f, "MOTOR {} {} {}", target, direction, speed),
                MotorAction::Run {
                    direction,
                    speed: None,
                } => write!(f, "MOTOR {} {}", target, direction),
            },
            Self::Servo { channel, pulse_us } => write!(f, "S {} {}", channel, pulse_us),
            Self::Sweep {
                enabled,
                range: Some(range),
            } => write!(f, "SWEEP {} {}", on_off(*enabled), range),
            Self::Sweep {
                enabled,
                range: None,
            } => write!(f, "SWEEP {}", on_off(*enabled)),
            Self::Log { enabled } => write!(f, "LOG {}", on_off(*enabled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_run_encoding() {
        let cmd = WireCommand::motor_run("ALL", "forward", Some(0.5)).unwrap();
        assert_eq!(cmd.to_string(), "MOTOR ALL FORWARD 0.50");

        let cmd = WireCommand::motor_run(" 3 ", "Backward", Some(0.75)).unwrap();
        assert_eq!(cmd.to_string(), "MOTOR 3 BACKWARD 0.75");

        let cmd = WireCommand::motor_run("[all]", "FORWARD", None).unwrap();
        assert_eq!(cmd.to_string(), "MOTOR ALL FORWARD");
    }

    #[test]
    fn test_motor_start_stop_have_no_speed() {
        assert_eq!(
            WireCommand::motor_start("0").unwrap().to_string(),
            "MOTOR 0 START"
        );
        assert_eq!(
            WireCommand::motor_stop("all").unwrap().to_string(),
            "MOTOR ALL STOP"
        );
        assert_eq!(WireCommand::stop_all().to_string(), "MOTOR ALL STOP");
    }

    #[test]
    fn test_target_normalization() {
        assert_eq!("05".parse::<MotorTarget>().unwrap(), MotorTarget::Index(5));
        assert_eq!("All".parse::<MotorTarget>().unwrap(), MotorTarget::All);
        assert!("foo".parse::<MotorTarget>().is_err());
        assert!("6".parse::<MotorTarget>().is_err());
        assert!("-1".parse::<MotorTarget>().is_err());
        assert!("".parse::<MotorTarget>().is_err());
        assert!("99999999999999999999999".parse::<MotorTarget>().is_err());
        assert!(MotorTarget::index(6).is_err());
    }

    #[test]
    fn test_motor_run_rejects_bad_input() {
        assert!(matches!(
            WireCommand::motor_run("foo", "forward", Some(0.2)),
            Err(ProtocolError::InvalidTarget(_))
        ));
        assert!(matches!(
            WireCommand::motor_run("1", "left", Some(0.2)),
            Err(ProtocolError::InvalidDirection(_))
        ));
        assert!(matches!(
            WireCommand::motor_run("1", "forward", Some(1.01)),
            Err(ProtocolError::InvalidSpeed(_))
        ));
        assert!(matches!(
            WireCommand::motor_run("1", "forward", Some(f32::NAN)),
            Err(ProtocolError::InvalidSpeed(_))
        ));
    }

    #[test]
    fn test_servo_encoding_and_ranges() {
        assert_eq!(WireCommand::servo(2, 1500).unwrap().to_string(), "S 2 1500");
        assert_eq!(WireCommand::servo(15, 1).unwrap().to_string(), "S 15 1");
        assert_eq!(
            WireCommand::servo(16, 1500),
            Err(ProtocolError::InvalidChannel(16))
        );
        assert_eq!(
            WireCommand::servo(-1, 1500),
            Err(ProtocolError::InvalidChannel(-1))
        );
        assert_eq!(WireCommand::servo(2, 0), Err(ProtocolError::InvalidPulse(0)));
        assert_eq!(
            WireCommand::servo(2, -1200),
            Err(ProtocolError::InvalidPulse(-1200))
        );
    }

    #[test]
    fn test_sweep_and_log() {
        assert_eq!(WireCommand::sweep(true, None).unwrap().to_string(), "SWEEP ON");
        assert_eq!(
            WireCommand::sweep(false, Some("")).unwrap().to_string(),
            "SWEEP OFF"
        );
        assert_eq!(
            WireCommand::sweep(true, Some("0-5")).unwrap().to_string(),
            "SWEEP ON 0-5"
        );
        assert_eq!(
            WireCommand::sweep(true, Some("[all]")).unwrap().to_string(),
            "SWEEP ON [all]"
        );
        assert!(WireCommand::sweep(true, Some("0-5\nMOTOR ALL START")).is_err());
        assert!(WireCommand::sweep(true, Some("1-")).is_err());

        assert_eq!(WireCommand::log(true).to_string(), "LOG ON");
        assert_eq!(WireCommand::log(false).to_string(), "LOG OFF");
        assert_eq!(WireCommand::ping().to_string(), "PING");
    }
}
