// Gamepad teleoperation: left stick Y = throttle, right stick X = turn
//
// South (A) = emergency stop, East (B) = exit.
// Drive updates are rate limited; emergency stop is not.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::motor::mixing::{DEFAULT_DEADZONE, LEFT_MOTORS, RIGHT_MOTORS};
use crate::motor::{BridgeError, CommandBridge, DriveCommand, compute_drive};

/// How long to sleep when the source has no event ready
const IDLE_POLL: Duration = Duration::from_millis(5);

/// The two stick axes the teleop loop reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StickAxis {
    /// Left stick vertical, forward positive
    Throttle,
    /// Right stick horizontal, right positive
    Turn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    EmergencyStop,
    Exit,
}

/// Input events; axis values are already normalized to [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GamepadEvent {
    Axis(StickAxis, f32),
    Pressed(Button),
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum TeleopError {
    #[error("Gamepad backend error: {0}")]
    Backend(#[from] gilrs::Error),

    #[error("Controller {0} disconnected")]
    Disconnected(String),
}

/// Anything that yields gamepad events without blocking
pub trait GamepadSource {
    /// `Ok(None)` when no event is ready; `Err` ends the loop
    fn poll_event(&mut self) -> Result<Option<GamepadEvent>, TeleopError>;
}

/// Minimum-interval gate for outgoing drive commands
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(rate_hz: f64) -> Self {
        let interval = Duration::try_from_secs_f64(1.0 / rate_hz).unwrap_or(Duration::ZERO);
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|last| now.duration_since(last) >= self.interval)
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// What the loop should do after an event or idle poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TeleopAction {
    Drive(DriveCommand),
    EmergencyStop,
    Exit,
    Idle,
}

/// Axis state plus rate limiting
#[derive(Debug, Clone)]
pub struct TeleopState {
    throttle: f32,
    turn: f32,
    deadzone: f32,
    limiter: RateLimiter,
    /// Latest drive not yet sent because the limiter held it back
    pending: Option<DriveCommand>,
}

impl TeleopState {
    pub fn new(deadzone: f32, rate_hz: f64) -> Self {
        Self {
            throttle: 0.0,
            turn: 0.0,
            deadzone,
            limiter: RateLimiter::new(rate_hz),
            pending: None,
        }
    }

    pub fn drive(&self) -> DriveCommand {
        compute_drive(self.throttle, self.turn, self.deadzone)
    }

    pub fn update(&mut self, event: GamepadEvent, now: Instant) -> TeleopAction {
        match event {
            GamepadEvent::Pressed(Button::EmergencyStop) => {
                self.pending = None;
                TeleopAction::EmergencyStop
            }
            GamepadEvent::Pressed(Button::Exit) => TeleopAction::Exit,
            GamepadEvent::Axis(axis, value) => {
                let value = value.clamp(-1.0, 1.0);
                match axis {
                    StickAxis::Throttle => self.throttle = value,
                    StickAxis::Turn => self.turn = value,
                }
                self.pending = Some(self.drive());
                self.flush(now)
            }
            GamepadEvent::Other => TeleopAction::Idle,
        }
    }

    /// Send a held-back drive once the limiter allows it
    pub fn flush(&mut self, now: Instant) -> TeleopAction {
        match self.pending {
            Some(drive) if self.limiter.ready(now) => {
                self.limiter.mark(now);
                self.pending = None;
                TeleopAction::Drive(drive)
            }
            _ => TeleopAction::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeleopConfig {
    pub deadzone: f32,
    pub rate_hz: f64,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            deadzone: DEFAULT_DEADZONE,
            rate_hz: crate::config::TELEOP_RATE_HZ,
        }
    }
}

/// Send one drive to all six motors: 0-2 follow the left side, 3-5 the right
pub fn send_drive(bridge: &CommandBridge, drive: &DriveCommand) -> Result<(), BridgeError> {
    let ((left_dir, left_speed), (right_dir, right_speed)) = drive.as_direction_speed();
    debug!(
        "Drive: left={} {:.2}, right={} {:.2}",
        left_dir, left_speed, right_dir, right_speed
    );

    let sides = [
        (LEFT_MOTORS, left_dir, left_speed),
        (RIGHT_MOTORS, right_dir, right_speed),
    ];
    for (motors, direction, speed) in sides {
        for index in motors {
            bridge.motor_run(&index.to_string(), direction.as_str(), Some(speed))?;
        }
    }
    Ok(())
}

/// Run the teleop loop until exit, `stop` is set, or the source fails.
///
/// Always ends with `MOTOR ALL STOP` and closes the bridge.
pub fn run<S: GamepadSource>(
    bridge: &CommandBridge,
    source: &mut S,
    config: &TeleopConfig,
    stop: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let result = drive_loop(bridge, source, config, &stop);

    info!("Final STOP and closing");
    if let Err(e) = bridge.stop_all() {
        warn!("Final stop failed: {}", e);
    }
    bridge.close();
    result
}

fn drive_loop<S: GamepadSource>(
    bridge: &CommandBridge,
    source: &mut S,
    config: &TeleopConfig,
    stop: &AtomicBool,
) -> Result<(), BridgeError> {
    info!("Sending initial STOP");
    bridge.stop_all()?;

    let mut state = TeleopState::new(config.deadzone, config.rate_hz);

    while !stop.load(Ordering::Relaxed) {
        let action = match source.poll_event() {
            Ok(Some(event)) => state.update(event, Instant::now()),
            Ok(None) => {
                let action = state.flush(Instant::now());
                if action == TeleopAction::Idle {
                    sleep(IDLE_POLL);
                }
                action
            }
            Err(e) => {
                error!("Gamepad source failed: {}", e);
                break;
            }
        };

        match action {
            TeleopAction::Drive(drive) => {
                if let Err(e) = send_drive(bridge, &drive) {
                    warn!("Drive command failed: {}", e);
                }
            }
            TeleopAction::EmergencyStop => {
                info!("ALLSTOP button pressed");
                if let Err(e) = bridge.stop_all() {
                    error!("Emergency stop failed: {}", e);
                }
            }
            TeleopAction::Exit => {
                info!("Exit button pressed");
                break;
            }
            TeleopAction::Idle => {}
        }
    }
    Ok(())
}

/// Gamepad source backed by gilrs (first connected pad wins)
pub struct GilrsSource {
    gilrs: gilrs::Gilrs,
}

impl GilrsSource {
    pub fn new() -> Result<Self, TeleopError> {
        let gilrs = gilrs::Gilrs::new()?;
        for (id, gamepad) in gilrs.gamepads() {
            info!("Found controller {} ({})", id, gamepad.name());
        }
        Ok(Self { gilrs })
    }
}

impl GamepadSource for GilrsSource {
    fn poll_event(&mut self) -> Result<Option<GamepadEvent>, TeleopError> {
        use gilrs::{Axis, EventType};

        let Some(event) = self.gilrs.next_event() else {
            return Ok(None);
        };
        let mapped = match event.event {
            EventType::AxisChanged(Axis::LeftStickY, value, _) => {
                GamepadEvent::Axis(StickAxis::Throttle, value)
            }
            EventType::AxisChanged(Axis::RightStickX, value, _) => {
                GamepadEvent::Axis(StickAxis::Turn, value)
            }
            EventType::ButtonPressed(gilrs::Button::South, _) => {
                GamepadEvent::Pressed(Button::EmergencyStop)
            }
            EventType::ButtonPressed(gilrs::Button::East, _) => GamepadEvent::Pressed(Button::Exit),
            EventType::Disconnected => {
                return Err(TeleopError::Disconnected(event.id.to_string()));
            }
            _ => GamepadEvent::Other,
        };
        Ok(Some(mapped))
    }
}
