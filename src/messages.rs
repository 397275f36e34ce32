// Define message types for the control channel

use serde::{Deserialize, Serialize};

/// Kind tag of a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Motor,
    Servo,
    Ping,
    Stop,
    Estop,
}

// Command from the browser client -> runtime
// All payload fields are optional; the router acts on whichever are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(rename = "type")]
    pub kind: CommandKind,

    /// Signed per-motor speeds in [-1, 1], indexed by motor number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motors: Option<Vec<f32>>,

    /// Per-servo pulse widths in microseconds, indexed by channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servos: Option<Vec<i64>>,

    // Legacy two-motor / pan-tilt fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_left: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_right: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_pan: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_tilt: Option<i64>,

    /// Client timestamp in milliseconds, echoed back for latency
    #[serde(default)]
    pub timestamp: f64,
}

impl ControlCommand {
    pub fn new(kind: CommandKind, timestamp: f64) -> Self {
        Self {
            kind,
            motors: None,
            servos: None,
            motor_left: None,
            motor_right: None,
            servo_pan: None,
            servo_tilt: None,
            timestamp,
        }
    }

    pub fn stop(timestamp: f64) -> Self {
        Self::new(CommandKind::Stop, timestamp)
    }

    pub fn motors(speeds: Vec<f32>, timestamp: f64) -> Self {
        Self {
            motors: Some(speeds),
            ..Self::new(CommandKind::Motor, timestamp)
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.kind, CommandKind::Stop | CommandKind::Estop)
    }
}

// Messages from runtime -> browser client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Telemetry {
        timestamp: f64,
        serial_connected: bool,
    },
    Pong {
        timestamp: f64,
        latency_ms: f64,
    },
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    SerialDown,
}

/// Wall-clock milliseconds since the Unix epoch, the unit clients timestamp with
pub fn now_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}
