// Timeouts, topics, serial link configuration
use clap::{ArgAction, Args, builder::BoolishValueParser};
use std::time::Duration;

// Runtime loop frequency (also bounds how often control messages are drained)
pub const LOOP_HZ: u64 = 50;

// Deadman: stop the robot when the control channel goes quiet this long
pub const DEADMAN_TIMEOUT: Duration = Duration::from_millis(500);

// Zenoh topics standing in for the browser data channel
pub const TOPIC_CONTROL_RX: &str = "cheddar/control/rx"; // client -> robot
pub const TOPIC_CONTROL_TX: &str = "cheddar/control/tx"; // robot -> client
pub const TOPIC_HEALTH: &str = "cheddar/state/health"; // health status

// Serial defaults for the MotionDriver board
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_SECS: f64 = 1.0;

// Teleop defaults
pub const TELEOP_RATE_HZ: f64 = 20.0;
pub const TELEOP_TIMEOUT_SECS: f64 = 0.2;

/// Clap value parser for an axis deadzone; accepts [0.0, 1.0)
pub fn parse_deadzone(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("deadzone must be in [0.0, 1.0), got {}", value))
    }
}

/// Port values meaning "not resolved yet"
const PORT_SENTINELS: [&str; 3] = ["", "auto", "detect"];

/// Serial link settings, from flags or the MOTIONDRIVER_* environment
#[derive(Debug, Clone, Args)]
pub struct SerialConfig {
    /// Serial port for the MotionDriver (or "auto")
    #[arg(long = "port", env = "MOTIONDRIVER_SERIAL_PORT", default_value = "auto")]
    pub port: String,

    /// Baud rate
    #[arg(long = "baud", env = "MOTIONDRIVER_SERIAL_BAUDRATE", default_value_t = DEFAULT_BAUDRATE)]
    pub baudrate: u32,

    /// Response timeout in seconds [default: 1.0]
    #[arg(long = "timeout", env = "MOTIONDRIVER_SERIAL_TIMEOUT")]
    pub timeout_secs: Option<f64>,

    /// Don't open the serial port; simulate an always-OK board
    #[arg(long = "dry-run", env = "MOTIONDRIVER_DRY_RUN")]
    pub dry_run: bool,

    /// Log every line sent and received
    #[arg(
        long = "log-traffic",
        env = "MOTIONDRIVER_LOG_TRAFFIC",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub log_traffic: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "auto".to_string(),
            baudrate: DEFAULT_BAUDRATE,
            timeout_secs: None,
            dry_run: false,
            log_traffic: true,
        }
    }
}

impl SerialConfig {
    /// The concrete port, or `None` while it is still a sentinel
    pub fn effective_port(&self) -> Option<&str> {
        let port = self.port.trim();
        if PORT_SENTINELS.iter().any(|s| port.eq_ignore_ascii_case(s)) {
            None
        } else {
            Some(port)
        }
    }

    /// Use `secs` unless a timeout was configured explicitly
    pub fn with_default_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs.get_or_insert(secs);
        self
    }

    pub fn timeout(&self) -> Duration {
        let default = Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS);
        self.timeout_secs
            .map_or(Ok(default), Duration::try_from_secs_f64)
            .unwrap_or(default)
    }
}
