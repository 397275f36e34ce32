// High-level command bridge for the MotionDriver board
//
// Owns the transport session, serializes exchanges (the protocol has no
// request IDs, so responses are matched by arrival order) and classifies
// each response as OK, device error, or timeout.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{ProtocolError, WireCommand};
use super::transport::{DryRunTransport, SerialTransport, Transport, TransportError};
use crate::config::SerialConfig;

/// Coarse error categories callers act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; fix it and retry
    Validation,
    /// No response in time; the session is still usable
    Timeout,
    /// The board rejected the command
    Device,
    /// The link is gone; the session must be re-established
    Transport,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Validation(#[from] ProtocolError),

    #[error("No response received for command '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("MotionDriver error: {0}")]
    Device(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serial port not specified. Set MOTIONDRIVER_SERIAL_PORT.")]
    PortUnresolved,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Device(_) => ErrorKind::Device,
            Self::Transport(_) | Self::PortUnresolved => ErrorKind::Transport,
        }
    }

    /// True when the session is unusable until it reconnects
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Raw board response for device errors
    pub fn device_response(&self) -> Option<&str> {
        match self {
            Self::Device(response) => Some(response),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Session-owning façade over the MotionDriver line protocol
pub struct CommandBridge {
    config: SerialConfig,
    session: Mutex<Option<Box<dyn Transport>>>,
}

impl CommandBridge {
    /// Create a bridge; the link is opened lazily on the first command
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Create a bridge around an already-open transport
    pub fn with_transport(config: SerialConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            session: Mutex::new(Some(transport)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a transport is currently open
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    fn open_transport(&self) -> Result<Box<dyn Transport>> {
        if self.config.dry_run {
            info!("Dry-run mode: MotionDriver traffic is simulated");
            return Ok(Box::new(DryRunTransport::default()));
        }

        let port = self
            .config
            .effective_port()
            .ok_or(BridgeError::PortUnresolved)?;

        info!(
            "Opening MotionDriver serial port {} @ {}bps (timeout={:.2}s)",
            port,
            self.config.baudrate,
            self.config.timeout().as_secs_f64()
        );
        let transport = SerialTransport::open(port, self.config.baudrate, self.config.timeout())?;
        Ok(Box::new(transport))
    }

    /// Close the session. Safe to call repeatedly or before anything was opened.
    pub fn close(&self) {
        if let Some(mut transport) = self.lock().take() {
            debug!("Closing MotionDriver transport");
            transport.close();
        }
    }

    /// Send one command and, if `expect_response`, wait for its response line.
    ///
    /// The whole write/read exchange holds the session lock. Returns the trimmed
    /// response, `Ok(None)` when no response was expected.
    pub fn send_command(
        &self,
        command: &WireCommand,
        expect_response: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let line = command.to_string();

        let mut session = self.lock();
        if session.is_none() {
            *session = Some(self.open_transport()?);
        }
        let Some(transport) = session.as_mut() else {
            return Err(TransportError::Closed.into());
        };

        if self.config.log_traffic {
            info!("-> {}", line);
        }

        if let Err(e) = transport.write_line(&line) {
            warn!("Write to MotionDriver failed, dropping session: {}", e);
            drop_session(&mut session);
            return Err(e.into());
        }

        if !expect_response {
            return Ok(None);
        }

        let response = match transport.read_line(timeout) {
            Ok(Some(response)) => response,
            Ok(None) => {
                return Err(BridgeError::Timeout {
                    command: line,
                    timeout,
                });
            }
            Err(e) => {
                warn!("Read from MotionDriver failed, dropping session: {}", e);
                drop_session(&mut session);
                return Err(e.into());
            }
        };

        let response = response.trim().to_string();
        if self.config.log_traffic {
            info!("<- {}", response);
        }

        if starts_with_ignore_case(&response, "ERR") {
            return Err(BridgeError::Device(response));
        }
        Ok(Some(response))
    }

    fn send_expect_ok(&self, command: WireCommand) -> Result<String> {
        let response = self.send_command(&command, true, None)?.unwrap_or_default();
        if !response.eq_ignore_ascii_case("OK") {
            return Err(BridgeError::Device(response));
        }
        Ok(response)
    }

    /// Liveness check; returns the board's reply (normally `PONG`)
    pub fn ping(&self) -> Result<String> {
        Ok(self
            .send_command(&WireCommand::ping(), true, None)?
            .unwrap_or_default())
    }

    pub fn set_servo(&self, channel: i64, pulse_us: i64) -> Result<String> {
        self.send_expect_ok(WireCommand::servo(channel, pulse_us)?)
    }

    pub fn set_sweep(&self, enabled: bool, range: Option<&str>) -> Result<String> {
        self.send_expect_ok(WireCommand::sweep(enabled, range)?)
    }

    pub fn set_log(&self, enabled: bool) -> Result<String> {
        self.send_expect_ok(WireCommand::log(enabled))
    }

    pub fn motor_run(&self, target: &str, direction: &str, speed: Option<f32>) -> Result<String> {
        self.send_expect_ok(WireCommand::motor_run(target, direction, speed)?)
    }

    pub fn motor_start(&self, target: &str) -> Result<String> {
        self.send_expect_ok(WireCommand::motor_start(target)?)
    }

    pub fn motor_stop(&self, target: &str) -> Result<String> {
        self.send_expect_ok(WireCommand::motor_stop(target)?)
    }

    /// `MOTOR ALL STOP`
    pub fn stop_all(&self) -> Result<String> {
        self.send_expect_ok(WireCommand::stop_all())
    }
}

impl Drop for CommandBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn drop_session(session: &mut Option<Box<dyn Transport>>) {
    if let Some(mut transport) = session.take() {
        transport.close();
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::transport::Result as TransportResult;
    use std::sync::Arc;
    use std::thread;

    fn test_config() -> SerialConfig {
        SerialConfig {
            port: "dummy".to_string(),
            timeout_secs: Some(0.1),
            log_traffic: false,
            ..Default::default()
        }
    }

    fn make_bridge(response: &str) -> (CommandBridge, DryRunTransport) {
        let transport = DryRunTransport::with_response(response);
        let bridge = CommandBridge::with_transport(test_config(), Box::new(transport.clone()));
        (bridge, transport)
    }

    #[test]
    fn test_set_servo_sends_command() {
        let (bridge, transport) = make_bridge("OK");
        assert_eq!(bridge.set_servo(2, 1500).unwrap(), "OK");
        assert_eq!(transport.last_line().as_deref(), Some("S 2 1500"));
    }

    #[test]
    fn test_motor_run_with_speed() {
        let (bridge, transport) = make_bridge("ok");
        bridge.motor_run("ALL", "forward", Some(0.5)).unwrap();
        assert_eq!(transport.last_line().as_deref(), Some("MOTOR ALL FORWARD 0.50"));
    }

    #[test]
    fn test_helpers_encode_expected_lines() {
        let (bridge, transport) = make_bridge("OK");
        bridge.motor_start("1").unwrap();
        bridge.motor_stop("[ALL]").unwrap();
        bridge.set_sweep(true, Some("0-5")).unwrap();
        bridge.set_log(false).unwrap();
        assert_eq!(
            transport.written(),
            vec!["MOTOR 1 START", "MOTOR ALL STOP", "SWEEP ON 0-5", "LOG OFF"]
        );
    }

    #[test]
    fn test_validation_fails_before_io() {
        let (bridge, transport) = make_bridge("OK");

        let err = bridge.motor_run("foo", "forward", Some(0.2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(matches!(
            bridge.set_servo(16, 1500),
            Err(BridgeError::Validation(ProtocolError::InvalidChannel(16)))
        ));
        assert!(matches!(
            bridge.set_servo(2, 0),
            Err(BridgeError::Validation(ProtocolError::InvalidPulse(0)))
        ));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_error_response_is_device_error() {
        let (bridge, _) = make_bridge("ERR Servo channel");
        let err = bridge.set_servo(0, 1200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Device);
        assert_eq!(err.device_response(), Some("ERR Servo channel"));

        // Lowercase prefix is still an error
        let (bridge, _) = make_bridge("err busy");
        assert!(matches!(bridge.ping(), Err(BridgeError::Device(r)) if r == "err busy"));
    }

    #[test]
    fn test_unexpected_response_rejected_by_helpers() {
        let (bridge, _) = make_bridge("PONG");
        assert!(matches!(bridge.set_log(true), Err(BridgeError::Device(r)) if r == "PONG"));
    }

    #[test]
    fn test_ping_returns_response() {
        let (bridge, transport) = make_bridge("  PONG  ");
        assert_eq!(bridge.ping().unwrap(), "PONG");
        assert_eq!(transport.last_line().as_deref(), Some("PING"));
    }

    #[test]
    fn test_timeout_keeps_session_open() {
        let transport = DryRunTransport::silent();
        let bridge = CommandBridge::with_transport(test_config(), Box::new(transport.clone()));

        let err = bridge.ping().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.is_fatal());
        assert!(bridge.is_connected());

        transport.set_response("PONG");
        assert_eq!(bridge.ping().unwrap(), "PONG");
    }

    #[test]
    fn test_no_response_expected() {
        let transport = DryRunTransport::silent();
        let bridge = CommandBridge::with_transport(test_config(), Box::new(transport.clone()));
        let response = bridge
            .send_command(&WireCommand::stop_all(), false, None)
            .unwrap();
        assert_eq!(response, None);
        assert_eq!(transport.last_line().as_deref(), Some("MOTOR ALL STOP"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let never_opened = CommandBridge::new(test_config());
        never_opened.close();
        never_opened.close();

        let (bridge, transport) = make_bridge("OK");
        bridge.close();
        bridge.close();
        assert!(transport.is_closed());
        assert!(!bridge.is_connected());
    }

    #[test]
    fn test_unresolved_port_fails_fast() {
        let bridge = CommandBridge::new(SerialConfig {
            port: "auto".to_string(),
            ..test_config()
        });
        let err = bridge.ping().unwrap_err();
        assert!(matches!(err, BridgeError::PortUnresolved));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!bridge.is_connected());
    }

    #[test]
    fn test_dry_run_opens_lazily() {
        let bridge = CommandBridge::new(SerialConfig {
            dry_run: true,
            ..test_config()
        });
        assert!(!bridge.is_connected());
        assert_eq!(bridge.motor_stop("ALL").unwrap(), "OK");
        assert!(bridge.is_connected());
        bridge.close();
        assert!(!bridge.is_connected());
    }

    /// Fails every write, like an unplugged adapter
    struct BrokenTransport;

    impl Transport for BrokenTransport {
        fn write_line(&mut self, _line: &str) -> TransportResult<()> {
            Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            )))
        }

        fn read_line(
            &mut self,
            _timeout: Duration,
        ) -> TransportResult<Option<String>> {
            Ok(None)
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_transport_failure_drops_session() {
        let bridge = CommandBridge::with_transport(test_config(), Box::new(BrokenTransport));
        let err = bridge.ping().unwrap_err();
        assert!(err.is_fatal());
        assert!(!bridge.is_connected());
    }

    /// Answers each line with "ECHO <line>" after a short delay, so
    /// an interleaved writer would receive someone else's echo.
    #[derive(Default)]
    struct EchoTransport {
        pending: Option<String>,
    }

    impl Transport for EchoTransport {
        fn write_line(&mut self, line: &str) -> TransportResult<()> {
            self.pending = Some(line.to_string());
            Ok(())
        }

        fn read_line(
            &mut self,
            _timeout: Duration,
        ) -> TransportResult<Option<String>> {
            thread::sleep(Duration::from_millis(2));
            Ok(self.pending.take().map(|line| format!("ECHO {}", line)))
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_concurrent_exchanges_never_interleave() {
        let bridge = Arc::new(CommandBridge::with_transport(
            test_config(),
            Box::new(EchoTransport::default()),
        ));

        let handles: Vec<_> = (0..8)
            .map(|channel| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    for pulse in 1000..1010 {
                        let command = WireCommand::servo(channel, pulse).unwrap();
                        let response = bridge.send_command(&command, true, None).unwrap();
                        assert_eq!(response, Some(format!("ECHO {}", command)));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
