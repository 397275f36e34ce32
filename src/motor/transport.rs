// Line transports for the MotionDriver link
//
// `SerialTransport` talks to the board over a real serial port.
// `DryRunTransport` keeps everything in memory for tests and --dry-run.

use serialport::{self, SerialPort};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Error types for the physical link
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Capability shared by every link to the board
pub trait Transport: Send {
    /// Write `line` followed by exactly one newline
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read one line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time; the line is trimmed.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Release the link. Calling it again is a no-op.
    fn close(&mut self);
}

/// Transport backed by a serial port
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open the port; `timeout` is the default read timeout of the device
    pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate).timeout(timeout).open()?;
        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let port = self.port_mut()?;
        let payload = format!("{}\n", line.trim_end_matches(['\r', '\n']));
        port.write_all(payload.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let port = self.port_mut()?;
        read_line_with_timeout(port, timeout)
    }

    fn close(&mut self) {
        if let Some(port) = self.port.take() {
            debug!("Closing serial port {}", self.name);
            drop(port);
        }
    }
}

/// A byte reader whose blocking read timeout can be changed between reads
trait TimedReader: Read {
    fn timeout(&self) -> Duration;
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}

impl TimedReader for Box<dyn SerialPort> {
    fn timeout(&self) -> Duration {
        SerialPort::timeout(&**self)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        SerialPort::set_timeout(&mut **self, timeout)?;
        Ok(())
    }
}

/// Read one line within `timeout`, then put the device timeout back.
///
/// The original timeout is restored on every path, errors included.
fn read_line_with_timeout<R: TimedReader + ?Sized>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Option<String>> {
    let original = reader.timeout();
    let raw = read_until_newline(reader, Instant::now() + timeout);
    let restored = reader.set_timeout(original);
    let raw = raw?;
    restored?;

    Ok(decode_line(&raw))
}

/// Read bytes up to (not including) a newline, or until `deadline` passes.
///
/// Each read may only block for the time left, so the whole line is bounded
/// by the deadline. A read timeout ends the line early; whatever arrived so
/// far is returned.
fn read_until_newline<R: TimedReader + ?Sized>(
    reader: &mut R,
    deadline: Instant,
) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        reader.set_timeout(remaining)?;

        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(line)
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if raw.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug)]
struct DryRunState {
    last_line: Option<String>,
    written: Vec<String>,
    canned_response: Option<String>,
    closed: bool,
}

/// In-memory transport: records what is written and answers every read with a
/// canned response (`OK` unless told otherwise).
///
/// Clones share state, so a test can keep a handle after giving the transport
/// to a bridge.
#[derive(Debug, Clone)]
pub struct DryRunTransport {
    state: Arc<Mutex<DryRunState>>,
}

impl Default for DryRunTransport {
    fn default() -> Self {
        Self::with_response("OK")
    }
}

impl DryRunTransport {
    pub fn with_response(response: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(DryRunState {
                last_line: None,
                written: Vec::new(),
                canned_response: Some(response.to_string()),
                closed: false,
            })),
        }
    }

    /// A transport that never answers, for exercising timeouts
    pub fn silent() -> Self {
        let transport = Self::default();
        transport.lock().canned_response = None;
        transport
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DryRunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_line(&self) -> Option<String> {
        self.lock().last_line.clone()
    }

    /// Every line written so far, oldest first
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn set_response(&self, response: &str) {
        self.lock().canned_response = Some(response.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Transport for DryRunTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        debug!("DryRunTransport wrote line: {}", line);
        let mut state = self.lock();
        state.written.push(line.clone());
        state.last_line = Some(line);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>> {
        let response = self.lock().canned_response.clone();
        debug!("DryRunTransport returning canned response: {:?}", response);
        Ok(response)
    }

    fn close(&mut self) {
        debug!("DryRunTransport close() called");
        self.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ORIGINAL: Duration = Duration::from_secs(5);

    /// In-memory port: yields its bytes, then times out or fails
    struct FakePort {
        data: Cursor<Vec<u8>>,
        timeout: Duration,
        timeouts_set: Vec<Duration>,
        fail_with: Option<io::ErrorKind>,
    }

    impl FakePort {
        fn new(data: &[u8]) -> Self {
            Self {
                data: Cursor::new(data.to_vec()),
                timeout: ORIGINAL,
                timeouts_set: Vec::new(),
                fail_with: None,
            }
        }

        fn failing(kind: io::ErrorKind) -> Self {
            Self {
                fail_with: Some(kind),
                ..Self::new(b"")
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail_with {
                return Err(io::Error::new(kind, "unplugged"));
            }
            match self.data.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
                n => Ok(n),
            }
        }
    }

    impl TimedReader for FakePort {
        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeouts_set.push(timeout);
            self.timeout = timeout;
            Ok(())
        }
    }

    #[test]
    fn test_reads_stop_at_newline() {
        let mut port = FakePort::new(b"OK\r\nPONG\n");
        let timeout = Duration::from_secs(1);
        assert_eq!(read_line_with_timeout(&mut port, timeout).unwrap().as_deref(), Some("OK"));
        assert_eq!(read_line_with_timeout(&mut port, timeout).unwrap().as_deref(), Some("PONG"));
        assert_eq!(port.timeout, ORIGINAL);
    }

    #[test]
    fn test_timeout_returns_none_and_restores() {
        let mut port = FakePort::new(b"");
        let line = read_line_with_timeout(&mut port, Duration::from_millis(10)).unwrap();
        assert_eq!(line, None);
        assert_eq!(port.timeout, ORIGINAL);
    }

    #[test]
    fn test_partial_line_returned_on_timeout() {
        let mut port = FakePort::new(b"  ERR Servo");
        let line = read_line_with_timeout(&mut port, Duration::from_millis(10)).unwrap();
        assert_eq!(line.as_deref(), Some("ERR Servo"));
        assert_eq!(port.timeout, ORIGINAL);
    }

    #[test]
    fn test_io_error_propagates_and_restores() {
        let mut port = FakePort::failing(io::ErrorKind::BrokenPipe);
        let err = read_line_with_timeout(&mut port, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, TransportError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(port.timeout, ORIGINAL);
    }

    #[test]
    fn test_each_read_bounded_by_remaining_time() {
        let mut port = FakePort::new(b"PONG\n");
        let timeout = Duration::from_millis(200);
        read_line_with_timeout(&mut port, timeout).unwrap();

        // Every per-read timeout fits in what is left, then the original comes back
        let (restore, per_read) = port.timeouts_set.split_last().unwrap();
        assert_eq!(*restore, ORIGINAL);
        assert_eq!(per_read.len(), 5);
        assert!(per_read.iter().all(|t| *t <= timeout));
        assert!(per_read.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_expired_deadline_reads_nothing() {
        let mut port = FakePort::new(b"OK\n");
        let line = read_until_newline(&mut port, Instant::now()).unwrap();
        assert!(line.is_empty());
        assert!(port.timeouts_set.is_empty());
    }

    #[test]
    fn test_dry_run_records_and_answers() {
        let handle = DryRunTransport::with_response("PONG");
        let mut transport = handle.clone();

        transport.write_line("PING\n").unwrap();
        assert_eq!(handle.last_line().as_deref(), Some("PING"));
        assert_eq!(
            transport.read_line(Duration::from_millis(1)).unwrap().as_deref(),
            Some("PONG")
        );

        transport.write_line("LOG ON").unwrap();
        assert_eq!(handle.written(), vec!["PING", "LOG ON"]);
    }

    #[test]
    fn test_dry_run_close_is_idempotent() {
        let handle = DryRunTransport::default();
        let mut transport = handle.clone();
        transport.close();
        transport.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_silent_transport_never_answers() {
        let mut transport = DryRunTransport::silent();
        assert_eq!(transport.read_line(Duration::from_millis(1)).unwrap(), None);
    }
}
