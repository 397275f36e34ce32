// Motor control module for the Cheddar six-wheel base
//
// Provides:
// - Stick conditioning and differential drive mixing
// - MotionDriver line protocol (validated wire commands)
// - Serial and dry-run transports
// - Command bridge owning the transport session

pub mod axis;
mod bridge;
pub mod mixing;
pub mod protocol;
pub mod transport;

pub use bridge::{BridgeError, CommandBridge, ErrorKind};
pub use mixing::{DriveCommand, compute_drive, differential_mix};
pub use protocol::{Direction, MotorTarget, ProtocolError, WireCommand};
pub use transport::{DryRunTransport, SerialTransport, Transport, TransportError};
