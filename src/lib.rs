// Cheddar robot control bridge
//
// Translates control intents (network messages or a local gamepad) into the
// MotionDriver serial line protocol.

pub mod channel;
pub mod config;
pub mod messages;
pub mod motor;
pub mod router;
pub mod runtime;
pub mod teleop;
