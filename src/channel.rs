// Control data channel handling
//
// Consumes lifecycle events and text messages from whatever carries the
// client's control channel, answers pings, and hands every decoded
// ControlCommand to a registered callback.

use tracing::{debug, error, info, warn};

use crate::messages::{CommandKind, ControlCommand, OutgoingMessage};

/// Events raised by the channel carrier
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Close,
}

pub type CommandCallback = Box<dyn FnMut(ControlCommand) + Send>;

/// Per-connection state of the control channel
pub struct ControlChannel {
    label: String,
    open: bool,
    on_command: Option<CommandCallback>,
    serial_connected: Box<dyn Fn() -> bool + Send>,
}

impl ControlChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: false,
            on_command: None,
            serial_connected: Box::new(|| false),
        }
    }

    /// Register the callback invoked once per decoded command
    pub fn set_command_callback(&mut self, callback: impl FnMut(ControlCommand) + Send + 'static) {
        self.on_command = Some(Box::new(callback));
    }

    /// Probe reported in telemetry as `serial_connected`
    pub fn set_link_probe(&mut self, probe: impl Fn() -> bool + Send + 'static) {
        self.serial_connected = Box::new(probe);
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Handle one event; returns the messages to send back, in order.
    ///
    /// `now_ms` is the server clock in Unix milliseconds.
    pub fn handle(&mut self, event: ChannelEvent, now_ms: f64) -> Vec<OutgoingMessage> {
        match event {
            ChannelEvent::Open => self.on_open(now_ms),
            ChannelEvent::Message(text) => {
                let mut replies = Vec::new();
                if !self.open {
                    replies.extend(self.on_open(now_ms));
                }
                replies.extend(self.on_message(&text, now_ms));
                replies
            }
            ChannelEvent::Close => {
                self.on_close(now_ms);
                Vec::new()
            }
        }
    }

    fn on_open(&mut self, now_ms: f64) -> Vec<OutgoingMessage> {
        if self.open {
            return Vec::new();
        }
        self.open = true;
        info!("Control channel '{}' opened", self.label);
        vec![OutgoingMessage::Telemetry {
            timestamp: now_ms,
            serial_connected: (self.serial_connected)(),
        }]
    }

    fn on_message(&mut self, text: &str, now_ms: f64) -> Option<OutgoingMessage> {
        let command: ControlCommand = match serde_json::from_str(text) {
            Ok(command) => command,
            Err(e) => {
                error!("Invalid control message: {}", e);
                return None;
            }
        };
        debug!("Received message: {:?}", command);

        if command.kind == CommandKind::Ping {
            return Some(OutgoingMessage::Pong {
                timestamp: now_ms,
                latency_ms: now_ms - command.timestamp,
            });
        }

        info!("Control command: {:?}", command.kind);
        self.deliver(command);
        None
    }

    fn on_close(&mut self, now_ms: f64) {
        if !self.open {
            return;
        }
        self.open = false;
        warn!("Control channel '{}' closed, stopping motors", self.label);
        self.deliver(ControlCommand::stop(now_ms));
    }

    fn deliver(&mut self, command: ControlCommand) {
        match self.on_command.as_mut() {
            Some(callback) => callback(command),
            None => warn!("No command callback registered; dropping {:?}", command.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn channel_with_sink() -> (ControlChannel, Arc<Mutex<Vec<ControlCommand>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut channel = ControlChannel::new("control");
        let captured = Arc::clone(&sink);
        channel.set_command_callback(move |cmd| captured.lock().unwrap().push(cmd));
        (channel, sink)
    }

    #[test]
    fn test_open_sends_telemetry_once() {
        let (mut channel, _) = channel_with_sink();
        channel.set_link_probe(|| true);

        let replies = channel.handle(ChannelEvent::Open, 100.0);
        assert_eq!(
            replies,
            vec![OutgoingMessage::Telemetry {
                timestamp: 100.0,
                serial_connected: true
            }]
        );
        assert!(channel.handle(ChannelEvent::Open, 101.0).is_empty());
    }

    #[test]
    fn test_first_message_implies_open() {
        let (mut channel, sink) = channel_with_sink();
        let replies = channel.handle(
            ChannelEvent::Message(r#"{"type":"motor","motors":[0.5]}"#.to_string()),
            5.0,
        );
        assert!(channel.is_open());
        assert!(matches!(replies[..], [OutgoingMessage::Telemetry { .. }]));
        assert_eq!(sink.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_ping_answered_with_latency() {
        let (mut channel, sink) = channel_with_sink();
        channel.handle(ChannelEvent::Open, 0.0);

        let replies = channel.handle(
            ChannelEvent::Message(r#"{"type":"ping","timestamp":1000.0}"#.to_string()),
            1012.5,
        );
        assert_eq!(
            replies,
            vec![OutgoingMessage::Pong {
                timestamp: 1012.5,
                latency_ms: 12.5
            }]
        );
        assert!(sink.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_json_is_dropped() {
        let (mut channel, sink) = channel_with_sink();
        channel.handle(ChannelEvent::Open, 0.0);
        assert!(
            channel
                .handle(ChannelEvent::Message("{not json".to_string()), 1.0)
                .is_empty()
        );
        assert!(
            channel
                .handle(ChannelEvent::Message(r#"{"type":"fly"}"#.to_string()), 1.0)
                .is_empty()
        );
        assert!(sink.lock().unwrap().is_empty());
    }

    #[test]
    fn test_close_synthesizes_stop_once() {
        let (mut channel, sink) = channel_with_sink();
        channel.handle(ChannelEvent::Close, 0.0);
        assert!(sink.lock().unwrap().is_empty());

        channel.handle(ChannelEvent::Open, 0.0);
        channel.handle(ChannelEvent::Close, 7.0);
        channel.handle(ChannelEvent::Close, 8.0);

        let commands = sink.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].is_stop());
        assert!(!channel.is_open());
    }
}
