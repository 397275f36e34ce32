// 50 Hz control loop with deadman watchdog
// Note: the deadman stops the robot if the client goes quiet (tab closed, network
// drop) instead of letting it drive on the last command.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::channel::{ChannelEvent, ControlChannel};
use crate::config::{DEADMAN_TIMEOUT, LOOP_HZ, TOPIC_CONTROL_RX, TOPIC_CONTROL_TX, TOPIC_HEALTH};
use crate::messages::{OutgoingMessage, RuntimeHealth, now_millis};
use crate::motor::CommandBridge;
use crate::router;

pub struct Runtime {
    bridge: Arc<CommandBridge>,
    channel: ControlChannel,
    last_message_at: Option<Instant>,
    deadman_timeout: Duration,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(bridge: Arc<CommandBridge>) -> Self {
        Self::with_deadman(bridge, DEADMAN_TIMEOUT)
    }

    pub fn with_deadman(bridge: Arc<CommandBridge>, deadman_timeout: Duration) -> Self {
        let mut channel = ControlChannel::new("control");

        let route_bridge = Arc::clone(&bridge);
        channel.set_command_callback(move |cmd| {
            let report = router::dispatch(&route_bridge, &cmd);
            if report.has_fatal() {
                error!("Lost the MotionDriver link while routing {:?}", cmd.kind);
            }
        });

        let probe_bridge = Arc::clone(&bridge);
        channel.set_link_probe(move || probe_bridge.is_connected());

        Self {
            bridge,
            channel,
            last_message_at: None,
            deadman_timeout,
            health: RuntimeHealth::CmdStale, // Start stale until first message
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process one incoming text message
    pub fn on_message(&mut self, text: String, now: Instant) -> Vec<OutgoingMessage> {
        self.last_message_at = Some(now);
        self.channel.handle(ChannelEvent::Message(text), now_millis())
    }

    /// Run the deadman check and refresh health
    pub fn tick(&mut self, now: Instant) -> RuntimeHealth {
        let stale = self
            .last_message_at
            .is_none_or(|at| now.duration_since(at) > self.deadman_timeout);

        if stale && self.channel.is_open() {
            warn!(
                "No control message for {:?}, closing channel",
                self.deadman_timeout
            );
            self.channel.handle(ChannelEvent::Close, now_millis());
        }

        self.health = if stale {
            RuntimeHealth::CmdStale
        } else if !self.bridge.is_connected() {
            RuntimeHealth::SerialDown
        } else {
            RuntimeHealth::Ok
        };
        self.health
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the networked control loop until Ctrl-C or a fatal error.
///
/// The motors are stopped and the bridge closed however the loop ends.
pub async fn run(bridge: Arc<CommandBridge>) -> Result<(), BoxError> {
    let result = control_loop(&bridge).await;
    if let Err(e) = &result {
        error!("Control loop failed: {}", e);
    }
    tokio::task::block_in_place(|| shutdown(&bridge));
    result
}

/// Best-effort `MOTOR ALL STOP`, then close the session
pub fn shutdown(bridge: &CommandBridge) {
    info!("Final STOP and closing");
    if let Err(e) = bridge.stop_all() {
        warn!("Final stop failed: {}", e);
    }
    bridge.close();
}

async fn control_loop(bridge: &Arc<CommandBridge>) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CONTROL_RX).await?;
    let pub_control = session.declare_publisher(TOPIC_CONTROL_TX).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    // Verify the board before accepting commands; failure is not fatal,
    // the bridge reconnects on the next command.
    match tokio::task::block_in_place(|| bridge.ping()) {
        Ok(reply) => info!("MotionDriver responded to PING: {}", reply),
        Err(e) => warn!("MotionDriver PING failed: {}", e),
    }

    let mut runtime = Runtime::new(Arc::clone(bridge));
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms deadman timeout",
        LOOP_HZ,
        DEADMAN_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CONTROL_RX);
    info!("Publishing to: {}, {}", TOPIC_CONTROL_TX, TOPIC_HEALTH);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain all pending messages (non-blocking); routing blocks on serial I/O
        let mut replies = Vec::new();
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match std::str::from_utf8(&payload) {
                Ok(text) => {
                    let text = text.to_string();
                    replies.extend(tokio::task::block_in_place(|| {
                        runtime.on_message(text, Instant::now())
                    }));
                }
                Err(e) => warn!("Dropping non-UTF-8 control message: {}", e),
            }
        }

        // 2. Deadman check (may stop the motors)
        let health = tokio::task::block_in_place(|| runtime.tick(Instant::now()));

        // 3. Publish replies
        for reply in replies {
            pub_control.put(serde_json::to_string(&reply)?).await?;
        }

        // 4. Publish health
        pub_health.put(serde_json::to_string(&health)?).await?;
    }

    Ok(())
}
