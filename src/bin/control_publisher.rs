// Keyboard control client: W/S throttle, A/D turn, R/F speed, Space stop, P ping, Q quit
use cheddar_bridge::config::{TOPIC_CONTROL_RX, TOPIC_CONTROL_TX};
use cheddar_bridge::messages::{CommandKind, ControlCommand, OutgoingMessage, now_millis};
use cheddar_bridge::motor::compute_drive;
use cheddar_bridge::motor::mixing::DEFAULT_DEADZONE;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SPEEDS: [f32; 3] = [0.3, 0.6, 1.0]; // drive scale per speed level
const INPUT_TIMEOUT_MS: u64 = 100; // Reset throttle/turn after this much time with no input

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CONTROL_RX).await?;
    let replies = session.declare_subscriber(TOPIC_CONTROL_TX).await?;

    info!("Controls: W/S=throttle, A/D=turn, R/F=speed, Space=stop, P=ping, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_keyboard(&publisher, &replies).await;
    disable_raw_mode()?;

    // Leave the robot stopped
    publisher
        .put(serde_json::to_string(&ControlCommand::stop(now_millis()))?)
        .await?;

    result
}

async fn run_keyboard(
    publisher: &zenoh::pubsub::Publisher<'_>,
    replies: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;

    let mut throttle = 0.0;
    let mut turn = 0.0;
    let mut last_movement_input = Instant::now();

    loop {
        let mut outgoing = None;

        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        throttle = 1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        throttle = -1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        turn = 1.0;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        turn = -1.0;
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char(' ') if pressed => {
                        throttle = 0.0;
                        turn = 0.0;
                        outgoing = Some(ControlCommand::stop(now_millis()));
                    }
                    KeyCode::Char('p') if pressed => {
                        outgoing = Some(ControlCommand::new(CommandKind::Ping, now_millis()));
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            throttle = 0.0;
            turn = 0.0;
        }

        // Always publish at ~50Hz; it keeps the runtime's deadman fed
        let cmd = outgoing.unwrap_or_else(|| {
            let drive = compute_drive(throttle, turn, DEFAULT_DEADZONE).scaled(SPEEDS[speed_idx]);
            ControlCommand::motors(drive.as_motor_speeds().to_vec(), now_millis())
        });
        publisher.put(serde_json::to_string(&cmd)?).await?;

        while let Ok(Some(sample)) = replies.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OutgoingMessage>(&payload) {
                Ok(OutgoingMessage::Pong { latency_ms, .. }) => {
                    info!("Pong: {:.1}ms one-way", latency_ms)
                }
                Ok(OutgoingMessage::Telemetry {
                    serial_connected, ..
                }) => info!("Telemetry: serial_connected={}", serial_connected),
                Err(e) => warn!("Unreadable reply: {}", e),
            }
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
