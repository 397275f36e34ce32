use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cheddar_bridge::config::{SerialConfig, TELEOP_RATE_HZ, TELEOP_TIMEOUT_SECS, parse_deadzone};
use cheddar_bridge::motor::CommandBridge;
use cheddar_bridge::motor::mixing::DEFAULT_DEADZONE;
use cheddar_bridge::teleop::{self, GilrsSource, TeleopConfig};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "cheddar-bridge", about = "Cheddar robot MotionDriver bridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the networked control runtime
    Serve {
        #[command(flatten)]
        serial: SerialConfig,
    },
    /// Drive the robot with a local gamepad
    Teleop {
        #[command(flatten)]
        serial: SerialConfig,

        /// Axis deadzone, in [0.0, 1.0)
        #[arg(long, default_value_t = DEFAULT_DEADZONE, value_parser = parse_deadzone)]
        deadzone: f32,

        /// Command send rate (Hz)
        #[arg(long, default_value_t = TELEOP_RATE_HZ)]
        rate: f64,
    },
    /// Send a single command to the MotionDriver
    Cmd {
        #[command(flatten)]
        serial: SerialConfig,

        #[command(subcommand)]
        action: CmdAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(Subcommand)]
enum CmdAction {
    /// PING the board
    Ping,
    /// Set a servo pulse width
    Servo { channel: i64, pulse_us: i64 },
    /// Run motor(s) in a direction
    MotorRun {
        target: String,
        direction: String,
        speed: Option<f32>,
    },
    /// Start motor(s) at the last speed
    MotorStart { target: String },
    /// Stop motor(s)
    MotorStop { target: String },
    /// Enable or disable servo sweep
    Sweep { state: Toggle, range: Option<String> },
    /// Enable or disable board-side logging
    Log { state: Toggle },
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init(); // installs the subscriber globally

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    match cli.command {
        Command::Serve { serial } => {
            let bridge = Arc::new(CommandBridge::new(serial));
            cheddar_bridge::runtime::run(bridge).await
        }
        Command::Teleop {
            serial,
            deadzone,
            rate,
        } => {
            let serial = serial.with_default_timeout(TELEOP_TIMEOUT_SECS);
            let config = TeleopConfig {
                deadzone,
                rate_hz: rate,
            };

            let stop = Arc::new(AtomicBool::new(false));
            let ctrl_c_stop = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("SIGINT received, stopping...");
                    ctrl_c_stop.store(true, Ordering::Relaxed);
                }
            });

            tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
                let bridge = CommandBridge::new(serial);
                // gilrs errors can carry the backend context, which is not Sync
                let mut source = GilrsSource::new().map_err(|e| e.to_string())?;
                teleop::run(&bridge, &mut source, &config, stop)?;
                Ok(())
            })
            .await?
        }
        Command::Cmd { serial, action } => {
            tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
                let bridge = CommandBridge::new(serial);
                let result = run_cmd(&bridge, action);
                bridge.close();
                println!("{}", result?);
                Ok(())
            })
            .await?
        }
    }
}

fn run_cmd(
    bridge: &CommandBridge,
    action: CmdAction,
) -> Result<String, cheddar_bridge::motor::BridgeError> {
    match action {
        CmdAction::Ping => bridge.ping(),
        CmdAction::Servo { channel, pulse_us } => bridge.set_servo(channel, pulse_us),
        CmdAction::MotorRun {
            target,
            direction,
            speed,
        } => bridge.motor_run(&target, &direction, speed),
        CmdAction::MotorStart { target } => bridge.motor_start(&target),
        CmdAction::MotorStop { target } => bridge.motor_stop(&target),
        CmdAction::Sweep { state, range } => bridge.set_sweep(state.enabled(), range.as_deref()),
        CmdAction::Log { state } => bridge.set_log(state.enabled()),
    }
}
