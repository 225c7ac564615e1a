// Rotate demo: spin a motor, double the distance travelled, then return to zero
//
// IMPORTANT: Run diagnostic FIRST to verify read-only communication.
//
// Usage: cargo run --example rotate -- <port> [module-id] [axis]
// Example: cargo run --example rotate -- /dev/ttyACM0 1 0
//
// Safety features:
// - Explicit confirmation before any writes
// - Conservative current setting
// - The motor is stopped when a step fails

use std::io::{self, Write};
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use tmcl_host::config::{DEFAULT_BAUDRATE, DEFAULT_HOST_ID, DEFAULT_MODULE_ID};
use tmcl_host::motor::{AxisControl, MotorAxis, STEPPER};
use tmcl_host::tmcl::{Result, SerialTransport};
use tmcl_host::{Board, CommandChannel, TmclInterface};

const VELOCITY: i32 = 51200;
const ACCELERATION: i32 = 51200;
const RUN_CURRENT: i32 = 128;
const RETRIES: usize = 3;

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush().unwrap();
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    input.trim().eq_ignore_ascii_case("y")
}

/// Run `op`, repeating it after a timeout up to `RETRIES` times
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_timeout() && attempt < RETRIES => {
                warn!("{} timed out (attempt {}/{}), retrying", what, attempt, RETRIES);
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn wait_for_position<I: TmclInterface>(motor: &MotorAxis<'_, I>) -> Result<()> {
    while !with_retry("position reached", || motor.position_reached()).await? {
        println!(
            "    target {} actual {}",
            motor.target_position().await?,
            motor.actual_position().await?
        );
        sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}

async fn demo<I: TmclInterface>(motor: &MotorAxis<'_, I>) -> Result<()> {
    println!("Step 1: Preparing drive settings...");
    motor.set_run_current(RUN_CURRENT).await?;
    motor.set_standby_current(0).await?;
    motor.set_max_acceleration(ACCELERATION).await?;
    motor.set_max_velocity(VELOCITY).await?;
    motor.set_actual_position(0).await?;
    println!("  ✓ Current {}, velocity {}, acceleration {}", RUN_CURRENT, VELOCITY, ACCELERATION);
    println!();

    println!("Step 2: Rotating for 5 seconds...");
    motor.rotate(VELOCITY).await?;
    sleep(Duration::from_secs(5)).await;
    motor.stop().await?;
    let travelled = with_retry("actual position", || motor.actual_position()).await?;
    println!("  ✓ Stopped at {}", travelled);
    sleep(Duration::from_secs(2)).await;
    println!();

    println!("Step 3: Doubling the distance travelled...");
    motor.move_by(travelled, None).await?;
    wait_for_position(motor).await?;
    println!("  ✓ Furthest point reached: {}", motor.actual_position().await?);
    sleep(Duration::from_secs(2)).await;
    println!();

    println!("Step 4: Moving back to 0...");
    motor.move_to(0, None).await?;
    wait_for_position(motor).await?;
    println!("  ✓ Reached position {}", motor.actual_position().await?);
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(port) = args.next() else {
        println!("Usage: rotate <port> [module-id] [axis]");
        return Ok(());
    };
    let module_id = match args.next() {
        Some(id) => id.parse()?,
        None => DEFAULT_MODULE_ID,
    };
    let axis: usize = match args.next() {
        Some(axis) => axis.parse()?,
        None => 0,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               TMCL Rotate Demo (WITH WRITES)                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  ⚠  This tool WILL write parameters and move the motor!      ║");
    println!("║  ⚠  Check the run current suits your motor before starting!  ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}", port);
    println!("Module ID: {}, axis: {}", module_id, axis);
    println!();

    if !confirm("Have you run diagnostic first and verified the module responds?") {
        println!("Please run: cargo run --example diagnostic -- {} {}", port, module_id);
        return Ok(());
    }

    if !confirm("Is the motor free to turn?") {
        println!("Aborted.");
        return Ok(());
    }

    println!();
    println!("Opening serial port...");
    let transport = SerialTransport::open_with(&port, DEFAULT_BAUDRATE, Duration::from_secs(1))?;
    let channel = CommandChannel::with_addresses(transport, DEFAULT_HOST_ID, module_id)
        .timeout(Duration::from_secs(1));
    println!("✓ Connected");
    println!();

    let board = Board::module(&channel, module_id, axis + 1, &STEPPER);
    let motor = board.motor(axis)?;

    let result = demo(&motor).await;
    if let Err(e) = &result {
        println!("  ✗ ERROR: {} - stopping motor", e);
        if let Err(e) = motor.stop().await {
            println!("  ✗ Stop failed: {}", e);
        }
    }
    channel.close().await?;
    result?;

    println!();
    println!("✓ Demo complete");
    Ok(())
}
