// Module diagnostic: READ-ONLY check of a TMCL connection
//
// Nothing is written to the module and no motor moves.
// Use this first before running rotate.
//
// Usage: cargo run --example diagnostic -- [port] [module-id]
// Without a port the diagnostic runs against the dummy interface.
// Example: cargo run --example diagnostic -- /dev/ttyACM0 1

use std::time::Duration;

use tmcl_host::config::{DEFAULT_BAUDRATE, DEFAULT_HOST_ID, DEFAULT_MODULE_ID};
use tmcl_host::motor::TMC5130_EVAL;
use tmcl_host::register::tmc5130::Tmc5130;
use tmcl_host::register::RegisterBus;
use tmcl_host::tmcl::SerialTransport;
use tmcl_host::{Board, CommandChannel, DummyInterface, TmclInterface};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let port = std::env::args().nth(1);
    let module_id = match std::env::args().nth(2) {
        Some(id) => id.parse()?,
        None => DEFAULT_MODULE_ID,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              TMCL Module Diagnostic (READ-ONLY)              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS from the module - no writes, no motion ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    match port {
        Some(port) => {
            println!("Serial port: {}", port);
            println!("Module ID: {}", module_id);
            println!();

            println!("Step 1: Opening serial port...");
            let transport =
                match SerialTransport::open_with(&port, DEFAULT_BAUDRATE, Duration::from_secs(1)) {
                    Ok(transport) => {
                        println!("  ✓ Serial port opened successfully");
                        transport
                    }
                    Err(e) => {
                        println!("  ✗ Failed to open serial port: {}", e);
                        println!();
                        println!("Available ports:");
                        for name in SerialTransport::available().unwrap_or_default() {
                            println!("  - {}", name);
                        }
                        return Err(e.into());
                    }
                };
            let channel = CommandChannel::with_addresses(transport, DEFAULT_HOST_ID, module_id)
                .timeout(Duration::from_secs(1));
            let result = diagnose(&channel, module_id).await;
            channel.close().await?;
            result
        }
        None => {
            println!("No port given: using the dummy interface (every value reads 0)");
            println!();
            println!("Step 1: Opening dummy interface...");
            println!("  ✓ Ready");
            let dummy = DummyInterface::with_addresses(DEFAULT_HOST_ID, module_id);
            let result = diagnose(&dummy, module_id).await;
            dummy.close().await?;
            result
        }
    }
}

async fn diagnose<I: TmclInterface>(
    interface: &I,
    module_id: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let board = Board::eval(interface, module_id, &TMC5130_EVAL, RegisterBus::MotionController);
    println!();

    println!("Step 2: Reading firmware version...");
    match board.firmware_version().await {
        Ok(version) => println!("  ✓ Firmware {}", version),
        Err(e) => {
            println!("  ✗ ERROR: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the module ID matches the module's address setting");
            println!("  - Verify the baud rate ({})", DEFAULT_BAUDRATE);
            println!("  - Verify the module is powered");
            return Err(e.into());
        }
    }
    println!();

    println!("Step 3: Reading axis parameters...");
    let motor = board.motor(0)?;
    println!("  Actual position:  {}", motor.actual_position().await?);
    println!("  Target position:  {}", motor.target_position().await?);
    println!("  Actual velocity:  {}", motor.actual_velocity().await?);
    println!("  Max velocity:     {}", motor.max_velocity().await?);
    println!("  Max acceleration: {}", motor.max_acceleration().await?);
    println!("  Run current:      {}", motor.run_current().await?);
    println!("  Standby current:  {}", motor.standby_current().await?);
    if let Some(flags) = motor.status_flags().await? {
        println!("  Status flags:     0x{:08X}", flags);
    }
    if let Some(flags) = motor.error_flags().await? {
        println!("  Error flags:      0x{:08X}", flags);
    }
    println!("  Position reached: {}", motor.position_reached().await?);
    println!();

    println!("Step 4: Reading chip registers...");
    let Some(registers) = board.registers() else {
        println!("  - Board has no register access");
        return Ok(());
    };
    let chip = Tmc5130::new(registers);
    println!("  IRUN:  {}", chip.run_current().await?);
    println!("  IHOLD: {}", chip.hold_current().await?);
    match chip.microstep_resolution().await? {
        Some(resolution) => println!("  Microsteps: {}", resolution.microsteps()),
        None => println!("  Microsteps: reserved MRES value"),
    }
    println!("  SGT:   {}", chip.stallguard_threshold().await?);
    println!("  XACTUAL: {}", chip.actual_position().await?);
    println!("  VACTUAL: {}", chip.actual_velocity().await?);
    println!();

    println!("✓ Diagnostic complete");
    Ok(())
}
