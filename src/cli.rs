// Command-line interface: one TMCL operation per invocation
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tracing::{info, warn};

use tmcl_host::config::ConnectionConfig;
use tmcl_host::register::{BoardRegisters, Field, RegisterAccess, RegisterBus};
use tmcl_host::tmcl::{
    CommandChannel, DummyInterface, Request, SerialTransport, StreamPort, TmclInterface,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Parser)]
#[command(name = "tmcl", version, about = "Drive TMCL motor modules over serial or TCP")]
pub struct Cli {
    /// Serial port of the module
    #[arg(long, env = "TMCL_PORT", global = true)]
    port: Option<String>,

    /// host:port of a TMCL-over-TCP bridge
    #[arg(long, env = "TMCL_TCP", global = true, conflicts_with = "port")]
    tcp: Option<String>,

    /// Answer every command locally with zero, without any hardware
    #[arg(long, global = true)]
    dummy: bool,

    /// JSON file with connection settings
    #[arg(long, short = 'c', env = "TMCL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    baudrate: Option<u32>,

    #[arg(long, global = true)]
    host_id: Option<u8>,

    #[arg(long, global = true)]
    module_id: Option<u8>,

    /// Reply timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log every frame
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Bus {
    Mc,
    Drv,
}

impl From<Bus> for RegisterBus {
    fn from(bus: Bus) -> Self {
        match bus {
            Bus::Mc => RegisterBus::MotionController,
            Bus::Drv => RegisterBus::Driver,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// List serial ports
    Ports,
    /// Read the firmware version
    Version,
    /// Get axis parameter
    Gap {
        parameter: u8,
        #[arg(default_value_t = 0)]
        axis: u8,
        #[arg(long)]
        signed: bool,
    },
    /// Set axis parameter
    Sap {
        parameter: u8,
        axis: u8,
        #[arg(allow_hyphen_values = true, value_parser = parse_i32)]
        value: i32,
    },
    /// Get global parameter
    Ggp {
        parameter: u8,
        #[arg(default_value_t = 0)]
        bank: u8,
        #[arg(long)]
        signed: bool,
    },
    /// Set global parameter
    Sgp {
        parameter: u8,
        bank: u8,
        #[arg(allow_hyphen_values = true, value_parser = parse_i32)]
        value: i32,
    },
    /// Rotate a motor; negative velocity turns the other way
    Rotate {
        axis: u8,
        #[arg(allow_hyphen_values = true)]
        velocity: i32,
    },
    /// Stop a motor
    Stop { axis: u8 },
    /// Move a motor to an absolute position
    MoveTo {
        axis: u8,
        #[arg(allow_hyphen_values = true)]
        position: i32,
    },
    /// Read a chip register of an evaluation board
    ReadReg {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(long, value_enum, default_value = "mc")]
        bus: Bus,
    },
    /// Write a chip register of an evaluation board
    WriteReg {
        #[arg(value_parser = parse_u8)]
        address: u8,
        #[arg(value_parser = parse_u32)]
        value: u32,
        #[arg(long, value_enum, default_value = "mc")]
        bus: Bus,
    },
    /// Read a bit field of a chip register
    ReadField {
        #[arg(value_parser = parse_u8)]
        address: u8,
        offset: u8,
        width: u8,
        #[arg(long)]
        signed: bool,
        #[arg(long, value_enum, default_value = "mc")]
        bus: Bus,
    },
    /// Read-modify-write a bit field of a chip register
    WriteField {
        #[arg(value_parser = parse_u8)]
        address: u8,
        offset: u8,
        width: u8,
        #[arg(allow_hyphen_values = true, value_parser = parse_i64)]
        value: i64,
        #[arg(long, value_enum, default_value = "mc")]
        bus: Bus,
    },
    /// Send a raw command
    Exec {
        command: u8,
        #[arg(default_value_t = 0)]
        kind: u8,
        #[arg(default_value_t = 0)]
        motor: u8,
        #[arg(default_value_t = 0, allow_hyphen_values = true, value_parser = parse_i32)]
        value: i32,
    },
}

/// Integers in decimal or 0x-prefixed hex
fn parse_int(s: &str) -> Result<i64, String> {
    let (digits, negative) = match s.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (s, false),
    };
    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|e| format!("invalid number '{}': {}", s, e))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_int(s)?).map_err(|_| format!("'{}' does not fit in a byte", s))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    u32::try_from(parse_int(s)?).map_err(|_| format!("'{}' does not fit in 32 bits", s))
}

fn parse_i32(s: &str) -> Result<i32, String> {
    // Accept both signed values and unsigned 32-bit patterns
    let value = parse_int(s)?;
    if value > u32::MAX as i64 || value < i32::MIN as i64 {
        return Err(format!("'{}' does not fit in 32 bits", s));
    }
    Ok(value as i32)
}

fn parse_i64(s: &str) -> Result<i64, String> {
    parse_int(s)
}

impl Cli {
    /// File settings with command-line overrides applied
    fn connection(&self) -> Result<ConnectionConfig, BoxError> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::load(path)?,
            None => ConnectionConfig::default(),
        };
        if self.port.is_some() {
            config.port = self.port.clone();
            config.tcp = None;
        }
        if self.tcp.is_some() {
            config.tcp = self.tcp.clone();
            config.port = None;
        }
        if let Some(baudrate) = self.baudrate {
            config.baudrate = baudrate;
        }
        if let Some(host_id) = self.host_id {
            config.host_id = host_id;
        }
        if let Some(module_id) = self.module_id {
            config.module_id = module_id;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        config.debug |= self.debug;
        Ok(config)
    }
}

/// Result of one command, printable as text or JSON
struct Report {
    text: String,
    json: Value,
}

impl Report {
    fn done(what: &str) -> Self {
        Self {
            text: format!("{} ok", what),
            json: json!({ "ok": true }),
        }
    }

    fn value(value: i64, json: Value) -> Self {
        Self {
            text: value.to_string(),
            json,
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), BoxError> {
    if let Cmd::Ports = cli.command {
        for name in SerialTransport::available()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = cli.connection()?;

    let report = if cli.dummy {
        let interface = DummyInterface::with_addresses(config.host_id, config.module_id);
        run_and_close(&interface, &cli.command).await?
    } else if let Some(address) = &config.tcp {
        info!("Connecting to TMCL bridge at {}", address);
        let stream = TcpStream::connect(address).await?;
        let channel =
            CommandChannel::with_addresses(StreamPort::new(stream), config.host_id, config.module_id)
                .timeout(config.timeout())
                .debug(config.debug);
        run_and_close(&channel, &cli.command).await?
    } else if let Some(port) = &config.port {
        info!("Opening {} at {} baud", port, config.baudrate);
        let transport = SerialTransport::open_with(port, config.baudrate, config.timeout())?;
        let channel =
            CommandChannel::with_addresses(transport, config.host_id, config.module_id)
                .timeout(config.timeout())
                .debug(config.debug);
        run_and_close(&channel, &cli.command).await?
    } else {
        return Err("no transport: pass --port, --tcp or --dummy".into());
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report.json)?);
    } else {
        println!("{}", report.text);
    }
    Ok(())
}

/// Run the command, then release the interface whatever the outcome.
/// A failed command reports its own error; a close failure is only logged then.
async fn run_and_close<I: TmclInterface>(interface: &I, command: &Cmd) -> Result<Report, BoxError> {
    let result = execute(interface, command).await;
    match interface.close().await {
        Ok(()) => result,
        Err(close_error) if result.is_err() => {
            warn!("Closing the interface failed: {}", close_error);
            result
        }
        Err(close_error) => Err(close_error.into()),
    }
}

async fn execute<I: TmclInterface>(interface: &I, command: &Cmd) -> Result<Report, BoxError> {
    let module = interface.module_id();

    let report = match *command {
        Cmd::Ports => unreachable!("handled before a transport is opened"),
        Cmd::Version => {
            let version = interface.get_firmware_version(module).await?;
            Report {
                text: version.to_string(),
                json: serde_json::to_value(version)?,
            }
        }
        Cmd::Gap {
            parameter,
            axis,
            signed,
        } => {
            let value = interface
                .get_axis_parameter(module, parameter, axis, signed)
                .await?;
            Report::value(
                value,
                json!({ "parameter": parameter, "axis": axis, "value": value }),
            )
        }
        Cmd::Sap {
            parameter,
            axis,
            value,
        } => {
            interface
                .set_axis_parameter(module, parameter, axis, value)
                .await?;
            Report::done("sap")
        }
        Cmd::Ggp {
            parameter,
            bank,
            signed,
        } => {
            let value = interface
                .get_global_parameter(module, parameter, bank, signed)
                .await?;
            Report::value(
                value,
                json!({ "parameter": parameter, "bank": bank, "value": value }),
            )
        }
        Cmd::Sgp {
            parameter,
            bank,
            value,
        } => {
            interface
                .set_global_parameter(module, parameter, bank, value)
                .await?;
            Report::done("sgp")
        }
        Cmd::Rotate { axis, velocity } => {
            interface.rotate(module, axis, velocity).await?;
            Report::done("rotate")
        }
        Cmd::Stop { axis } => {
            interface.stop(module, axis).await?;
            Report::done("stop")
        }
        Cmd::MoveTo { axis, position } => {
            interface.move_to(module, axis, position).await?;
            Report::done("move-to")
        }
        Cmd::ReadReg { address, bus } => {
            let registers = BoardRegisters::new(interface, module, bus.into());
            let value = registers.read_register(address).await?;
            Report {
                text: format!("0x{:08X}", value),
                json: json!({ "address": address, "value": value }),
            }
        }
        Cmd::WriteReg {
            address,
            value,
            bus,
        } => {
            let registers = BoardRegisters::new(interface, module, bus.into());
            registers.write_register(address, value).await?;
            Report::done("write-reg")
        }
        Cmd::ReadField {
            address,
            offset,
            width,
            signed,
            bus,
        } => {
            let field = checked_field(address, offset, width, signed)?;
            let registers = BoardRegisters::new(interface, module, bus.into());
            let value = registers.read_field(field).await?;
            Report::value(value, json!({ "address": address, "value": value }))
        }
        Cmd::WriteField {
            address,
            offset,
            width,
            value,
            bus,
        } => {
            let field = checked_field(address, offset, width, false)?;
            let registers = BoardRegisters::new(interface, module, bus.into());
            registers.write_field(field, value).await?;
            Report::done("write-field")
        }
        Cmd::Exec {
            command,
            kind,
            motor,
            value,
        } => {
            let reply = interface
                .execute(Request::new(command, kind, motor, value))
                .await?;
            Report {
                text: reply.to_string(),
                json: serde_json::to_value(reply)?,
            }
        }
    };
    Ok(report)
}

/// Field descriptors from user input are validated instead of trusted
fn checked_field(address: u8, offset: u8, width: u8, signed: bool) -> Result<Field, BoxError> {
    if width == 0 || width > 32 || offset as u32 + width as u32 > 32 {
        return Err(format!("field at bit {} with width {} does not fit 32 bits", offset, width).into());
    }
    Ok(Field::new(address, offset, width, signed))
}
