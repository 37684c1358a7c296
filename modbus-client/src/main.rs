//! Command-line Modbus master

use std::net::SocketAddr;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use modbus_engine::client::*;
use modbus_engine::*;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("{0}")]
    BadRange(#[from] InvalidRange),
    #[error("{0}")]
    BadInt(#[from] ParseIntError),
    #[error("bad character in bit string: {0}")]
    BadCharInBitString(char),
    #[error("{0}")]
    Request(#[from] RequestError),
}

impl From<InvalidRequest> for Error {
    fn from(err: InvalidRequest) -> Self {
        Error::Request(err.into())
    }
}

#[derive(Parser)]
#[command(name = "modbus-client")]
#[command(about = "A command line program for making Modbus master requests")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:502", help = "A socket address")]
    host: SocketAddr,

    #[arg(
        long,
        conflicts_with = "host",
        help = "Talk RTU over this serial port instead of TCP (e.g. /dev/ttyUSB0)"
    )]
    serial: Option<String>,

    #[arg(long, default_value = "9600", help = "Baud rate of the serial port")]
    baud: u32,

    #[arg(short = 'i', long, default_value = "1", help = "The unit id of the Modbus slave")]
    id: u8,

    #[arg(short = 't', long, default_value = "1000", help = "Response timeout in milliseconds")]
    timeout: u64,

    #[arg(short = 'r', long, default_value = "0", help = "Number of retries after a response timeout")]
    retries: usize,

    #[arg(short = 'p', long, help = "Optional polling period in milliseconds")]
    period: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(name = "rc", about = "read coils")]
    ReadCoils(ReadArgs),

    #[command(name = "rdi", about = "read discrete inputs")]
    ReadDiscreteInputs(ReadArgs),

    #[command(name = "rhr", about = "read holding registers")]
    ReadHoldingRegisters(ReadArgs),

    #[command(name = "rir", about = "read input registers")]
    ReadInputRegisters(ReadArgs),

    #[command(name = "wsc", about = "write single coil")]
    WriteSingleCoil(WriteSingleCoilArgs),

    #[command(name = "wsr", about = "write single register")]
    WriteSingleRegister(WriteSingleRegisterArgs),

    #[command(name = "wmc", about = "write multiple coils")]
    WriteMultipleCoils(WriteMultipleCoilsArgs),

    #[command(name = "wmr", about = "write multiple registers")]
    WriteMultipleRegisters(WriteMultipleRegistersArgs),

    #[command(name = "mwr", about = "mask write register")]
    MaskWriteRegister(MaskWriteRegisterArgs),
}

#[derive(Args)]
struct ReadArgs {
    #[arg(short = 's', long, help = "the starting address")]
    start: u16,

    #[arg(short = 'q', long, help = "quantity of values")]
    quantity: u16,
}

#[derive(Args)]
struct WriteSingleCoilArgs {
    #[arg(short = 'i', long, help = "the address of the coil")]
    index: u16,

    #[arg(short = 'v', long, help = "the value of the coil (true or false)")]
    value: bool,
}

#[derive(Args)]
struct WriteSingleRegisterArgs {
    #[arg(short = 'i', long, help = "the address of the register")]
    index: u16,

    #[arg(short = 'v', long, help = "the value of the register")]
    value: u16,
}

#[derive(Args)]
struct WriteMultipleCoilsArgs {
    #[arg(short = 's', long, help = "the starting address of the coils")]
    start: u16,

    #[arg(
        short = 'v',
        long,
        help = "the values of the coils specified as a string of 1 and 0, lowest address last (e.g. 10100011)"
    )]
    values: String,
}

#[derive(Args)]
struct WriteMultipleRegistersArgs {
    #[arg(short = 's', long, help = "the starting address of the registers")]
    start: u16,

    #[arg(
        short = 'v',
        long,
        help = "the values of the registers specified as a comma delimited list (e.g. 1,4,7)"
    )]
    values: String,
}

#[derive(Args)]
struct MaskWriteRegisterArgs {
    #[arg(short = 'i', long, help = "the address of the register")]
    index: u16,

    #[arg(short = 'a', long, value_parser = parse_u16, help = "the AND mask (decimal or 0x prefixed hex)")]
    and_mask: u16,

    #[arg(short = 'o', long, value_parser = parse_u16, help = "the OR mask (decimal or 0x prefixed hex)")]
    or_mask: u16,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    if let Err(ref e) = run().await {
        println!("error: {e}");
    }

    Ok(())
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    let decode = DecodeLevel::from(PduDecodeLevel::DataValues);

    let mut channel = match &cli.serial {
        None => spawn_tcp_client_task(cli.host, 1, default_retry_strategy(), decode),
        Some(path) => spawn_rtu_client_task(
            path,
            SerialSettings {
                baud_rate: cli.baud,
                ..SerialSettings::default()
            },
            1,
            default_retry_strategy(),
            decode,
        ),
    };

    let params = RequestParam::new(UnitId::new(cli.id), Duration::from_millis(cli.timeout))
        .with_retries(cli.retries);

    match cli.period {
        None => run_command(&cli.command, &mut channel, params).await,
        Some(period_ms) => {
            let period = Duration::from_millis(period_ms);
            loop {
                if let Err(err) = run_command(&cli.command, &mut channel, params).await {
                    tracing::warn!("{}", err);
                }
                tokio::time::sleep(period).await
            }
        }
    }
}

async fn run_command(
    command: &Command,
    channel: &mut Channel,
    params: RequestParam,
) -> Result<(), Error> {
    match command {
        Command::ReadCoils(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_coils(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::ReadDiscreteInputs(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_discrete_inputs(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::ReadHoldingRegisters(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_holding_registers(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::ReadInputRegisters(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_input_registers(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::WriteSingleCoil(args) => {
            let indexed = Indexed::new(args.index, args.value);
            channel.write_single_coil(params, indexed).await?;
        }
        Command::WriteSingleRegister(args) => {
            let indexed = Indexed::new(args.index, args.value);
            channel.write_single_register(params, indexed).await?;
        }
        Command::WriteMultipleCoils(args) => {
            let values = parse_bit_values(&args.values)?;
            let write_multiple = WriteMultiple::from_coils(args.start, values)?;
            let range = channel.write_multiple_coils(params, write_multiple).await?;
            println!("wrote: {range}");
        }
        Command::WriteMultipleRegisters(args) => {
            let values = parse_register_values(&args.values)?;
            let write_multiple = WriteMultiple::from_registers(args.start, values)?;
            let range = channel
                .write_multiple_registers(params, write_multiple)
                .await?;
            println!("wrote: {range}");
        }
        Command::MaskWriteRegister(args) => {
            let request = MaskWrite::new(args.index, args.and_mask, args.or_mask);
            let echo = channel.mask_write_register(params, request).await?;
            println!("{echo}");
        }
    }
    Ok(())
}

fn parse_bit_values(values_str: &str) -> Result<Vec<bool>, Error> {
    let mut values: Vec<bool> = Vec::new();
    for c in values_str.chars().rev() {
        match c {
            '0' => values.push(false),
            '1' => values.push(true),
            _ => return Err(Error::BadCharInBitString(c)),
        }
    }
    Ok(values)
}

fn parse_register_values(values_str: &str) -> Result<Vec<u16>, ParseIntError> {
    let mut values: Vec<u16> = Vec::new();
    for value in values_str.split(',') {
        values.push(u16::from_str(value.trim())?);
    }
    Ok(values)
}

fn parse_u16(value: &str) -> Result<u16, ParseIntError> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => u16::from_str(value),
    }
}
