use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::*;

use meterdrv::{Endpoint, Gateway, MeterDriver, MeterModel};

const ENDPOINT: &str = "rtuovertcp://192.168.1.12:8802";
const BAUD: u32 = 9600;
const TIMEOUT_MS: u64 = 5000;
const SLAVE: u8 = 0x02;

type Error = Box<dyn std::error::Error>;

/// Read and control Modbus meters behind a serial bridge.
#[derive(Debug, Parser)]
#[command(name = "meterctl", version)]
struct Cli {
    /// Gateway address: rtuovertcp://host:port, tcp://host:port or rtu:///dev/ttyX
    #[arg(short, long, default_value = ENDPOINT)]
    endpoint: String,

    /// Serial baud rate configured on the bridge
    #[arg(short, long, default_value_t = BAUD)]
    baud: u32,

    /// Response timeout in milliseconds
    #[arg(short, long, default_value_t = TIMEOUT_MS)]
    timeout: u64,

    /// Meter model (dds4921, hyls-y)
    #[arg(short, long, default_value = "dds4921")]
    model: MeterModel,

    /// Slave address of the meter (1-60)
    #[arg(short, long, default_value_t = SLAVE)]
    slave: u8,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read one data item, e.g. `voltage` or `volume`
    Read { item: String },
    /// Read every item the model provides
    Dump,
    /// Show whether a switch or valve is on
    Status {
        #[arg(default_value_t = 0)]
        turn: usize,
    },
    /// Switch a breaker or valve and verify it
    Set { turn: usize, state: Switch },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

fn setup_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    setup_logging(cli.log_level)?;

    let endpoint = Endpoint::new(
        &cli.endpoint,
        cli.baud,
        Duration::from_millis(cli.timeout),
    )?;
    debug!("connecting to {endpoint}");
    let gateway = Arc::new(Gateway::default());
    gateway.init(endpoint).await?;
    let meter = MeterDriver::new(Arc::clone(&gateway), cli.model, cli.slave)?;

    match cli.command {
        Command::Read { item } => {
            let id = cli
                .model
                .parse_item(&item)
                .ok_or_else(|| format!("{} has no item {item:?}", cli.model))?;
            let value = meter.get_val(id).await?;
            let unit = cli.model.describe_item(id).map(|(_, u)| u).unwrap_or_default();
            println!("{item}: {value:.3} {unit}");
        }
        Command::Dump => {
            for (id, value) in meter.read_all().await {
                let (name, unit) = cli
                    .model
                    .describe_item(id)
                    .unwrap_or_else(|| (id.to_string(), ""));
                match value {
                    Ok(value) => println!("{name}: {value:.3} {unit}"),
                    Err(e) => println!("Error reading {name}: {e}"),
                }
            }
        }
        Command::Status { turn } => {
            let on = meter.get_state(turn).await?;
            println!("{turn}: {}", if on { "on" } else { "off" });
        }
        Command::Set { turn, state } => {
            meter.set_state(turn, matches!(state, Switch::On)).await?;
            info!("{turn} switched {state:?}");
        }
    }

    Ok(())
}
