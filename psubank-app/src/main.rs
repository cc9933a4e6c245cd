//! Operator program for a bank of Modbus-controlled power supplies

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use psubank::*;

mod config;
mod console;

use crate::config::{FileConfig, Setup};
use crate::console::Console;

#[derive(Parser)]
#[command(name = "psubank")]
#[command(about = "Monitor and control a bank of power supplies over Modbus RTU, or mirror one over Modbus TCP")]
#[command(version)]
struct Cli {
    #[arg(short = 'c', long, default_value = "psubank.toml", help = "Configuration file")]
    config: PathBuf,

    #[arg(short = 'v', long, help = "Log at DEBUG level")]
    verbose: bool,

    #[arg(long, value_enum, default_value = "none", help = "Decoding of Modbus frames")]
    decode: FrameLevel,

    #[arg(long, value_enum, default_value = "none", help = "Logging of physical layer traffic")]
    phys: PhysLevel,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FrameLevel {
    None,
    Header,
    Payload,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PhysLevel {
    None,
    Length,
    Data,
}

impl From<FrameLevel> for FrameDecodeLevel {
    fn from(value: FrameLevel) -> Self {
        match value {
            FrameLevel::None => FrameDecodeLevel::Nothing,
            FrameLevel::Header => FrameDecodeLevel::Header,
            FrameLevel::Payload => FrameDecodeLevel::Payload,
        }
    }
}

impl From<PhysLevel> for PhysDecodeLevel {
    fn from(value: PhysLevel) -> Self {
        match value {
            PhysLevel::None => PhysDecodeLevel::Nothing,
            PhysLevel::Length => PhysDecodeLevel::Length,
            PhysLevel::Data => PhysDecodeLevel::Data,
        }
    }
}

#[derive(Debug)]
enum Error {
    Config(config::ConfigError),
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Config(err) => write!(f, "{err}"),
            Error::Io(err) => write!(f, "unable to start the Modbus TCP server: {err}"),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    if let Err(ref e) = run(cli).await {
        println!("error: {e}");
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let decode = DecodeLevel::new(cli.decode.into(), cli.phys.into());
    let setup = FileConfig::load(&cli.config)?.into_setup(decode)?;

    let system = match setup {
        Setup::Local(config) => {
            tracing::info!(
                "local mode, {} channel(s), {} ticks per second",
                config.roster.channels().len(),
                config.tick_rate.get()
            );
            spawn_local(config).await?
        }
        Setup::Remote(config) => {
            tracing::info!("remote mode, local computer at {}", config.server);
            spawn_remote(config)
        }
    };

    let mut console = Console::new(system.render());
    tokio::select! {
        _ = console.run() => {
            tracing::warn!("polling task stopped");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!("unable to listen for ctrl-c: {}", err);
            }
            tracing::info!("shutting down");
        }
    }

    system.shutdown();
    Ok(())
}
