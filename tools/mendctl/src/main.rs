//! mendctl - command line master for Mendeleev devices
//!
//! Loads a client configuration (defaults, optional file, `MENDELEEV_*`
//! environment), applies the command line overrides and runs one command.

mod args;
mod commands;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use common::{load_config, LogConfig, DEFAULT_ENV_PREFIX};
use mendeleev::constants::MAX_DATA_LENGTH;
use mendeleev::{ClientConfig, Command};

use crate::args::{parse_block_size, parse_payload, parse_u8, Payload};

#[derive(Parser)]
#[command(name = "mendctl")]
#[command(about = "Mendeleev protocol master")]
#[command(long_about = "Mendeleev protocol master

Examples:
  mendctl -c bus.yaml --slave 1 get-version
  mendctl -c bus.yaml --slave 0x02 set-color FF8000
  mendctl -c bus.yaml --slave 2 ota firmware.bin
  mendctl -c bus.yaml listen --count 10
  mendctl -c bus.yaml config show")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Client configuration file (yaml, toml or json)
    #[arg(short, long, global = true, env = "MENDCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Target device address, overrides the configuration
    #[arg(short, long, global = true, value_parser = parse_u8)]
    slave: Option<u8>,

    /// Trace raw frames
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log level or filter directive
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the firmware version string
    GetVersion,

    /// Send a set-color command
    SetColor {
        /// Payload as hex, e.g. "FF 80 00"
        #[arg(value_parser = parse_payload, default_value = "")]
        data: Payload,
    },

    /// Send a set-mode command
    SetMode {
        /// Payload as hex
        #[arg(value_parser = parse_payload, default_value = "")]
        data: Payload,
    },

    /// Send a set-output command
    SetOutput {
        /// Payload as hex
        #[arg(value_parser = parse_payload, default_value = "")]
        data: Payload,
    },

    /// Upload a firmware image block by block
    Ota {
        /// Image file
        file: PathBuf,

        /// Bytes per OTA block
        #[arg(short, long, value_parser = parse_block_size, default_value_t = MAX_DATA_LENGTH)]
        block_size: usize,
    },

    /// Send an arbitrary command code and print the confirmation payload
    Raw {
        /// Command code, decimal or 0x-prefixed
        #[arg(value_parser = parse_u8)]
        code: u8,

        /// Payload as hex
        #[arg(value_parser = parse_payload, default_value = "")]
        data: Payload,
    },

    /// Print frames addressed to this station
    Listen {
        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Discard pending input on the link
    Flush,

    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Render as JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Frame dumps are emitted at debug level by the engine
    let level = if cli.debug {
        format!("{},mendeleev=debug", cli.log_level)
    } else {
        cli.log_level.clone()
    };
    let _log_guard = common::logging::init(&LogConfig {
        service_name: "mendctl".to_string(),
        level,
        ..LogConfig::default()
    })
    .context("Failed to initialize logging")?;

    let mut config: ClientConfig = load_config(cli.config.as_deref(), DEFAULT_ENV_PREFIX)
        .context("Failed to load client configuration")?;
    if let Some(slave) = cli.slave {
        config.slave = Some(slave);
    }
    if cli.debug {
        config.debug = true;
    }

    match cli.command {
        Commands::GetVersion => commands::get_version(&config).await,
        Commands::SetColor { data } => commands::simple(&config, Command::SetColor, &data).await,
        Commands::SetMode { data } => commands::simple(&config, Command::SetMode, &data).await,
        Commands::SetOutput { data } => commands::simple(&config, Command::SetOutput, &data).await,
        Commands::Ota { file, block_size } => commands::ota(&config, &file, block_size).await,
        Commands::Raw { code, data } => commands::raw(&config, code, &data).await,
        Commands::Listen { count } => commands::listen(&config, count).await,
        Commands::Flush => commands::flush(&config).await,
        Commands::Config(ConfigCommands::Show { json }) => commands::show_config(&config, json),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_color() {
        let cli = Cli::try_parse_from(["mendctl", "--slave", "0x02", "set-color", "FF 80 00"]).unwrap();
        assert_eq!(cli.slave, Some(2));
        match cli.command {
            Commands::SetColor { data } => assert_eq!(data.0, vec![0xFF, 0x80, 0x00]),
            _ => panic!("expected set-color"),
        }
    }

    #[test]
    fn test_ota_block_size_default() {
        let cli = Cli::try_parse_from(["mendctl", "ota", "fw.bin"]).unwrap();
        match cli.command {
            Commands::Ota { block_size, .. } => assert_eq!(block_size, MAX_DATA_LENGTH),
            _ => panic!("expected ota"),
        }
    }

    #[test]
    fn test_rejects_bad_payload() {
        assert!(Cli::try_parse_from(["mendctl", "set-mode", "XYZ"]).is_err());
    }
}
