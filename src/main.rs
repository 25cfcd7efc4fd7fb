//! Ribcage binary: `start` runs the bot, `check` validates configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use ribcage::config::Config;
use ribcage::host::{Host, HostConfig, HostError};
use ribcage::logging;

#[derive(Debug, Parser)]
#[command(name = "ribcage", version, about = "A chat-bot host")]
struct Cli {
    /// Config file (default: $RIBCAGE_CONFIG_PATH or ./ribcage.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect and run the bot until Ctrl-C.
    Start,
    /// Validate configuration and list the plugins that would load.
    Check,
}

fn main() -> ExitCode {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Start => runtime.block_on(start(cli.config)),
        Command::Check => check(cli.config),
    }
}

async fn start(path: Option<PathBuf>) -> ExitCode {
    let config = match Config::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let guard = match &config.logging.dir {
        Some(dir) => match logging::init_production(dir, config.default_log_level()) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("{e:#}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            logging::init_cli(config.default_log_level());
            None
        }
    };

    let code = match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let host_error = e.downcast_ref::<HostError>();
            // Connection failures were already logged where they happened.
            if !matches!(host_error, Some(HostError::Fatal(_))) {
                error!(error = %format!("{e:#}"), "bot stopped");
            }
            exit_code(host_error.map_or(1, HostError::exit_code))
        }
    };

    // Flush file logs before the process exits.
    drop(guard);
    code
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let token = config.auth_token()?;
    let plugins = config.resolve_plugins()?;
    let storage = config
        .storage
        .open()
        .await
        .context("failed to open storage")?;

    info!(plugins = ?plugins.names(), "starting");
    let host = Host::slack(
        HostConfig::new(token)
            .debug(config.debug)
            .plugins(plugins)
            .storage(storage)
            .listen_port(config.listen_port),
    )?;
    host.run().await?;
    Ok(())
}

fn check(path: Option<PathBuf>) -> ExitCode {
    logging::init_cli("warn");

    let result = Config::load(path.as_deref()).and_then(|config| {
        config.auth_token()?;
        let plugins = config.resolve_plugins()?;
        Ok((config, plugins))
    });

    match result {
        Ok((config, plugins)) => {
            println!("config ok");
            println!("plugins: {}", plugins.names().join(", "));
            match config.listen_port {
                Some(port) => println!("http server: port {port}"),
                None => println!("http server: disabled"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("config error: {e}");
            ExitCode::FAILURE
        }
    }
}
