//! slbd — the SLB daemon.
//!
//! Single binary that assembles the balancer:
//! - Policy store (redb)
//! - Dispatch engine (dispatcher, priority scheduler, category workers)
//! - HTTP ingress
//!
//! # Usage
//!
//! ```text
//! slbd run --config /etc/slb/slb.toml
//! slbd run --listen 0.0.0.0:8080 --data-dir /var/lib/slb --log-format json
//! slbd print-config > slb.toml
//! ```

mod serve;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use slb_core::SlbConfig;

const DEFAULT_LOG_FILTER: &str = "info,slbd=debug,slb=debug";

#[derive(Parser)]
#[command(name = "slbd", about = "SLB dispatch daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the dispatch engine and the HTTP ingress.
    Run {
        /// Path to slb.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `server.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Override `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
    /// Print the effective configuration as TOML.
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            listen,
            data_dir,
            log_format,
        } => {
            init_tracing(log_format);

            let mut config = load_config(config)?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            config.validate()?;

            serve::run(config).await
        }
        Command::PrintConfig { config } => {
            print!("{}", load_config(config)?.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SlbConfig> {
    match path {
        Some(path) => SlbConfig::from_file(&path),
        None => Ok(SlbConfig::default()),
    }
}
