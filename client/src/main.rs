//! Ratewire command line client.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratewire_client::{ClientConfig, LoggingHandler, RateClient};
use ratewire_common::{Currency, RateRequest};

/// Ratewire CLI
#[derive(Parser, Debug)]
#[command(name = "ratewire")]
#[command(about = "Query and watch exchange rates from a Ratewire server")]
struct Args {
    /// Server address, overriding RATEWIRE_SERVER_ADDR
    #[arg(short, long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current rate converting BASE into DEST
    Get { base: Currency, destination: Currency },

    /// Subscribe to pairs written as BASE:DEST and log every update
    Watch {
        #[arg(required = true, value_parser = parse_pair)]
        pairs: Vec<RateRequest>,
    },
}

fn parse_pair(value: &str) -> Result<RateRequest, String> {
    let (base, destination) = value
        .split_once(':')
        .ok_or_else(|| format!("expected BASE:DEST, got {}", value))?;
    let base: Currency = base.parse().map_err(|e| format!("{}", e))?;
    let destination: Currency = destination.parse().map_err(|e| format!("{}", e))?;
    Ok(RateRequest::new(base, destination))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::from_env();
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    let mut client = RateClient::connect_with(config).await?;

    match args.command {
        Command::Get { base, destination } => {
            let response = client.get_rate(base, destination).await?;
            println!("{}", response);
            client.close().await?;
        }
        Command::Watch { pairs } => {
            for pair in pairs {
                client.subscribe(pair.base, pair.destination).await?;
            }

            tokio::select! {
                result = client.run_handler(&LoggingHandler) => result?,
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    Ok(())
}
