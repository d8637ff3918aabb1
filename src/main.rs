//! kv-multisource - command line entry point.
//!
//! Declares the configured data sources and runs one command against them.

use kv_multisource::config::{Command, Config, Target};
use kv_multisource::db::DataSourceRegistry;
use kv_multisource::{KvError, MultiSourceClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_usage() {
    eprintln!("Error: At least one data source must be configured.");
    eprintln!();
    eprintln!("Usage: kv-multisource --source-url <url> <command>");
    eprintln!("       kv-multisource --source-url <name>=<url> <command>");
    eprintln!("       kv-multisource --sources-file <path> <command>");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  kv-multisource -S redis://localhost:6379 ping");
    eprintln!("  kv-multisource -S source1=redis://:secret@cache:6379/0 get --source source1 --db 1 k");
    eprintln!("  kv-multisource -S source2=redis://node1:7000?cluster=true sources");
    eprintln!("  kv-multisource -S scratch=memory://local --default-source scratch set k v");
}

async fn run(client: &MultiSourceClient, command: Command) -> Result<(), KvError> {
    match command {
        Command::Sources => {
            let summaries = client.summaries().await;
            let json = serde_json::to_string_pretty(&summaries)
                .map_err(|e| KvError::internal(format!("Failed to render summaries: {}", e)))?;
            println!("{}", json);
        }
        Command::Ping(target) => {
            let handle = handle(client, &target).await?;
            println!("{}", handle.ping().await?);
        }
        Command::Get { target, key } => {
            let handle = handle(client, &target).await?;
            match handle.get(&key).await? {
                Some(value) => println!("{}", value),
                None => println!("(nil)"),
            }
        }
        Command::Set {
            target,
            key,
            value,
            ttl,
        } => {
            let handle = handle(client, &target).await?;
            match ttl {
                Some(secs) => handle.set_ex(&key, &value, Duration::from_secs(secs)).await?,
                None => handle.set(&key, &value).await?,
            }
            println!("OK");
        }
        Command::Del { target, key } => {
            let handle = handle(client, &target).await?;
            println!("{}", handle.del(&key).await?);
        }
    }
    Ok(())
}

async fn handle(
    client: &MultiSourceClient,
    target: &Target,
) -> Result<kv_multisource::BoundHandle, KvError> {
    client.handle_for(target.source.as_deref(), target.db).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let (default_source, sources) = config.parse_sources()?;
    if sources.is_empty() {
        print_usage();
        std::process::exit(1);
    }

    info!(
        count = sources.len(),
        default_source = %default_source,
        "Starting kv-multisource v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Sources are built on first use
    let registry = Arc::new(DataSourceRegistry::new());
    for source in sources {
        registry.declare(&source.name, source.connection).await?;
    }
    let client = MultiSourceClient::new(registry, default_source);

    let command = config.command.clone().unwrap_or(Command::Sources);
    if let Err(e) = run(&client, command).await {
        error!(error = %e, "Command failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    Ok(())
}
