#![doc = include_str!("../README.md")]

mod config;
mod load;
mod telemetry;

use clap::Parser;
use config::{CliArgs, LoadConfig};
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let json = args.json_logs;
    let config = LoadConfig::try_from(args)?;

    init_telemetry(json)?;
    log_startup_info(&config);

    let report = load::run(&config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn log_startup_info(config: &LoadConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting load driver with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting load driver on {}/{} with {} threads",
            config.collection,
            config.id,
            config.threads
        );
    }
}
