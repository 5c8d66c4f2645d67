use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use nether_common::auth::{load_or_generate_keypair, StaticKeyProvider};
use nether_ledger::Ledger;
use nether_node::cli::{Cli, Commands};
use nether_node::console::run_console;
use nether_node::runtime::random_dataset;
use nether_node::setup::{ensure_config, node_name};
use nether_node::{NodeConfig, NodeRuntime};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let name = node_name(&cli.config);

    std::panic::set_hook(Box::new(|info| {
        let msg = match info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };
        let location = match info.location() {
            Some(l) => format!("at {}:{}:{}", l.file(), l.line(), l.column()),
            None => "unknown location".to_string(),
        };
        let err_msg = format!("CRASH: {} {}\n", msg, location);
        eprintln!("{}", err_msg);
        let _ = std::fs::write("panic.log", err_msg);
    }));

    std::fs::create_dir_all("logs")?;
    let file_appender = tracing_appender::rolling::never("logs", format!("election-{}.log", name));
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let election_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| metadata.target() == "election"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,nether=debug".into()),
    );

    tracing_subscriber::registry()
        .with(election_layer)
        .with(stdout_layer)
        .init();

    info!("--- NETHER NODE {} ---", name);
    info!("Config: {}", cli.config.display());

    let config = match ensure_config(&cli.config, cli.listen.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load config: {}", e);
            return Err(e);
        }
    };

    match cli.command {
        Commands::Keygen => {
            let keypair = load_or_generate_keypair(&config.key_path())?;
            println!("Public key: {}", keypair.public_key().to_base64());
        }
        Commands::NewLedger => {
            let keypair = load_or_generate_keypair(&config.key_path())?;
            let ledger = Ledger::create(config.ledger_path(), &keypair)?;
            println!("{}", ledger.genesis());
        }
        Commands::ShowLedger => show_ledger(&config.ledger_path())?,
        Commands::AppendRandom { records } => {
            let keypair = load_or_generate_keypair(&config.key_path())?;
            let mut ledger = Ledger::open_or_create(config.ledger_path(), &keypair)?;
            let block = ledger.append_block(random_dataset(records), &keypair)?;
            println!("{}", block);
        }
        Commands::Lead => {
            let runtime = start_runtime(config).await?;
            runtime.start_as_leader().await;
            serve(&runtime).await?;
        }
        Commands::Join { address } => {
            let runtime = start_runtime(config).await?;
            if let Err(e) = runtime.join_network(&address).await {
                error!("Could not join through {}: {}", address, e);
                return Err(e.into());
            }
            serve(&runtime).await?;
        }
    }

    Ok(())
}

async fn start_runtime(config: NodeConfig) -> Result<NodeRuntime, Box<dyn std::error::Error>> {
    let keypair = load_or_generate_keypair(&config.key_path())?;
    NodeRuntime::start(config, Arc::new(StaticKeyProvider::new(keypair))).await
}

/// Runs the console until it exits or Ctrl+C arrives.
async fn serve(runtime: &NodeRuntime) -> Result<(), Box<dyn std::error::Error>> {
    tokio::select! {
        result = run_console(runtime) => result?,
        _ = tokio::signal::ctrl_c() => info!("🛑 Interrupted"),
    }
    runtime.shutdown();
    Ok(())
}

fn show_ledger(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = Ledger::open(path)?;
    for block in ledger.iter()? {
        println!("{}", block?);
    }
    let header = ledger.header();
    println!(
        "{} blocks ({} local), tip #{} at offset {}",
        header.total_count, header.local_count, header.last_block_index, header.last_block_offset
    );
    match ledger.verify_chain() {
        Ok(count) => println!("✅ chain verified: {} blocks", count),
        Err(e) => println!("❌ chain invalid: {}", e),
    }
    Ok(())
}
