use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use key_dispenser::{
    config::{self, Config, StorageConfig},
    dispenser::{issue_to_operator, Dispenser},
    inventory::{InventoryStats, KeyInventory},
    keyfile::read_key_file,
    logger::{self, LogConfig},
    InventoryError, KeyPool,
};
use tracing::{error, info};

/// Key dispenser - issue pre-generated access keys exactly once
#[derive(Parser)]
#[command(name = "key_dispenser")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the inventory and run until SIGINT/SIGTERM
    Serve,

    #[command(flatten)]
    Tool(ToolCommand),
}

#[derive(Subcommand)]
enum ToolCommand {
    /// Import keys from a newline-delimited file (`#` lines are comments)
    Import {
        /// Target pool: trial or paid
        pool: KeyPool,
        file: PathBuf,
    },

    /// Show key statistics for both pools
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Issue one key from a pool to stdout
    Take { pool: KeyPool },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve => serve().await,
        Command::Tool(command) => run_tool(command).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn serve() -> Result<()> {
    // 配置缺失时在处理任何请求前退出
    let config = Config::from_env()?;
    let _guard = logger::init_logger(config.log.clone())?;

    info!(db_path = %config.storage.db_path.display(), "Starting key dispenser");
    let inventory = Arc::new(KeyInventory::open(&config.storage).await?);
    let dispenser = Dispenser::new(inventory);

    if let Some(stats) = dispenser.stats().await {
        info!(
            trial_available = stats.trial.available,
            trial_total = stats.trial.total,
            paid_available = stats.paid.available,
            paid_total = stats.paid.total,
            "Key inventory loaded"
        );
    }
    info!("Dispenser ready for the chat transport");

    shutdown_signal().await;
    info!("Stopping key dispenser...");
    dispenser.shutdown().await;
    Ok(())
}

async fn run_tool(command: ToolCommand) -> Result<()> {
    let log_config = LogConfig {
        console_output: false,
        ..config::log_config_from_env()?
    };
    let _guard = logger::init_logger(log_config)?;

    let storage = StorageConfig::from_env()?;
    let inventory = KeyInventory::open(&storage).await?;
    let outcome = run_command(&inventory, command).await;
    inventory.close().await;
    outcome
}

async fn run_command(inventory: &KeyInventory, command: ToolCommand) -> Result<()> {
    match command {
        ToolCommand::Import { pool, file } => {
            let keys = read_key_file(&file).await?;
            if keys.is_empty() {
                println!("⚠️  {} contains no keys", file.display());
                return Ok(());
            }
            println!("📝 Keys found: {}", keys.len());

            let report = inventory.try_bulk_insert(pool, &keys).await;
            println!(
                "✓ Added {} keys: {} of {} ({} duplicates, {} failed)",
                pool,
                report.inserted,
                report.submitted(),
                report.duplicates,
                report.failed
            );
            print_stats(&inventory.try_stats().await?);
        }
        ToolCommand::Stats { json } => {
            let stats = inventory.try_stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        ToolCommand::Take { pool } => match issue_to_operator(inventory, pool).await {
            Ok(key) => println!("{}", key),
            Err(InventoryError::PoolExhausted(_)) => anyhow::bail!("no {} keys available", pool),
            Err(e) => return Err(anyhow::Error::new(e).context(format!("cannot take a {} key", pool))),
        },
    }
    Ok(())
}

fn print_stats(stats: &InventoryStats) {
    println!("\n📊 Key statistics:");
    for pool in KeyPool::ALL {
        let s = stats.pool(pool);
        println!("─────────────────────────────────────");
        println!("{} keys:", pool);
        println!("  Total:     {}", s.total);
        println!("  Used:      {}", s.used);
        println!("  Available: {}", s.available);
    }
    println!("─────────────────────────────────────\n");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
