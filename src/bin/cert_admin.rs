//! Operator CLI
//!
//! Key generation and offline inspection of the governance and abuse-protection tables

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cert_ledger::actor::Actor;
use cert_ledger::certificate::IssuerKey;
use cert_ledger::config::AppConfig;
use cert_ledger::database::models::RequestStatus;
use cert_ledger::pagination::PageRequest;
use cert_ledger::requests::RequestFilter;
use cert_ledger::CertLedger;

#[derive(Parser)]
#[command(name = "cert-admin")]
#[command(about = "cert-ledger operator tool")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (overrides configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Administrator identity recorded on block/unblock actions
    #[arg(long, default_value = "cli-admin")]
    admin: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new issuer signing key
    GenerateKey {
        /// Write the hex secret key to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage blocked verification clients
    Blocked {
        #[command(subcommand)]
        command: BlockedCommands,
    },

    /// List action requests
    Requests {
        /// Filter by status (pending, processing, completed, rejected)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        limit: Option<u32>,
    },

    /// List verification logs
    Logs {
        /// Only logs for this certificate hash
        #[arg(long)]
        cert_hash: Option<String>,

        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand)]
enum BlockedCommands {
    /// List active blocks
    List,

    /// Block an IP address
    Block {
        ip: String,

        /// Block duration in seconds
        #[arg(short, long, default_value_t = 3600)]
        duration_secs: i64,

        #[arg(short, long)]
        reason: String,
    },

    /// Remove a block. Counters held by a running service expire on their own.
    Unblock { ip: String },

    /// Delete expired blocks
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cert_ledger=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::GenerateKey { output } = &cli.command {
        let key = IssuerKey::generate();
        match output {
            Some(path) => {
                std::fs::write(path, key.secret_hex())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Wrote secret key to {}", path.display());
            }
            None => println!("secret_key: {}", key.secret_hex()),
        }
        println!("actor_id:   {}", key.actor_id());
        return Ok(());
    }

    let mut config = AppConfig::load()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    let app = CertLedger::from_config(&config)
        .await
        .context("Failed to open the governance database")?;
    let admin = Actor::admin(cli.admin);

    match cli.command {
        Commands::GenerateKey { .. } => {}
        Commands::Blocked { command } => match command {
            BlockedCommands::List => {
                let blocks = app.limiter.list_blocked().await?;
                if blocks.is_empty() {
                    println!("No active blocks");
                }
                for block in blocks {
                    println!(
                        "{:<40} until {}  by {:<12} {}",
                        block.ip, block.blocked_until, block.blocked_by, block.reason
                    );
                }
            }
            BlockedCommands::Block {
                ip,
                duration_secs,
                reason,
            } => {
                let block = app
                    .limiter
                    .block_client(&ip, Duration::seconds(duration_secs), &reason, &admin)
                    .await?;
                println!("Blocked {} until {}", block.ip, block.blocked_until);
            }
            BlockedCommands::Unblock { ip } => {
                if app.limiter.unblock_client(&ip, &admin).await? {
                    println!("Unblocked {}", ip);
                } else {
                    println!("{} was not blocked", ip);
                }
            }
            BlockedCommands::Sweep => {
                let removed = app.limiter.sweep_expired(chrono::Utc::now()).await?;
                println!("Removed {} expired blocks", removed);
            }
        },
        Commands::Requests {
            status,
            page,
            limit,
        } => {
            let status = match status {
                Some(s) => Some(
                    RequestStatus::from_str(&s).ok_or_else(|| anyhow!("Unknown status: {}", s))?,
                ),
                None => None,
            };
            let filter = RequestFilter {
                status,
                mine: false,
            };
            let listing = app
                .requests
                .list(&filter, &admin, PageRequest::from_query(page, limit)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Logs {
            cert_hash,
            page,
            limit,
        } => {
            let listing = app
                .verification
                .list_logs(cert_hash.as_deref(), PageRequest::from_query(page, limit)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
    }

    Ok(())
}
