//! Bucket Storage Miner
//!
//! Command-line entry point:
//! - One-shot miner transactions (register, collateral, exit, rewards)
//! - Chain-state inspection
//! - `run`: long-lived session watchdog, reward claiming and metrics endpoint

use anyhow::Context;
use bucket_core::AccountId32;
use bucket_node::chain::{format_tokens, ChainClient, ConfirmationOutcome};
use bucket_node::{
    init_metrics, HealthState, MetricsServer, NodeConfig, NodeMetrics, RewardClaimer,
    SessionWatchdog,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bucket-node")]
#[command(about = "Bucket storage miner")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Ledger RPC address (overrides config file)
    #[arg(short, long)]
    rpc: Option<String>,

    /// Metrics HTTP port (overrides config file)
    #[arg(short, long)]
    metrics_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show reward balances of the miner
    Reward,

    /// Register the miner on chain
    Register {
        /// Service address (`ip:port`), defaults to `[miner].service_addr`
        #[arg(long)]
        service_addr: Option<String>,

        /// Pledge in whole tokens, defaults to `[miner].pledge_tokens`
        #[arg(long)]
        pledge: Option<u64>,
    },

    /// Increase pledged collateral
    Increase {
        /// Amount in whole tokens
        tokens: u64,
    },

    /// Leave the miner set
    Exit,

    /// Withdraw collateral after exiting
    Withdraw,

    /// Update the service address
    UpdateAddress { service_addr: String },

    /// Update the income (beneficiary) account
    UpdateIncome { account: String },

    /// Claim available rewards
    Claim,

    /// Show account, miner and node state
    State,

    /// Run the miner: watchdog, reward claims and metrics
    Run {
        /// Seconds between reward claim attempts
        #[arg(long, default_value_t = 3600)]
        claim_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    // Priority: CLI args > environment > config file > defaults
    let config = NodeConfig::load_or_default(&cli.config)
        .with_env_overrides()
        .with_overrides(cli.rpc, cli.metrics_port);
    config.validate().context("invalid configuration")?;

    let client = Arc::new(
        ChainClient::connect(&config.chain)
            .await
            .context("failed to connect to the ledger")?,
    );
    let prefix = config.chain.ss58_prefix;

    match cli.command {
        Command::Reward => {
            let info = client.reward_info(client.account()).await?;
            println!("Account:      {}", client.account().to_ss58(prefix));
            println!("Total reward: {}", format_tokens(info.total_reward));
            println!(
                "Claimable:    {}",
                format_tokens(info.total_rewards_currently_available)
            );
            println!("Pending:      {}", format_tokens(info.total_not_receive));
        }
        Command::Register {
            service_addr,
            pledge,
        } => {
            let service_addr = service_addr.unwrap_or_else(|| config.miner.service_addr.clone());
            if service_addr.is_empty() {
                anyhow::bail!("no service address given or configured");
            }
            let pledge = pledge.unwrap_or(config.miner.pledge_tokens);
            let income = config.chain.income_account()?;
            report(
                "register",
                client
                    .register(income.as_ref(), &service_addr, u128::from(pledge))
                    .await?,
            )?;
        }
        Command::Increase { tokens } => {
            report(
                "increase",
                client.increase_collateral(u128::from(tokens)).await?,
            )?;
        }
        Command::Exit => report("exit", client.exit().await?)?,
        Command::Withdraw => report("withdraw", client.withdraw().await?)?,
        Command::UpdateAddress { service_addr } => {
            report(
                "update-address",
                client.update_address(&service_addr).await?,
            )?;
        }
        Command::UpdateIncome { account } => {
            let account: AccountId32 = account
                .parse()
                .with_context(|| format!("invalid account {}", account))?;
            report(
                "update-income",
                client.update_beneficiary(&account).await?,
            )?;
        }
        Command::Claim => match client.claim_if_available().await? {
            Some(outcome) => report("claim", outcome)?,
            None => println!("No rewards available"),
        },
        Command::State => print_state(&client, prefix).await?,
        Command::Run { claim_interval } => {
            run(client, &config, Duration::from_secs(claim_interval)).await?;
        }
    }

    Ok(())
}

/// Print a transaction outcome; anything but a confirmation is an error
fn report(operation: &str, outcome: ConfirmationOutcome) -> anyhow::Result<()> {
    match outcome {
        ConfirmationOutcome::Confirmed(block) => {
            println!("{} confirmed in block {}", operation, block);
            Ok(())
        }
        other if other.is_ambiguous() => {
            anyhow::bail!(
                "{} outcome unknown ({}), check chain state before retrying",
                operation,
                other
            )
        }
        other => anyhow::bail!("{} failed: {}", operation, other),
    }
}

async fn print_state(client: &ChainClient, prefix: u16) -> anyhow::Result<()> {
    let account = *client.account();
    let height = client.block_height().await?;
    let sync = client.sync_status().await?;

    println!("Node:     {}", client.session().address());
    println!("Block:    #{}", height);
    println!("Peers:    {} (syncing: {})", sync.peers, sync.is_syncing);
    println!("Account:  {}", account.to_ss58(prefix));

    match client.account_info(&account).await? {
        Some(info) => {
            println!("Nonce:    {}", info.nonce);
            println!("Free:     {}", format_tokens(info.data.free));
            println!("Reserved: {}", format_tokens(info.data.reserved));
        }
        None => println!("Account does not exist on chain"),
    }

    match client.miner_info(&account).await? {
        Some(miner) => {
            println!("Miner:    #{} ({})", miner.peer_id, miner.state_str());
            println!("Service:  {}", miner.service_addr_str());
            println!("Income:   {}", miner.beneficiary.to_ss58(prefix));
            println!("Pledge:   {}", format_tokens(miner.collaterals));
            println!("Space:    {} bytes", miner.space);
        }
        None => println!("Miner not registered"),
    }

    Ok(())
}

async fn run(
    client: Arc<ChainClient>,
    config: &NodeConfig,
    claim_interval: Duration,
) -> anyhow::Result<()> {
    info!(
        account = %client.account().to_ss58(config.chain.ss58_prefix),
        rpc = %client.session().address(),
        "Bucket miner starting"
    );

    if !client.is_registered().await? {
        warn!("Miner is not registered, run `bucket-node register` first");
    }

    let health_state = Arc::new(RwLock::new(HealthState::default()));
    let node_metrics = NodeMetrics::new(client.account().to_ss58(config.chain.ss58_prefix));

    // Start metrics server
    if config.metrics.enabled {
        init_metrics();
        match MetricsServer::new(config.metrics.port) {
            Ok(server) => {
                let health_path = config.metrics.health_path.clone();
                let metrics_path = config.metrics.metrics_path.clone();
                let state = health_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.start(health_path, metrics_path, state).await {
                        error!(error = %e, "Metrics server error");
                    }
                });
                info!(port = config.metrics.port, "Metrics server started");
            }
            Err(e) => warn!(error = %e, "Failed to start metrics server"),
        }
    }

    let watchdog = SessionWatchdog::new(client.session().clone(), health_state)
        .with_interval(Duration::from_secs(config.chain.health_interval_secs.max(1)))
        .with_metrics(node_metrics.clone());
    let watchdog = tokio::spawn(async move { watchdog.run().await });

    let claimer = RewardClaimer::new(client.clone(), claim_interval.max(Duration::from_secs(1)))
        .with_metrics(node_metrics.clone());
    let claimer = tokio::spawn(async move { claimer.run().await });

    info!("Press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    watchdog.abort();
    claimer.abort();
    node_metrics.mark_down();

    info!("Bucket miner stopped");
    Ok(())
}
