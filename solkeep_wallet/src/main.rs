use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use tokio::task::JoinSet;
use solkeep_common::{
    api::rpc::Commitment,
    config::{DEFAULT_RPC_URL, VERSION},
    get_cli_styles,
    logger::{colorize_str, setup_logger, Color, LogLevel},
    utils::{format_signed_sol, format_sol_with_symbol, from_sol}
};
use solkeep_wallet::{
    chain_client::RpcChainClient,
    codec,
    config::{
        DEFAULT_DB_PATH,
        DEFAULT_FEE_RESERVE,
        DEFAULT_HISTORY_LIMIT,
        DEFAULT_KEEPALIVE_CYCLES,
        DEFAULT_LOG_FILENAME,
        DEFAULT_POLL_INTERVAL,
        DEFAULT_SIGNATURE_WINDOW,
        DEFAULT_TRANSFER_TOOL,
        MASTER_SECRET_ENV,
        RELAY_SUBMIT_METHOD,
        RPC_URL_ENV
    },
    engine::{forward_events, CancellationFlag, EngineConfig, ReconciliationEngine, WalletEvent},
    entry::{TransactionKind, WalletRecord, WalletRef},
    error::WalletError,
    storage::LedgerStore,
    transmitter::{ExternalToolTransmitter, RpcTransmitter, Transmitter},
    vault::{KeyVault, SecretSeed}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransmitterKind {
    // Sign locally and submit the transfer intent to a relay
    Rpc,
    // Delegate to the chain command line tool
    External
}

#[derive(Parser)]
#[clap(version = VERSION, about = "Solkeep custodial wallet")]
#[command(styles = get_cli_styles())]
pub struct Config {
    /// Solana JSON-RPC endpoint
    #[clap(short = 'r', long, env = RPC_URL_ENV, default_value_t = String::from(DEFAULT_RPC_URL))]
    rpc_url: String,
    /// Commitment level of every chain query
    #[clap(long, value_enum, default_value_t = Commitment::Confirmed)]
    commitment: Commitment,
    /// Master secret used to encrypt the wallet seeds
    #[clap(long, env = MASTER_SECRET_ENV, hide_env_values = true)]
    master_secret: Option<String>,
    /// Path of the wallet database
    #[clap(short = 'd', long, default_value_t = String::from(DEFAULT_DB_PATH))]
    db_path: String,
    /// Set log level
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    /// Disable the log file
    #[clap(short = 'f', long)]
    disable_file_logging: bool,
    /// Log filename
    #[clap(short = 'l', long, default_value_t = String::from(DEFAULT_LOG_FILENAME))]
    filename_log: String,
    /// Recent signatures requested at each sync
    #[clap(long, default_value_t = DEFAULT_SIGNATURE_WINDOW)]
    signature_window: usize,
    /// Seconds between two balance polls of the monitor
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    poll_interval: u64,
    /// Unchanged polls before a keep-alive sync, 0 to disable
    #[clap(long, default_value_t = DEFAULT_KEEPALIVE_CYCLES)]
    keepalive_cycles: u32,
    /// Lamports kept aside for fees when sending
    #[clap(long, default_value_t = DEFAULT_FEE_RESERVE)]
    fee_reserve: u64,
    /// How outbound transfers are submitted
    #[clap(long, value_enum, default_value_t = TransmitterKind::External)]
    transmitter: TransmitterKind,
    /// Binary used by the external transmitter
    #[clap(long, default_value_t = String::from(DEFAULT_TRANSFER_TOOL))]
    transfer_tool: String,
    /// Relay endpoint used by the rpc transmitter, the RPC endpoint when not set
    #[clap(long)]
    relay_url: Option<String>,
    /// Relay method used by the rpc transmitter
    #[clap(long, default_value_t = String::from(RELAY_SUBMIT_METHOD))]
    relay_method: String,
    #[clap(subcommand)]
    command: Command
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new wallet, its seed is displayed only once
    Create {
        #[clap(long)]
        label: Option<String>
    },
    /// List all stored wallets
    List,
    /// Fetch and store the current balance of a wallet
    Balance {
        wallet: WalletRef
    },
    /// Store the new transactions of a wallet
    Sync {
        wallet: WalletRef
    },
    /// Sync every stored wallet
    SyncAll,
    /// Show the latest stored transactions of a wallet
    History {
        wallet: WalletRef,
        #[clap(short = 'n', long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize
    },
    /// Create a payment request, amount in SOL
    Request {
        wallet: WalletRef,
        amount: String,
        #[clap(long)]
        label: Option<String>,
        #[clap(long)]
        message: Option<String>
    },
    /// List the payment requests of a wallet
    Requests {
        wallet: WalletRef
    },
    /// Send SOL to an address
    Send {
        wallet: WalletRef,
        destination: String,
        amount: String
    },
    /// Watch balances until Ctrl-C, stored wallets are synced on change
    Monitor {
        #[clap(required = true)]
        wallets: Vec<WalletRef>
    },
    /// Set or clear the label of a wallet
    Label {
        wallet: WalletRef,
        label: Option<String>
    },
    /// Display the decrypted seed of a wallet
    Export {
        wallet: WalletRef
    },
    /// Delete a wallet with its transactions and payment requests
    Delete {
        wallet: WalletRef,
        /// Confirm the deletion
        #[clap(long)]
        yes: bool
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config: Config = Config::parse();
    setup_logger(config.log_level, &config.filename_log, config.disable_file_logging)?;
    info!("Solkeep wallet v{}", VERSION);

    let engine = Arc::new(build_engine(&config)?);
    let result = run_command(&engine, config.command).await;

    if let Err(e) = engine.get_store().flush_async().await {
        error!("Error while flushing the database: {}", e);
    }

    result
}

fn build_engine(config: &Config) -> Result<ReconciliationEngine> {
    let vault = KeyVault::new(config.master_secret.as_deref())
        .with_context(|| format!("Cannot unlock the key vault, set {} or --master-secret", MASTER_SECRET_ENV))?;
    let store = LedgerStore::open(&config.db_path)
        .with_context(|| format!("Error while opening database at {}", config.db_path))?;
    let chain = Arc::new(RpcChainClient::new(config.rpc_url.clone())?.with_commitment(config.commitment));

    let transmitter: Arc<dyn Transmitter> = match config.transmitter {
        TransmitterKind::Rpc => {
            let relay_url = config.relay_url.clone().unwrap_or_else(|| config.rpc_url.clone());
            Arc::new(RpcTransmitter::new(chain.clone(), relay_url, config.relay_method.clone())?)
        },
        TransmitterKind::External => Arc::new(ExternalToolTransmitter::new(config.transfer_tool.clone(), config.rpc_url.clone()))
    };

    let engine_config = EngineConfig {
        signature_window: config.signature_window,
        poll_interval: Duration::from_secs(config.poll_interval.max(1)),
        keepalive_cycles: config.keepalive_cycles,
        fee_reserve: config.fee_reserve
    };
    info!("Using RPC endpoint {}", chain.get_target());

    Ok(ReconciliationEngine::new(store, vault, chain, transmitter, engine_config))
}

fn parse_amount(amount: &str) -> Result<u64> {
    match from_sol(amount) {
        Some(0) | None => bail!("Invalid amount {}, expected a positive SOL value", amount),
        Some(lamports) => Ok(lamports)
    }
}

fn display_balance(wallet: &WalletRecord) -> String {
    match wallet.last_balance {
        Some(balance) => format_sol_with_symbol(balance),
        None => "unknown".to_string()
    }
}

// Secrets go to stdout only, never to the log file
fn display_seed(wallet: &WalletRecord, seed: &SecretSeed) {
    warn!("The following secret gives full control over {}, store it offline", wallet.address);
    println!("{} {}", colorize_str(Color::BrightRed, "Seed (hex):"), seed.to_hex().as_str());
    println!("{} {}", colorize_str(Color::BrightRed, "Keypair (base58):"), seed.to_keypair_base58().as_str());
}

async fn run_command(engine: &Arc<ReconciliationEngine>, command: Command) -> Result<()> {
    match command {
        Command::Create { label } => {
            let (wallet, seed) = engine.create_wallet(label)?;
            info!("Wallet {} created with address {}", wallet.id, colorize_str(Color::Green, &wallet.address));
            display_seed(&wallet, &seed);
        },
        Command::List => {
            let wallets = engine.list_wallets()?;
            if wallets.is_empty() {
                info!("No wallet stored");
            }
            for wallet in wallets {
                info!("{} | balance: {}", wallet.display_name(), display_balance(&wallet));
            }
        },
        Command::Balance { wallet } => {
            let wallet = engine.refresh_balance(&wallet).await?;
            info!("Balance of {}: {}", wallet.display_name(), display_balance(&wallet));
        },
        Command::Sync { wallet } => {
            let wallet = engine.get_wallet(&wallet)?;
            let summary = engine.sync_wallet(wallet.id).await?;
            info!("{} new transactions for {}, balance: {}", summary.new_transactions, wallet.display_name(), format_sol_with_symbol(summary.balance));
        },
        Command::SyncAll => {
            let results = engine.sync_all().await?;
            let mut failures = 0;
            for (wallet, result) in results {
                match result {
                    Ok(summary) => info!("{}: {} new transactions, balance: {}", wallet.display_name(), summary.new_transactions, format_sol_with_symbol(summary.balance)),
                    Err(_) => failures += 1
                }
            }
            if failures > 0 {
                bail!("{} wallets could not be synced", failures);
            }
        },
        Command::History { wallet, limit } => {
            let (wallet, txs) = engine.history(&wallet, limit)?;
            info!("Last {} transactions of {}:", txs.len(), wallet.display_name());
            for tx in txs {
                let counterpart = match (tx.kind, tx.counterpart()) {
                    (TransactionKind::Incoming, Some(address)) => format!("from {}", address),
                    (TransactionKind::Outgoing, Some(address)) => format!("to {}", address),
                    (_, None) => "-".to_string()
                };
                info!("{} | {} | {} SOL | {} | {}", tx.created_at, tx.kind, format_signed_sol(tx.amount), counterpart, tx.signature);
            }
        },
        Command::Request { wallet, amount, label, message } => {
            let lamports = parse_amount(&amount)?;
            let request = engine.create_payment_request(&wallet, lamports, label, message)?;
            info!("Payment request #{}: {}", request.id, request.payment_uri);
            info!("QR code: {}", request.qr_code_url);
        },
        Command::Requests { wallet } => {
            let (wallet, requests) = engine.payment_requests(&wallet)?;
            info!("{} payment requests for {}", requests.len(), wallet.display_name());
            for request in requests {
                info!("#{} | {} | {} | {}", request.id, format_sol_with_symbol(request.amount), request.status, request.payment_uri);
            }
        },
        Command::Send { wallet, destination, amount } => {
            let lamports = parse_amount(&amount)?;
            let tx = engine.send(&wallet, &destination, lamports).await?;
            info!("Transaction sent: {}", colorize_str(Color::Green, &tx.signature));
        },
        Command::Monitor { wallets } => monitor(engine, wallets).await?,
        Command::Label { wallet, label } => {
            let wallet = engine.set_label(&wallet, label)?;
            info!("Wallet is now {}", wallet.display_name());
        },
        Command::Export { wallet } => {
            let (wallet, seed) = engine.export_secret(&wallet)?;
            display_seed(&wallet, &seed);
        },
        Command::Delete { wallet, yes } => {
            let wallet = engine.get_wallet(&wallet)?;
            if !yes {
                bail!("Deleting {} removes its encrypted seed for good, run again with --yes", wallet.display_name());
            }
            let (wallet, counts) = engine.delete_wallet(&WalletRef::ById(wallet.id))?;
            info!("Deleted {} ({} transactions, {} payment requests)", wallet.display_name(), counts.transactions, counts.payment_requests);
        }
    }

    Ok(())
}

// Resolve what to watch: stored wallets are synced, raw addresses are only polled
fn resolve_watch_target(engine: &ReconciliationEngine, wallet: &WalletRef) -> Result<(String, Option<u64>)> {
    match engine.get_wallet(wallet) {
        Ok(record) => Ok((record.address, Some(record.id))),
        Err(WalletError::WalletNotFound(WalletRef::ByAddress(address))) if codec::is_valid_address(&address) => {
            warn!("{} is not a stored wallet, its balance is watched without sync", address);
            Ok((address, None))
        },
        Err(e) => Err(e.into())
    }
}

fn display_event(event: WalletEvent) {
    match event {
        WalletEvent::BalanceChanged(change) => info!("{}: balance changed by {} SOL", change.address, format_signed_sol(change.delta())),
        WalletEvent::Synced(summary) => info!("{}: {} new transactions, balance: {}", summary.address, summary.new_transactions, format_sol_with_symbol(summary.balance)),
        WalletEvent::MonitorError(failure) => warn!("{}: {} failed: {}", failure.address, failure.operation, failure.message),
        WalletEvent::MonitorStopped { address } => info!("{}: monitor stopped", address)
    }
}

async fn monitor(engine: &Arc<ReconciliationEngine>, wallets: Vec<WalletRef>) -> Result<()> {
    let targets = wallets.iter()
        .map(|wallet| resolve_watch_target(engine, wallet))
        .collect::<Result<Vec<_>>>()?;

    let cancel = CancellationFlag::new();
    let events = engine.subscribe();
    let mut monitors = JoinSet::new();
    for (address, wallet_id) in targets {
        let engine = Arc::clone(engine);
        let cancel = cancel.clone();
        monitors.spawn(async move {
            engine.monitor(&address, wallet_id, &cancel).await
        });
    }

    let stop_listener = CancellationFlag::new();
    let listener = {
        let stop = stop_listener.clone();
        tokio::spawn(async move {
            forward_events(events, &stop, display_event).await
        })
    };

    info!("Press Ctrl-C to stop monitoring");
    tokio::signal::ctrl_c().await.context("Error while waiting for Ctrl-C")?;
    info!("Stopping monitors...");
    cancel.cancel();

    while let Some(res) = monitors.join_next().await {
        let report = res.context("Monitor task failed")?;
        info!("Monitor stopped after {} polls, {} changes, {} syncs, {} errors", report.polls, report.changes, report.syncs, report.errors);
    }

    // every monitor has emitted its last event by now
    stop_listener.cancel();
    match listener.await {
        Ok(0) => {},
        Ok(dropped) => warn!("{} events were not displayed", dropped),
        Err(e) => error!("Error while waiting for the events listener: {}", e)
    }

    Ok(())
}
