use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc
    },
    time::Duration
};
use log::{debug, error, info, trace, warn};
use reqwest::Url;
use tokio::sync::{
    broadcast::{
        self,
        error::{RecvError, TryRecvError}
    },
    Notify
};
use solkeep_common::{
    api::wallet::{BalanceChanged, MonitorFailure, NotifyEvent, SyncSummary},
    config::PAYMENT_URI_SCHEME,
    time::{block_time_to_seconds, get_current_time_in_seconds},
    utils::{format_signed_sol, format_sol}
};
use crate::{
    chain_client::ChainClient,
    codec,
    config::{
        DEFAULT_FEE_RESERVE,
        DEFAULT_KEEPALIVE_CYCLES,
        DEFAULT_POLL_INTERVAL,
        DEFAULT_SIGNATURE_WINDOW,
        QR_CODE_SERVICE_URL,
        QR_CODE_SIZE
    },
    entry::{
        NewPaymentRequest,
        NewWallet,
        PaymentRequestRecord,
        TransactionKind,
        TransactionRecord,
        WalletRecord,
        WalletRef
    },
    error::WalletError,
    storage::{DeletedCounts, LedgerStore},
    transmitter::Transmitter,
    vault::{GeneratedKey, KeyVault, SecretSeed}
};

// Capacity of the events channel, slow subscribers lose the oldest events
const EVENTS_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // How many recent signatures are requested per sync
    pub signature_window: usize,
    pub poll_interval: Duration,
    // Unchanged polls before a keep-alive sync, 0 disables it
    pub keepalive_cycles: u32,
    // Lamports kept aside for the network fee when sending
    pub fee_reserve: u64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signature_window: DEFAULT_SIGNATURE_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            keepalive_cycles: DEFAULT_KEEPALIVE_CYCLES,
            fee_reserve: DEFAULT_FEE_RESERVE
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    BalanceChanged(BalanceChanged),
    Synced(SyncSummary),
    MonitorError(MonitorFailure),
    MonitorStopped {
        address: String
    }
}

impl WalletEvent {
    pub fn kind(&self) -> NotifyEvent {
        match self {
            Self::BalanceChanged(_) => NotifyEvent::BalanceChanged,
            Self::Synced(_) => NotifyEvent::Synced,
            Self::MonitorError(_) => NotifyEvent::MonitorError,
            Self::MonitorStopped { .. } => NotifyEvent::MonitorStopped
        }
    }
}

struct CancellationState {
    cancelled: AtomicBool,
    notify: Notify
}

// Shared stop signal for polling loops, cloning shares the same flag
#[derive(Clone)]
pub struct CancellationFlag {
    inner: Arc<CancellationState>
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new()
            })
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    // Resolves once the flag is cancelled
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return
        }
        notified.await
    }

    // Sleep for the duration or until cancelled, returns true if cancelled
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            _ = self.cancelled() => true
        }
    }
}

// Pass every event to the handler until stopped, then flush the ones still buffered.
// Returns how many events were lost because the receiver lagged.
pub async fn forward_events<F>(mut events: broadcast::Receiver<WalletEvent>, stop: &CancellationFlag, mut handler: F) -> u64
where
    F: FnMut(WalletEvent)
{
    let mut dropped = 0;
    loop {
        tokio::select! {
            biased;
            res = events.recv() => match res {
                Ok(event) => handler(event),
                Err(RecvError::Lagged(count)) => {
                    warn!("{} events were dropped", count);
                    dropped += count;
                },
                Err(RecvError::Closed) => return dropped
            },
            _ = stop.cancelled() => break
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => handler(event),
            Err(TryRecvError::Lagged(count)) => {
                warn!("{} events were dropped", count);
                dropped += count;
            },
            Err(TryRecvError::Empty | TryRecvError::Closed) => break
        }
    }
    dropped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorState {
    // No balance observed yet
    Idle,
    Watching {
        balance: u64,
        idle_cycles: u32
    }
}

// What a monitor loop did before being cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorReport {
    pub polls: usize,
    pub changes: usize,
    pub syncs: usize,
    pub errors: usize
}

pub struct ReconciliationEngine {
    store: LedgerStore,
    vault: KeyVault,
    chain: Arc<dyn ChainClient>,
    transmitter: Arc<dyn Transmitter>,
    config: EngineConfig,
    events: broadcast::Sender<WalletEvent>
}

impl ReconciliationEngine {
    pub fn new(store: LedgerStore, vault: KeyVault, chain: Arc<dyn ChainClient>, transmitter: Arc<dyn Transmitter>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CHANNEL_SIZE);
        Self {
            store,
            vault,
            chain,
            transmitter,
            config,
            events
        }
    }

    pub fn get_store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    fn propagate_event(&self, event: WalletEvent) {
        trace!("propagate event {:?}", event.kind());
        // no subscriber is not an error
        let _ = self.events.send(event);
    }

    // Generate a keypair and store it encrypted, the seed is handed back once
    pub fn create_wallet(&self, label: Option<String>) -> Result<(WalletRecord, SecretSeed), WalletError> {
        let GeneratedKey { address, encrypted_secret, seed } = self.vault.generate()?;
        let wallet = self.store.insert_wallet(NewWallet {
            address,
            encrypted_secret,
            label
        })?;

        info!("Created wallet {}", wallet.display_name());
        Ok((wallet, seed))
    }

    pub fn get_wallet(&self, wallet: &WalletRef) -> Result<WalletRecord, WalletError> {
        self.store.resolve(wallet)
    }

    pub fn list_wallets(&self) -> Result<Vec<WalletRecord>, WalletError> {
        self.store.list_wallets()
    }

    pub fn set_label(&self, wallet: &WalletRef, label: Option<String>) -> Result<WalletRecord, WalletError> {
        let record = self.store.resolve(wallet)?;
        self.store.set_label(record.id, label)
    }

    pub fn history(&self, wallet: &WalletRef, limit: usize) -> Result<(WalletRecord, Vec<TransactionRecord>), WalletError> {
        let record = self.store.resolve(wallet)?;
        let txs = self.store.list_transactions(record.id, limit)?;
        Ok((record, txs))
    }

    pub fn payment_requests(&self, wallet: &WalletRef) -> Result<(WalletRecord, Vec<PaymentRequestRecord>), WalletError> {
        let record = self.store.resolve(wallet)?;
        let requests = self.store.list_payment_requests(record.id)?;
        Ok((record, requests))
    }

    // Decrypt the seed on demand, it is never kept by the engine
    pub fn export_secret(&self, wallet: &WalletRef) -> Result<(WalletRecord, SecretSeed), WalletError> {
        let record = self.store.resolve(wallet)?;
        let seed = self.vault.unlock_seed(&record, "export")?;
        Ok((record, seed))
    }

    pub fn delete_wallet(&self, wallet: &WalletRef) -> Result<(WalletRecord, DeletedCounts), WalletError> {
        let record = self.store.resolve(wallet)?;
        let counts = self.store.delete_wallet(record.id)?;
        info!("Deleted wallet {} with {} transactions and {} payment requests", record.display_name(), counts.transactions, counts.payment_requests);
        Ok((record, counts))
    }

    pub async fn refresh_balance(&self, wallet: &WalletRef) -> Result<WalletRecord, WalletError> {
        let record = self.store.resolve(wallet)?;
        let balance = self.chain.get_balance(&record.address).await?;
        self.store.update_balance(record.id, balance, get_current_time_in_seconds())
    }

    // Fetch recent signatures and store those not yet known, returns how many were added
    pub async fn sync(&self, wallet_id: u64) -> Result<usize, WalletError> {
        self.sync_wallet(wallet_id).await.map(|summary| summary.new_transactions)
    }

    pub async fn sync_wallet(&self, wallet_id: u64) -> Result<SyncSummary, WalletError> {
        let wallet = self.store.resolve(&WalletRef::ById(wallet_id))?;
        match self.sync_with_cancel(&wallet, None).await? {
            Some(summary) => Ok(summary),
            // only a cancellation flag interrupts a sync
            None => Ok(SyncSummary {
                wallet_id,
                address: wallet.address,
                new_transactions: 0,
                balance: wallet.last_balance.unwrap_or(0),
                checked_at: wallet.last_checked_at.unwrap_or(0)
            })
        }
    }

    // Sync every stored wallet one after the other, a failure does not stop the others
    pub async fn sync_all(&self) -> Result<Vec<(WalletRecord, Result<SyncSummary, WalletError>)>, WalletError> {
        let wallets = self.store.list_wallets()?;
        let mut results = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            let result = self.sync_wallet(wallet.id).await;
            if let Err(e) = &result {
                warn!("Error while syncing wallet {}: {}", wallet.display_name(), e);
            }
            results.push((wallet, result));
        }

        Ok(results)
    }

    fn classify(&self, wallet: &WalletRecord, detail_signature: &str, delta: i64, fee: u64) -> (TransactionKind, Option<String>, Option<String>, Option<u64>) {
        let kind = TransactionKind::from_delta(delta);
        trace!("{} is {} for {} ({})", detail_signature, kind, wallet.address, delta);
        match kind {
            TransactionKind::Incoming => (kind, None, Some(wallet.address.clone()), None),
            TransactionKind::Outgoing => (kind, Some(wallet.address.clone()), None, Some(fee))
        }
    }

    // Returns None when the flag was raised before the sync completed,
    // rows inserted until then are kept
    async fn sync_with_cancel(&self, wallet: &WalletRecord, cancel: Option<&CancellationFlag>) -> Result<Option<SyncSummary>, WalletError> {
        let cancelled = || cancel.is_some_and(CancellationFlag::is_cancelled);
        debug!("Syncing wallet {}", wallet.display_name());

        if cancelled() {
            return Ok(None)
        }
        let candidates = self.chain.list_signatures(&wallet.address, self.config.signature_window).await?;
        debug!("{} candidate signatures for {}", candidates.len(), wallet.address);

        let mut inserted = 0;
        for info in candidates {
            if self.store.has_transaction(&info.signature)? {
                trace!("{} already stored", info.signature);
                continue;
            }

            if cancelled() {
                return Ok(None)
            }

            let Some(detail) = self.chain.get_transaction_detail(&info.signature).await? else {
                debug!("Transaction {} is not available yet, it will be retried on next sync", info.signature);
                continue;
            };

            let Some(delta) = detail.balance_delta_for(&wallet.address) else {
                warn!("Address {} is not part of transaction {}, skipping it", wallet.address, info.signature);
                continue;
            };
            if detail.failed {
                // balances still moved by the fee paid
                debug!("Transaction {} failed on chain, recording a change of {} lamports for {}", info.signature, delta, wallet.address);
            }

            let (kind, from_address, to_address, fee) = self.classify(wallet, &detail.signature, delta, detail.fee);
            let created_at = detail.block_time
                .or(info.block_time)
                .map(block_time_to_seconds)
                .unwrap_or_else(get_current_time_in_seconds);

            let record = TransactionRecord {
                signature: info.signature,
                wallet_id: wallet.id,
                kind,
                amount: delta,
                from_address,
                to_address,
                fee,
                slot: Some(detail.slot),
                created_at
            };

            match self.store.insert_transaction(&record) {
                Ok(()) => {
                    info!("New {} transaction {} of {} SOL for {}", record.kind, record.signature, format_signed_sol(record.amount), wallet.display_name());
                    inserted += 1;
                },
                Err(WalletError::DuplicateSignature(signature)) => {
                    debug!("Transaction {} was stored concurrently", signature);
                },
                Err(e) => return Err(e)
            }
        }

        if cancelled() {
            return Ok(None)
        }
        let balance = self.chain.get_balance(&wallet.address).await?;
        let checked_at = get_current_time_in_seconds();
        self.store.update_balance(wallet.id, balance, checked_at)?;

        Ok(Some(SyncSummary {
            wallet_id: wallet.id,
            address: wallet.address.clone(),
            new_transactions: inserted,
            balance,
            checked_at
        }))
    }

    fn report_failure(&self, report: &mut MonitorReport, address: &str, operation: &str, err: &WalletError) {
        report.errors += 1;
        if err.is_remote() {
            warn!("Monitor of {} failed during {}: {}", address, operation, err);
        } else {
            error!("Monitor of {} failed during {}: {}", address, operation, err);
        }

        self.propagate_event(WalletEvent::MonitorError(MonitorFailure {
            address: address.to_string(),
            operation: operation.to_string(),
            message: err.to_string()
        }));
    }

    async fn monitor_sync(&self, wallet_id: u64, address: &str, cancel: &CancellationFlag, report: &mut MonitorReport) {
        let result = match self.store.resolve(&WalletRef::ById(wallet_id)) {
            Ok(wallet) => self.sync_with_cancel(&wallet, Some(cancel)).await,
            Err(e) => Err(e)
        };

        match result {
            Ok(Some(summary)) => {
                report.syncs += 1;
                self.propagate_event(WalletEvent::Synced(summary));
            },
            Ok(None) => debug!("Sync of {} interrupted by cancellation", address),
            Err(e) => self.report_failure(report, address, "sync", &e)
        }
    }

    // Poll the balance of an address until cancelled.
    // Balance changes are published as events and trigger a sync when the address
    // belongs to a stored wallet. Failures are published and never stop the loop.
    pub async fn monitor(&self, address: &str, wallet_id: Option<u64>, cancel: &CancellationFlag) -> MonitorReport {
        info!("Monitoring {} every {:?}", address, self.config.poll_interval);
        let mut report = MonitorReport::default();
        let mut state = MonitorState::Idle;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            report.polls += 1;
            match (state, self.chain.get_balance(address).await) {
                (_, Err(e)) => self.report_failure(&mut report, address, "getBalance", &e),
                (MonitorState::Idle, Ok(balance)) => {
                    debug!("Initial balance of {} is {} SOL", address, format_sol(balance));
                    state = MonitorState::Watching {
                        balance,
                        idle_cycles: 0
                    };
                },
                (MonitorState::Watching { balance: previous, .. }, Ok(current)) if previous != current => {
                    let change = BalanceChanged {
                        address: address.to_string(),
                        previous,
                        current
                    };
                    info!("Balance of {} changed by {} SOL, now {} SOL", address, format_signed_sol(change.delta()), format_sol(current));
                    report.changes += 1;
                    self.propagate_event(WalletEvent::BalanceChanged(change));
                    state = MonitorState::Watching {
                        balance: current,
                        idle_cycles: 0
                    };

                    if let Some(wallet_id) = wallet_id {
                        self.monitor_sync(wallet_id, address, cancel, &mut report).await;
                    }
                },
                (MonitorState::Watching { balance, idle_cycles }, Ok(_)) => {
                    let idle_cycles = idle_cycles + 1;
                    let keepalive = self.config.keepalive_cycles > 0 && idle_cycles >= self.config.keepalive_cycles;
                    state = MonitorState::Watching {
                        balance,
                        idle_cycles: if keepalive { 0 } else { idle_cycles }
                    };

                    if keepalive {
                        debug!("Keep-alive for {} after {} unchanged polls", address, idle_cycles);
                        if let Some(wallet_id) = wallet_id {
                            self.monitor_sync(wallet_id, address, cancel, &mut report).await;
                        }
                    }
                }
            }

            if cancel.sleep(self.config.poll_interval).await {
                break;
            }
        }

        info!("Stopped monitoring {}", address);
        self.propagate_event(WalletEvent::MonitorStopped {
            address: address.to_string()
        });
        report
    }

    // Validate, check the live balance and hand the transfer to the transmitter.
    // The outgoing row is stored as soon as a signature is returned.
    pub async fn send(&self, wallet: &WalletRef, destination: &str, lamports: u64) -> Result<TransactionRecord, WalletError> {
        codec::decode_pubkey(destination)
            .map_err(|e| WalletError::InvalidAddress(destination.to_string(), e))?;
        if lamports == 0 {
            return Err(WalletError::InvalidAmount("amount must be greater than zero".into()))
        }
        let amount = i64::try_from(lamports)
            .map_err(|_| WalletError::InvalidAmount(format!("{} lamports is too large", lamports)))?;
        let required = lamports.checked_add(self.config.fee_reserve)
            .ok_or_else(|| WalletError::InvalidAmount(format!("{} lamports is too large", lamports)))?;

        let record = self.store.resolve(wallet)?;
        let balance = self.chain.get_balance(&record.address).await?;
        if balance < required {
            return Err(WalletError::InsufficientBalance {
                address: record.address,
                balance,
                required
            })
        }

        let signature = {
            let seed = self.vault.unlock_seed(&record, "send")?;
            self.transmitter.transfer(&seed, destination, lamports).await?
        };
        info!("Sent {} SOL from {} to {}: {}", format_sol(lamports), record.display_name(), destination, signature);

        let tx = TransactionRecord {
            signature,
            wallet_id: record.id,
            kind: TransactionKind::Outgoing,
            amount: -amount,
            from_address: Some(record.address.clone()),
            to_address: Some(destination.to_string()),
            // fee and slot are unknown until confirmation, a later sync skips this signature
            fee: None,
            slot: None,
            created_at: get_current_time_in_seconds()
        };

        match self.store.insert_transaction(&tx) {
            Ok(()) => {},
            Err(WalletError::DuplicateSignature(signature)) => debug!("Transaction {} was already synced", signature),
            Err(e) => return Err(e)
        }

        Ok(tx)
    }

    pub fn create_payment_request(&self, wallet: &WalletRef, lamports: u64, label: Option<String>, message: Option<String>) -> Result<PaymentRequestRecord, WalletError> {
        if lamports == 0 {
            return Err(WalletError::InvalidAmount("requested amount must be greater than zero".into()))
        }

        let record = self.store.resolve(wallet)?;
        let payment_uri = build_payment_uri(&record.address, lamports, label.as_deref(), message.as_deref())?;
        let qr_code_url = build_qr_code_url(&payment_uri)?;

        let request = self.store.insert_payment_request(NewPaymentRequest {
            wallet_id: record.id,
            amount: lamports,
            label,
            message,
            payment_uri,
            qr_code_url
        })?;

        info!("Created payment request #{} of {} SOL for {}", request.id, format_sol(lamports), record.display_name());
        Ok(request)
    }
}

// Decimal SOL amount without trailing zeros, as expected in payment URIs
fn uri_amount(lamports: u64) -> String {
    let amount = format_sol(lamports);
    amount.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn build_payment_uri(address: &str, lamports: u64, label: Option<&str>, message: Option<&str>) -> Result<String, WalletError> {
    let mut uri = Url::parse(&format!("{}:{}", PAYMENT_URI_SCHEME, address))
        .map_err(|e| WalletError::InvalidPaymentUri(e.to_string()))?;

    {
        let mut query = uri.query_pairs_mut();
        query.append_pair("amount", &uri_amount(lamports));
        if let Some(label) = label {
            query.append_pair("label", label);
        }
        if let Some(message) = message {
            query.append_pair("message", message);
        }
    }

    Ok(uri.to_string())
}

pub fn build_qr_code_url(payment_uri: &str) -> Result<String, WalletError> {
    Url::parse_with_params(QR_CODE_SERVICE_URL, &[("size", QR_CODE_SIZE), ("data", payment_uri)])
        .map(|url| url.to_string())
        .map_err(|e| WalletError::InvalidPaymentUri(e.to_string()))
}

#[cfg(test)]
mod tests;
