use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex
    }
};
use async_trait::async_trait;
use solkeep_common::{
    api::rpc::{LatestBlockhash, SignatureInfo},
    json_rpc::JsonRPCError
};
use tokio::time::Instant;
use crate::chain_client::TransactionDetail;
use super::*;

const MASTER_SECRET: &str = "engine test secret";
const POLL: Duration = Duration::from_secs(10);

#[derive(Default)]
struct MockChain {
    // each poll pops a balance, the last one sticks
    balances: Mutex<VecDeque<u64>>,
    failing_balance_calls: AtomicUsize,
    signatures: Mutex<Vec<SignatureInfo>>,
    details: Mutex<HashMap<String, TransactionDetail>>,
    detail_requests: Mutex<Vec<String>>,
    calls: AtomicUsize
}

impl MockChain {
    fn with_balances(balances: &[u64]) -> Self {
        let chain = Self::default();
        chain.balances.lock().unwrap().extend(balances.iter().copied());
        chain
    }

    fn set_signatures(&self, signatures: &[&str]) {
        *self.signatures.lock().unwrap() = signatures.iter()
            .map(|signature| SignatureInfo {
                signature: signature.to_string(),
                slot: 1,
                err: None,
                memo: None,
                block_time: Some(1_700_000_000),
                confirmation_status: None
            })
            .collect();
    }

    fn add_detail(&self, signature: &str, keys: &[&str], pre: &[u64], post: &[u64]) {
        self.details.lock().unwrap().insert(signature.to_string(), TransactionDetail {
            signature: signature.to_string(),
            account_keys: keys.iter().map(|k| k.to_string()).collect(),
            pre_balances: pre.to_vec(),
            post_balances: post.to_vec(),
            fee: 5,
            slot: 77,
            block_time: Some(1_700_000_100),
            failed: false
        });
    }

    fn detail_requests_for(&self, signature: &str) -> usize {
        self.detail_requests.lock().unwrap().iter().filter(|s| *s == signature).count()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn rpc_failure(operation: &'static str) -> WalletError {
    WalletError::RpcError {
        operation,
        target: "mock".to_string(),
        source: JsonRPCError::MissingResult
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_balance(&self, _: &str) -> Result<u64, WalletError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_balance_calls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_balance_calls.store(failing - 1, Ordering::SeqCst);
            return Err(rpc_failure("getBalance"))
        }

        let mut balances = self.balances.lock().unwrap();
        let balance = if balances.len() > 1 { balances.pop_front() } else { balances.front().copied() };
        Ok(balance.unwrap_or(0))
    }

    async fn list_signatures(&self, _: &str, limit: usize) -> Result<Vec<SignatureInfo>, WalletError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.signatures.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn get_transaction_detail(&self, signature: &str) -> Result<Option<TransactionDetail>, WalletError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.detail_requests.lock().unwrap().push(signature.to_string());
        Ok(self.details.lock().unwrap().get(signature).cloned())
    }

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, WalletError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LatestBlockhash {
            blockhash: codec::encode(&[1u8; 32]),
            last_valid_block_height: 100
        })
    }
}

#[derive(Default)]
struct MockTransmitter {
    // (from, to, lamports)
    transfers: Mutex<Vec<(String, String, u64)>>,
    fail: bool
}

#[async_trait]
impl Transmitter for MockTransmitter {
    async fn transfer(&self, seed: &SecretSeed, to: &str, lamports: u64) -> Result<String, WalletError> {
        if self.fail {
            return Err(WalletError::TransferFailed {
                from: seed.address(),
                to: to.to_string(),
                message: "Error: insufficient funds for rent".to_string()
            })
        }

        let mut transfers = self.transfers.lock().unwrap();
        transfers.push((seed.address(), to.to_string(), lamports));
        Ok(format!("sent-{}", transfers.len()))
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        signature_window: 10,
        poll_interval: POLL,
        keepalive_cycles: 3,
        fee_reserve: 5_000
    }
}

fn engine_with(chain: Arc<MockChain>, transmitter: Arc<MockTransmitter>, config: EngineConfig) -> ReconciliationEngine {
    let store = LedgerStore::temporary().unwrap();
    let vault = KeyVault::new(Some(MASTER_SECRET)).unwrap();
    ReconciliationEngine::new(store, vault, chain, transmitter, config)
}

fn engine(chain: Arc<MockChain>) -> ReconciliationEngine {
    engine_with(chain, Arc::new(MockTransmitter::default()), config())
}

fn drain(receiver: &mut broadcast::Receiver<WalletEvent>) -> Vec<WalletEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_create_wallet() {
    let engine = engine(Arc::new(MockChain::default()));
    let (wallet, seed) = engine.create_wallet(Some("savings".to_string())).unwrap();
    assert_eq!(seed.address(), wallet.address);
    assert!(codec::is_valid_address(&wallet.address));

    let (exported, exported_seed) = engine.export_secret(&WalletRef::ByAddress(wallet.address.clone())).unwrap();
    assert_eq!(exported, wallet);
    assert_eq!(exported_seed.as_bytes(), seed.as_bytes());
    assert_eq!(engine.list_wallets().unwrap(), vec![wallet]);
}

#[tokio::test]
async fn test_sync_classifies_incoming() {
    let chain = Arc::new(MockChain::with_balances(&[70]));
    let engine = engine(chain.clone());
    let (wallet, _) = engine.create_wallet(None).unwrap();

    chain.set_signatures(&["sig-in"]);
    chain.add_detail("sig-in", &["payer", wallet.address.as_str()], &[100, 50], &[80, 70]);

    assert_eq!(engine.sync(wallet.id).await.unwrap(), 1);
    let tx = engine.get_store().get_transaction("sig-in").unwrap().unwrap();
    assert_eq!(tx.kind, TransactionKind::Incoming);
    assert_eq!(tx.amount, 20);
    assert_eq!(tx.to_address.as_deref(), Some(wallet.address.as_str()));
    assert_eq!(tx.from_address, None);
    assert_eq!(tx.fee, None);
    assert_eq!(tx.slot, Some(77));
    assert_eq!(tx.created_at, 1_700_000_100);

    let refreshed = engine.get_wallet(&WalletRef::ById(wallet.id)).unwrap();
    assert_eq!(refreshed.last_balance, Some(70));
    assert!(refreshed.last_checked_at.is_some());
}

#[tokio::test]
async fn test_sync_classifies_outgoing() {
    let chain = Arc::new(MockChain::with_balances(&[495]));
    let engine = engine(chain.clone());
    let (wallet, _) = engine.create_wallet(None).unwrap();

    chain.set_signatures(&["sig-out"]);
    chain.add_detail("sig-out", &[wallet.address.as_str(), "receiver"], &[1_000, 0], &[495, 500]);

    assert_eq!(engine.sync(wallet.id).await.unwrap(), 1);
    let tx = engine.get_store().get_transaction("sig-out").unwrap().unwrap();
    assert_eq!(tx.kind, TransactionKind::Outgoing);
    assert_eq!(tx.amount, -505);
    assert_eq!(tx.from_address.as_deref(), Some(wallet.address.as_str()));
    assert_eq!(tx.to_address, None);
    assert_eq!(tx.fee, Some(5));
}

#[tokio::test]
async fn test_sync_records_fee_of_failed_transaction() {
    let chain = Arc::new(MockChain::with_balances(&[995]));
    let engine = engine(chain.clone());
    let (wallet, _) = engine.create_wallet(None).unwrap();

    chain.set_signatures(&["sig-failed"]);
    chain.add_detail("sig-failed", &[wallet.address.as_str(), "receiver"], &[1_000, 0], &[995, 0]);
    chain.details.lock().unwrap().get_mut("sig-failed").unwrap().failed = true;

    assert_eq!(engine.sync(wallet.id).await.unwrap(), 1);
    let tx = engine.get_store().get_transaction("sig-failed").unwrap().unwrap();
    assert_eq!(tx.kind, TransactionKind::Outgoing);
    assert_eq!(tx.amount, -5);
    assert_eq!(tx.fee, Some(5));
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let chain = Arc::new(MockChain::with_balances(&[10]));
    let engine = engine(chain.clone());
    let (wallet, _) = engine.create_wallet(None).unwrap();

    chain.set_signatures(&["a", "b", "pending", "foreign"]);
    chain.add_detail("a", &["x", wallet.address.as_str()], &[100, 0], &[90, 10]);
    chain.add_detail("b", &["x", wallet.address.as_str()], &[100, 10], &[95, 15]);
    // tracked address absent from the accounts
    chain.add_detail("foreign", &["x", "y"], &[100, 0], &[90, 10]);

    assert_eq!(engine.sync(wallet.id).await.unwrap(), 2);
    assert_eq!(engine.sync(wallet.id).await.unwrap(), 0);
    assert_eq!(engine.get_store().count_transactions(wallet.id).unwrap(), 2);

    // stored signatures are never fetched again, skipped ones are retried
    assert_eq!(chain.detail_requests_for("a"), 1);
    assert_eq!(chain.detail_requests_for("b"), 1);
    assert_eq!(chain.detail_requests_for("pending"), 2);
    assert_eq!(chain.detail_requests_for("foreign"), 2);

    // the node now knows the pending transaction
    chain.add_detail("pending", &[wallet.address.as_str()], &[15], &[10]);
    assert_eq!(engine.sync(wallet.id).await.unwrap(), 1);
    assert_eq!(engine.get_store().count_transactions(wallet.id).unwrap(), 3);
}

#[tokio::test]
async fn test_overlapping_windows_do_not_double_insert() {
    let chain = Arc::new(MockChain::with_balances(&[10]));
    let engine = engine(chain.clone());
    let (wallet, _) = engine.create_wallet(None).unwrap();

    chain.add_detail("s1", &[wallet.address.as_str()], &[0], &[10]);
    chain.add_detail("s2", &[wallet.address.as_str()], &[10], &[20]);
    chain.add_detail("s3", &[wallet.address.as_str()], &[20], &[30]);

    chain.set_signatures(&["s2", "s1"]);
    assert_eq!(engine.sync(wallet.id).await.unwrap(), 2);

    chain.set_signatures(&["s3", "s2"]);
    assert_eq!(engine.sync(wallet.id).await.unwrap(), 1);

    let signatures: Vec<String> = engine.history(&WalletRef::ById(wallet.id), 10).unwrap().1
        .into_iter()
        .map(|tx| tx.signature)
        .collect();
    assert_eq!(signatures.len(), 3);
    assert!(signatures.contains(&"s3".to_string()));
}

#[tokio::test]
async fn test_sync_unknown_wallet() {
    let engine = engine(Arc::new(MockChain::default()));
    assert!(matches!(engine.sync(99).await, Err(WalletError::WalletNotFound(WalletRef::ById(99)))));
}

#[tokio::test]
async fn test_sync_all_reports_each_wallet() {
    let chain = Arc::new(MockChain::with_balances(&[1]));
    let engine = engine(chain.clone());
    let (first, _) = engine.create_wallet(None).unwrap();
    let (second, _) = engine.create_wallet(None).unwrap();
    chain.add_detail("shared", &[first.address.as_str(), second.address.as_str()], &[10, 0], &[4, 5]);
    chain.set_signatures(&["shared"]);

    let results = engine.sync_all().await.unwrap();
    assert_eq!(results.len(), 2);
    // one row per signature, the first wallet synced owns it
    let first_summary = results[0].1.as_ref().unwrap();
    assert_eq!(first_summary.new_transactions, 1);
    assert_eq!(results[1].1.as_ref().unwrap().new_transactions, 0);
}

#[tokio::test]
async fn test_send_records_outgoing() {
    let chain = Arc::new(MockChain::with_balances(&[1_000_000]));
    let transmitter = Arc::new(MockTransmitter::default());
    let engine = engine_with(chain.clone(), transmitter.clone(), config());
    let (wallet, _) = engine.create_wallet(None).unwrap();
    let (destination, _) = engine.create_wallet(None).unwrap();

    let tx = engine.send(&WalletRef::ById(wallet.id), &destination.address, 500_000).await.unwrap();
    assert_eq!(tx.signature, "sent-1");
    assert_eq!(tx.amount, -500_000);
    assert_eq!(tx.kind, TransactionKind::Outgoing);
    assert_eq!(tx.to_address.as_deref(), Some(destination.address.as_str()));
    // unknown until confirmed, synced outgoing rows carry it
    assert_eq!(tx.fee, None);
    assert_eq!(engine.get_store().get_transaction("sent-1").unwrap(), Some(tx));

    let transfers = transmitter.transfers.lock().unwrap();
    assert_eq!(*transfers, vec![(wallet.address.clone(), destination.address.clone(), 500_000)]);
}

#[tokio::test]
async fn test_send_validation() {
    let chain = Arc::new(MockChain::with_balances(&[1_000_000]));
    let transmitter = Arc::new(MockTransmitter::default());
    let engine = engine_with(chain.clone(), transmitter.clone(), config());
    let (wallet, _) = engine.create_wallet(None).unwrap();
    let (destination, _) = engine.create_wallet(None).unwrap();
    let from = WalletRef::ById(wallet.id);

    assert!(matches!(engine.send(&from, "not-an-address-0", 10).await, Err(WalletError::InvalidAddress(_, _))));
    assert!(matches!(engine.send(&from, &destination.address, 0).await, Err(WalletError::InvalidAmount(_))));
    // balance must cover the amount and the fee reserve
    assert!(matches!(
        engine.send(&from, &destination.address, 996_000).await,
        Err(WalletError::InsufficientBalance { balance: 1_000_000, required: 1_001_000, .. })
    ));
    assert!(transmitter.transfers.lock().unwrap().is_empty());
    assert_eq!(engine.get_store().count_transactions(wallet.id).unwrap(), 0);
}

#[tokio::test]
async fn test_send_transfer_failure_keeps_message() {
    let chain = Arc::new(MockChain::with_balances(&[1_000_000]));
    let transmitter = Arc::new(MockTransmitter { fail: true, ..Default::default() });
    let engine = engine_with(chain, transmitter, config());
    let (wallet, _) = engine.create_wallet(None).unwrap();
    let (destination, _) = engine.create_wallet(None).unwrap();

    match engine.send(&WalletRef::ById(wallet.id), &destination.address, 10).await {
        Err(WalletError::TransferFailed { message, .. }) => assert_eq!(message, "Error: insufficient funds for rent"),
        other => panic!("unexpected result: {:?}", other.map(|tx| tx.signature))
    }
    assert_eq!(engine.get_store().count_transactions(wallet.id).unwrap(), 0);
}

#[tokio::test]
async fn test_secret_under_other_master_secret_names_wallet() {
    let chain = Arc::new(MockChain::with_balances(&[1_000_000]));
    let transmitter = Arc::new(MockTransmitter::default());
    let engine = engine_with(chain, transmitter.clone(), config());
    let GeneratedKey { address, encrypted_secret, .. } = KeyVault::new(Some("rotated secret")).unwrap().generate().unwrap();
    let wallet = engine.get_store().insert_wallet(NewWallet { address, encrypted_secret, label: None }).unwrap();
    let (destination, _) = engine.create_wallet(None).unwrap();
    let wallet_ref = WalletRef::ById(wallet.id);

    let message = match engine.export_secret(&wallet_ref) {
        Err(e @ WalletError::DecryptionFailed(_)) => e.to_string(),
        other => panic!("unexpected result: {:?}", other.map(|(record, _)| record.id))
    };
    assert!(message.contains(&format!("export of wallet #{} {}", wallet.id, wallet.address)));

    match engine.send(&wallet_ref, &destination.address, 10).await {
        Err(WalletError::DecryptionFailed(message)) => assert!(message.starts_with(&format!("send of wallet #{} ", wallet.id))),
        other => panic!("unexpected result: {:?}", other.map(|tx| tx.signature))
    }
    assert!(transmitter.transfers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_payment_request() {
    let engine = engine(Arc::new(MockChain::default()));
    let (wallet, _) = engine.create_wallet(None).unwrap();

    let request = engine.create_payment_request(&WalletRef::ById(wallet.id), 1_500_000_000, Some("Coffee shop".to_string()), None).unwrap();
    assert_eq!(request.payment_uri, format!("solana:{}?amount=1.5&label=Coffee+shop", wallet.address));
    assert!(request.qr_code_url.starts_with(QR_CODE_SERVICE_URL));
    assert!(request.qr_code_url.contains("size=300x300"));
    assert!(request.qr_code_url.contains("data=solana%3A"));

    let (_, requests) = engine.payment_requests(&WalletRef::ById(wallet.id)).unwrap();
    assert_eq!(requests, vec![request]);

    assert!(matches!(
        engine.create_payment_request(&WalletRef::ById(wallet.id), 0, None, None),
        Err(WalletError::InvalidAmount(_))
    ));
}

#[test]
fn test_uri_amount() {
    assert_eq!(uri_amount(1_000_000_000), "1");
    assert_eq!(uri_amount(1), "0.000000001");
    assert_eq!(uri_amount(250_000_000), "0.25");
}

#[tokio::test]
async fn test_refresh_and_delete() {
    let chain = Arc::new(MockChain::with_balances(&[42]));
    let engine = engine(chain.clone());
    let (wallet, _) = engine.create_wallet(None).unwrap();
    let wallet_ref = WalletRef::ById(wallet.id);

    let refreshed = engine.refresh_balance(&wallet_ref).await.unwrap();
    assert_eq!(refreshed.last_balance, Some(42));

    chain.set_signatures(&["s"]);
    chain.add_detail("s", &[wallet.address.as_str()], &[0], &[42]);
    engine.sync(wallet.id).await.unwrap();
    engine.create_payment_request(&wallet_ref, 10, None, None).unwrap();

    let (_, counts) = engine.delete_wallet(&wallet_ref).unwrap();
    assert_eq!(counts, DeletedCounts { transactions: 1, payment_requests: 1 });
    assert!(matches!(engine.get_wallet(&wallet_ref), Err(WalletError::WalletNotFound(_))));
}

#[tokio::test]
async fn test_forward_events_returns_after_lagging() {
    let engine = engine(Arc::new(MockChain::default()));
    let events = engine.subscribe();
    // more stop events than the channel holds, the engine keeps the sender alive
    for i in 0..100 {
        engine.propagate_event(WalletEvent::MonitorStopped { address: i.to_string() });
    }

    let stop = CancellationFlag::new();
    stop.cancel();
    let mut received = Vec::new();
    let forwarding = forward_events(events, &stop, |event| received.push(event));
    let dropped = tokio::time::timeout(Duration::from_secs(5), forwarding).await.unwrap();

    assert_eq!(dropped, 100 - EVENTS_CHANNEL_SIZE as u64);
    assert_eq!(received.len(), EVENTS_CHANNEL_SIZE);
    assert_eq!(received.last(), Some(&WalletEvent::MonitorStopped { address: "99".to_string() }));
}

#[tokio::test]
async fn test_forward_events_flushes_on_stop() {
    let engine = Arc::new(engine(Arc::new(MockChain::default())));
    let events = engine.subscribe();
    let stop = CancellationFlag::new();
    let handle = {
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut received = Vec::new();
            let dropped = forward_events(events, &stop, |event| received.push(event)).await;
            (dropped, received)
        })
    };

    engine.propagate_event(WalletEvent::MonitorStopped { address: "a".to_string() });
    engine.propagate_event(WalletEvent::MonitorStopped { address: "b".to_string() });
    stop.cancel();

    let (dropped, received) = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert_eq!(dropped, 0);
    assert_eq!(received.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_flag_wakes_sleep() {
    let cancel = CancellationFlag::new();
    let sleeper = cancel.clone();
    let start = Instant::now();
    let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(3600)).await });

    tokio::task::yield_now().await;
    cancel.cancel();
    assert!(handle.await.unwrap());
    assert!(start.elapsed() < Duration::from_secs(1));
    // already cancelled flags return at once
    assert!(cancel.sleep(Duration::from_secs(3600)).await);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_emits_changes_and_syncs() {
    let chain = Arc::new(MockChain::with_balances(&[100, 100, 150]));
    let engine = Arc::new(engine(chain.clone()));
    let (wallet, _) = engine.create_wallet(None).unwrap();
    chain.set_signatures(&["deposit"]);
    chain.add_detail("deposit", &["payer", wallet.address.as_str()], &[500, 100], &[450, 150]);
    let mut events = engine.subscribe();

    let cancel = CancellationFlag::new();
    let task = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        let address = wallet.address.clone();
        tokio::spawn(async move { engine.monitor(&address, Some(wallet.id), &cancel).await })
    };

    // entry poll, unchanged poll, changed poll
    tokio::time::sleep(POLL * 2 + POLL / 2).await;
    cancel.cancel();
    let report = task.await.unwrap();
    assert_eq!(report.polls, 3);
    assert_eq!(report.changes, 1);
    assert_eq!(report.syncs, 1);
    assert_eq!(report.errors, 0);

    let events = drain(&mut events);
    assert_eq!(events.len(), 3);
    match &events[0] {
        WalletEvent::BalanceChanged(change) => {
            assert_eq!((change.previous, change.current, change.delta()), (100, 150, 50));
        },
        other => panic!("unexpected event {:?}", other)
    }
    match &events[1] {
        WalletEvent::Synced(summary) => assert_eq!(summary.new_transactions, 1),
        other => panic!("unexpected event {:?}", other)
    }
    assert_eq!(events[2].kind(), NotifyEvent::MonitorStopped);
    assert!(engine.get_store().has_transaction("deposit").unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_survives_rpc_errors() {
    let chain = Arc::new(MockChain::with_balances(&[5]));
    chain.failing_balance_calls.store(2, Ordering::SeqCst);
    let engine = Arc::new(engine(chain.clone()));
    let mut events = engine.subscribe();

    let cancel = CancellationFlag::new();
    let task = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.monitor("watched", None, &cancel).await })
    };

    tokio::time::sleep(POLL * 3 + POLL / 2).await;
    cancel.cancel();
    let report = task.await.unwrap();
    assert_eq!(report.polls, 4);
    assert_eq!(report.errors, 2);
    assert_eq!(report.changes, 0);

    let failures: Vec<MonitorFailure> = drain(&mut events).into_iter()
        .filter_map(|event| match event {
            WalletEvent::MonitorError(failure) => Some(failure),
            _ => None
        })
        .collect();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].operation, "getBalance");
    assert_eq!(failures[0].address, "watched");
}

#[tokio::test(start_paused = true)]
async fn test_monitor_keepalive_sync() {
    let chain = Arc::new(MockChain::with_balances(&[7]));
    let engine = Arc::new(engine(chain.clone()));
    let (wallet, _) = engine.create_wallet(None).unwrap();
    let cancel = CancellationFlag::new();
    let task = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        let address = wallet.address.clone();
        tokio::spawn(async move { engine.monitor(&address, Some(wallet.id), &cancel).await })
    };

    // entry poll then 6 unchanged polls: two keep-alive syncs with 3 cycles
    tokio::time::sleep(POLL * 6 + POLL / 2).await;
    cancel.cancel();
    let report = task.await.unwrap();
    assert_eq!(report.polls, 7);
    assert_eq!(report.syncs, 2);
    assert_eq!(report.changes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_stops_without_rpc_after_cancel() {
    let chain = Arc::new(MockChain::with_balances(&[1]));
    let engine = Arc::new(engine(chain.clone()));
    let cancel = CancellationFlag::new();
    let task = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.monitor("watched", None, &cancel).await })
    };

    tokio::time::sleep(POLL * 2 + POLL / 2).await;
    let calls_before = chain.calls();
    let cancelled_at = Instant::now();
    cancel.cancel();
    let report = task.await.unwrap();

    // woken immediately, well before the next poll
    assert!(cancelled_at.elapsed() < POLL);
    assert_eq!(chain.calls(), calls_before);
    assert_eq!(report.polls, 3);

    // a flag cancelled before start means no RPC at all
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let report = engine.monitor("watched", None, &cancel).await;
    assert_eq!(report.polls, 0);
    assert_eq!(chain.calls(), calls_before);
}
