use std::path::Path;
use sled::{
    transaction::{
        ConflictableTransactionError,
        TransactionError,
        Transactional
    },
    Db,
    IVec,
    Tree
};
use log::{debug, trace};
use solkeep_common::{
    serializer::Serializer,
    time::{get_current_time_in_seconds, TimestampSeconds}
};
use crate::{
    entry::{
        NewPaymentRequest,
        NewWallet,
        PaymentRequestRecord,
        PaymentStatus,
        TransactionRecord,
        WalletRecord,
        WalletRef
    },
    error::WalletError
};


const WALLETS_TREE: &str = "wallets";
// address -> wallet id
const ADDRESSES_TREE: &str = "addresses";
// signature -> transaction
const TRANSACTIONS_TREE: &str = "transactions";
// wallet id ++ created_at ++ sequence -> signature
const WALLET_TRANSACTIONS_TREE: &str = "wallet_transactions";
const PAYMENT_REQUESTS_TREE: &str = "payment_requests";
// wallet id ++ request id -> empty
const WALLET_REQUESTS_TREE: &str = "wallet_requests";

// Rows removed by a cascading wallet delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeletedCounts {
    pub transactions: usize,
    pub payment_requests: usize
}

// Persistent ledger of wallets, transactions and payment requests
pub struct LedgerStore {
    db: Db,
    wallets: Tree,
    addresses: Tree,
    transactions: Tree,
    wallet_transactions: Tree,
    payment_requests: Tree,
    wallet_requests: Tree,
    // Abort the next cascading delete right before the wallet row is removed
    #[cfg(test)]
    fail_next_delete: std::sync::atomic::AtomicBool
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn recency_key(wallet_id: u64, created_at: TimestampSeconds, sequence: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[0..8].copy_from_slice(&wallet_id.to_be_bytes());
    key[8..16].copy_from_slice(&created_at.to_be_bytes());
    key[16..24].copy_from_slice(&sequence.to_be_bytes());
    key
}

fn request_index_key(wallet_id: u64, request_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[0..8].copy_from_slice(&wallet_id.to_be_bytes());
    key[8..16].copy_from_slice(&request_id.to_be_bytes());
    key
}

fn read_u64_key(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Some(u64::from_be_bytes(buf))
}

fn decode_record<T: Serializer>(kind: &'static str, bytes: &[u8]) -> Result<T, WalletError> {
    T::from_bytes(bytes).map_err(|e| WalletError::CorruptedRecord(kind, e))
}

// Collapse a failed sled transaction into the error that aborted it
fn from_transaction_error(err: TransactionError<WalletError>) -> WalletError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => WalletError::DatabaseError(e)
    }
}

impl LedgerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        debug!("Opening ledger store at {}", path.as_ref().display());
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self, WalletError> {
        Ok(Self {
            wallets: db.open_tree(WALLETS_TREE)?,
            addresses: db.open_tree(ADDRESSES_TREE)?,
            transactions: db.open_tree(TRANSACTIONS_TREE)?,
            wallet_transactions: db.open_tree(WALLET_TRANSACTIONS_TREE)?,
            payment_requests: db.open_tree(PAYMENT_REQUESTS_TREE)?,
            wallet_requests: db.open_tree(WALLET_REQUESTS_TREE)?,
            db,
            #[cfg(test)]
            fail_next_delete: std::sync::atomic::AtomicBool::new(false)
        })
    }

    // In-memory database removed on drop
    #[cfg(test)]
    pub(crate) fn temporary() -> Result<Self, WalletError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    #[cfg(test)]
    pub(crate) fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    // sled ids start at zero, wallet and request ids start at one
    fn next_id(&self) -> Result<u64, WalletError> {
        Ok(self.db.generate_id()? + 1)
    }

    pub fn insert_wallet(&self, new: NewWallet) -> Result<WalletRecord, WalletError> {
        trace!("insert wallet {}", new.address);
        let record = WalletRecord {
            id: self.next_id()?,
            address: new.address,
            encrypted_secret: new.encrypted_secret,
            label: new.label,
            last_balance: None,
            last_checked_at: None,
            created_at: get_current_time_in_seconds()
        };
        let key = id_key(record.id);
        let value = record.to_bytes();

        (&self.wallets, &self.addresses).transaction(|(wallets, addresses)| {
            if addresses.get(record.address.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(WalletError::DuplicateAddress(record.address.clone())))
            }

            addresses.insert(record.address.as_bytes(), key.as_slice())?;
            wallets.insert(key.as_slice(), value.as_slice())?;
            Ok(())
        }).map_err(from_transaction_error)?;

        debug!("Stored wallet {}", record.display_name());
        Ok(record)
    }

    pub fn get_wallet(&self, id: u64) -> Result<Option<WalletRecord>, WalletError> {
        trace!("get wallet {}", id);
        match self.wallets.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode_record("wallet", &bytes)?)),
            None => Ok(None)
        }
    }

    pub fn get_wallet_by_address(&self, address: &str) -> Result<Option<WalletRecord>, WalletError> {
        trace!("get wallet by address {}", address);
        let Some(key) = self.addresses.get(address.as_bytes())? else {
            return Ok(None)
        };

        match self.wallets.get(&key)? {
            Some(bytes) => Ok(Some(decode_record("wallet", &bytes)?)),
            None => Ok(None)
        }
    }

    pub fn resolve(&self, wallet: &WalletRef) -> Result<WalletRecord, WalletError> {
        let record = match wallet {
            WalletRef::ById(id) => self.get_wallet(*id)?,
            WalletRef::ByAddress(address) => self.get_wallet_by_address(address)?
        };

        record.ok_or_else(|| WalletError::WalletNotFound(wallet.clone()))
    }

    // Ordered by id, which follows creation order
    pub fn list_wallets(&self) -> Result<Vec<WalletRecord>, WalletError> {
        trace!("list wallets");
        self.wallets.iter()
            .map(|res| {
                let (_, value) = res?;
                decode_record("wallet", &value)
            })
            .collect()
    }

    // Read-modify-write of a wallet row, atomic against concurrent edits
    fn modify_wallet<F>(&self, id: u64, f: F) -> Result<WalletRecord, WalletError>
    where
        F: Fn(&mut WalletRecord)
    {
        let key = id_key(id);
        self.wallets.transaction(|wallets| {
            let Some(bytes) = wallets.get(&key)? else {
                return Err(ConflictableTransactionError::Abort(WalletError::WalletNotFound(WalletRef::ById(id))))
            };

            let mut record: WalletRecord = decode_record("wallet", &bytes)
                .map_err(ConflictableTransactionError::Abort)?;
            f(&mut record);
            wallets.insert(key.as_slice(), record.to_bytes())?;
            Ok(record)
        }).map_err(from_transaction_error)
    }

    pub fn set_label(&self, id: u64, label: Option<String>) -> Result<WalletRecord, WalletError> {
        trace!("set label of wallet {}", id);
        self.modify_wallet(id, |record| record.label = label.clone())
    }

    pub fn update_balance(&self, id: u64, balance: u64, checked_at: TimestampSeconds) -> Result<WalletRecord, WalletError> {
        trace!("update balance of wallet {} to {}", id, balance);
        self.modify_wallet(id, |record| {
            record.last_balance = Some(balance);
            record.last_checked_at = Some(checked_at);
        })
    }

    pub fn has_transaction(&self, signature: &str) -> Result<bool, WalletError> {
        trace!("has transaction {}", signature);
        Ok(self.transactions.contains_key(signature.as_bytes())?)
    }

    pub fn insert_transaction(&self, tx: &TransactionRecord) -> Result<(), WalletError> {
        trace!("insert transaction {} for wallet {}", tx.signature, tx.wallet_id);
        let sequence = self.db.generate_id()?;
        let index_key = recency_key(tx.wallet_id, tx.created_at, sequence);
        let wallet_key = id_key(tx.wallet_id);
        let value = tx.to_bytes();

        (&self.wallets, &self.transactions, &self.wallet_transactions).transaction(|(wallets, transactions, wallet_transactions)| {
            if wallets.get(&wallet_key)?.is_none() {
                return Err(ConflictableTransactionError::Abort(WalletError::WalletNotFound(WalletRef::ById(tx.wallet_id))))
            }

            if transactions.get(tx.signature.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(WalletError::DuplicateSignature(tx.signature.clone())))
            }

            transactions.insert(tx.signature.as_bytes(), value.as_slice())?;
            wallet_transactions.insert(index_key.as_slice(), tx.signature.as_bytes())?;
            Ok(())
        }).map_err(from_transaction_error)
    }

    pub fn get_transaction(&self, signature: &str) -> Result<Option<TransactionRecord>, WalletError> {
        trace!("get transaction {}", signature);
        match self.transactions.get(signature.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record("transaction", &bytes)?)),
            None => Ok(None)
        }
    }

    // Most recent first, ties broken by insertion order
    pub fn list_transactions(&self, wallet_id: u64, limit: usize) -> Result<Vec<TransactionRecord>, WalletError> {
        trace!("list transactions of wallet {}", wallet_id);
        let mut txs = Vec::new();
        for res in self.wallet_transactions.scan_prefix(id_key(wallet_id)).rev() {
            if txs.len() >= limit {
                break;
            }

            let (_, signature) = res?;
            match self.transactions.get(&signature)? {
                Some(bytes) => txs.push(decode_record("transaction", &bytes)?),
                None => debug!("Dangling recency index entry for wallet {}", wallet_id)
            }
        }

        Ok(txs)
    }

    pub fn count_transactions(&self, wallet_id: u64) -> Result<usize, WalletError> {
        trace!("count transactions of wallet {}", wallet_id);
        let mut count = 0;
        for res in self.wallet_transactions.scan_prefix(id_key(wallet_id)).keys() {
            res?;
            count += 1;
        }
        Ok(count)
    }

    pub fn insert_payment_request(&self, new: NewPaymentRequest) -> Result<PaymentRequestRecord, WalletError> {
        trace!("insert payment request for wallet {}", new.wallet_id);
        let record = PaymentRequestRecord {
            id: self.next_id()?,
            wallet_id: new.wallet_id,
            amount: new.amount,
            label: new.label,
            message: new.message,
            payment_uri: new.payment_uri,
            qr_code_url: new.qr_code_url,
            status: PaymentStatus::Pending,
            created_at: get_current_time_in_seconds(),
            fulfilled_at: None
        };
        let wallet_key = id_key(record.wallet_id);
        let key = id_key(record.id);
        let index_key = request_index_key(record.wallet_id, record.id);
        let value = record.to_bytes();

        (&self.wallets, &self.payment_requests, &self.wallet_requests).transaction(|(wallets, requests, wallet_requests)| {
            if wallets.get(&wallet_key)?.is_none() {
                return Err(ConflictableTransactionError::Abort(WalletError::WalletNotFound(WalletRef::ById(record.wallet_id))))
            }

            requests.insert(key.as_slice(), value.as_slice())?;
            wallet_requests.insert(index_key.as_slice(), Vec::new())?;
            Ok(())
        }).map_err(from_transaction_error)?;

        Ok(record)
    }

    // Newest first
    pub fn list_payment_requests(&self, wallet_id: u64) -> Result<Vec<PaymentRequestRecord>, WalletError> {
        trace!("list payment requests of wallet {}", wallet_id);
        let mut requests = Vec::new();
        for res in self.wallet_requests.scan_prefix(id_key(wallet_id)).keys().rev() {
            let key = res?;
            let Some(request_id) = read_u64_key(&key, 8) else {
                continue;
            };

            if let Some(bytes) = self.payment_requests.get(id_key(request_id))? {
                requests.push(decode_record("payment request", &bytes)?);
            }
        }

        Ok(requests)
    }

    // Remove a wallet with all its transactions and payment requests.
    // Every tree is updated in a single transaction: on failure nothing changes.
    pub fn delete_wallet(&self, id: u64) -> Result<DeletedCounts, WalletError> {
        debug!("Deleting wallet {} and its rows", id);
        let prefix = id_key(id);
        let tx_index: Vec<(IVec, IVec)> = self.wallet_transactions.scan_prefix(prefix)
            .collect::<Result<_, _>>()?;
        let request_index: Vec<IVec> = self.wallet_requests.scan_prefix(prefix)
            .keys()
            .collect::<Result<_, _>>()?;

        #[cfg(test)]
        let inject_failure = self.fail_next_delete.swap(false, std::sync::atomic::Ordering::SeqCst);
        #[cfg(not(test))]
        let inject_failure = false;

        (
            &self.wallets,
            &self.addresses,
            &self.transactions,
            &self.wallet_transactions,
            &self.payment_requests,
            &self.wallet_requests
        ).transaction(|(wallets, addresses, transactions, wallet_transactions, requests, wallet_requests)| {
            let Some(bytes) = wallets.get(prefix)? else {
                return Err(ConflictableTransactionError::Abort(WalletError::WalletNotFound(WalletRef::ById(id))))
            };
            let record: WalletRecord = decode_record("wallet", &bytes)
                .map_err(ConflictableTransactionError::Abort)?;

            for (key, signature) in &tx_index {
                transactions.remove(&signature[..])?;
                wallet_transactions.remove(&key[..])?;
            }

            for key in &request_index {
                if let Some(request_id) = read_u64_key(key, 8) {
                    requests.remove(id_key(request_id).as_slice())?;
                }
                wallet_requests.remove(&key[..])?;
            }

            if inject_failure {
                return Err(ConflictableTransactionError::Abort(WalletError::IOError(std::io::Error::other("injected delete failure"))))
            }

            addresses.remove(record.address.as_bytes())?;
            wallets.remove(prefix.as_slice())?;
            Ok(())
        }).map_err(from_transaction_error)?;

        Ok(DeletedCounts {
            transactions: tx_index.len(),
            payment_requests: request_index.len()
        })
    }

    pub async fn flush_async(&self) -> Result<(), WalletError> {
        trace!("Flushing ledger store");
        self.db.flush_async().await?;
        Ok(())
    }
}
