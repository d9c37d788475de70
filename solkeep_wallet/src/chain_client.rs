use async_trait::async_trait;
use log::debug;
use solkeep_common::{
    api::rpc::{
        Commitment,
        CommitmentConfig,
        EncodedConfirmedTransaction,
        GetSignaturesForAddressConfig,
        GetTransactionConfig,
        LatestBlockhash,
        RpcResponse,
        SignatureInfo,
        TransactionEncoding
    },
    json_rpc::JsonRPCClient
};
use crate::error::WalletError;

// Everything the reconciliation needs from a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetail {
    pub signature: String,
    // static keys followed by loaded writable then readonly addresses
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub fee: u64,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool
}

impl TransactionDetail {
    pub fn from_encoded(signature: String, tx: EncodedConfirmedTransaction) -> Self {
        let account_keys = tx.account_keys();
        let (pre_balances, post_balances, fee, failed) = match tx.meta {
            Some(meta) => (meta.pre_balances, meta.post_balances, meta.fee, meta.err.is_some()),
            None => (Vec::new(), Vec::new(), 0, false)
        };

        Self {
            signature,
            account_keys,
            pre_balances,
            post_balances,
            fee,
            slot: tx.slot,
            block_time: tx.block_time,
            failed
        }
    }

    pub fn account_index(&self, address: &str) -> Option<usize> {
        self.account_keys.iter().position(|key| key == address)
    }

    // Signed lamports change of an account, None if it is not part of the transaction
    // or the change does not fit in an i64
    pub fn balance_delta_for(&self, address: &str) -> Option<i64> {
        let index = self.account_index(address)?;
        let pre = *self.pre_balances.get(index)?;
        let post = *self.post_balances.get(index)?;
        i64::try_from(i128::from(post) - i128::from(pre)).ok()
    }
}

// Read-only view of the chain used by the engine, no retries at this level
#[async_trait]
pub trait ChainClient: Send + Sync {
    // Lamports held by the address
    async fn get_balance(&self, address: &str) -> Result<u64, WalletError>;

    // Most recent first, at most `limit` entries
    async fn list_signatures(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>, WalletError>;

    // None when the node never saw the transaction or pruned it
    async fn get_transaction_detail(&self, signature: &str) -> Result<Option<TransactionDetail>, WalletError>;

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, WalletError>;
}

pub struct RpcChainClient {
    client: JsonRPCClient,
    commitment: Commitment
}

impl RpcChainClient {
    pub fn new(rpc_url: String) -> Result<Self, WalletError> {
        let client = JsonRPCClient::new(rpc_url.clone())
            .map_err(|e| WalletError::from_rpc("connect", rpc_url, e))?;

        Ok(Self {
            client,
            commitment: Commitment::default()
        })
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn get_target(&self) -> &str {
        self.client.get_target()
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_balance(&self, address: &str) -> Result<u64, WalletError> {
        debug!("getBalance {}", address);
        let response: RpcResponse<u64> = self.client.call_with("getBalance", &(address, CommitmentConfig {
            commitment: self.commitment
        })).await.map_err(|e| WalletError::from_rpc("getBalance", address, e))?;

        Ok(response.value)
    }

    async fn list_signatures(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>, WalletError> {
        debug!("getSignaturesForAddress {} limit {}", address, limit);
        let mut signatures: Vec<SignatureInfo> = self.client.call_with("getSignaturesForAddress", &(address, GetSignaturesForAddressConfig {
            limit,
            before: None,
            commitment: self.commitment
        })).await.map_err(|e| WalletError::from_rpc("getSignaturesForAddress", address, e))?;

        signatures.truncate(limit);
        Ok(signatures)
    }

    async fn get_transaction_detail(&self, signature: &str) -> Result<Option<TransactionDetail>, WalletError> {
        debug!("getTransaction {}", signature);
        let tx: Option<EncodedConfirmedTransaction> = self.client.call_with("getTransaction", &(signature, GetTransactionConfig {
            encoding: TransactionEncoding::Json,
            max_supported_transaction_version: 0,
            commitment: self.commitment
        })).await.map_err(|e| WalletError::from_rpc("getTransaction", signature, e))?;

        Ok(tx.map(|tx| TransactionDetail::from_encoded(signature.to_string(), tx)))
    }

    async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, WalletError> {
        debug!("getLatestBlockhash");
        let response: RpcResponse<LatestBlockhash> = self.client.call_with("getLatestBlockhash", &[CommitmentConfig {
            commitment: self.commitment
        }]).await.map_err(|e| WalletError::from_rpc("getLatestBlockhash", self.client.get_target(), e))?;

        Ok(response.value)
    }
}
