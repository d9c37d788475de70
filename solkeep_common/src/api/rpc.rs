// Request and response types for the chain JSON-RPC methods used by the wallet
// Parameters are positional, so requests are built as tuples of these types

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcContext {
    pub slot: u64
}

// Most "get" methods wrap their value with the slot it was read at
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse<T> {
    pub context: RpcContext,
    pub value: T
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct CommitmentConfig {
    pub commitment: Commitment
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GetSignaturesForAddressConfig {
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    pub commitment: Commitment
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub confirmation_status: Option<Commitment>
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransactionEncoding {
    Json,
    Base58,
    Base64,
    JsonParsed
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GetTransactionConfig {
    pub encoding: TransactionEncoding,
    pub max_supported_transaction_version: u8,
    pub commitment: Commitment
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LoadedAddresses {
    #[serde(default)]
    pub writable: Vec<String>,
    #[serde(default)]
    pub readonly: Vec<String>
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusMeta {
    #[serde(default)]
    pub err: Option<Value>,
    pub fee: u64,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    // Only present for versioned transactions using lookup tables
    #[serde(default)]
    pub loaded_addresses: Option<LoadedAddresses>
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    pub account_keys: Vec<String>,
    #[serde(default)]
    pub recent_blockhash: Option<String>
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UiTransaction {
    pub signatures: Vec<String>,
    pub message: UiMessage
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EncodedConfirmedTransaction {
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub meta: Option<TransactionStatusMeta>,
    pub transaction: UiTransaction
}

impl EncodedConfirmedTransaction {
    // Full ordered account list as indexed by pre/post balances:
    // static keys first, then loaded writable and loaded readonly addresses
    pub fn account_keys(&self) -> Vec<String> {
        let mut keys = self.transaction.message.account_keys.clone();
        if let Some(loaded) = self.meta.as_ref().and_then(|meta| meta.loaded_addresses.as_ref()) {
            keys.extend(loaded.writable.iter().cloned());
            keys.extend(loaded.readonly.iter().cloned());
        }
        keys
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64
}

// Payload sent to a transfer relay by the RPC transmitter
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTransferParams {
    pub from: String,
    pub to: String,
    pub lamports: u64,
    pub recent_blockhash: String,
    // base58 Ed25519 signature of the transfer intent
    pub intent_signature: String
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitTransferResult {
    pub signature: String
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_transaction() {
        let json = r#"{
            "slot": 430,
            "blockTime": 1700000000,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [100, 50, 1],
                "postBalances": [80, 70, 1],
                "loadedAddresses": { "writable": ["W"], "readonly": ["R"] }
            },
            "transaction": {
                "signatures": ["sig"],
                "message": { "accountKeys": ["A", "B", "C"], "recentBlockhash": "hash" }
            }
        }"#;

        let tx: EncodedConfirmedTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.slot, 430);
        assert_eq!(tx.block_time, Some(1700000000));
        assert_eq!(tx.account_keys(), vec!["A", "B", "C", "W", "R"]);
        let meta = tx.meta.unwrap();
        assert_eq!(meta.fee, 5000);
        assert_eq!(meta.pre_balances, vec![100, 50, 1]);
    }

    #[test]
    fn test_serialize_signatures_config() {
        let config = GetSignaturesForAddressConfig {
            limit: 20,
            before: None,
            commitment: Commitment::Confirmed
        };
        let value = serde_json::to_value(("addr", config)).unwrap();
        assert_eq!(value, serde_json::json!(["addr", { "limit": 20, "commitment": "confirmed" }]));
    }
}
