use thiserror::Error;
use chacha20poly1305::Error as CryptoError;
use solkeep_common::{
    json_rpc::JsonRPCError,
    serializer::ReaderError,
    utils::format_sol
};

use crate::{codec::Base58Error, entry::WalletRef};

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid base58 encoding: {}", _0)]
    InvalidEncoding(#[from] Base58Error),
    #[error("Invalid address {}: {}", _0, _1)]
    InvalidAddress(String, Base58Error),
    #[error("Invalid amount: {}", _0)]
    InvalidAmount(String),
    #[error("Master secret is not configured, refusing to encrypt or decrypt wallet secrets")]
    MissingMasterSecret,
    #[error("Error from crypto: {}", _0)]
    CryptoError(CryptoError),
    #[error("Decryption of wallet secret failed: {}", _0)]
    DecryptionFailed(String),
    #[error("Decrypted secret of wallet #{} derives {} instead of {}", id, derived, expected)]
    KeyMismatch {
        id: u64,
        expected: String,
        derived: String
    },
    #[error("Wallet {} was not found", _0)]
    WalletNotFound(WalletRef),
    #[error("Transaction {} is already stored", _0)]
    DuplicateSignature(String),
    #[error("A wallet with address {} is already stored", _0)]
    DuplicateAddress(String),
    #[error("Network error during {} for {}: {}", operation, target, source)]
    NetworkError {
        operation: &'static str,
        target: String,
        #[source]
        source: JsonRPCError
    },
    #[error("RPC error during {} for {}: {}", operation, target, source)]
    RpcError {
        operation: &'static str,
        target: String,
        #[source]
        source: JsonRPCError
    },
    #[error("Address {} has only {} SOL, {} SOL is required", address, format_sol(*balance), format_sol(*required))]
    InsufficientBalance {
        address: String,
        balance: u64,
        required: u64
    },
    #[error("Transfer from {} to {} failed: {}", from, to, message)]
    TransferFailed {
        from: String,
        to: String,
        message: String
    },
    #[error("Invalid payment request URI: {}", _0)]
    InvalidPaymentUri(String),
    #[error("Unexpected error on database: {}", _0)]
    DatabaseError(#[from] sled::Error),
    #[error("Corrupted {} record in database: {}", _0, _1)]
    CorruptedRecord(&'static str, ReaderError),
    #[error(transparent)]
    IOError(#[from] std::io::Error)
}

impl WalletError {
    // Map a JSON-RPC failure to the network or RPC variant
    pub fn from_rpc(operation: &'static str, target: impl Into<String>, source: JsonRPCError) -> Self {
        let target = target.into();
        if source.is_transport_error() {
            Self::NetworkError { operation, target, source }
        } else {
            Self::RpcError { operation, target, source }
        }
    }

    // Errors coming from the remote node, recoverable on a later attempt
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::RpcError { .. })
    }
}
