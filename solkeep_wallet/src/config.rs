use std::time::Duration;

// Directory used for the ledger database when none is specified
pub const DEFAULT_DB_PATH: &str = "solkeep_db";
pub const DEFAULT_LOG_FILENAME: &str = "solkeep-wallet.log";

// Environment variables read by the CLI
pub const MASTER_SECRET_ENV: &str = "SOLKEEP_MASTER_SECRET";
pub const RPC_URL_ENV: &str = "SOLKEEP_RPC_URL";

// Symmetric key size for the seed cipher
pub const KEY_SIZE: usize = 32;
// Ed25519 seed size
pub const SEED_SIZE: usize = 32;
// BLAKE3 derive_key context for the master secret
pub const KEY_DERIVATION_CONTEXT: &str = "solkeep 2024-03-01 wallet seed encryption key";

// Number of most recent signatures inspected by each sync
pub const DEFAULT_SIGNATURE_WINDOW: usize = 20;
// Delay between two balance polls of the monitor
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
// Unchanged polls before the monitor runs a keep-alive sync
pub const DEFAULT_KEEPALIVE_CYCLES: u32 = 20;
// Lamports kept aside for the network fee when checking a send
pub const DEFAULT_FEE_RESERVE: u64 = 5_000;
pub const DEFAULT_HISTORY_LIMIT: usize = 25;

// Binary invoked by the external transmitter
pub const DEFAULT_TRANSFER_TOOL: &str = "solana";
// JSON-RPC method exposed by the transfer relay
pub const RELAY_SUBMIT_METHOD: &str = "submitTransfer";

// QR image service, the payment URI is passed as the data parameter
pub const QR_CODE_SERVICE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";
pub const QR_CODE_SIZE: &str = "300x300";
