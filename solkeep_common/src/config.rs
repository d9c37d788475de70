pub const VERSION: &str = env!("BUILD_VERSION");

// Native coin symbol
pub const COIN_SYMBOL: &str = "SOL";
// 9 decimals numbers
pub const COIN_DECIMALS: u8 = 9;
// 1 SOL = 1 000 000 000 lamports
pub const LAMPORTS_PER_SOL: u64 = 10u64.pow(COIN_DECIMALS as u32);

// Public JSON-RPC endpoint used when none is configured
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

// Solana Pay URI scheme used for payment requests
pub const PAYMENT_URI_SCHEME: &str = "solana";
