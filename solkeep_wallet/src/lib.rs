pub mod codec;
pub mod cipher;
pub mod config;
pub mod entry;
pub mod error;
pub mod vault;
pub mod storage;
pub mod chain_client;
pub mod transmitter;
pub mod engine;
