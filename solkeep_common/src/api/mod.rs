pub mod rpc;
pub mod wallet;
