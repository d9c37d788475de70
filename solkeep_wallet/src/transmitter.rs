//! Outbound transfers. Building and broadcasting the chain transaction is
//! delegated: either to a relay reached over JSON-RPC with a locally signed
//! transfer intent, or to an external command line tool.

use std::{io::Write, sync::Arc};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use log::{debug, trace, warn};
use serde::Deserialize;
use tokio::process::Command;
use zeroize::Zeroizing;
use solkeep_common::{
    api::rpc::{SubmitTransferParams, SubmitTransferResult},
    json_rpc::JsonRPCClient,
    utils::format_sol
};
use crate::{
    chain_client::ChainClient,
    codec,
    error::WalletError,
    vault::SecretSeed
};

const TRANSFER_INTENT_DOMAIN: &[u8] = b"solkeep/transfer-intent/v1";

#[async_trait]
pub trait Transmitter: Send + Sync {
    // Send lamports from the seed's account, returns the transaction signature
    async fn transfer(&self, seed: &SecretSeed, to: &str, lamports: u64) -> Result<String, WalletError>;
}

// Canonical bytes signed by the sender: domain, from, to, lamports (LE), blockhash
pub fn transfer_intent_message(from: &[u8; 32], to: &[u8; 32], lamports: u64, recent_blockhash: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(TRANSFER_INTENT_DOMAIN.len() + 32 + 32 + 8 + recent_blockhash.len());
    message.extend_from_slice(TRANSFER_INTENT_DOMAIN);
    message.extend_from_slice(from);
    message.extend_from_slice(to);
    message.extend_from_slice(&lamports.to_le_bytes());
    message.extend_from_slice(recent_blockhash);
    message
}

pub fn verify_transfer_intent(params: &SubmitTransferParams) -> Result<(), WalletError> {
    let from = codec::decode_pubkey(&params.from)
        .map_err(|e| WalletError::InvalidAddress(params.from.clone(), e))?;
    let to = codec::decode_pubkey(&params.to)
        .map_err(|e| WalletError::InvalidAddress(params.to.clone(), e))?;
    let blockhash = codec::decode(&params.recent_blockhash)?;
    let signature_bytes = codec::decode(&params.intent_signature)?;

    let invalid = |message: &str| WalletError::TransferFailed {
        from: params.from.clone(),
        to: params.to.clone(),
        message: message.to_string()
    };
    let key = VerifyingKey::from_bytes(&from).map_err(|_| invalid("sender is not a valid public key"))?;
    let signature = Signature::from_slice(&signature_bytes).map_err(|_| invalid("malformed intent signature"))?;
    key.verify(&transfer_intent_message(&from, &to, params.lamports, &blockhash), &signature)
        .map_err(|_| invalid("intent signature does not match"))
}

pub struct RpcTransmitter {
    chain: Arc<dyn ChainClient>,
    relay: JsonRPCClient,
    method: String
}

impl RpcTransmitter {
    pub fn new(chain: Arc<dyn ChainClient>, relay_url: String, method: String) -> Result<Self, WalletError> {
        let relay = JsonRPCClient::new(relay_url.clone())
            .map_err(|e| WalletError::from_rpc("connect", relay_url, e))?;

        Ok(Self {
            chain,
            relay,
            method
        })
    }

    pub fn build_params(seed: &SecretSeed, to: &str, lamports: u64, recent_blockhash: String) -> Result<SubmitTransferParams, WalletError> {
        let to_key = codec::decode_pubkey(to)
            .map_err(|e| WalletError::InvalidAddress(to.to_string(), e))?;
        let blockhash = codec::decode(&recent_blockhash)?;

        let signing_key = seed.signing_key();
        let from_key = signing_key.verifying_key().to_bytes();
        let signature = signing_key.sign(&transfer_intent_message(&from_key, &to_key, lamports, &blockhash));

        Ok(SubmitTransferParams {
            from: codec::encode(&from_key),
            to: to.to_string(),
            lamports,
            recent_blockhash,
            intent_signature: codec::encode(&signature.to_bytes())
        })
    }
}

#[async_trait]
impl Transmitter for RpcTransmitter {
    async fn transfer(&self, seed: &SecretSeed, to: &str, lamports: u64) -> Result<String, WalletError> {
        let blockhash = self.chain.get_latest_blockhash().await?;
        let params = Self::build_params(seed, to, lamports, blockhash.blockhash)?;
        debug!("Submitting transfer of {} lamports from {} to {} through {}", lamports, params.from, to, self.relay.get_target());

        let result: SubmitTransferResult = self.relay.call_with(&self.method, &params).await
            .map_err(|e| WalletError::TransferFailed {
                from: params.from.clone(),
                to: to.to_string(),
                message: e.to_string()
            })?;

        Ok(result.signature)
    }
}

#[derive(Deserialize)]
struct ToolOutput {
    signature: String
}

// Signature from the tool JSON output, or its last non empty line
pub fn parse_tool_output(stdout: &str) -> Option<String> {
    if let Ok(output) = serde_json::from_str::<ToolOutput>(stdout.trim()) {
        return Some(output.signature)
    }

    stdout.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(|line| line.strip_prefix("Signature:").unwrap_or(line).trim().to_string())
        .filter(|line| !line.is_empty())
}

pub struct ExternalToolTransmitter {
    tool: String,
    rpc_url: String
}

impl ExternalToolTransmitter {
    pub fn new(tool: String, rpc_url: String) -> Self {
        Self {
            tool,
            rpc_url
        }
    }

    // Keypair file in the JSON byte array format expected by the tool
    fn write_keypair_file(seed: &SecretSeed) -> Result<tempfile::NamedTempFile, WalletError> {
        let keypair = Zeroizing::new(seed.signing_key().to_keypair_bytes());
        let content = Zeroizing::new(serde_json::to_vec(keypair.as_slice())
            .map_err(|e| WalletError::IOError(e.into()))?);

        // created readable by the owner only
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&content)?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl Transmitter for ExternalToolTransmitter {
    async fn transfer(&self, seed: &SecretSeed, to: &str, lamports: u64) -> Result<String, WalletError> {
        let from = seed.address();
        let failed = |message: String| WalletError::TransferFailed {
            from: from.clone(),
            to: to.to_string(),
            message
        };

        // removed from disk when dropped at the end of this call
        let keypair_file = Self::write_keypair_file(seed)?;
        let amount = format_sol(lamports);
        trace!("running {} transfer {} {}", self.tool, to, amount);

        let output = Command::new(&self.tool)
            .arg("transfer")
            .arg(to)
            .arg(&amount)
            .arg("--keypair")
            .arg(keypair_file.path())
            .arg("--url")
            .arg(&self.rpc_url)
            .arg("--output")
            .arg("json")
            .arg("--allow-unfunded-recipient")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!("cannot run {}: {}", self.tool, e)))?;

        if let Err(e) = keypair_file.close() {
            warn!("Error while removing temporary keypair file: {}", e);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(failed(format!("{} exited with {}: {}", self.tool, output.status, message)))
        }

        parse_tool_output(&stdout).ok_or_else(|| failed(format!("no signature in {} output", self.tool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(byte: u8) -> SecretSeed {
        SecretSeed::from_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_intent_is_signed_by_sender() {
        let sender = seed(1);
        let destination = seed(2).address();
        let blockhash = codec::encode(&[9u8; 32]);

        let params = RpcTransmitter::build_params(&sender, &destination, 1_000, blockhash).unwrap();
        assert_eq!(params.from, sender.address());
        assert_eq!(params.to, destination);
        verify_transfer_intent(&params).unwrap();

        let mut tampered = params.clone();
        tampered.lamports = 1_000_000;
        assert!(matches!(verify_transfer_intent(&tampered), Err(WalletError::TransferFailed { .. })));
    }

    #[test]
    fn test_intent_rejects_bad_destination() {
        let blockhash = codec::encode(&[9u8; 32]);
        assert!(matches!(
            RpcTransmitter::build_params(&seed(1), "0OIl", 1, blockhash),
            Err(WalletError::InvalidAddress(_, _))
        ));
    }

    #[test]
    fn test_parse_tool_output() {
        assert_eq!(parse_tool_output("{\"signature\": \"abc\"}\n").as_deref(), Some("abc"));
        assert_eq!(parse_tool_output("Sending...\n\nSignature: xyz\n").as_deref(), Some("xyz"));
        assert_eq!(parse_tool_output("last\n").as_deref(), Some("last"));
        assert_eq!(parse_tool_output("  \n"), None);
    }

    #[test]
    fn test_keypair_file_content() {
        let seed = seed(3);
        let file = ExternalToolTransmitter::write_keypair_file(&seed).unwrap();
        let content = std::fs::read(file.path()).unwrap();
        let bytes: Vec<u8> = serde_json::from_slice(&content).unwrap();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..32], seed.as_bytes());

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_tool_fails() {
        let transmitter = ExternalToolTransmitter::new("solkeep-no-such-tool".to_string(), "http://127.0.0.1:1".to_string());
        let result = transmitter.transfer(&seed(4), &seed(5).address(), 10).await;
        assert!(matches!(result, Err(WalletError::TransferFailed { .. })));
    }
}
