//! Key custody: seed generation, keypair derivation and the at-rest
//! encryption of seeds under the operator master secret.
//!
//! Decrypted material only lives in zeroizing buffers owned by the caller
//! for the duration of one operation, nothing is cached here.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, trace};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    cipher::Cipher,
    codec,
    config::{KEY_DERIVATION_CONTEXT, KEY_SIZE, SEED_SIZE},
    entry::WalletRecord,
    error::WalletError
};

// Raw Ed25519 seed, wiped from memory on drop
pub struct SecretSeed(Zeroizing<[u8; SEED_SIZE]>);

impl SecretSeed {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if bytes.len() != SEED_SIZE {
            return Err(WalletError::DecryptionFailed(format!("invalid seed size: expected {} bytes, got {}", SEED_SIZE, bytes.len())))
        }

        let mut seed = Zeroizing::new([0u8; SEED_SIZE]);
        seed.copy_from_slice(bytes);
        Ok(Self(seed))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_SIZE] {
        &self.0
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.0)
    }

    pub fn address(&self) -> String {
        address_of(&self.signing_key().verifying_key())
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0.as_slice()))
    }

    // 64 bytes seed || public key, the keypair format of the common chain tools
    pub fn to_keypair_base58(&self) -> Zeroizing<String> {
        let keypair = Zeroizing::new(self.signing_key().to_keypair_bytes());
        Zeroizing::new(codec::encode(keypair.as_slice()))
    }
}

// Output of a key generation, the seed is only meant to be shown once
pub struct GeneratedKey {
    pub address: String,
    pub encrypted_secret: String,
    pub seed: SecretSeed
}

pub fn address_of(key: &VerifyingKey) -> String {
    codec::encode(key.as_bytes())
}

pub struct KeyVault {
    cipher: Cipher
}

impl KeyVault {
    // A missing or empty master secret is refused, there is no default key
    pub fn new(master_secret: Option<&str>) -> Result<Self, WalletError> {
        let master_secret = match master_secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => return Err(WalletError::MissingMasterSecret)
        };

        let key: Zeroizing<[u8; KEY_SIZE]> = Zeroizing::new(blake3::derive_key(KEY_DERIVATION_CONTEXT, master_secret.as_bytes()));
        Ok(Self {
            cipher: Cipher::new(&key)
        })
    }

    // Draw a fresh seed from the OS and encrypt it
    pub fn generate(&self) -> Result<GeneratedKey, WalletError> {
        let mut bytes = Zeroizing::new([0u8; SEED_SIZE]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        let seed = SecretSeed(bytes);

        let address = seed.address();
        let encrypted_secret = self.encrypt(seed.as_bytes())?;
        debug!("Generated new keypair for address {}", address);

        Ok(GeneratedKey {
            address,
            encrypted_secret,
            seed
        })
    }

    // base64(nonce || ciphertext), randomized at each call
    pub fn encrypt(&self, secret: &[u8]) -> Result<String, WalletError> {
        trace!("encrypt secret");
        let encrypted = self.cipher.encrypt_value(secret)?;
        Ok(STANDARD.encode(encrypted))
    }

    pub fn decrypt(&self, blob: &str) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        trace!("decrypt secret");
        let encrypted = STANDARD.decode(blob.trim())
            .map_err(|e| WalletError::DecryptionFailed(format!("invalid base64 framing: {}", e)))?;
        self.cipher.decrypt_value(&encrypted)
    }

    // Decrypt the seed of a stored wallet and check it still derives its address
    pub fn unlock_seed(&self, wallet: &WalletRecord, operation: &'static str) -> Result<SecretSeed, WalletError> {
        let seed = self.decrypt(&wallet.encrypted_secret)
            .and_then(|decrypted| SecretSeed::from_bytes(&decrypted))
            .map_err(|e| {
                let reason = match e {
                    WalletError::DecryptionFailed(reason) => reason,
                    e => e.to_string()
                };
                WalletError::DecryptionFailed(format!("{} of wallet {}: {}", operation, wallet.display_name(), reason))
            })?;
        let derived = seed.address();
        if derived != wallet.address {
            return Err(WalletError::KeyMismatch {
                id: wallet.id,
                expected: wallet.address.clone(),
                derived
            })
        }

        Ok(seed)
    }
}
