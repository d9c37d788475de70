use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Key,
    XChaCha20Poly1305,
    XNonce
};
use zeroize::Zeroizing;
use crate::{config::KEY_SIZE, error::WalletError};

// Bound to every ciphertext so a blob cannot be replayed in another context
const ASSOCIATED_DATA: &[u8] = b"solkeep/wallet-seed/v1";

pub struct Cipher {
    cipher: XChaCha20Poly1305
}

impl Cipher {
    pub const NONCE_SIZE: usize = 24;
    // Poly1305 tag appended by the AEAD
    pub const TAG_SIZE: usize = 16;

    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key))
        }
    }

    // encrypt value passed in param and add plaintext nonce before encrypted value
    // a Nonce is generated randomly at each call
    pub fn encrypt_value(&self, value: &[u8]) -> Result<Vec<u8>, WalletError> {
        // generate unique random nonce
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        self.encrypt_value_with_nonce(value, &nonce)
    }

    // encrypt value passed in param and add plaintext nonce before encrypted value
    pub fn encrypt_value_with_nonce(&self, value: &[u8], nonce: &XNonce) -> Result<Vec<u8>, WalletError> {
        let data = self.cipher.encrypt(nonce, Payload { msg: value, aad: ASSOCIATED_DATA })
            .map_err(WalletError::CryptoError)?;

        // append unique nonce to the encrypted data
        let mut encrypted = Vec::with_capacity(Self::NONCE_SIZE + data.len());
        encrypted.extend_from_slice(nonce);
        encrypted.extend_from_slice(&data);

        Ok(encrypted)
    }

    // decrypt any value produced by the function above
    pub fn decrypt_value(&self, encrypted: &[u8]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        // nonce and tag are mandatory in encrypted slice
        if encrypted.len() < Self::NONCE_SIZE + Self::TAG_SIZE {
            return Err(WalletError::DecryptionFailed(format!(
                "encrypted value is {} bytes, minimum is {} bytes",
                encrypted.len(),
                Self::NONCE_SIZE + Self::TAG_SIZE
            )))
        }

        // read the nonce for this data
        let nonce = XNonce::from_slice(&encrypted[0..Self::NONCE_SIZE]);
        // decrypt the value using the nonce previously decoded
        let decrypted = self.cipher.decrypt(nonce, Payload { msg: &encrypted[Self::NONCE_SIZE..], aad: ASSOCIATED_DATA })
            .map_err(|_| WalletError::DecryptionFailed("authentication failed, wrong master secret or tampered value".into()))?;

        Ok(Zeroizing::new(decrypted))
    }
}
