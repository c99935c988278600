//! Token vault: the encrypt/decrypt boundary between stored credentials
//! and their plaintext use.
//!
//! Stored tokens are AES-256-GCM ciphertext framed as `ivHex:cipherHex`.
//! Every encryption uses a fresh random nonce, so encrypting the same
//! plaintext twice yields different ciphertext. Decrypted tokens come back
//! as [`SecretString`] and are zeroed on drop; callers re-derive the
//! plaintext from the vault on every use instead of holding it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

const NONCE_LEN: usize = 12;

pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    /// Build a vault from the process-wide secret. The cipher key is the
    /// SHA-256 digest of the secret; there is no key rotation.
    pub fn new(secret: &str) -> Self {
        let key: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(secret.as_bytes()).into());
        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).expect("sha-256 digest is a valid aes-256 key");
        Self { cipher }
    }

    /// Encrypt a plaintext credential into the `ivHex:cipherHex` storage
    /// format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        Ok(format!("{}:{}", hex::encode(nonce_bytes), hex::encode(ciphertext)))
    }

    /// Decrypt a stored credential.
    ///
    /// # Errors
    ///
    /// Returns a [`CryptoError`] when the input is empty, has no `:`
    /// separator, either half is not valid hex, the iv has the wrong
    /// length, or authenticated decryption fails under the configured key.
    pub fn decrypt(&self, stored: &str) -> Result<SecretString, CryptoError> {
        if stored.is_empty() {
            return Err(CryptoError::Empty);
        }

        let (iv_hex, cipher_hex) = stored.split_once(':').ok_or(CryptoError::MissingSeparator)?;

        let nonce_bytes = hex::decode(iv_hex).map_err(|_| CryptoError::InvalidHex)?;
        let ciphertext = hex::decode(cipher_hex).map_err(|_| CryptoError::InvalidHex)?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::InvalidIv {
                expected: NONCE_LEN,
                got: nonce_bytes.len(),
            });
        }

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptFailed)?;

        let plaintext = String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)?;
        Ok(SecretString::new(plaintext))
    }
}
