//! Symmetric cipher for session-linking secrets.
//!
//! AES-256-CBC with a random IV prepended to the ciphertext. The mode is
//! deliberately unauthenticated: this layer only hides link secrets from
//! passive observers, while authenticity of the enclosed claims is
//! established by the signature layer on top.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{random, IV_SIZE};
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size; ciphertext bodies are always a multiple of this.
const BLOCK_SIZE: usize = 16;

/// Cipher bound to a deployment's shared secret.
///
/// The derived key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; 32],
}

impl SessionCipher {
    /// Derive the cipher from a shared secret string.
    ///
    /// The key is the first 32 characters of the hex-encoded SHA-256 of the
    /// secret, used as ASCII bytes. That truncates at the hex *string*
    /// level, so only half the digest (128 bits) reaches the key; already
    /// issued secrets depend on this exact derivation, so it must not be
    /// changed to raw digest bytes.
    pub fn new(secret: &str) -> Self {
        let digest = hex::encode(Sha256::digest(secret.as_bytes()));
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest.as_bytes()[..32]);
        Self { key }
    }

    /// Encrypt a byte buffer. Returns IV (16 bytes) followed by the
    /// PKCS#7-padded ciphertext. Output differs on every call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let iv = random::random_iv();
        let cipher = Aes256CbcEnc::new(&self.key.into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt a buffer produced by [`SessionCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Fails on truncated input, a ciphertext body that is not
    /// block-aligned, or padding that does not check out (wrong key or
    /// corrupted ciphertext). There is no authentication tag here; callers
    /// needing tamper evidence must verify a signature over the result.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_SIZE + BLOCK_SIZE {
            return Err(Error::crypto(format!(
                "ciphertext too short: {} bytes",
                data.len()
            )));
        }

        let (iv, body) = data.split_at(IV_SIZE);
        if body.len() % BLOCK_SIZE != 0 {
            return Err(Error::crypto("ciphertext not block-aligned"));
        }

        let iv: [u8; IV_SIZE] = iv.try_into().expect("split length checked");
        let cipher = Aes256CbcDec::new(&self.key.into(), &iv.into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| Error::crypto("decryption failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cipher = SessionCipher::new("a shared secret");
        let plaintext = b"hello, session";

        let encrypted = cipher.encrypt(plaintext);
        let decrypted = cipher.decrypt(&encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_roundtrip_empty_and_large() {
        let cipher = SessionCipher::new("k");

        let empty = cipher.encrypt(b"");
        assert_eq!(cipher.decrypt(&empty).unwrap(), b"");

        let large = vec![0xA7u8; 12 * 1024];
        let encrypted = cipher.encrypt(&large);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), large);
    }

    #[test]
    fn test_extreme_key_strings() {
        for secret in ["", "x", &"long-".repeat(200)] {
            let cipher = SessionCipher::new(secret);
            let encrypted = cipher.encrypt(b"payload");
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), b"payload");
        }
    }

    #[test]
    fn test_output_never_repeats() {
        let cipher = SessionCipher::new("secret");
        let a = cipher.encrypt(b"same input");
        let b = cipher.encrypt(b"same input");
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = SessionCipher::new("secret-one").encrypt(b"link data");
        let result = SessionCipher::new("secret-two").decrypt(&encrypted);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let cipher = SessionCipher::new("secret");
        let encrypted = cipher.encrypt(b"link data");

        assert!(cipher.decrypt(&encrypted[..IV_SIZE]).is_err());
        assert!(cipher.decrypt(&encrypted[..IV_SIZE + 5]).is_err());
        assert!(cipher.decrypt(b"").is_err());
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let cipher = SessionCipher::new("secret");
        let mut encrypted = cipher.encrypt(b"link data");
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        assert!(cipher.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_key_derivation_is_hex_prefix() {
        // The key must be the ASCII bytes of the first 32 hex characters of
        // SHA-256("secret"), not the first 16 raw digest bytes.
        let cipher = SessionCipher::new("secret");
        let digest = hex::encode(Sha256::digest(b"secret"));
        assert_eq!(&cipher.key[..], &digest.as_bytes()[..32]);
        assert!(cipher.key.iter().all(|b| b.is_ascii_hexdigit()));
    }
}
