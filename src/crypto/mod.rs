//! Cryptographic primitives for gatelink.
//!
//! This module provides:
//! - AES-256-CBC session-linking encryption (legacy derivation, see
//!   `session_cipher`)
//! - ML-DSA-87 wallet signature verification
//! - Hybrid ML-KEM-1024 + ChaCha20-Poly1305 envelope encryption
//! - Secure random number generation
//!
//! Secret key material is zeroized on drop wherever a type owns it.

mod hybrid;
mod random;
mod session_cipher;
mod verifier;

pub use hybrid::{HybridEncryptor, HybridKeypair, PeerKeys, SEED_SIZE};
pub use random::SecureRandom;
pub use session_cipher::SessionCipher;
pub use verifier::{AsMessageBytes, Verifier};

/// Size of the CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Size of the AEAD nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of an ML-DSA-87 signing public key in bytes.
pub const SIGNING_KEY_SIZE: usize = fips204::ml_dsa_87::PK_LEN;

/// Size of an ML-DSA-87 signature in bytes.
pub const SIGNATURE_SIZE: usize = fips204::ml_dsa_87::SIG_LEN;

/// Size of an ML-KEM-1024 encapsulation public key in bytes.
pub const ENCAPS_KEY_SIZE: usize = fips203::ml_kem_1024::EK_LEN;

/// Size of an ML-KEM-1024 ciphertext in bytes.
pub const KEM_CIPHERTEXT_SIZE: usize = fips203::ml_kem_1024::CT_LEN;

/// Protocol context constant, used as both salt and info for the hybrid
/// envelope's key derivation and as the AAD prefix.
pub const PROTOCOL_CONTEXT: &[u8] = b"gatelink/v1";

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    #[test]
    fn test_scheme_sizes() {
        assert_eq!(SIGNING_KEY_SIZE, 2592);
        assert_eq!(SIGNATURE_SIZE, 4627);
        assert_eq!(ENCAPS_KEY_SIZE, 1568);
        assert_eq!(KEM_CIPHERTEXT_SIZE, 1568);
    }

    #[test]
    fn test_layers_compose() {
        // The wallet signs the session-cipher ciphertext, and a verifier
        // built from its exported keys accepts exactly that blob.
        use fips204::traits::{SerDes, Signer};

        let cipher = SessionCipher::new("deployment secret");
        let payload = cipher.encrypt(br#"{"clientSessionId":"abc"}"#);

        let (pk, sk) = fips204::ml_dsa_87::try_keygen().unwrap();
        let signature = sk.try_sign(&payload, &[]).unwrap();

        let verifier =
            Verifier::from_bundle_keys(&BASE64.encode(pk.into_bytes()), None).unwrap();
        assert!(verifier.check_signature(payload.as_slice(), signature.as_slice()).is_ok());
    }
}
