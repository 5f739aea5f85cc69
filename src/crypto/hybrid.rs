//! Hybrid post-quantum envelope encryption.
//!
//! Combines ML-KEM-1024 encapsulation, HKDF-SHA-256, ChaCha20-Poly1305 and
//! an ML-DSA-87 signature into a self-describing envelope:
//!
//! ```text
//! version(1) | len(C) u32 BE | len(sig) u32 BE | sig | C | nonce | ciphertext
//! ```
//!
//! The signature covers the KEM ciphertext C, not the payload ciphertext.
//! That binds "this encapsulation came from this sender" at a fixed cost
//! independent of payload size, and the wire format depends on it.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use fips203::ml_kem_1024;
use fips203::traits::{Decaps, Encaps, KeyGen as KemKeyGen, SerDes as KemSerDes};
use fips204::ml_dsa_87;
use fips204::traits::{KeyGen as DsaKeyGen, SerDes as DsaSerDes, Signer, Verifier};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::crypto::{
    random, ENCAPS_KEY_SIZE, KEM_CIPHERTEXT_SIZE, NONCE_SIZE, PROTOCOL_CONTEXT, SIGNATURE_SIZE,
    SIGNING_KEY_SIZE,
};
use crate::error::{Error, Result};

/// Minimum seed length for [`HybridKeypair::from_seed`].
///
/// Bytes 0..64 feed the encapsulation keygen (d then z), bytes 64..96 the
/// signature keygen.
pub const SEED_SIZE: usize = 96;

/// Envelope format version byte.
const FORMAT_VERSION: u8 = 0x01;

/// Fixed envelope prefix: version byte plus the two length fields.
const ENVELOPE_HEADER_SIZE: usize = 1 + 4 + 4;

/// Local encapsulation and signing keypair.
pub struct HybridKeypair {
    encaps_key: ml_kem_1024::EncapsKey,
    decaps_key: ml_kem_1024::DecapsKey,
    verifying_key: ml_dsa_87::PublicKey,
    signing_key: ml_dsa_87::PrivateKey,
}

impl HybridKeypair {
    /// Derive both keypairs deterministically from a seed.
    ///
    /// # Errors
    ///
    /// Rejects seeds shorter than [`SEED_SIZE`] bytes; extra bytes beyond
    /// 96 are ignored.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() < SEED_SIZE {
            return Err(Error::crypto(format!(
                "seed must be at least {SEED_SIZE} bytes, got {}",
                seed.len()
            )));
        }

        let mut d = [0u8; 32];
        let mut z = [0u8; 32];
        let mut xi = [0u8; 32];
        d.copy_from_slice(&seed[..32]);
        z.copy_from_slice(&seed[32..64]);
        xi.copy_from_slice(&seed[64..96]);

        let (encaps_key, decaps_key) = ml_kem_1024::KG::keygen_from_seed(d, z);
        let (verifying_key, signing_key) = ml_dsa_87::KG::keygen_from_seed(&xi);

        d.zeroize();
        z.zeroize();
        xi.zeroize();

        Ok(Self {
            encaps_key,
            decaps_key,
            verifying_key,
            signing_key,
        })
    }

    /// Exported encapsulation public key.
    pub fn encapsulation_public_key(&self) -> [u8; ENCAPS_KEY_SIZE] {
        self.encaps_key.clone().into_bytes()
    }

    /// Exported signing public key.
    pub fn signing_public_key(&self) -> [u8; SIGNING_KEY_SIZE] {
        self.verifying_key.clone().into_bytes()
    }
}

/// A peer's imported public keys.
pub struct PeerKeys {
    encaps_key: ml_kem_1024::EncapsKey,
    signing_key: ml_dsa_87::PublicKey,
}

impl PeerKeys {
    /// Import a peer's encapsulation and signing public keys.
    ///
    /// # Errors
    ///
    /// Both keys are strictly size-validated; there is no lenient path on
    /// this side since an envelope cannot be built without either key.
    pub fn from_bytes(encaps: &[u8], signing: &[u8]) -> Result<Self> {
        let encaps_arr: [u8; ENCAPS_KEY_SIZE] =
            encaps.try_into().map_err(|_| Error::KeySize {
                expected: ENCAPS_KEY_SIZE,
                actual: encaps.len(),
            })?;
        let signing_arr: [u8; SIGNING_KEY_SIZE] =
            signing.try_into().map_err(|_| Error::KeySize {
                expected: SIGNING_KEY_SIZE,
                actual: signing.len(),
            })?;

        let encaps_key = ml_kem_1024::EncapsKey::try_from_bytes(encaps_arr)
            .map_err(|e| Error::crypto(format!("malformed encapsulation key: {e}")))?;
        let signing_key = ml_dsa_87::PublicKey::try_from_bytes(signing_arr)
            .map_err(|e| Error::crypto(format!("malformed signing key: {e}")))?;

        Ok(Self {
            encaps_key,
            signing_key,
        })
    }
}

/// Hybrid encryptor bound to one local keypair and one peer.
pub struct HybridEncryptor {
    local: HybridKeypair,
    peer: PeerKeys,
}

impl HybridEncryptor {
    /// Bind a local keypair to a peer's imported keys.
    pub fn new(local: HybridKeypair, peer: PeerKeys) -> Self {
        Self { local, peer }
    }

    /// Encrypt and sign a message for the peer.
    pub fn encrypt(&self, message: &[u8]) -> Result<Vec<u8>> {
        let (shared_secret, kem_ct) = self
            .peer
            .encaps_key
            .try_encaps()
            .map_err(|e| Error::crypto(format!("encapsulation failed: {e}")))?;
        let kem_ct_bytes = kem_ct.into_bytes();

        let mut key = derive_payload_key(shared_secret)?;
        let cipher = ChaCha20Poly1305::new((&key).into());
        key.zeroize();

        let aad = build_aad(kem_ct_bytes.len());
        let nonce = random::random_nonce();
        let ciphertext = cipher
            .encrypt(
                (&nonce).into(),
                Payload {
                    msg: message,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::crypto("payload encryption failed"))?;

        let signature = self
            .local
            .signing_key
            .try_sign(&kem_ct_bytes, &[])
            .map_err(|e| Error::crypto(format!("signing failed: {e}")))?;

        let mut envelope = Vec::with_capacity(
            ENVELOPE_HEADER_SIZE
                + signature.len()
                + kem_ct_bytes.len()
                + NONCE_SIZE
                + ciphertext.len(),
        );
        envelope.push(FORMAT_VERSION);
        envelope.extend_from_slice(&(kem_ct_bytes.len() as u32).to_be_bytes());
        envelope.extend_from_slice(&(signature.len() as u32).to_be_bytes());
        envelope.extend_from_slice(&signature);
        envelope.extend_from_slice(&kem_ct_bytes);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Open an envelope the peer built for us.
    ///
    /// Verifies the peer's signature over the KEM ciphertext before doing
    /// any key derivation, then decapsulates and opens the payload.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        if envelope.len() < ENVELOPE_HEADER_SIZE {
            return Err(Error::crypto("envelope too short"));
        }
        if envelope[0] != FORMAT_VERSION {
            return Err(Error::crypto(format!(
                "unsupported envelope version 0x{:02x}",
                envelope[0]
            )));
        }

        let ct_len = u32::from_be_bytes(envelope[1..5].try_into().expect("fixed slice")) as usize;
        let sig_len = u32::from_be_bytes(envelope[5..9].try_into().expect("fixed slice")) as usize;

        let body = &envelope[ENVELOPE_HEADER_SIZE..];
        if body.len() < sig_len + ct_len + NONCE_SIZE {
            return Err(Error::crypto("envelope truncated"));
        }

        let (signature, rest) = body.split_at(sig_len);
        let (kem_ct_bytes, rest) = rest.split_at(ct_len);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let sig_arr: [u8; SIGNATURE_SIZE] = signature
            .try_into()
            .map_err(|_| Error::InvalidSignature)?;
        if !self.peer.signing_key.verify(kem_ct_bytes, &sig_arr, &[]) {
            return Err(Error::InvalidSignature);
        }

        let ct_arr: [u8; KEM_CIPHERTEXT_SIZE] = kem_ct_bytes
            .try_into()
            .map_err(|_| Error::crypto("bad encapsulation ciphertext size"))?;
        let kem_ct = ml_kem_1024::CipherText::try_from_bytes(ct_arr)
            .map_err(|e| Error::crypto(format!("malformed encapsulation ciphertext: {e}")))?;
        let shared_secret = self
            .local
            .decaps_key
            .try_decaps(&kem_ct)
            .map_err(|e| Error::crypto(format!("decapsulation failed: {e}")))?;

        let mut key = derive_payload_key(shared_secret)?;
        let cipher = ChaCha20Poly1305::new((&key).into());
        key.zeroize();

        let aad = build_aad(ct_len);
        let nonce_arr: [u8; NONCE_SIZE] = nonce.try_into().expect("split length checked");
        cipher
            .decrypt(
                (&nonce_arr).into(),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::crypto("payload decryption failed"))
    }
}

/// Derive the payload key from an encapsulated shared secret, consuming
/// and zeroizing the secret material.
fn derive_payload_key(shared_secret: fips203::SharedSecretKey) -> Result<[u8; 32]> {
    let mut ikm = shared_secret.into_bytes();
    let hkdf = Hkdf::<Sha256>::new(Some(PROTOCOL_CONTEXT), &ikm);
    let mut okm = [0u8; 32];
    let expanded = hkdf.expand(PROTOCOL_CONTEXT, &mut okm);
    ikm.zeroize();
    expanded.map_err(|_| Error::crypto("HKDF expansion failed"))?;
    Ok(okm)
}

/// Additional authenticated data binding the envelope header to the
/// payload: protocol context, format version, KEM ciphertext length.
fn build_aad(kem_ct_len: usize) -> Vec<u8> {
    let mut aad = Vec::with_capacity(PROTOCOL_CONTEXT.len() + 1 + 4);
    aad.extend_from_slice(PROTOCOL_CONTEXT);
    aad.push(FORMAT_VERSION);
    aad.extend_from_slice(&(kem_ct_len as u32).to_be_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(fill: u8) -> Vec<u8> {
        vec![fill; SEED_SIZE]
    }

    fn pair(local_fill: u8, peer_fill: u8) -> (HybridEncryptor, HybridEncryptor) {
        let local = HybridKeypair::from_seed(&seed(local_fill)).unwrap();
        let peer = HybridKeypair::from_seed(&seed(peer_fill)).unwrap();

        let peer_public =
            PeerKeys::from_bytes(&peer.encapsulation_public_key(), &peer.signing_public_key())
                .unwrap();
        let local_public =
            PeerKeys::from_bytes(&local.encapsulation_public_key(), &local.signing_public_key())
                .unwrap();

        (
            HybridEncryptor::new(local, peer_public),
            HybridEncryptor::new(peer, local_public),
        )
    }

    #[test]
    fn test_seed_length_boundary() {
        assert!(HybridKeypair::from_seed(&[0x11; 95]).is_err());
        assert!(HybridKeypair::from_seed(&[0x11; 96]).is_ok());
        assert!(HybridKeypair::from_seed(&[0x11; 128]).is_ok());
    }

    #[test]
    fn test_deterministic_public_keys() {
        let a = HybridKeypair::from_seed(&seed(0x42)).unwrap();
        let b = HybridKeypair::from_seed(&seed(0x42)).unwrap();

        assert_eq!(a.encapsulation_public_key(), b.encapsulation_public_key());
        assert_eq!(a.signing_public_key(), b.signing_public_key());

        let c = HybridKeypair::from_seed(&seed(0x43)).unwrap();
        assert_ne!(a.encapsulation_public_key(), c.encapsulation_public_key());
    }

    #[test]
    fn test_peer_key_import_sizes() {
        let kp = HybridKeypair::from_seed(&seed(0x01)).unwrap();
        let ek = kp.encapsulation_public_key();
        let vk = kp.signing_public_key();

        assert!(PeerKeys::from_bytes(&ek, &vk).is_ok());
        assert!(PeerKeys::from_bytes(&ek[..100], &vk).is_err());
        assert!(PeerKeys::from_bytes(&ek, &vk[..100]).is_err());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let (sender, receiver) = pair(0x01, 0x02);

        let message = b"claim payload for the wallet";
        let envelope = sender.encrypt(message).unwrap();

        assert_eq!(envelope[0], FORMAT_VERSION);
        let ct_len = u32::from_be_bytes(envelope[1..5].try_into().unwrap()) as usize;
        let sig_len = u32::from_be_bytes(envelope[5..9].try_into().unwrap()) as usize;
        assert_eq!(ct_len, KEM_CIPHERTEXT_SIZE);
        assert_eq!(sig_len, SIGNATURE_SIZE);

        let opened = receiver.decrypt(&envelope).unwrap();
        assert_eq!(opened, message);
    }

    #[test]
    fn test_envelope_never_repeats() {
        let (sender, _) = pair(0x01, 0x02);
        let a = sender.encrypt(b"same message").unwrap();
        let b = sender.encrypt(b"same message").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let (sender, receiver) = pair(0x01, 0x02);
        let envelope = sender.encrypt(b"payload").unwrap();

        // Flip a bit in the signature region
        let mut bad = envelope.clone();
        bad[ENVELOPE_HEADER_SIZE] ^= 0x01;
        assert!(receiver.decrypt(&bad).is_err());

        // Flip a bit in the payload ciphertext
        let mut bad = envelope.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        assert!(receiver.decrypt(&bad).is_err());

        // Truncation
        assert!(receiver.decrypt(&envelope[..40]).is_err());
    }

    #[test]
    fn test_wrong_sender_signature_rejected() {
        let (sender, receiver) = pair(0x01, 0x02);
        let (impostor, _) = pair(0x03, 0x02);

        // Impostor encrypts to the same receiver, but the receiver expects
        // envelopes signed by `sender`.
        let envelope = impostor.encrypt(b"payload").unwrap();
        assert!(matches!(
            receiver.decrypt(&envelope).unwrap_err(),
            Error::InvalidSignature
        ));
        // The genuine sender's envelope still opens.
        assert!(receiver.decrypt(&sender.encrypt(b"payload").unwrap()).is_ok());
    }
}
