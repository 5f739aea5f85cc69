//! Wallet signature verification.
//!
//! Validates ML-DSA-87 (FIPS 204) signatures against the signing key from a
//! user's identity bundle. The bundle's encapsulation key is optional here:
//! it only matters for the hybrid envelope path, so a missing or malformed
//! one downgrades to a warning instead of failing verification setup.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use fips203::ml_kem_1024;
use fips203::traits::SerDes as KemSerDes;
use fips204::ml_dsa_87;
use fips204::traits::{SerDes as DsaSerDes, Verifier as DsaVerifier};

use crate::crypto::{ENCAPS_KEY_SIZE, SIGNATURE_SIZE, SIGNING_KEY_SIZE};
use crate::error::{Error, Result};

/// Input accepted wherever the verifier takes message or signature bytes.
///
/// Strings are interpreted as hex if and only if they have even length and
/// consist solely of hex digits; anything else is taken as UTF-8 text.
/// Callers on other stacks rely on this exact disambiguation, so it must
/// not be loosened or tightened.
pub trait AsMessageBytes {
    /// The bytes this input stands for.
    fn message_bytes(&self) -> Cow<'_, [u8]>;
}

impl AsMessageBytes for [u8] {
    fn message_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl AsMessageBytes for Vec<u8> {
    fn message_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl AsMessageBytes for str {
    fn message_bytes(&self) -> Cow<'_, [u8]> {
        let is_hex = self.len() % 2 == 0 && self.bytes().all(|b| b.is_ascii_hexdigit());
        if is_hex {
            // Both halves of the conjunct were just checked
            Cow::Owned(hex::decode(self).expect("validated hex"))
        } else {
            Cow::Borrowed(self.as_bytes())
        }
    }
}

impl AsMessageBytes for String {
    fn message_bytes(&self) -> Cow<'_, [u8]> {
        self.as_str().message_bytes()
    }
}

/// Verifier handle built from one identity's public keys.
pub struct Verifier {
    signing_key: ml_dsa_87::PublicKey,
    encapsulation_key: Option<ml_kem_1024::EncapsKey>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("has_encapsulation_key", &self.encapsulation_key.is_some())
            .finish()
    }
}

impl Verifier {
    /// Build a verifier from base64-encoded bundle keys.
    ///
    /// The signing key is mandatory and strictly size-checked. The
    /// encapsulation key is parsed on a best-effort basis: absence or a bad
    /// size is logged and leaves the handle without one.
    pub fn from_bundle_keys(
        signing_key_b64: &str,
        encapsulation_key_b64: Option<&str>,
    ) -> Result<Self> {
        let signing_bytes = BASE64
            .decode(signing_key_b64)
            .map_err(|e| Error::crypto(format!("signing key is not valid base64: {e}")))?;
        if signing_bytes.len() != SIGNING_KEY_SIZE {
            return Err(Error::KeySize {
                expected: SIGNING_KEY_SIZE,
                actual: signing_bytes.len(),
            });
        }
        let signing_arr: [u8; SIGNING_KEY_SIZE] =
            signing_bytes.try_into().expect("length checked");
        let signing_key = ml_dsa_87::PublicKey::try_from_bytes(signing_arr)
            .map_err(|e| Error::crypto(format!("malformed signing key: {e}")))?;

        let encapsulation_key = encapsulation_key_b64.and_then(Self::parse_encaps_key);

        Ok(Self {
            signing_key,
            encapsulation_key,
        })
    }

    fn parse_encaps_key(b64: &str) -> Option<ml_kem_1024::EncapsKey> {
        let bytes = match BASE64.decode(b64) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("encapsulation key is not valid base64, ignoring: {e}");
                return None;
            }
        };
        let arr: [u8; ENCAPS_KEY_SIZE] = match bytes.try_into() {
            Ok(a) => a,
            Err(b) => {
                tracing::warn!(
                    "encapsulation key has wrong size ({} bytes), ignoring",
                    b.len()
                );
                return None;
            }
        };
        match ml_kem_1024::EncapsKey::try_from_bytes(arr) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!("malformed encapsulation key, ignoring: {e}");
                None
            }
        }
    }

    /// Whether the bundle carried a usable encapsulation key.
    pub fn has_encapsulation_key(&self) -> bool {
        self.encapsulation_key.is_some()
    }

    /// The parsed encapsulation key, if the bundle had a valid one.
    pub fn encapsulation_key(&self) -> Option<&ml_kem_1024::EncapsKey> {
        self.encapsulation_key.as_ref()
    }

    /// Verify a signature over a message. Never errors; malformed inputs
    /// simply do not verify.
    pub fn verify<M, S>(&self, message: &M, signature: &S) -> bool
    where
        M: AsMessageBytes + ?Sized,
        S: AsMessageBytes + ?Sized,
    {
        let message = message.message_bytes();
        let signature = signature.message_bytes();

        let sig_arr: [u8; SIGNATURE_SIZE] = match signature.as_ref().try_into() {
            Ok(a) => a,
            Err(_) => return false,
        };
        self.signing_key.verify(message.as_ref(), &sig_arr, &[])
    }

    /// Verify and turn failure into an error.
    ///
    /// A signature whose length falls outside the scheme's envelope is
    /// warned about before the (inevitably failing) verification, which
    /// keeps length anomalies visible in logs without a second error path.
    pub fn check_signature<M, S>(&self, message: &M, signature: &S) -> Result<()>
    where
        M: AsMessageBytes + ?Sized,
        S: AsMessageBytes + ?Sized,
    {
        let sig_len = signature.message_bytes().len();
        if sig_len != SIGNATURE_SIZE {
            tracing::warn!(
                "signature length {} outside expected envelope of {} bytes",
                sig_len,
                SIGNATURE_SIZE
            );
        }

        if self.verify(message, signature) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}
