//! Injected collaborator contracts.
//!
//! The engine never talks to business logic or to the identity store
//! directly; it depends on these two traits. Implementations are supplied
//! by the integrating application (and by mocks in tests). Each hook is
//! invoked at most once per transaction, at its documented protocol step.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;

/// A user's resolved public-key bundle.
///
/// `signing_public_key` is mandatory and must decode to exactly the
/// signature scheme's key size; the encapsulation key and claims are
/// optional extras.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityBundle {
    /// Base64 ML-DSA-87 public key
    #[serde(rename = "signingPublicKey")]
    pub signing_public_key: String,
    /// Base64 ML-KEM-1024 public key, if the identity published one
    #[serde(rename = "encapsulationPublicKey", default)]
    pub encapsulation_public_key: Option<String>,
    /// Opaque claim map attached to the identity
    #[serde(default)]
    pub claims: Option<serde_json::Value>,
}

/// Looks up an identity bundle for an address.
///
/// Typically backed by a cached content-store lookup; from the engine's
/// point of view it is an opaque, fallible async call whose failure aborts
/// the proof step.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve the bundle for `address`.
    async fn resolve(&self, address: &str) -> Result<IdentityBundle>;
}

/// Context handed to the success hook.
#[derive(Debug, Clone)]
pub struct AuthenticatedEvent {
    /// The authenticated identity's address
    pub address: String,
    /// Claims from the resolved bundle, passed through untouched
    pub claims: Option<serde_json::Value>,
}

/// What the success hook decided.
#[derive(Debug, Clone, Default)]
pub struct AuthOutcome {
    /// Session credential for the browser
    pub token: Option<serde_json::Value>,
    /// Business-level rejection, delivered instead of a token
    pub error: Option<String>,
}

impl AuthOutcome {
    /// The payload cached on the session and pushed to the browser.
    pub fn into_payload(self) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        if let Some(token) = self.token {
            payload.insert("token".into(), token);
        }
        if let Some(error) = self.error {
            payload.insert("error".into(), json!(error));
        }
        serde_json::Value::Object(payload)
    }
}

/// Why a transaction was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// The user rejected the request in their wallet
    UserDeclined,
    /// The 10-minute session deadline fired
    Timeout,
}

impl DeclineReason {
    /// Wire/hook spelling of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            DeclineReason::UserDeclined => "user-declined",
            DeclineReason::Timeout => "timeout",
        }
    }
}

/// Context handed to the decline hook.
#[derive(Debug, Clone)]
pub struct DeclinedEvent {
    /// Address, when the session got far enough to have one
    pub address: Option<String>,
    /// Why the transaction ended
    pub reason: DeclineReason,
    /// Human-readable message, same text the browser sees
    pub message: String,
    /// "user" or "system"
    pub declined_by: &'static str,
    /// The affected transaction
    pub session_id: String,
}

/// The three application callbacks driven by the engine.
///
/// All three are treated as opaque, possibly slow, fallible async calls.
/// A failing `declined` hook is caught and logged by the engine; it never
/// suppresses the protocol-level decline acknowledgement.
#[async_trait]
pub trait AuthHooks: Send + Sync {
    /// Is this address a registered user? Drives the `isRegistered` flag
    /// in the activation reply.
    async fn identity_check(&self, address: &str) -> Result<bool>;

    /// The wallet's proof verified; produce the session credential.
    async fn authenticated(&self, event: AuthenticatedEvent) -> Result<AuthOutcome>;

    /// The transaction ended without a credential.
    async fn declined(&self, event: DeclinedEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_payload_shape() {
        let payload = AuthOutcome {
            token: Some(json!({"jwt": "abc"})),
            error: None,
        }
        .into_payload();
        assert_eq!(payload, json!({"token": {"jwt": "abc"}}));

        let payload = AuthOutcome {
            token: None,
            error: Some("not allowed".into()),
        }
        .into_payload();
        assert_eq!(payload, json!({"error": "not allowed"}));
    }

    #[test]
    fn test_bundle_field_names() {
        let bundle: IdentityBundle = serde_json::from_str(
            r#"{"signingPublicKey": "c2ln", "encapsulationPublicKey": "a2Vt", "claims": {"kyc": true}}"#,
        )
        .unwrap();
        assert_eq!(bundle.signing_public_key, "c2ln");
        assert_eq!(bundle.encapsulation_public_key.as_deref(), Some("a2Vt"));
        assert_eq!(bundle.claims, Some(json!({"kyc": true})));

        let minimal: IdentityBundle =
            serde_json::from_str(r#"{"signingPublicKey": "c2ln"}"#).unwrap();
        assert!(minimal.encapsulation_public_key.is_none());
        assert!(minimal.claims.is_none());
    }
}
