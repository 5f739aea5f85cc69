//! Wire envelope for the gatelink protocol.
//!
//! Every message is a compact MessagePack map whose `_` field names the
//! command. The same envelope type is spoken on all three legs (browser,
//! wallet/orchestrator, gate); gate request/response pairs additionally
//! carry an integer `_requestId` for correlation.
//!
//! The command set is closed: anything with an unrecognized `_` decodes to
//! [`Envelope::Unknown`] so the engine can answer it explicitly instead of
//! treating it as a malformed message.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::{Error, Result};

/// Coarse session status reported to a reconnecting browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStatus {
    /// Session exists but has not been activated yet
    Waiting,
    /// Address bound, waiting for the wallet's final proof
    Activated,
    /// Terminal: declined by the user or by timeout
    Declined,
    /// Terminal: authentication succeeded
    Completed,
}

/// A protocol message, tagged by its `_` discriminator.
///
/// Several commands are used in both directions with different field
/// subsets, so their fields are optional and absent ones are omitted from
/// the encoded map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_")]
pub enum Envelope {
    /// Browser requests QR issuance; reply carries the session handle and
    /// the scannable link.
    #[serde(rename = "auth_init")]
    AuthInit {
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none", default)]
        session_id: Option<String>,
        #[serde(rename = "linkWeb", skip_serializing_if = "Option::is_none", default)]
        link_web: Option<String>,
    },

    /// Orchestrator binds an address to a session. `data` is session-cipher
    /// ciphertext of `{"sessionId": …, "address": …}`.
    #[serde(rename = "activate")]
    Activate {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        data: Option<ByteBuf>,
    },

    /// Activation reply toward the orchestrator. `data` encrypts
    /// `{"clientSessionId": …, "isRegistered": …}`.
    #[serde(rename = "ready")]
    Ready { data: ByteBuf },

    /// Wallet's final proof (request) or the welcome reply to it.
    #[serde(rename = "auth")]
    Auth {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        address: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        data: Option<ByteBuf>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        signature: Option<ByteBuf>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },

    /// Terminal success pushed to the browser.
    #[serde(rename = "auth_result")]
    AuthResult { payload: serde_json::Value },

    /// Activation notice pushed to the browser.
    #[serde(rename = "activated")]
    Activated {},

    /// Decline: request from the wallet (optional echoed `data`),
    /// acknowledgement back, or the notice pushed to the browser.
    #[serde(rename = "declined")]
    Declined {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        data: Option<ByteBuf>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },

    /// Deadline expiry notice pushed to whichever party is still connected.
    #[serde(rename = "timeout")]
    Timeout {},

    /// Browser rebinds to an existing session after a transport drop.
    #[serde(rename = "reconnect")]
    Reconnect {
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none", default)]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        status: Option<ReconnectStatus>,
    },

    /// Synthetic notice that the counterpart's connection dropped abnormally.
    #[serde(rename = "connection_failed")]
    ConnectionFailed {},

    /// Error envelope, optionally correlated to a gate request.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(rename = "_requestId", skip_serializing_if = "Option::is_none", default)]
        request_id: Option<u64>,
    },

    /// Liveness check.
    #[serde(rename = "health")]
    Health {},

    /// Gate RPC: create a scannable login task.
    #[serde(rename = "create_task")]
    CreateTask {
        #[serde(rename = "_requestId", skip_serializing_if = "Option::is_none", default)]
        request_id: Option<u64>,
        #[serde(rename = "projectId", skip_serializing_if = "Option::is_none", default)]
        project_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        status: Option<String>,
        #[serde(rename = "linkWeb", skip_serializing_if = "Option::is_none", default)]
        link_web: Option<String>,
    },

    /// Catch-all for commands this engine does not speak.
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Encode into MessagePack map form (string field names, not tuples).
    pub fn encode(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("envelope serialization is infallible")
    }

    /// Decode an inbound frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// The correlation id, for envelopes that can carry one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Envelope::Error { request_id, .. } => *request_id,
            Envelope::CreateTask { request_id, .. } => *request_id,
            _ => None,
        }
    }

    /// Shorthand for an error envelope without correlation.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
            request_id: None,
        }
    }
}
