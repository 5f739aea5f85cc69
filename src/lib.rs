//! # gatelink
//!
//! A multi-party QR login engine: a browser, a signing wallet and a relay
//! (the "gate") jointly establish that a human controlling a cryptographic
//! identity approved a login, and the browser gets a session credential.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 WebSocket Listener (TLS opt.)             │
//! ├──────────────────────────────────────────────────────────┤
//! │  Authentication Engine (session table, state machine)    │
//! ├───────────────────────────┬──────────────────────────────┤
//! │  Gate RPC Client          │  Injected hooks & resolver   │
//! │  (correlated req/resp)    │  (identity-check, success,   │
//! │                           │   decline, bundle lookup)    │
//! ├───────────────────────────┴──────────────────────────────┤
//! │  Crypto Layer (AES-CBC link cipher, ML-DSA-87 verify,    │
//! │  ML-KEM-1024 + HKDF + ChaCha20-Poly1305 hybrid envelope) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Protocol sketch
//!
//! 1. The browser sends `auth_init`; the engine asks the gate for a
//!    scannable task whose payload is the encrypted session id, and
//!    returns `sessionId` + `linkWeb`.
//! 2. The orchestrator sends `activate` with the address and session id
//!    encrypted under the deployment secret; the engine binds the address
//!    (write-once), mints a `clientSessionId`, and answers `ready`.
//! 3. The wallet signs the `ready` ciphertext with its ML-DSA-87 key and
//!    sends `auth`; the engine verifies against the resolved identity
//!    bundle, runs the success hook, and pushes `auth_result` to the
//!    browser — immediately, or on its one allowed reconnect.
//!
//! Sessions expire ten minutes after the connection that minted them
//! arrived, no matter what else is in flight.

#![warn(rust_2018_idioms)]

pub mod crypto;
pub mod error;
pub mod gate;
pub mod server;
pub mod wire;

pub use error::{Error, Result};
pub use server::{Server, ServerConfig};
