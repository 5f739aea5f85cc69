//! The authentication protocol engine.
//!
//! Owns the session table, drives every protocol transition, and calls
//! out to the injected hooks at the documented steps. Each inbound
//! connection gets a session on registration; browser connections keep
//! theirs across the whole transaction, one-shot peers (orchestrator,
//! wallet) act on someone else's session and are closed right after their
//! reply.
//!
//! Locking: the session table sits behind one mutex, every
//! check-then-mutate runs under it, and the lock is never held across an
//! await point.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::crypto::{SessionCipher, Verifier};
use crate::error::Error;
use crate::gate::GateClient;
use crate::server::config::ServerConfig;
use crate::server::hooks::{
    AuthHooks, AuthOutcome, AuthenticatedEvent, DeclineReason, DeclinedEvent, IdentityResolver,
};
use crate::server::session::{ConnHandle, ConnId, SessionState, SessionTable};
use crate::wire::Envelope;

/// Reply sent to a wallet whose proof was accepted.
const WELCOME_MESSAGE: &str = "welcome";

/// Message cached and pushed when the user declines in their wallet.
const DECLINED_MESSAGE: &str = "Authentication declined by user";

/// Message given to the decline hook when the deadline fires.
const TIMEOUT_MESSAGE: &str = "Authentication request timed out";

/// Plaintext carried inside the orchestrator's activation ciphertext.
#[derive(Serialize, Deserialize)]
struct ActivationPayload {
    #[serde(rename = "sessionId")]
    session_id: String,
    address: String,
}

/// Plaintext of the `ready` reply, echoed back by the wallet in `auth`.
#[derive(Serialize, Deserialize)]
struct LinkProof {
    #[serde(rename = "clientSessionId")]
    client_session_id: String,
    #[serde(rename = "isRegistered")]
    is_registered: bool,
}

/// The protocol state machine.
pub struct Engine {
    config: Arc<ServerConfig>,
    cipher: SessionCipher,
    table: Mutex<SessionTable>,
    hooks: Arc<dyn AuthHooks>,
    resolver: Arc<dyn IdentityResolver>,
}

impl Engine {
    /// Build an engine over injected hook and resolver implementations.
    pub fn new(
        config: Arc<ServerConfig>,
        hooks: Arc<dyn AuthHooks>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let cipher = SessionCipher::new(&config.shared_secret);
        Self {
            config,
            cipher,
            table: Mutex::new(SessionTable::new()),
            hooks,
            resolver,
        }
    }

    /// Number of live sessions (including preserved offline browsers).
    pub fn session_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Register a newly accepted connection: mint its session and arm the
    /// deadline. The deadline is keyed by session id, so it follows the
    /// session across reconnect re-keying and becomes a no-op once the
    /// session is torn down.
    pub fn register_connection(self: &Arc<Self>, handle: ConnHandle) {
        let session_id = self.table.lock().insert(handle);
        tracing::debug!(session_id, "connection registered");

        let engine = Arc::clone(self);
        let deadline = self.config.session_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            engine.finalize_deadline(&session_id).await;
        });
    }

    /// Decode and dispatch one inbound frame.
    pub async fn handle_frame(self: &Arc<Self>, conn: &ConnHandle, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(conn = conn.id(), "undecodable frame: {e}");
                conn.send(Envelope::error("Invalid message format"));
                conn.close();
                return;
            }
        };
        self.dispatch(conn, envelope).await;
    }

    async fn dispatch(self: &Arc<Self>, conn: &ConnHandle, envelope: Envelope) {
        match envelope {
            Envelope::AuthInit { .. } => self.handle_auth_init(conn).await,
            Envelope::Activate { data } => self.handle_activate(conn, data).await,
            Envelope::Auth {
                address,
                data,
                signature,
                ..
            } => self.handle_auth(conn, address, data, signature).await,
            Envelope::Declined { data, .. } => self.handle_declined(conn, data).await,
            Envelope::Reconnect { session_id, .. } => {
                self.handle_reconnect(conn, session_id).await
            }
            Envelope::Health {} => {
                conn.send(Envelope::Health {});
            }
            other => {
                tracing::warn!(conn = conn.id(), "unsupported inbound command: {other:?}");
                conn.send(Envelope::error(Error::UnknownCommand.user_message()));
                conn.close();
            }
        }
    }

    /// `auth_init`: mark the connection as the browser side, obtain a QR
    /// target from the gate, and hand both identifiers back.
    async fn handle_auth_init(&self, conn: &ConnHandle) {
        let session_id = {
            let mut table = self.table.lock();
            match table.get_mut(conn.id()) {
                Some(session) => {
                    session.mark_browser();
                    session.session_id().to_string()
                }
                None => {
                    conn.send(Envelope::error(Error::SessionNotFound.user_message()));
                    conn.close();
                    return;
                }
            }
        };

        // The QR payload is the encrypted session id; the orchestrator
        // sends it back inside `activate`.
        let link_secret = BASE64.encode(self.cipher.encrypt(session_id.as_bytes()));

        let link_web = match self.issue_qr_task(&link_secret).await {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(session_id, "QR issuance failed: {e}");
                // Browser stays open; it may retry the init.
                conn.send(Envelope::error(e.gate_user_message()));
                return;
            }
        };

        conn.send(Envelope::AuthInit {
            session_id: Some(session_id),
            link_web: Some(link_web),
        });
    }

    /// Short-lived gate session for one QR issuance.
    async fn issue_qr_task(&self, payload: &str) -> crate::error::Result<String> {
        let gate = GateClient::connect_with_timeout(
            &self.config.gate_url,
            self.config.gate_connect_timeout,
        )
        .await?;
        let link = gate
            .create_task(&self.config.project_id.to_string(), payload)
            .await;
        gate.close();
        link
    }

    /// `activate`: decrypt the link payload, bind the address exactly
    /// once, mint the wallet-side handle, and tell the browser.
    async fn handle_activate(&self, conn: &ConnHandle, data: Option<ByteBuf>) {
        let Some(data) = data else {
            self.fail_one_shot(conn, &Error::MissingParameters);
            return;
        };

        let payload = match self.decrypt_json::<ActivationPayload>(&data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(conn = conn.id(), "bad activation payload: {e}");
                self.fail_one_shot(conn, &e);
                return;
            }
        };

        let activated = {
            let mut table = self.table.lock();
            if let Some(own) = table.get_mut(conn.id()) {
                if own.session_id() != payload.session_id {
                    own.mark_peer_of(&payload.session_id);
                }
            }
            match table.find_by_session_id(&payload.session_id) {
                None => Err(Error::SessionNotFound),
                Some((_, session)) => session
                    .activate(&payload.address)
                    .map(|client_session_id| (client_session_id, session.transport().cloned())),
            }
        };

        let (client_session_id, browser) = match activated {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_one_shot(conn, &e);
                return;
            }
        };

        let is_registered = match self.hooks.identity_check(&payload.address).await {
            Ok(flag) => flag,
            Err(e) => {
                tracing::warn!("identity check hook failed, treating as unregistered: {e}");
                false
            }
        };

        let proof = LinkProof {
            client_session_id,
            is_registered,
        };
        let reply_data = self
            .cipher
            .encrypt(&serde_json::to_vec(&proof).expect("proof serialization is infallible"));

        if let Some(browser) = browser {
            browser.send(Envelope::Activated {});
        }

        conn.send(Envelope::Ready {
            data: ByteBuf::from(reply_data),
        });
        conn.close();
    }

    /// `auth`: the wallet's final proof. The signature must cover the
    /// encrypted payload bytes exactly as received; nothing is cached and
    /// no hook runs unless it verifies.
    async fn handle_auth(
        &self,
        conn: &ConnHandle,
        address: Option<String>,
        data: Option<ByteBuf>,
        signature: Option<ByteBuf>,
    ) {
        let (Some(address), Some(data), Some(signature)) = (address, data, signature) else {
            self.fail_one_shot(conn, &Error::MissingParameters);
            return;
        };

        let proof = match self.decrypt_json::<LinkProof>(&data) {
            Ok(proof) => proof,
            Err(e) => {
                tracing::warn!(conn = conn.id(), "bad auth payload: {e}");
                self.fail_one_shot(conn, &e);
                return;
            }
        };

        let session_id = {
            let mut table = self.table.lock();
            let found = table
                .find_by_client_session_id(&proof.client_session_id)
                .filter(|(_, session)| session.state() == SessionState::Activated)
                .map(|(_, session)| session.session_id().to_string());
            match found {
                Some(session_id) => {
                    if let Some(own) = table.get_mut(conn.id()) {
                        if own.session_id() != session_id {
                            own.mark_peer_of(&session_id);
                        }
                    }
                    session_id
                }
                None => {
                    drop(table);
                    self.fail_one_shot(conn, &Error::SessionNotFound);
                    return;
                }
            }
        };

        let bundle = match self.resolver.resolve(&address).await {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::error!(session_id, "identity bundle resolution failed: {e}");
                conn.send(Envelope::error("Failed to resolve identity"));
                conn.close();
                return;
            }
        };

        let verifier = match Verifier::from_bundle_keys(
            &bundle.signing_public_key,
            bundle.encapsulation_public_key.as_deref(),
        ) {
            Ok(verifier) => verifier,
            Err(e) => {
                tracing::error!(session_id, "unusable identity bundle: {e}");
                self.fail_one_shot(conn, &e);
                return;
            }
        };

        if let Err(e) = verifier.check_signature(data.as_slice(), signature.as_slice()) {
            tracing::warn!(session_id, "wallet proof rejected: {e}");
            self.fail_one_shot(conn, &e);
            return;
        }

        let outcome = match self
            .hooks
            .authenticated(AuthenticatedEvent {
                address: address.clone(),
                claims: bundle.claims.clone(),
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(session_id, "authenticated hook failed: {e}");
                AuthOutcome {
                    token: None,
                    error: Some("Internal error".into()),
                }
            }
        };
        let payload = outcome.into_payload();

        // Re-resolve under the lock: the session may have hit its deadline
        // while the hook ran.
        let delivery = {
            let mut table = self.table.lock();
            match table.find_by_client_session_id(&proof.client_session_id) {
                Some((browser_conn_id, session))
                    if session.state() == SessionState::Activated =>
                {
                    session.store_auth_result(payload.clone());
                    Some((browser_conn_id, session.transport().cloned()))
                }
                _ => None,
            }
        };

        match delivery {
            None => {
                self.fail_one_shot(conn, &Error::SessionNotFound);
                return;
            }
            Some((browser_conn_id, Some(browser))) => {
                if browser.send(Envelope::AuthResult { payload }) {
                    browser.close();
                    // Terminal result delivered: the transaction is done.
                    self.table.lock().remove(browser_conn_id);
                }
            }
            // Browser offline: result stays cached for its reconnect.
            Some((_, None)) => {}
        }

        conn.send(Envelope::Auth {
            address: None,
            data: None,
            signature: None,
            message: Some(WELCOME_MESSAGE.into()),
        });
        conn.close();
    }

    /// `declined`: best-effort resolution, unconditional acknowledgement.
    async fn handle_declined(&self, conn: &ConnHandle, data: Option<ByteBuf>) {
        let proof = data.as_deref().and_then(|d| {
            match self.decrypt_json::<LinkProof>(d) {
                Ok(proof) => Some(proof),
                Err(e) => {
                    tracing::warn!(conn = conn.id(), "unresolvable decline payload: {e}");
                    None
                }
            }
        });

        if let Some(proof) = proof {
            let resolved = {
                let mut table = self.table.lock();
                match table.find_by_client_session_id(&proof.client_session_id) {
                    Some((browser_conn_id, session)) if !session.has_terminal_result() => {
                        session.store_decline(DECLINED_MESSAGE);
                        Some((
                            browser_conn_id,
                            session.transport().cloned(),
                            session.address().map(String::from),
                            session.session_id().to_string(),
                        ))
                    }
                    _ => None,
                }
            };

            match resolved {
                Some((browser_conn_id, transport, address, session_id)) => {
                    if let Some(browser) = transport {
                        if browser.send(Envelope::Declined {
                            data: None,
                            message: Some(DECLINED_MESSAGE.into()),
                        }) {
                            browser.close();
                            self.table.lock().remove(browser_conn_id);
                        }
                    }

                    let event = DeclinedEvent {
                        address,
                        reason: DeclineReason::UserDeclined,
                        message: DECLINED_MESSAGE.into(),
                        declined_by: "user",
                        session_id,
                    };
                    if let Err(e) = self.hooks.declined(event).await {
                        // The acknowledgement below still goes out.
                        tracing::error!("decline hook failed: {e}");
                    }
                }
                None => {
                    tracing::warn!(conn = conn.id(), "decline did not resolve to a session");
                }
            }
        }

        conn.send(Envelope::Declined {
            data: None,
            message: None,
        });
        conn.close();
    }

    /// `reconnect`: re-key the preserved session onto this connection and
    /// replay a cached terminal result at most once.
    async fn handle_reconnect(&self, conn: &ConnHandle, session_id: Option<String>) {
        let session_id = match session_id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => {
                conn.send(Envelope::error("sessionId required"));
                conn.close();
                return;
            }
        };

        let rebound = {
            let mut table = self.table.lock();
            let old_conn_id = match table.find_by_session_id(&session_id) {
                Some((conn_id, _)) => conn_id,
                None => {
                    drop(table);
                    conn.send(Envelope::error("session_not_found"));
                    conn.close();
                    return;
                }
            };

            // Drop the placeholder session minted when this connection
            // arrived, then re-key the preserved one onto it.
            if old_conn_id != conn.id() {
                table.remove(conn.id());
            }
            let mut session = table.remove(old_conn_id).expect("found above");
            session.rebind_transport(conn.clone());
            let status = session.status();
            let auth_result = session.auth_result().cloned();
            let decline_result = session.decline_result().map(String::from);
            table.reinsert(conn.id(), session);
            (status, auth_result, decline_result)
        };
        let (status, auth_result, decline_result) = rebound;

        tracing::debug!(session_id, ?status, "browser rebound");
        conn.send(Envelope::Reconnect {
            session_id: Some(session_id),
            status: Some(status),
        });

        if let Some(payload) = auth_result {
            conn.send(Envelope::AuthResult { payload });
            conn.close();
            self.table.lock().remove(conn.id());
        } else if let Some(message) = decline_result {
            conn.send(Envelope::Declined {
                data: None,
                message: Some(message),
            });
            conn.close();
            self.table.lock().remove(conn.id());
        }
    }

    /// Connection teardown policy.
    ///
    /// Browser sessions without a terminal result survive any close so one
    /// reconnect can rebind them. An abnormal close of a one-shot peer
    /// pushes a `connection_failed` notice to its counterpart.
    pub fn handle_disconnect(&self, conn_id: ConnId, clean: bool) {
        let mut table = self.table.lock();
        let Some(session) = table.remove(conn_id) else {
            return;
        };

        if session.is_browser() && !session.has_terminal_result() {
            tracing::debug!(
                session_id = session.session_id(),
                "preserving browser session for reconnect"
            );
            let mut session = session;
            session.detach_transport();
            table.reinsert(conn_id, session);
            return;
        }

        if !clean {
            if let Some(target_id) = session.peer_of() {
                if let Some((_, target)) = table.find_by_session_id(target_id) {
                    if let Some(counterpart) = target.transport() {
                        counterpart.send(Envelope::ConnectionFailed {});
                    }
                }
            }
        }
    }

    /// Deadline finalization: fires for every session 10 minutes after
    /// registration, independent of any per-operation timeout.
    async fn finalize_deadline(&self, session_id: &str) {
        let removed = {
            let mut table = self.table.lock();
            let conn_id = match table.find_by_session_id(session_id) {
                Some((conn_id, _)) => conn_id,
                None => return,
            };
            table.remove(conn_id).expect("found above")
        };

        let transport = removed.transport().cloned();
        match removed.state() {
            SessionState::AwaitingActivation | SessionState::Activated => {
                tracing::info!(session_id, "session deadline reached");
                if let Some(conn) = &transport {
                    conn.send(Envelope::Timeout {});
                    conn.close();
                }

                let event = DeclinedEvent {
                    address: removed.address().map(String::from),
                    reason: DeclineReason::Timeout,
                    message: TIMEOUT_MESSAGE.into(),
                    declined_by: "system",
                    session_id: session_id.to_string(),
                };
                if let Err(e) = self.hooks.declined(event).await {
                    tracing::error!("decline hook failed on timeout: {e}");
                }
            }
            // Idle, or terminal with the result already cached: the hook
            // (if any) ran at the terminal step, so just clean up.
            _ => {
                if let Some(conn) = &transport {
                    conn.close();
                }
            }
        }
    }

    /// Decrypt a session-cipher blob and parse its JSON payload.
    fn decrypt_json<T: serde::de::DeserializeOwned>(&self, data: &[u8]) -> crate::error::Result<T> {
        let plain = self.cipher.decrypt(data)?;
        serde_json::from_slice(&plain)
            .map_err(|e| Error::crypto(format!("undecodable link payload: {e}")))
    }

    /// Error reply on a one-shot peer connection: respond, then close.
    fn fail_one_shot(&self, conn: &ConnHandle, error: &Error) {
        conn.send(Envelope::error(error.user_message()));
        conn.close();
    }
}
