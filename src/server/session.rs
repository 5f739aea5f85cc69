//! RAM-only session tracking.
//!
//! One [`Session`] per authentication transaction, held in a table keyed
//! by the ephemeral connection id of whichever connection currently owns
//! it. Correlation lookups (`sessionId`, `clientSessionId`) are linear
//! scans; at expected table sizes that beats maintaining secondary
//! indexes.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::wire::{Envelope, ReconnectStatus};

/// Ephemeral identifier of a live transport connection.
pub type ConnId = u64;

/// Instruction for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Encode and send a protocol envelope
    Message(Envelope),
    /// Send a liveness probe frame
    Ping,
    /// Send a close frame and stop writing
    Close,
}

/// Sending side of one live connection.
///
/// All outbound traffic for a connection funnels through its writer task,
/// so sends and teardown are serialized; a handle can therefore be cloned
/// into the session table and used from any protocol step.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: ConnId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnHandle {
    /// Wrap a connection's writer queue.
    pub fn new(id: ConnId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// The connection id this handle sends to.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue an envelope. Returns false if the writer is already gone.
    pub fn send(&self, envelope: Envelope) -> bool {
        self.tx.send(Outbound::Message(envelope)).is_ok()
    }

    /// Queue a liveness probe.
    pub fn ping(&self) {
        let _ = self.tx.send(Outbound::Ping);
    }

    /// Queue a close frame.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Protocol state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection registered, no QR issued yet
    Created,
    /// QR issued, waiting for the orchestrator's activation
    AwaitingActivation,
    /// Address bound, waiting for the wallet's proof
    Activated,
    /// Terminal: proof accepted
    Completed,
    /// Terminal: declined by the user or by deadline
    Declined,
}

/// A single authentication transaction.
pub struct Session {
    session_id: String,
    client_session_id: Option<String>,
    address: Option<String>,
    transport: Option<ConnHandle>,
    is_browser: bool,
    peer_of: Option<String>,
    auth_result: Option<serde_json::Value>,
    decline_result: Option<String>,
    state: SessionState,
    created_at: Instant,
}

impl Session {
    fn new(transport: ConnHandle) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            client_session_id: None,
            address: None,
            transport: Some(transport),
            is_browser: false,
            peer_of: None,
            auth_result: None,
            decline_result: None,
            state: SessionState::Created,
            created_at: Instant::now(),
        }
    }

    /// The browser-visible transaction handle.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The wallet-side handle, present only after activation.
    pub fn client_session_id(&self) -> Option<&str> {
        self.client_session_id.as_deref()
    }

    /// The bound identity address, present only after activation.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When this session was registered.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The currently bound connection, if one is live.
    pub fn transport(&self) -> Option<&ConnHandle> {
        self.transport.as_ref()
    }

    /// Whether this session was opened by a browser (QR-initiating) peer.
    pub fn is_browser(&self) -> bool {
        self.is_browser
    }

    /// For one-shot peer connections: the transaction they acted on.
    pub fn peer_of(&self) -> Option<&str> {
        self.peer_of.as_deref()
    }

    /// Cached terminal success payload, if any.
    pub fn auth_result(&self) -> Option<&serde_json::Value> {
        self.auth_result.as_ref()
    }

    /// Cached decline message, if any.
    pub fn decline_result(&self) -> Option<&str> {
        self.decline_result.as_deref()
    }

    /// Mark this session as the browser side of a transaction and move it
    /// into the QR-issued state.
    pub fn mark_browser(&mut self) {
        self.is_browser = true;
        if self.state == SessionState::Created {
            self.state = SessionState::AwaitingActivation;
        }
    }

    /// Mark this session as a one-shot peer acting on `session_id`.
    pub fn mark_peer_of(&mut self, session_id: &str) {
        self.is_browser = false;
        self.peer_of = Some(session_id.to_string());
    }

    /// Bind an address and mint the wallet-side handle.
    ///
    /// The address is write-once: a second activation attempt fails
    /// without touching the stored value, and the `clientSessionId` is
    /// minted exactly here and never again.
    pub fn activate(&mut self, address: &str) -> Result<String> {
        if self.address.is_some() {
            return Err(Error::SessionActivated);
        }
        let client_session_id = Uuid::new_v4().to_string();
        self.address = Some(address.to_string());
        self.client_session_id = Some(client_session_id.clone());
        self.state = SessionState::Activated;
        Ok(client_session_id)
    }

    /// Cache the terminal success payload.
    pub fn store_auth_result(&mut self, payload: serde_json::Value) {
        self.auth_result = Some(payload);
        self.state = SessionState::Completed;
    }

    /// Cache the terminal decline message.
    pub fn store_decline(&mut self, message: &str) {
        self.decline_result = Some(message.to_string());
        self.state = SessionState::Declined;
    }

    /// Whether a terminal outcome is already cached.
    pub fn has_terminal_result(&self) -> bool {
        self.auth_result.is_some() || self.decline_result.is_some()
    }

    /// Detach the transport, e.g. when preserving a dropped browser.
    pub fn detach_transport(&mut self) {
        self.transport = None;
    }

    /// Rebind the transport to a new connection.
    pub fn rebind_transport(&mut self, handle: ConnHandle) {
        self.transport = Some(handle);
    }

    /// The coarse status reported to a reconnecting browser.
    pub fn status(&self) -> ReconnectStatus {
        match self.state {
            SessionState::Created | SessionState::AwaitingActivation => ReconnectStatus::Waiting,
            SessionState::Activated => ReconnectStatus::Activated,
            SessionState::Declined => ReconnectStatus::Declined,
            SessionState::Completed => ReconnectStatus::Completed,
        }
    }
}

/// All live sessions, keyed by owning connection id.
///
/// The table itself is not synchronized; the engine wraps it in a single
/// mutex and performs every check-then-mutate sequence under that one
/// lock, which is what makes activation and result storage race-free.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<ConnId, Session>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and mint its session.
    pub fn insert(&mut self, transport: ConnHandle) -> String {
        let conn_id = transport.id();
        let session = Session::new(transport);
        let session_id = session.session_id.clone();
        self.sessions.insert(conn_id, session);
        session_id
    }

    /// The session owned by a connection.
    pub fn get_mut(&mut self, conn_id: ConnId) -> Option<&mut Session> {
        self.sessions.get_mut(&conn_id)
    }

    /// Remove and return a connection's session.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<Session> {
        self.sessions.remove(&conn_id)
    }

    /// Re-key a session under a different connection id.
    pub fn reinsert(&mut self, conn_id: ConnId, session: Session) {
        self.sessions.insert(conn_id, session);
    }

    /// Find by browser-visible handle.
    pub fn find_by_session_id(&mut self, session_id: &str) -> Option<(ConnId, &mut Session)> {
        self.sessions
            .iter_mut()
            .find(|(_, s)| s.session_id == session_id)
            .map(|(id, s)| (*id, s))
    }

    /// Find by wallet-side handle; only activated sessions have one.
    pub fn find_by_client_session_id(
        &mut self,
        client_session_id: &str,
    ) -> Option<(ConnId, &mut Session)> {
        self.sessions
            .iter_mut()
            .find(|(_, s)| s.client_session_id.as_deref() == Some(client_session_id))
            .map(|(id, s)| (*id, s))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
