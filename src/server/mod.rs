//! Server infrastructure.
//!
//! Accepts WebSocket connections (optionally behind TLS), gives each one a
//! writer task and a registered session, and feeds inbound frames to the
//! [`Engine`]. Within one connection frames are handled strictly in
//! order; across connections everything runs concurrently against the
//! shared session table.

mod config;
mod engine;
mod hooks;
mod session;

pub use config::{Environment, ServerConfig, ServerConfigFile, TlsConfig, DEFAULT_PORT};
pub use engine::Engine;
pub use hooks::{
    AuthHooks, AuthOutcome, AuthenticatedEvent, DeclineReason, DeclinedEvent, IdentityBundle,
    IdentityResolver,
};
pub use session::{ConnHandle, ConnId, Outbound, Session, SessionState, SessionTable};

use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::rustls::{Certificate, PrivateKey};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

/// Main server instance.
pub struct Server {
    config: Arc<ServerConfig>,
    engine: Arc<Engine>,
    next_conn_id: AtomicU64,
}

impl Server {
    /// Create a server over injected hook and resolver implementations.
    pub fn new(
        config: ServerConfig,
        hooks: Arc<dyn AuthHooks>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let engine = Arc::new(Engine::new(Arc::clone(&config), hooks, resolver));
        Ok(Self {
            config,
            engine,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// The protocol engine, mainly for introspection.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Bind the configured address and serve until the process ends.
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.listen_addr, self.config.listen_port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("gatelink server listening on {addr}");
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let tls_acceptor = match &self.config.tls {
            Some(tls) => Some(build_tls_acceptor(tls)?),
            None => None,
        };

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
                    let engine = Arc::clone(&self.engine);
                    let ping_interval = self.config.ping_interval;
                    let tls_acceptor = tls_acceptor.clone();

                    tokio::spawn(async move {
                        let result = match tls_acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    handle_socket(engine, conn_id, ping_interval, tls_stream).await
                                }
                                Err(e) => {
                                    tracing::debug!("TLS accept from {peer_addr} failed: {e}");
                                    Ok(())
                                }
                            },
                            None => handle_socket(engine, conn_id, ping_interval, stream).await,
                        };
                        if let Err(e) = result {
                            tracing::debug!("connection {conn_id} from {peer_addr} ended: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                }
            }
        }
    }
}

/// Load PEM credentials into a TLS acceptor.
fn build_tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&tls.cert_path)?))
        .map_err(|e| Error::config(format!("unreadable certificate: {e}")))?
        .into_iter()
        .map(Certificate)
        .collect();

    let key = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(&tls.key_path)?))
        .map_err(|e| Error::config(format!("unreadable private key: {e}")))?
        .into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| Error::config("no PKCS#8 private key found"))?;

    let server_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::config(format!("bad TLS credentials: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Whether a close frame counts as a normal teardown.
fn is_normal_close(frame: Option<&CloseFrame<'_>>) -> bool {
    match frame {
        None => true,
        Some(frame) => matches!(frame.code, CloseCode::Normal | CloseCode::Away),
    }
}

/// Drive one connection: writer task, session registration, ordered frame
/// handling, liveness probing, teardown classification.
async fn handle_socket<S>(
    engine: Arc<Engine>,
    conn_id: ConnId,
    ping_interval: Duration,
    stream: S,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = accept_async(stream)
        .await
        .map_err(|e| Error::InvalidMessage(format!("WebSocket accept failed: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Writer task: sole owner of the sink, so pushes, replies and the
    // close frame cannot interleave.
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let (frame, last) = match out {
                Outbound::Message(envelope) => (Message::Binary(envelope.encode()), false),
                Outbound::Ping => (Message::Ping(Vec::new()), false),
                Outbound::Close => (Message::Close(None), true),
            };
            if ws_tx.send(frame).await.is_err() || last {
                break;
            }
        }
    });

    let handle = ConnHandle::new(conn_id, tx);
    engine.register_connection(handle.clone());

    // A connection that missed its previous probe is dropped, independent
    // of the per-session deadline.
    let mut alive = true;
    let mut probe = tokio::time::interval(ping_interval);
    probe.tick().await;

    let clean;
    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Binary(bytes))) => engine.handle_frame(&handle, &bytes).await,
                Some(Ok(Message::Text(text))) => engine.handle_frame(&handle, text.as_bytes()).await,
                Some(Ok(Message::Pong(_))) => alive = true,
                Some(Ok(Message::Close(frame))) => {
                    clean = is_normal_close(frame.as_ref());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("connection {conn_id} read error: {e}");
                    clean = false;
                    break;
                }
                None => {
                    clean = false;
                    break;
                }
            },
            _ = probe.tick() => {
                if !alive {
                    tracing::debug!("connection {conn_id} failed liveness probe, dropping");
                    clean = false;
                    break;
                }
                alive = false;
                handle.ping();
            }
        }
    }

    engine.handle_disconnect(conn_id, clean);
    handle.close();
    Ok(())
}
