//! The server loop (component E): accept, admission control, per-connection
//! reads, event dispatch, and graceful shutdown.
//!
//! State machine: `Idle -> Bound -> Listening -> Serving -> Stopping -> Stopped`.
//! Threads-per-connection from the source become tokio tasks: one task running
//! [`run_accept_loop`], one per connected client running [`run_reader`]. `stop()`
//! aborts all of them directly rather than closing sockets to unblock a `select`,
//! since task cancellation is tokio's native equivalent of that trick.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};

use crate::crypto::aes::SessionKey;
use crate::error::{track, CdtpError, Result};
use crate::event::{dispatch, NoopHandler, ServerHandler, SharedServerHandler};
use crate::framing::{read_message, write_message, ReadOutcome};
use crate::handshake;
use crate::registry::{ClientId, Registry};

#[derive(Clone)]
struct ClientRecord {
    addr: SocketAddr,
    session_key: SessionKey,
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    reader_abort: AbortHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Idle,
    Bound,
    Listening,
    Serving,
    Stopping,
    Stopped,
}

/// Tunables for a [`Server`]. `max_clients` is the hard cap enforced by the
/// handshake's admission control; the timeouts fill the gaps the source leaves
/// unhandled (see the crate-level design notes).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub handshake_timeout: Duration,
    /// When set, event callbacks run inline on the I/O loop instead of on their
    /// own spawned task, serializing delivery at the cost of blocking that
    /// connection's progress for the callback's duration.
    pub event_blocking: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 16,
            handshake_timeout: Duration::from_secs(5),
            event_blocking: false,
        }
    }
}

struct Inner {
    state: StdMutex<ServerState>,
    registry: RwLock<Registry<ClientRecord>>,
    next_id: AtomicU64,
    config: ServerConfig,
    handler: SharedServerHandler,
    bound_host: StdMutex<Option<String>>,
    bound_port: StdMutex<Option<u16>>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
}

/// A transport server accepting encrypted connections from up to
/// `config.max_clients` clients at a time.
///
/// Cheap to clone: every clone shares the same accept loop and registry, which
/// is what lets a [`ServerHandler`] hold one to call `send` back into the
/// server it was registered on.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_handler(config, Arc::new(NoopHandler))
    }

    pub fn with_handler(config: ServerConfig, handler: SharedServerHandler) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(ServerState::Idle),
                registry: RwLock::new(Registry::new()),
                next_id: AtomicU64::new(0),
                config,
                handler,
                bound_host: StdMutex::new(None),
                bound_port: StdMutex::new(None),
                accept_task: StdMutex::new(None),
            }),
        }
    }

    /// Bind, listen, and begin accepting connections. Moves `Idle -> Bound ->
    /// Listening -> Serving` in one call.
    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                ServerState::Idle => *state = ServerState::Bound,
                ServerState::Stopping | ServerState::Stopped => {
                    return Err(track(CdtpError::CannotRestart))
                }
                ServerState::Bound | ServerState::Listening | ServerState::Serving => {
                    return Err(track(CdtpError::AlreadyServing))
                }
            }
        }

        let addr = format!("{host}:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                *self.inner.state.lock().unwrap() = ServerState::Idle;
                return Err(track(CdtpError::BindFailure(addr, e.to_string())));
            }
        };

        let local_port = listener
            .local_addr()
            .map_err(|e| track(CdtpError::BindFailure(addr.clone(), e.to_string())))?
            .port();
        *self.inner.bound_host.lock().unwrap() = Some(host.to_string());
        *self.inner.bound_port.lock().unwrap() = Some(local_port);

        *self.inner.state.lock().unwrap() = ServerState::Listening;
        info!(%host, port = local_port, "server listening");
        *self.inner.state.lock().unwrap() = ServerState::Serving;

        let inner = self.inner.clone();
        let accept_handle = tokio::spawn(async move { run_accept_loop(inner, listener).await });
        *self.inner.accept_task.lock().unwrap() = Some(accept_handle);

        Ok(())
    }

    pub fn is_serving(&self) -> bool {
        *self.inner.state.lock().unwrap() == ServerState::Serving
    }

    pub fn host(&self) -> Option<String> {
        self.inner.bound_host.lock().unwrap().clone()
    }

    pub fn port(&self) -> Option<u16> {
        *self.inner.bound_port.lock().unwrap()
    }

    pub async fn client_host(&self, id: ClientId) -> Option<String> {
        self.inner.registry.read().await.get(id).map(|r| r.addr.ip().to_string())
    }

    pub async fn client_port(&self, id: ClientId) -> Option<u16> {
        self.inner.registry.read().await.get(id).map(|r| r.addr.port())
    }

    /// Encrypt, frame, and write `bytes` to `id`.
    pub async fn send(&self, id: ClientId, bytes: &[u8]) -> Result<()> {
        let record = self.inner.registry.read().await.get(id).cloned();
        let record = record.ok_or_else(|| track(CdtpError::ClientDoesNotExist(id)))?;
        let ciphertext = record.session_key.encrypt(bytes);
        let mut writer = record.writer.lock().await;
        write_message(&mut *writer, &ciphertext).await
    }

    /// Best-effort broadcast: every currently connected client is sent `bytes`;
    /// a failure for one recipient does not stop the others.
    pub async fn send_all(&self, bytes: &[u8]) -> Vec<(ClientId, Result<()>)> {
        let snapshot = self.inner.registry.read().await.snapshot();
        let mut results = Vec::with_capacity(snapshot.len());
        for (id, record) in snapshot {
            let ciphertext = record.session_key.encrypt(bytes);
            let mut writer = record.writer.lock().await;
            let res = write_message(&mut *writer, &ciphertext).await;
            drop(writer);
            results.push((id, res));
        }
        results
    }

    /// Forcibly disconnect a client, closing its socket and dispatching
    /// `on_disconnect` as if the peer had gone away.
    pub async fn remove_client(&self, id: ClientId) -> Result<()> {
        let record = self.inner.registry.write().await.remove(id);
        match record {
            Some(record) => {
                record.reader_abort.abort();
                dispatch_disconnect(&self.inner, id).await;
                Ok(())
            }
            None => Err(track(CdtpError::ClientDoesNotExist(id))),
        }
    }

    /// Stop serving: abort the accept loop and every per-client reader, then
    /// drop the registry. A no-op if not currently serving.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != ServerState::Serving {
                return;
            }
            *state = ServerState::Stopping;
        }

        if let Some(handle) = self.inner.accept_task.lock().unwrap().take() {
            handle.abort();
        }

        let snapshot = self.inner.registry.read().await.snapshot();
        for (_, record) in snapshot {
            record.reader_abort.abort();
        }
        *self.inner.registry.write().await = Registry::new();

        *self.inner.state.lock().unwrap() = ServerState::Stopped;
        info!("server stopped");
    }
}

async fn run_accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let inner = inner.clone();
                tokio::spawn(async move { admit(inner, stream, addr).await });
            }
            Err(e) => {
                track(CdtpError::AcceptFailure(e.to_string()));
            }
        }
    }
}

async fn admit(inner: Arc<Inner>, mut stream: TcpStream, addr: SocketAddr) {
    let at_capacity = {
        let registry = inner.registry.read().await;
        registry.len() >= inner.config.max_clients
    };

    if at_capacity {
        if let Err(e) = handshake::server_reject(&mut stream).await {
            warn!(error = %e, %addr, "failed to send server-full rejection");
        }
        return;
    }

    let session = match handshake::server_handshake(&mut stream, inner.config.handshake_timeout).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, %addr, "handshake failed");
            return;
        }
    };

    let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(AsyncMutex::new(write_half));

    let reader_inner = inner.clone();
    let reader_session = session.clone();
    let reader_join = tokio::spawn(async move { run_reader(reader_inner, id, read_half, reader_session).await });

    let record = ClientRecord {
        addr,
        session_key: session,
        writer,
        reader_abort: reader_join.abort_handle(),
    };

    if inner.registry.write().await.insert(id, record).is_err() {
        reader_join.abort();
        return;
    }

    dispatch(inner.config.event_blocking, {
        let handler = inner.handler.clone();
        async move { handler.on_connect(id).await }
    })
    .await;
}

async fn run_reader(inner: Arc<Inner>, id: ClientId, mut read_half: OwnedReadHalf, session: SessionKey) {
    loop {
        match read_message(&mut read_half).await {
            Ok(ReadOutcome::Message(ciphertext)) => match session.decrypt(&ciphertext) {
                Ok(plaintext) => {
                    dispatch(inner.config.event_blocking, {
                        let handler = inner.handler.clone();
                        async move { handler.on_recv(id, plaintext).await }
                    })
                    .await;
                }
                Err(e) => {
                    warn!(error = %e, client_id = id, "failed to decrypt message, dropping it");
                }
            },
            Ok(ReadOutcome::Closed) => {
                if inner.registry.write().await.remove(id).is_some() {
                    dispatch_disconnect(&inner, id).await;
                }
                return;
            }
            Err(_) => {
                if inner.registry.write().await.remove(id).is_some() {
                    dispatch_disconnect(&inner, id).await;
                }
                return;
            }
        }
    }
}

async fn dispatch_disconnect(inner: &Arc<Inner>, id: ClientId) {
    dispatch(inner.config.event_blocking, {
        let handler = inner.handler.clone();
        async move { handler.on_disconnect(id).await }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn lifecycle_with_no_connections_fires_no_events() {
        let server = Server::new(ServerConfig {
            max_clients: 16,
            ..Default::default()
        });
        server.start("127.0.0.1", 0).await.unwrap();
        assert!(server.is_serving());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        server.stop().await;
        assert!(!server.is_serving());
    }

    #[tokio::test]
    async fn cannot_restart_after_stop() {
        let server = Server::new(ServerConfig::default());
        server.start("127.0.0.1", 0).await.unwrap();
        server.stop().await;
        let err = server.start("127.0.0.1", 0).await.unwrap_err();
        assert!(matches!(err, CdtpError::CannotRestart));
    }

    #[tokio::test]
    async fn already_serving_rejects_a_second_start() {
        let server = Server::new(ServerConfig::default());
        server.start("127.0.0.1", 0).await.unwrap();
        let err = server.start("127.0.0.1", 0).await.unwrap_err();
        assert!(matches!(err, CdtpError::AlreadyServing));
        server.stop().await;
    }

    #[tokio::test]
    async fn send_to_unknown_client_fails() {
        let server = Server::new(ServerConfig::default());
        server.start("127.0.0.1", 0).await.unwrap();
        let err = server.send(42, b"hi").await.unwrap_err();
        assert!(matches!(err, CdtpError::ClientDoesNotExist(42)));
        server.stop().await;
    }
}
