//! The client side of a connection (component F): handshake, a steady-state
//! read loop woken either by incoming data or by a local disconnect request,
//! and send.
//!
//! State machine: `Fresh -> Connecting -> Connected -> Disconnecting -> Done`.
//! Once `Done`, a client is spent: reconnecting is refused rather than
//! silently reusing a session key from a prior handshake.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::crypto::aes::SessionKey;
use crate::error::{track, CdtpError, Result};
use crate::event::{dispatch, ClientHandler, NoopHandler, SharedClientHandler};
use crate::framing::{read_message, write_message, ReadOutcome};
use crate::handshake;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Fresh,
    Connecting,
    Connected,
    Disconnecting,
    Done,
}

/// Tunables for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub handshake_timeout: Duration,
    /// See [`crate::server::ServerConfig::event_blocking`].
    pub event_blocking: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            event_blocking: false,
        }
    }
}

struct Inner {
    state: StdMutex<ClientState>,
    handler: SharedClientHandler,
    config: ClientConfig,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    session: StdMutex<Option<SessionKey>>,
    notify: Notify,
    handle_task: StdMutex<Option<JoinHandle<()>>>,
    local_addr: StdMutex<Option<SocketAddr>>,
    server_host: StdMutex<Option<String>>,
    server_port: StdMutex<Option<u16>>,
}

/// One connection to a [`crate::server::Server`].
///
/// Cheap to clone: every clone shares the same connection state, which is what
/// lets a [`ClientHandler`] hold one to call `send`/`disconnect` back on the
/// connection it was registered on.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_handler(config, Arc::new(NoopHandler))
    }

    pub fn with_handler(config: ClientConfig, handler: SharedClientHandler) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(ClientState::Fresh),
                handler,
                config,
                writer: AsyncMutex::new(None),
                session: StdMutex::new(None),
                notify: Notify::new(),
                handle_task: StdMutex::new(None),
                local_addr: StdMutex::new(None),
                server_host: StdMutex::new(None),
                server_port: StdMutex::new(None),
            }),
        }
    }

    /// Resolve `host` (mapping the literal `localhost` to `127.0.0.1`), connect,
    /// and run the handshake. On a `SERVER_FULL` rejection the client moves
    /// straight to `Done` and `on_disconnected` fires, matching the contract for
    /// any other disconnect.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                ClientState::Fresh => *state = ClientState::Connecting,
                ClientState::Done => return Err(track(CdtpError::CannotReconnect)),
                ClientState::Connecting | ClientState::Connected | ClientState::Disconnecting => {
                    return Err(track(CdtpError::AlreadyConnected))
                }
            }
        }

        let resolved_host = if host == "localhost" { "127.0.0.1" } else { host };
        let mut stream = match TcpStream::connect((resolved_host, port)).await {
            Ok(s) => s,
            Err(e) => {
                *self.inner.state.lock().unwrap() = ClientState::Fresh;
                return Err(track(CdtpError::ConnectFailure(format!("{resolved_host}:{port}"), e.to_string())));
            }
        };

        let local_addr = stream.local_addr().ok();

        let session = match handshake::client_handshake(&mut stream, self.inner.config.handshake_timeout).await {
            Ok(session) => session,
            Err(CdtpError::ServerFull) => {
                *self.inner.state.lock().unwrap() = ClientState::Done;
                dispatch(self.inner.config.event_blocking, {
                    let handler = self.inner.handler.clone();
                    async move { handler.on_disconnected().await }
                })
                .await;
                return Err(CdtpError::ServerFull);
            }
            Err(e) => {
                *self.inner.state.lock().unwrap() = ClientState::Fresh;
                return Err(e);
            }
        };

        let (read_half, write_half) = stream.into_split();
        *self.inner.writer.lock().await = Some(write_half);
        *self.inner.session.lock().unwrap() = Some(session);
        *self.inner.local_addr.lock().unwrap() = local_addr;
        *self.inner.server_host.lock().unwrap() = Some(resolved_host.to_string());
        *self.inner.server_port.lock().unwrap() = Some(port);
        *self.inner.state.lock().unwrap() = ClientState::Connected;

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { run_handle_loop(inner, read_half).await });
        *self.inner.handle_task.lock().unwrap() = Some(handle);

        info!(host = resolved_host, port, "client connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.lock().unwrap() == ClientState::Connected
    }

    pub fn host(&self) -> Option<String> {
        self.inner.local_addr.lock().unwrap().map(|a| a.ip().to_string())
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.local_addr.lock().unwrap().map(|a| a.port())
    }

    pub fn server_host(&self) -> Option<String> {
        self.inner.server_host.lock().unwrap().clone()
    }

    pub fn server_port(&self) -> Option<u16> {
        *self.inner.server_port.lock().unwrap()
    }

    /// Encrypt, frame, and write `bytes` to the server.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(track(CdtpError::NotConnected));
        }
        let session = self.inner.session.lock().unwrap().clone();
        let session = session.ok_or_else(|| track(CdtpError::NotConnected))?;
        let ciphertext = session.encrypt(bytes);

        let mut writer_guard = self.inner.writer.lock().await;
        match writer_guard.as_mut() {
            Some(writer) => write_message(writer, &ciphertext).await,
            None => Err(track(CdtpError::NotConnected)),
        }
    }

    /// Close the connection. A no-op if not currently connected. No
    /// `on_disconnected` callback fires for a locally-initiated disconnect.
    /// It fires only for a server-initiated close or rejection.
    pub async fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != ClientState::Connected {
                return;
            }
            *state = ClientState::Disconnecting;
        }

        self.inner.notify.notify_one();
        *self.inner.writer.lock().await = None;

        let handle = self.inner.handle_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        *self.inner.state.lock().unwrap() = ClientState::Done;
    }
}

async fn run_handle_loop(inner: Arc<Inner>, mut read_half: OwnedReadHalf) {
    loop {
        tokio::select! {
            result = read_message(&mut read_half) => {
                match result {
                    Ok(ReadOutcome::Message(ciphertext)) => {
                        let session = inner.session.lock().unwrap().clone();
                        if let Some(session) = session {
                            match session.decrypt(&ciphertext) {
                                Ok(plaintext) => {
                                    dispatch(inner.config.event_blocking, {
                                        let handler = inner.handler.clone();
                                        async move { handler.on_recv(plaintext).await }
                                    })
                                    .await;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "failed to decrypt message from server, dropping it");
                                }
                            }
                        }
                    }
                    Ok(ReadOutcome::Closed) | Err(_) => {
                        finalize_peer_close(&inner).await;
                        return;
                    }
                }
            }
            _ = inner.notify.notified() => {
                // local disconnect(): exit without dispatching on_disconnected.
                return;
            }
        }
    }
}

async fn finalize_peer_close(inner: &Arc<Inner>) {
    *inner.state.lock().unwrap() = ClientState::Done;
    dispatch(inner.config.event_blocking, {
        let handler = inner.handler.clone();
        async move { handler.on_disconnected().await }
    })
    .await;
}
