//! Shared recording handlers and a poll-until-true helper for the integration
//! tests. Polling rather than a single `Notify::notified()` avoids missing a
//! wakeup that fires before the waiter starts listening.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdtp::{ClientHandler, ClientId, ServerHandler};
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RecordingServerHandler {
    pub connected: Mutex<Vec<ClientId>>,
    pub received: Mutex<Vec<(ClientId, Vec<u8>)>>,
    pub disconnected: Mutex<Vec<ClientId>>,
}

impl RecordingServerHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            disconnected: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ServerHandler for RecordingServerHandler {
    async fn on_connect(&self, id: ClientId) {
        self.connected.lock().await.push(id);
    }

    async fn on_recv(&self, id: ClientId, data: Vec<u8>) {
        self.received.lock().await.push((id, data));
    }

    async fn on_disconnect(&self, id: ClientId) {
        self.disconnected.lock().await.push(id);
    }
}

pub struct RecordingClientHandler {
    pub received: Mutex<Vec<Vec<u8>>>,
    pub disconnected: Mutex<bool>,
}

impl RecordingClientHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            disconnected: Mutex::new(false),
        })
    }
}

#[async_trait]
impl ClientHandler for RecordingClientHandler {
    async fn on_recv(&self, data: Vec<u8>) {
        self.received.lock().await.push(data);
    }

    async fn on_disconnected(&self) {
        *self.disconnected.lock().await = true;
    }
}

/// Poll `cond` every 10ms until it returns `true` or `timeout` elapses.
/// Returns whether it converged, so callers can assert on the outcome instead
/// of silently passing on a timeout.
pub async fn wait_until<F, Fut>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cond().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
