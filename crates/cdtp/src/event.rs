//! Event dispatch (component H): route `on_recv`/`on_connect`/`on_disconnect`/
//! `on_disconnected` either onto a freshly spawned worker (the default) or
//! inline on the calling I/O loop when serialized delivery is requested.
//!
//! The source represents a callback as a name string plus a function pointer
//! union; here the five event shapes are just the methods of two ordinary
//! traits, so there is nothing to tag or switch on.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::ClientId;

/// Callbacks a server registers to observe connection lifecycle and data.
/// Every method has a no-op default, so an application only implements the
/// events it cares about.
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// A client finished the handshake and was assigned `id`.
    async fn on_connect(&self, id: ClientId) {
        let _ = id;
    }

    /// `data` is the decrypted plaintext of one message received from `id`.
    async fn on_recv(&self, id: ClientId, data: Vec<u8>) {
        let _ = (id, data);
    }

    /// `id` disconnected, whether by peer close or a socket error.
    async fn on_disconnect(&self, id: ClientId) {
        let _ = id;
    }
}

/// Callbacks a client registers to observe its one connection.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// `data` is the decrypted plaintext of one message received from the server.
    async fn on_recv(&self, data: Vec<u8>) {
        let _ = data;
    }

    /// The server closed the connection (including a capacity rejection during
    /// the handshake).
    async fn on_disconnected(&self) {}
}

/// A handler that observes nothing. The default for a server or client that was
/// not given an explicit handler.
pub struct NoopHandler;

#[async_trait]
impl ServerHandler for NoopHandler {}

#[async_trait]
impl ClientHandler for NoopHandler {}

/// Run `fut` inline if `event_blocking`, otherwise hand it to its own tokio
/// task. Either way the caller's I/O loop is not blocked by a slow handler
/// unless serialized delivery was explicitly requested.
pub(crate) async fn dispatch<F>(event_blocking: bool, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if event_blocking {
        fut.await;
    } else {
        tokio::spawn(fut);
    }
}

pub type SharedServerHandler = Arc<dyn ServerHandler>;
pub type SharedClientHandler = Arc<dyn ClientHandler>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl ServerHandler for CountingHandler {
        async fn on_recv(&self, _id: ClientId, _data: Vec<u8>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn inline_dispatch_completes_before_returning() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler: SharedServerHandler = Arc::new(CountingHandler(counter.clone()));
        let h = handler.clone();
        dispatch(true, async move { h.on_recv(0, vec![]).await }).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawned_dispatch_eventually_completes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler: SharedServerHandler = Arc::new(CountingHandler(counter.clone()));
        let h = handler.clone();
        dispatch(false, async move { h.on_recv(0, vec![]).await }).await;
        // give the spawned task a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
