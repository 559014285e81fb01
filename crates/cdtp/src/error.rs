//! The crate's error taxonomy and the sticky last-error channel (component G).
//!
//! Every fallible public operation returns a [`CdtpError`] directly, the idiomatic
//! path for a Rust library, but also records the failure in a thread-local
//! last-error cell and, if one is registered, hands it to a process-wide sink
//! callback. This mirrors a C library's `errno`-style error reporting for callers
//! that prefer polling over `Result` propagation, without actually using global
//! mutable state: the cell is thread-local, so two threads driving two connections
//! never see each other's errors.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::registry::ClientId;

/// The crate's error type. Every public, fallible operation returns this.
#[derive(Debug, thiserror::Error, Clone)]
pub enum CdtpError {
    #[error("socket subsystem not initialized")]
    InitFailure,

    #[error("failed to create socket: {0}")]
    SocketCreateFailure(String),

    #[error("failed to set socket option: {0}")]
    SetSockoptFailure(String),

    #[error("failed to bind to {0}: {1}")]
    BindFailure(String, String),

    #[error("failed to listen: {0}")]
    ListenFailure(String),

    #[error("failed to accept connection: {0}")]
    AcceptFailure(String),

    #[error("failed to resolve address {0}")]
    AddressResolutionFailure(String),

    #[error("failed to connect to {0}: {1}")]
    ConnectFailure(String, String),

    #[error("server is already serving")]
    AlreadyServing,

    #[error("server is not serving")]
    NotServing,

    #[error("a stopped server cannot be restarted")]
    CannotRestart,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("client is not connected")]
    NotConnected,

    #[error("a disconnected client cannot reconnect; create a new client")]
    CannotReconnect,

    #[error("send failed: {0}")]
    SendFailure(String),

    #[error("receive failed: {0}")]
    RecvFailure(String),

    #[error("disconnect failed: {0}")]
    DisconnectFailure(String),

    #[error("failed to join worker task: {0}")]
    ThreadJoinFailure(String),

    #[error("client {0} does not exist")]
    ClientDoesNotExist(ClientId),

    #[error("key exchange failed: {0}")]
    KeyExchangeFailure(String),

    #[error("the handshake did not complete within the configured timeout")]
    HandshakeTimeout,

    #[error("server has reached its client capacity")]
    ServerFull,

    #[error("cryptographic primitive failed: {0}")]
    OpensslError(String),

    #[error("failed to start worker task: {0}")]
    ThreadStartFailure(String),
}

pub type Result<T> = std::result::Result<T, CdtpError>;

/// An opaque, user-supplied value forwarded to a registered error sink, the Rust
/// analogue of the C API's `void *arg`.
pub type SinkOpaque = std::sync::Arc<dyn std::any::Any + Send + Sync>;

type SinkFn = dyn Fn(&CdtpError, Option<&SinkOpaque>) + Send + Sync;

struct ErrorSink {
    f: Box<SinkFn>,
    opaque: Option<SinkOpaque>,
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

fn sink_cell() -> &'static Mutex<Option<ErrorSink>> {
    static SINK: OnceLock<Mutex<Option<ErrorSink>>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(None))
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CdtpError>> = const { RefCell::new(None) };
}

/// Register a callback invoked synchronously whenever any thread records an error
/// via [`set_error`]. Replaces any previously registered sink.
pub fn on_error<F>(f: F, opaque: Option<SinkOpaque>)
where
    F: Fn(&CdtpError, Option<&SinkOpaque>) + Send + Sync + 'static,
{
    *sink_cell().lock().expect("error sink mutex poisoned") = Some(ErrorSink {
        f: Box::new(f),
        opaque,
    });
}

/// Unregister the error sink, if one is registered.
pub fn on_error_clear() {
    *sink_cell().lock().expect("error sink mutex poisoned") = None;
}

/// Record `err` as this thread's last error and forward it to the registered sink,
/// if any. Called by every fallible operation before it returns its `Err`.
pub fn set_error(err: CdtpError) {
    tracing::error!(error = %err, "cdtp operation failed");

    if let Some(sink) = sink_cell().lock().expect("error sink mutex poisoned").as_ref() {
        (sink.f)(&err, sink.opaque.as_ref());
    }

    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(err.clone());
    });
}

/// The calling thread's last recorded error, if any. Sticky until cleared or
/// overwritten by the next failing operation. A successful call never clears it.
pub fn last_error() -> Option<CdtpError> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

/// Clear the calling thread's last-error cell.
pub fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Record `err` in the last-error channel and return it, for use at a fallible
/// operation's single exit point: `return Err(track(CdtpError::NotConnected))`.
pub(crate) fn track(err: CdtpError) -> CdtpError {
    set_error(err.clone());
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn last_error_is_sticky_until_cleared() {
        clear_error();
        assert!(last_error().is_none());
        set_error(CdtpError::NotConnected);
        assert!(matches!(last_error(), Some(CdtpError::NotConnected)));
        clear_error();
        assert!(last_error().is_none());
    }

    #[test]
    fn sink_is_invoked_synchronously() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        on_error(move |_err, _opaque| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }, None);

        set_error(CdtpError::AlreadyServing);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        on_error_clear();
        set_error(CdtpError::AlreadyServing);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
