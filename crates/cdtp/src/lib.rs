//! A length-framed, end-to-end encrypted transport between one server and a
//! bounded population of clients over TCP.
//!
//! Every connection gets its own AES-256-CBC session key, exchanged at connect
//! time under an RSA-2048 wrap. Callers never see the framing or crypto layers
//! directly: [`Server`] and [`Client`] move plaintext in and out, and dispatch
//! [`ServerHandler`]/[`ClientHandler`] callbacks for connect, receive, and
//! disconnect events.
//!
//! ```no_run
//! use cdtp::{Client, ClientConfig, Server, ServerConfig};
//!
//! # async fn run() -> cdtp::Result<()> {
//! let server = Server::new(ServerConfig::default());
//! server.start("127.0.0.1", 7878).await?;
//!
//! let client = Client::new(ClientConfig::default());
//! client.connect("127.0.0.1", 7878).await?;
//! client.send(b"hello").await?;
//! client.disconnect().await;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod crypto;
pub mod error;
pub mod event;
pub mod framing;
pub mod handshake;
pub mod registry;
pub mod server;

pub use client::{Client, ClientConfig};
pub use error::{clear_error, last_error, on_error, on_error_clear, CdtpError, Result, SinkOpaque};
pub use event::{ClientHandler, NoopHandler, ServerHandler, SharedClientHandler, SharedServerHandler};
pub use registry::ClientId;
pub use server::{Server, ServerConfig};
