//! Admission control: a server at `max_clients` rejects new connections with
//! `SERVER_FULL` during the handshake, and frees a slot the moment a client
//! disconnects.

mod support;

use std::time::Duration;

use cdtp::{CdtpError, Client, ClientConfig, Server, ServerConfig};
use support::{wait_until, RecordingClientHandler, RecordingServerHandler};

#[tokio::test]
async fn a_rejected_client_is_told_server_full_and_fires_on_disconnected() {
    let server_handler = RecordingServerHandler::new();
    let server = Server::with_handler(
        ServerConfig {
            max_clients: 1,
            ..Default::default()
        },
        server_handler.clone(),
    );
    server.start("127.0.0.1", 0).await.unwrap();
    let port = server.port().unwrap();

    let first = Client::new(ClientConfig::default());
    first.connect("127.0.0.1", port).await.unwrap();

    let rejected_handler = RecordingClientHandler::new();
    let second = Client::with_handler(ClientConfig::default(), rejected_handler.clone());
    let err = second.connect("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(err, CdtpError::ServerFull));
    assert!(!second.is_connected());
    let disconnected = wait_until(Duration::from_secs(1), || async {
        *rejected_handler.disconnected.lock().await
    })
    .await;
    assert!(disconnected, "rejected client never fired on_disconnected");

    // the rejected connection must never have been admitted.
    assert_eq!(server_handler.connected.lock().await.len(), 1);

    first.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn a_freed_slot_admits_the_next_connection() {
    let server_handler = RecordingServerHandler::new();
    let server = Server::with_handler(
        ServerConfig {
            max_clients: 1,
            ..Default::default()
        },
        server_handler.clone(),
    );
    server.start("127.0.0.1", 0).await.unwrap();
    let port = server.port().unwrap();

    let first = Client::new(ClientConfig::default());
    first.connect("127.0.0.1", port).await.unwrap();
    first.disconnect().await;

    let disconnected = wait_until(Duration::from_secs(1), || async {
        !server_handler.disconnected.lock().await.is_empty()
    })
    .await;
    assert!(disconnected, "server never noticed the first client leaving");

    let second = Client::new(ClientConfig::default());
    second.connect("127.0.0.1", port).await.unwrap();
    assert!(second.is_connected());

    second.disconnect().await;
    server.stop().await;
}
