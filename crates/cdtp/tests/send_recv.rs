//! Round-trip message delivery in both directions, through the full framing +
//! handshake + encryption stack over a real loopback socket.

mod support;

use std::time::Duration;

use cdtp::{Client, ClientConfig, Server, ServerConfig};
use support::{wait_until, RecordingClientHandler, RecordingServerHandler};

#[tokio::test]
async fn client_to_server_message_arrives_decrypted() {
    let server_handler = RecordingServerHandler::new();
    let server = Server::with_handler(ServerConfig::default(), server_handler.clone());
    server.start("127.0.0.1", 0).await.unwrap();
    let port = server.port().unwrap();

    let client = Client::new(ClientConfig::default());
    client.connect("127.0.0.1", port).await.unwrap();
    client.send(b"hello from the client").await.unwrap();

    let got = wait_until(Duration::from_secs(1), || async {
        !server_handler.received.lock().await.is_empty()
    })
    .await;
    assert!(got, "server never received the message");

    let received = server_handler.received.lock().await;
    assert_eq!(received[0].1, b"hello from the client");

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn server_to_client_message_arrives_decrypted() {
    let server_handler = RecordingServerHandler::new();
    let server = Server::with_handler(ServerConfig::default(), server_handler.clone());
    server.start("127.0.0.1", 0).await.unwrap();
    let port = server.port().unwrap();

    let client_handler = RecordingClientHandler::new();
    let client = Client::with_handler(ClientConfig::default(), client_handler.clone());
    client.connect("127.0.0.1", port).await.unwrap();

    let got_connect = wait_until(Duration::from_secs(1), || async {
        !server_handler.connected.lock().await.is_empty()
    })
    .await;
    assert!(got_connect, "server never observed the connection");

    let id = server_handler.connected.lock().await[0];
    server.send(id, b"hello from the server").await.unwrap();

    let got = wait_until(Duration::from_secs(1), || async {
        !client_handler.received.lock().await.is_empty()
    })
    .await;
    assert!(got, "client never received the message");
    assert_eq!(client_handler.received.lock().await[0], b"hello from the server");

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn many_messages_from_one_client_arrive_in_order() {
    let server_handler = RecordingServerHandler::new();
    let server = Server::with_handler(ServerConfig::default(), server_handler.clone());
    server.start("127.0.0.1", 0).await.unwrap();
    let port = server.port().unwrap();

    let client = Client::new(ClientConfig::default());
    client.connect("127.0.0.1", port).await.unwrap();

    for i in 0..50u32 {
        client.send(&i.to_be_bytes()).await.unwrap();
    }

    let got = wait_until(Duration::from_secs(2), || async {
        server_handler.received.lock().await.len() == 50
    })
    .await;
    assert!(got, "not all 50 messages arrived");

    let received = server_handler.received.lock().await;
    for (i, (_, data)) in received.iter().enumerate() {
        assert_eq!(data.as_slice(), (i as u32).to_be_bytes());
    }

    client.disconnect().await;
    server.stop().await;
}
