//! The three-message handshake (component D): a status frame, then the client's
//! public key, then the RSA-wrapped session key. Distinct from application
//! framing. The status word is interpreted before any session key exists, never
//! handed to the caller as a message.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::crypto::aes::SessionKey;
use crate::crypto::rsa;
use crate::error::{track, CdtpError, Result};
use crate::framing::{read_message, write_message, ReadOutcome};

const STATUS_SIZE: usize = 4;
const STATUS_OK: u32 = 0x0000_0000;
const STATUS_SERVER_FULL: u32 = 0x0000_0001;

async fn with_deadline<T>(d: Duration, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match timeout(d, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(track(CdtpError::HandshakeTimeout)),
    }
}

/// Server-side admission rejection: send the `SERVER_FULL` status frame. The
/// caller is responsible for closing the socket afterward; no client id is ever
/// assigned for a rejected connection.
pub async fn server_reject(stream: &mut TcpStream) -> Result<()> {
    write_message(stream, &STATUS_SERVER_FULL.to_be_bytes()).await
}

/// Server side of the handshake for an admitted connection: send `OK`, receive
/// the client's RSA public key, generate a session key, and send it back
/// RSA-wrapped.
pub async fn server_handshake(stream: &mut TcpStream, deadline: Duration) -> Result<SessionKey> {
    with_deadline(deadline, async {
        write_message(stream, &STATUS_OK.to_be_bytes()).await?;

        let pem_bytes = match read_message(stream).await? {
            ReadOutcome::Message(bytes) => bytes,
            ReadOutcome::Closed => {
                return Err(track(CdtpError::KeyExchangeFailure(
                    "peer closed before sending its public key".into(),
                )))
            }
        };
        let pem = String::from_utf8(pem_bytes)
            .map_err(|e| track(CdtpError::KeyExchangeFailure(e.to_string())))?;
        let public_key = rsa::decode_public_key_pem(&pem)?;

        let session = SessionKey::generate();
        let envelope = rsa::rsa_wrap(&public_key, &session.to_bytes())?;
        write_message(stream, &envelope).await?;

        Ok(session)
    })
    .await
}

/// Client side of the handshake: receive the status frame (surfacing
/// `ServerFull` if rejected), send a freshly generated RSA public key, then
/// receive and unwrap the session key.
pub async fn client_handshake(stream: &mut TcpStream, deadline: Duration) -> Result<SessionKey> {
    with_deadline(deadline, async {
        let status_bytes = match read_message(stream).await? {
            ReadOutcome::Message(bytes) => bytes,
            ReadOutcome::Closed => {
                return Err(track(CdtpError::KeyExchangeFailure(
                    "peer closed before sending the status frame".into(),
                )))
            }
        };
        if status_bytes.len() != STATUS_SIZE {
            return Err(track(CdtpError::KeyExchangeFailure(format!(
                "expected a {STATUS_SIZE}-byte status frame, got {}",
                status_bytes.len()
            ))));
        }
        let status = u32::from_be_bytes(status_bytes.try_into().unwrap());
        if status == STATUS_SERVER_FULL {
            return Err(track(CdtpError::ServerFull));
        }

        let (private_key, public_key) = rsa::generate_keypair()?;
        let pem = rsa::encode_public_key_pem(&public_key)?;
        write_message(stream, pem.as_bytes()).await?;

        let envelope = match read_message(stream).await? {
            ReadOutcome::Message(bytes) => bytes,
            ReadOutcome::Closed => {
                return Err(track(CdtpError::KeyExchangeFailure(
                    "peer closed before sending the wrapped session key".into(),
                )))
            }
        };
        let session_bytes = rsa::rsa_unwrap(&private_key, &envelope)?;
        SessionKey::from_bytes(&session_bytes)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn handshake_round_trip_installs_a_matching_session_key() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            server_handshake(&mut stream, Duration::from_secs(30)).await.unwrap()
        });

        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        let client_session = client_handshake(&mut client_stream, Duration::from_secs(30)).await.unwrap();
        let server_session = server_task.await.unwrap();

        assert_eq!(client_session.key, server_session.key);
        assert_eq!(client_session.iv, server_session.iv);
    }

    #[tokio::test]
    async fn rejected_handshake_surfaces_server_full() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            server_reject(&mut stream).await.unwrap();
        });

        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        let err = client_handshake(&mut client_stream, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, CdtpError::ServerFull));
    }
}
