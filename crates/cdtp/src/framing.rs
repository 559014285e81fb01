//! Length-prefixed message framing (component A).
//!
//! Every message on the wire is a 5-byte big-endian length `L` followed by
//! exactly `L` bytes of ciphertext. `L` is bounded by `2^40 - 1`, so the whole
//! length fits in 5 bytes with no sign bit to worry about.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{track, CdtpError, Result};

/// Number of bytes used to encode a message length.
pub const LEN_SIZE: usize = 5;

/// One past the largest length the 5-byte field can represent (`2^40`).
pub const MAX_MESSAGE_SIZE: u64 = 1 << (LEN_SIZE * 8);

/// Encode `size` as a 5-byte big-endian length prefix.
///
/// # Panics
///
/// Panics if `size >= 2^40`; callers are expected to have already checked this
/// against the actual ciphertext they are about to send, which can never
/// reasonably approach that bound.
pub fn encode_size(size: u64) -> [u8; LEN_SIZE] {
    assert!(size < MAX_MESSAGE_SIZE, "message size {size} exceeds the 5-byte length field");
    let full = size.to_be_bytes();
    let mut out = [0u8; LEN_SIZE];
    out.copy_from_slice(&full[full.len() - LEN_SIZE..]);
    out
}

/// Decode a 5-byte big-endian length prefix. Total over all inputs.
pub fn decode_size(encoded: &[u8; LEN_SIZE]) -> u64 {
    let mut full = [0u8; 8];
    full[8 - LEN_SIZE..].copy_from_slice(encoded);
    u64::from_be_bytes(full)
}

/// Build a framed message: `encode(len(payload)) ‖ payload`.
pub fn construct_message(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&encode_size(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// The outcome of attempting to read one framed message.
pub enum ReadOutcome {
    Message(Vec<u8>),
    /// The peer closed the connection before (or exactly at) a message boundary.
    /// Not an error. Orderly shutdown is surfaced as a disconnect event.
    Closed,
}

/// Read exactly one framed message from `stream`: 5 length bytes, then that many
/// payload bytes. A clean EOF on the length read is reported as [`ReadOutcome::Closed`];
/// any other short read (EOF mid-payload) is a [`CdtpError::RecvFailure`], since the
/// peer violated the framing contract rather than closing cleanly between messages.
pub async fn read_message<R: AsyncReadExt + Unpin>(stream: &mut R) -> Result<ReadOutcome> {
    let mut len_buf = [0u8; LEN_SIZE];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Closed),
        Err(e) => return Err(track(CdtpError::RecvFailure(e.to_string()))),
    }

    let len = decode_size(&len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| track(CdtpError::RecvFailure(e.to_string())))?;

    Ok(ReadOutcome::Message(payload))
}

/// Write one framed message: `encode(len(payload)) ‖ payload`.
pub async fn write_message<W: AsyncWriteExt + Unpin>(stream: &mut W, payload: &[u8]) -> Result<()> {
    let framed = construct_message(payload);
    stream
        .write_all(&framed)
        .await
        .map_err(|e| track(CdtpError::SendFailure(e.to_string())))
}
