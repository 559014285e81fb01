//! RSA keypair generation and the RSA-wrap envelope used to transport a session
//! key across the handshake.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use super::aes::SessionKey;
use crate::error::{track, CdtpError, Result};
use crate::framing::{decode_size, encode_size, LEN_SIZE};

/// Bit size of keys generated by [`generate_keypair`], per the handshake contract.
pub const RSA_KEY_BITS: usize = 2048;

/// Generate a fresh RSA-2048 keypair. Performed once per connection, at handshake
/// time, by whichever side needs to receive a wrapped secret (the client, in this
/// protocol: it generates the keypair, sends the public half, and the server wraps
/// the session key under it).
pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| track(CdtpError::OpensslError(e.to_string())))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

/// PEM-encode a public key for transport as handshake message 2.
pub fn encode_public_key_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|e| track(CdtpError::OpensslError(e.to_string())))
}

/// Parse a PEM-encoded public key received as handshake message 2.
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| track(CdtpError::OpensslError(e.to_string())))
}

/// Envelope-encrypt `payload` under `public_key`: generate a random AES key+IV,
/// AES-256-CBC encrypt the payload, RSA-encrypt the AES key, and concatenate
/// `encode(rsa_key_len) ‖ rsa_encrypted_key ‖ iv ‖ ciphertext`.
///
/// Used only to transport the long-lived session key (a 48-byte `key ‖ iv`
/// payload, possibly zero-length for the test-only "empty wrap" case), never for
/// steady-state application traffic.
pub fn rsa_wrap(public_key: &RsaPublicKey, payload: &[u8]) -> Result<Vec<u8>> {
    let envelope_key = SessionKey::generate();
    let ciphertext = envelope_key.encrypt(payload);

    let rsa_encrypted_key = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &envelope_key.key)
        .map_err(|e| track(CdtpError::OpensslError(e.to_string())))?;

    let mut out = Vec::with_capacity(LEN_SIZE + rsa_encrypted_key.len() + envelope_key.iv.len() + ciphertext.len());
    out.extend_from_slice(&encode_size(rsa_encrypted_key.len() as u64));
    out.extend_from_slice(&rsa_encrypted_key);
    out.extend_from_slice(&envelope_key.iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Invert [`rsa_wrap`] under the matching private key.
pub fn rsa_unwrap(private_key: &RsaPrivateKey, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < LEN_SIZE {
        return Err(track(CdtpError::KeyExchangeFailure("envelope shorter than its length prefix".into())));
    }
    let mut len_buf = [0u8; LEN_SIZE];
    len_buf.copy_from_slice(&envelope[..LEN_SIZE]);
    let rsa_key_len = decode_size(&len_buf) as usize;

    let rest = &envelope[LEN_SIZE..];
    if rest.len() < rsa_key_len + super::aes::IV_SIZE {
        return Err(track(CdtpError::KeyExchangeFailure("envelope truncated before iv/ciphertext".into())));
    }

    let rsa_encrypted_key = &rest[..rsa_key_len];
    let iv = &rest[rsa_key_len..rsa_key_len + super::aes::IV_SIZE];
    let ciphertext = &rest[rsa_key_len + super::aes::IV_SIZE..];

    let aes_key = private_key
        .decrypt(Pkcs1v15Encrypt, rsa_encrypted_key)
        .map_err(|e| track(CdtpError::OpensslError(e.to_string())))?;

    let mut key = [0u8; super::aes::KEY_SIZE];
    if aes_key.len() != key.len() {
        return Err(track(CdtpError::OpensslError("unexpected unwrapped AES key length".into())));
    }
    key.copy_from_slice(&aes_key);

    let mut iv_arr = [0u8; super::aes::IV_SIZE];
    iv_arr.copy_from_slice(iv);

    let envelope_key = SessionKey { key, iv: iv_arr };
    envelope_key.decrypt(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_wrap_round_trip() {
        let (private_key, public_key) = generate_keypair().unwrap();
        let payload = SessionKey::generate().to_bytes();

        let wrapped = rsa_wrap(&public_key, &payload).unwrap();
        let unwrapped = rsa_unwrap(&private_key, &wrapped).unwrap();

        assert_eq!(unwrapped, payload);
    }

    #[test]
    fn rsa_wrap_round_trip_empty_payload() {
        let (private_key, public_key) = generate_keypair().unwrap();
        let wrapped = rsa_wrap(&public_key, &[]).unwrap();
        let unwrapped = rsa_unwrap(&private_key, &wrapped).unwrap();
        assert!(unwrapped.is_empty());
    }

    #[test]
    fn public_key_pem_round_trip() {
        let (_, public_key) = generate_keypair().unwrap();
        let pem = encode_public_key_pem(&public_key).unwrap();
        let decoded = decode_public_key_pem(&pem).unwrap();
        assert_eq!(decoded, public_key);
    }
}
