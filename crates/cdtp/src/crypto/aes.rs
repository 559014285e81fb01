//! AES-256-CBC session transport.
//!
//! `aes` only exposes the raw block cipher (`encrypt_block`/`decrypt_block`); CBC
//! chaining and PKCS#7 padding are applied by hand, the same way the block-level
//! ECB routines this module was generalized from did it.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use rand::{rngs::OsRng, RngCore};

use crate::error::{track, CdtpError, Result};

const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// A per-connection AES-256 key and IV, generated once at handshake time and held
/// for the connection's lifetime.
#[derive(Clone, Debug)]
pub struct SessionKey {
    pub key: [u8; KEY_SIZE],
    pub iv: [u8; IV_SIZE],
}

impl SessionKey {
    /// Generate a fresh key and IV from the process CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Reassemble a session key from the 48-byte `key ‖ iv` payload carried inside
    /// the RSA-wrap envelope (see [`crate::crypto::rsa`]).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE + IV_SIZE {
            return Err(track(CdtpError::KeyExchangeFailure(format!(
                "expected a {}-byte session payload, got {}",
                KEY_SIZE + IV_SIZE,
                bytes.len()
            ))));
        }
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        iv.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(Self { key, iv })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEY_SIZE + IV_SIZE);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    /// Encrypt `plaintext`: apply the size-disambiguating pad, then AES-256-CBC
    /// with PKCS#7 block padding underneath.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let padded = super::pad(plaintext);
        cbc_encrypt(&self.key, &self.iv, &padded)
    }

    /// Invert [`Self::encrypt`]: AES-256-CBC decrypt, strip the PKCS#7 block
    /// padding, then strip the size-disambiguating pad.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let padded = cbc_decrypt(&self.key, &self.iv, ciphertext)?;
        super::unpad(&padded)
    }
}

fn cbc_encrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], data: &[u8]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = data.to_vec();
    padded.extend(vec![padding_len as u8; padding_len]);

    let mut prev = *iv;
    let mut out = Vec::with_capacity(padded.len());
    for chunk in padded.chunks(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        for i in 0..BLOCK_SIZE {
            block[i] = chunk[i] ^ prev[i];
        }
        let mut ga = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);
        out.extend_from_slice(&ga);
    }
    out
}

fn cbc_decrypt(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || !data.len().is_multiple_of(BLOCK_SIZE) {
        return Err(track(CdtpError::OpensslError(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            data.len()
        ))));
    }

    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev = *iv;
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut ga = GenericArray::clone_from_slice(chunk);
        cipher.decrypt_block(&mut ga);
        for i in 0..BLOCK_SIZE {
            out.push(ga[i] ^ prev[i]);
        }
        prev.copy_from_slice(chunk);
    }

    match out.last().copied() {
        Some(padding_len) if padding_len as usize > 0 && padding_len as usize <= BLOCK_SIZE => {
            let new_len = out.len() - padding_len as usize;
            out.truncate(new_len);
            Ok(out)
        }
        _ => Err(track(CdtpError::OpensslError("invalid PKCS#7 padding".into()))),
    }
}
