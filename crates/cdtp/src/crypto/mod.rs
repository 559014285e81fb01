//! Cryptographic primitives (component B): RSA keypairs, AES-256-CBC session
//! transport, and the size-disambiguating padding layer that sits between them
//! and the framer.
//!
//! Submodules:
//! - [`aes`]: manual AES-256-CBC block chaining plus the length-disambiguating pad.
//! - [`rsa`]: keypair generation and the RSA-wrap envelope used to transport a
//!   session key.

pub mod aes;
pub mod rsa;

pub use self::aes::SessionKey;

/// Prepend 1 or 2 bytes to `data` so its length is never congruent to 0 mod 16
/// once the underlying cipher's own block padding is removed from consideration:
/// `0` if `(len + 1) % 16 != 0`, else `1, 255`.
///
/// This is *not* a substitute for the cipher's own PKCS#7 padding; it is an
/// anti-collision layer applied to the plaintext before encryption, so that two
/// plaintexts separated only by length don't encrypt to ciphertexts whose
/// observable wire length collides at a block boundary. See DESIGN.md for why
/// this invariant is checked against this function's own output length and not
/// against the length of a fully CBC-encrypted ciphertext.
pub fn pad(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    if (data.len() + 1) % 16 != 0 {
        out.push(0);
    } else {
        out.push(1);
        out.push(255);
    }
    out.extend_from_slice(data);
    out
}

/// Invert [`pad`]: inspect the first byte, strip one byte if it's `0`, two if `1`.
pub fn unpad(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    match data.first() {
        Some(0) => Ok(data[1..].to_vec()),
        Some(1) => {
            if data.len() < 2 {
                return Err(crate::error::track(crate::error::CdtpError::OpensslError(
                    "truncated padding marker".into(),
                )));
            }
            Ok(data[2..].to_vec())
        }
        _ => Err(crate::error::track(crate::error::CdtpError::OpensslError(
            "unrecognized padding marker".into(),
        ))),
    }
}
