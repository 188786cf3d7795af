//! AES-CBC framing shared with the launch monitor firmware.
//!
//! Every encrypted characteristic read/write uses one fixed 32-byte key and
//! one fixed 16-byte IV (no per-message nonce). The fixed IV is a known weak
//! pattern, but it is what the firmware implements; changing either constant
//! breaks device compatibility, so both are carried verbatim as protocol
//! constants rather than secrets.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Enc = cbc::Encryptor<aes::Aes256>;
type Dec = cbc::Decryptor<aes::Aes256>;

/// Key material the firmware pairs against. 32 bytes, so the cipher runs
/// as AES-256 regardless of vendor docs saying "AES-128".
const WIRE_KEY: [u8; 32] = [
    26, 24, 1, 38, 249, 154, 60, 63, 149, 185, 205, 150, 126, 160, 38, 61, 89, 199, 68, 140, 255,
    21, 250, 131, 55, 165, 121, 250, 49, 121, 233, 21,
];

/// Fixed IV, identical for every frame in both directions.
const WIRE_IV: [u8; 16] = [109, 46, 82, 19, 33, 50, 4, 69, 111, 44, 121, 72, 16, 101, 109, 66];

/// Encryption-type tag sent in the clear auth-request frame.
const ENCRYPTION_TYPE: [u8; 2] = [0, 1];

/// Stateless AES-CBC codec over the fixed key/IV pair.
#[derive(Debug, Default, Clone)]
pub struct WireCipher;

impl WireCipher {
    pub fn new() -> Self {
        Self
    }

    /// The `[encryption_type]` bytes of the auth-request frame.
    pub fn encryption_type_bytes() -> [u8; 2] {
        ENCRYPTION_TYPE
    }

    /// Raw key bytes, sent in the clear during the auth handshake so the
    /// device can mirror the cipher.
    pub fn key_bytes(&self) -> &'static [u8; 32] {
        &WIRE_KEY
    }

    /// Encrypt a frame with PKCS7 padding.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Enc::new(&WIRE_KEY.into(), &WIRE_IV.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt a frame.
    ///
    /// Bad padding or a non-block-aligned length returns `None` (logged);
    /// malformed notifications are dropped without disturbing the session.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        match Dec::new(&WIRE_KEY.into(), &WIRE_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::warn!(error = %e, len = ciphertext.len(), "frame decrypt failed");
                None
            }
        }
    }
}
