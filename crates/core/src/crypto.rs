//! Symmetric crypto and encoding helpers used by the media payloaders.
//!
//! The payloaders only see the [`CryptoService`] trait; [`RustCrypto`] is the
//! default implementation (SHA-256, AES-128-CBC, thread-local RNG).

use aes::Aes128;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::error::{Result, StreamError};

/// AES block length in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub trait CryptoService: Send + Sync {
    /// SHA-256 digest of `data`.
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// AES-128-CBC encrypt. Without `padding`, `msg` must be block aligned.
    fn encrypt_cbc(&self, msg: &[u8], key: &[u8], iv: &[u8], padding: bool) -> Result<Vec<u8>>;

    /// AES-128-CBC decrypt, stripping PKCS#7 padding when `padding` is set.
    fn decrypt_cbc(&self, msg: &[u8], key: &[u8], iv: &[u8], padding: bool) -> Result<Vec<u8>>;

    fn random(&self, length: usize) -> Vec<u8>;

    fn hex_encode(&self, data: &[u8]) -> String {
        hex_encode(data)
    }

    fn hex_decode(&self, hex: &str, reverse: bool) -> Result<Vec<u8>> {
        hex_decode(hex, reverse)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RustCrypto;

impl CryptoService for RustCrypto {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn encrypt_cbc(&self, msg: &[u8], key: &[u8], iv: &[u8], padding: bool) -> Result<Vec<u8>> {
        let cipher = Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|e| StreamError::Crypto(format!("AES key/IV: {e}")))?;

        if padding {
            return Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(msg));
        }
        if msg.len() % AES_BLOCK_SIZE != 0 {
            return Err(StreamError::Crypto(format!(
                "unpadded message of {} bytes is not block aligned",
                msg.len()
            )));
        }
        Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(msg))
    }

    fn decrypt_cbc(&self, msg: &[u8], key: &[u8], iv: &[u8], padding: bool) -> Result<Vec<u8>> {
        let cipher = Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|e| StreamError::Crypto(format!("AES key/IV: {e}")))?;

        let plain = if padding {
            cipher.decrypt_padded_vec_mut::<Pkcs7>(msg)
        } else {
            cipher.decrypt_padded_vec_mut::<NoPadding>(msg)
        };
        plain.map_err(|_| StreamError::Crypto("invalid ciphertext padding".to_string()))
    }

    fn random(&self, length: usize) -> Vec<u8> {
        (0..length).map(|_| rand::random::<u8>()).collect()
    }
}

/// Lower-case hex rendering of `data`.
pub fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Decode hex text into bytes, optionally reversing the byte order.
///
/// An odd number of digits is read as if it had a leading `0`.
pub fn hex_decode(hex: &str, reverse: bool) -> Result<Vec<u8>> {
    let hex = hex.trim();
    let padded;
    let digits = if hex.len() % 2 == 1 {
        padded = format!("0{hex}");
        padded.as_str()
    } else {
        hex
    };

    let mut bytes = digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).unwrap_or("");
            u8::from_str_radix(pair, 16)
                .map_err(|_| StreamError::Crypto(format!("invalid hex digits {pair:?}")))
        })
        .collect::<Result<Vec<u8>>>()?;

    if reverse {
        bytes.reverse();
    }
    Ok(bytes)
}
