use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;

use crate::error::ArchiveError;
use crate::keys::decryption_key;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Decrypt a base64 blob of `IV (16 bytes) || AES-256-CBC ciphertext`.
///
/// The key is derived from `password` on every call; nothing is cached, so
/// calls for different channels never share key state.
pub fn decrypt(ciphertext_b64: &str, password: &str) -> Result<String, ArchiveError> {
    let blob = STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|e| ArchiveError::Decryption(format!("invalid base64: {e}")))?;

    if blob.len() < IV_LEN + BLOCK_LEN {
        return Err(ArchiveError::Decryption(format!(
            "blob too short ({} bytes)",
            blob.len()
        )));
    }
    let (iv, ciphertext) = blob.split_at(IV_LEN);
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(ArchiveError::Decryption(
            "ciphertext is not a whole number of blocks".to_string(),
        ));
    }

    let key = decryption_key(password);
    let cipher = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|e| ArchiveError::Decryption(format!("cipher init: {e}")))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ArchiveError::Decryption("bad padding (wrong key?)".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| ArchiveError::Decryption("plaintext is not UTF-8 (wrong key?)".to_string()))
}

/// Encrypt `plaintext` into the same wire format `decrypt` reads, with a
/// fresh random IV.
pub fn encrypt(plaintext: &str, password: &str) -> String {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with_iv(plaintext, password, iv)
}

fn encrypt_with_iv(plaintext: &str, password: &str, iv: [u8; IV_LEN]) -> String {
    let key = decryption_key(password);
    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    STANDARD.encode(blob)
}
