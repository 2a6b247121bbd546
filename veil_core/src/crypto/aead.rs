//! ChaCha20-Poly1305 AEAD (RFC 8439 §2.8).
//!
//! The one-time Poly1305 key comes from the counter-0 keystream block;
//! the payload runs on counters 1 and up. The MAC covers
//! `aad || pad16 || ciphertext || pad16 || len_le(aad) || len_le(ct)`.

use super::chacha20::{self, KEY_SIZE, NONCE_SIZE};
use super::poly1305::{self, TAG_SIZE};

fn one_time_key(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE]) -> [u8; 32] {
    let block = chacha20::block(key, nonce, 0);
    let mut poly_key = [0u8; 32];
    poly_key.copy_from_slice(&block[..32]);
    poly_key
}

fn mac_input(aad: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(
        (aad.len() + 15) / 16 * 16 + (ciphertext.len() + 15) / 16 * 16 + 16,
    );
    data.extend_from_slice(aad);
    pad16(&mut data);
    data.extend_from_slice(ciphertext);
    pad16(&mut data);
    data.extend_from_slice(&(aad.len() as u64).to_le_bytes());
    data.extend_from_slice(&(ciphertext.len() as u64).to_le_bytes());
    data
}

#[inline]
fn pad16(data: &mut Vec<u8>) {
    let rem = data.len() % 16;
    if rem != 0 {
        data.resize(data.len() + 16 - rem, 0);
    }
}

/// Encrypts `payload` in place and returns the authentication tag.
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    payload: &mut [u8],
) -> [u8; TAG_SIZE] {
    let poly_key = one_time_key(key, nonce);
    chacha20::apply_keystream(key, nonce, 1, payload);
    poly1305::tag(&mac_input(aad, payload), &poly_key)
}

/// Verifies the tag and, when it matches, decrypts `payload` in place.
/// Returns false without touching the payload on a mismatch.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    payload: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> bool {
    let poly_key = one_time_key(key, nonce);
    let expected = poly1305::tag(&mac_input(aad, payload), &poly_key);
    if !poly1305::verify(&expected, tag) {
        return false;
    }
    chacha20::apply_keystream(key, nonce, 1, payload);
    true
}
