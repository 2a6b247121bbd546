//! Per-direction AEAD record protection.
//!
//! Holds the write key and base IV for each direction. The per-record
//! nonce is the base IV XORed with the sequence number, big-endian,
//! right-aligned in the 12 bytes (RFC 8446 §5.3). On the wire a protected
//! record body is `ciphertext || tag[16]`.

use super::buffer::TlsBuffer;
use veil_core::crypto::aead;
use veil_core::error::{Error, ErrorCode, Result};

pub const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 12;

#[derive(Default)]
pub struct ChaCha20Encoder {
    local_key: [u8; KEY_SIZE],
    remote_key: [u8; KEY_SIZE],
    local_iv: [u8; IV_SIZE],
    remote_iv: [u8; IV_SIZE],
    ready: bool,
}

impl ChaCha20Encoder {
    pub fn new() -> ChaCha20Encoder {
        ChaCha20Encoder::default()
    }

    /// Installs a fresh key set; called at each key-schedule transition.
    pub fn install(
        &mut self,
        local_key: &[u8; KEY_SIZE],
        local_iv: &[u8; IV_SIZE],
        remote_key: &[u8; KEY_SIZE],
        remote_iv: &[u8; IV_SIZE],
    ) {
        self.local_key = *local_key;
        self.local_iv = *local_iv;
        self.remote_key = *remote_key;
        self.remote_iv = *remote_iv;
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn nonce(iv: &[u8; IV_SIZE], sequence: u64) -> [u8; IV_SIZE] {
        let mut nonce = *iv;
        for (slot, byte) in nonce[4..].iter_mut().zip(sequence.to_be_bytes()) {
            *slot ^= byte;
        }
        nonce
    }

    /// Encrypts `plaintext` and appends `ciphertext || tag` to `out`.
    pub fn encode(
        &self,
        out: &mut TlsBuffer,
        plaintext: &[u8],
        aad: &[u8],
        sequence: u64,
    ) -> Result<()> {
        if !self.ready {
            return Err(Error::internal(ErrorCode::TlsEncodeFailedNotReady));
        }
        let nonce = Self::nonce(&self.local_iv, sequence);
        let mut payload = plaintext.to_vec();
        let tag = aead::seal(&self.local_key, &nonce, aad, &mut payload);
        out.put_slice(&payload);
        out.put_slice(&tag);
        Ok(())
    }

    /// Verifies and decrypts a `ciphertext || tag` body, appending the
    /// plaintext to `out`.
    pub fn decode(
        &self,
        body: &[u8],
        out: &mut TlsBuffer,
        aad: &[u8],
        sequence: u64,
    ) -> Result<()> {
        if !self.ready {
            return Err(Error::internal(ErrorCode::TlsEncodeFailedNotReady));
        }
        if body.len() < TAG_SIZE {
            return Err(Error::internal(ErrorCode::TlsDecodeFailedLength));
        }
        let (ciphertext, tag_bytes) = body.split_at(body.len() - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        let nonce = Self::nonce(&self.remote_iv, sequence);
        let mut payload = ciphertext.to_vec();
        if !aead::open(&self.remote_key, &nonce, aad, &mut payload, &tag) {
            return Err(Error::internal(ErrorCode::TlsDecodeFailed));
        }
        out.put_slice(&payload);
        Ok(())
    }

    /// On-the-wire size of `size` payload bytes in the given direction.
    pub fn compute_size(size: usize, encoding: bool) -> usize {
        if encoding {
            size + TAG_SIZE
        } else {
            size.saturating_sub(TAG_SIZE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_encoders() -> (ChaCha20Encoder, ChaCha20Encoder) {
        let key_a = [0x11u8; KEY_SIZE];
        let key_b = [0x22u8; KEY_SIZE];
        let iv_a = [0x33u8; IV_SIZE];
        let iv_b = [0x44u8; IV_SIZE];

        let mut client = ChaCha20Encoder::new();
        client.install(&key_a, &iv_a, &key_b, &iv_b);
        // The server's local direction is the client's remote one.
        let mut server = ChaCha20Encoder::new();
        server.install(&key_b, &iv_b, &key_a, &iv_a);
        (client, server)
    }

    #[test]
    fn nonce_mixes_the_sequence_number() {
        let iv = [0u8; IV_SIZE];
        assert_eq!(ChaCha20Encoder::nonce(&iv, 0), [0u8; 12]);
        let nonce = ChaCha20Encoder::nonce(&iv, 1);
        assert_eq!(nonce[11], 1);
        assert_eq!(&nonce[..11], &[0u8; 11]);

        let iv = [0xFFu8; IV_SIZE];
        let nonce = ChaCha20Encoder::nonce(&iv, 0x0102);
        assert_eq!(nonce[10], 0xFF ^ 0x01);
        assert_eq!(nonce[11], 0xFF ^ 0x02);
        assert_eq!(nonce[0], 0xFF);
    }

    #[test]
    fn encode_decode_round_trip() {
        let (client, server) = paired_encoders();
        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x20];

        let mut wire = TlsBuffer::new();
        client.encode(&mut wire, b"application data", &aad, 7).unwrap();
        assert_eq!(wire.len(), ChaCha20Encoder::compute_size(16, true));

        let mut plain = TlsBuffer::new();
        server.decode(wire.as_slice(), &mut plain, &aad, 7).unwrap();
        assert_eq!(plain.as_slice(), b"application data");
    }

    #[test]
    fn wrong_sequence_or_aad_fails() {
        let (client, server) = paired_encoders();
        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x20];

        let mut wire = TlsBuffer::new();
        client.encode(&mut wire, b"record", &aad, 3).unwrap();

        let mut out = TlsBuffer::new();
        let err = server.decode(wire.as_slice(), &mut out, &aad, 4).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TlsDecodeFailed));

        let wrong_aad = [0x17u8, 0x03, 0x03, 0x00, 0x21];
        let err = server.decode(wire.as_slice(), &mut out, &wrong_aad, 3).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TlsDecodeFailed));
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let (client, server) = paired_encoders();
        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x10];

        let mut wire = TlsBuffer::new();
        client.encode(&mut wire, b"sensitive", &aad, 0).unwrap();
        wire.as_mut_slice()[0] ^= 0x01;

        let mut out = TlsBuffer::new();
        assert!(server.decode(wire.as_slice(), &mut out, &aad, 0).is_err());
    }

    #[test]
    fn short_body_is_rejected() {
        let (_, server) = paired_encoders();
        let mut out = TlsBuffer::new();
        let err = server.decode(&[0u8; 5], &mut out, &[], 0).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::TlsDecodeFailedLength));
    }

    #[test]
    fn not_ready_is_an_error() {
        let encoder = ChaCha20Encoder::new();
        let mut out = TlsBuffer::new();
        assert!(encoder.encode(&mut out, b"x", &[], 0).is_err());
    }

    #[test]
    fn compute_size_both_directions() {
        assert_eq!(ChaCha20Encoder::compute_size(100, true), 116);
        assert_eq!(ChaCha20Encoder::compute_size(116, false), 100);
        assert_eq!(ChaCha20Encoder::compute_size(10, false), 0);
    }
}
