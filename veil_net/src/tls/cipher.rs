//! TLS 1.3 key schedule for TLS_CHACHA20_POLY1305_SHA256, plus ownership
//! of the transcript hash, the ECDH shares, and the record sequence
//! counters.
//!
//! Two key installs happen per session: handshake traffic keys right
//! after the ServerHello key share is processed, application traffic keys
//! once the server Finished has verified. Both reset the per-direction
//! sequence counters.

use super::buffer::TlsBuffer;
use super::encoder::{ChaCha20Encoder, IV_SIZE, KEY_SIZE};
use super::hash::TlsHash;
use veil_core::crypto::ecc::Ecc;
use veil_core::crypto::hkdf::{derive_secret, hkdf_expand_label, hkdf_extract};
use veil_core::crypto::hmac::hmac_sha256;
use veil_core::crypto::sha2::sha256;
use veil_core::error::{Error, ErrorCode, Result, ResultExt};
use veil_core::prng::Prng;

pub const RANDOM_SIZE: usize = 32;
pub const VERIFY_DATA_SIZE: usize = 32;

// Refuse to run a direction anywhere near counter wraparound; there is no
// KeyUpdate to rotate under.
const SEQUENCE_LIMIT: u64 = u64::MAX - 16;

/// The two groups offered in the ClientHello key share.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NamedGroup {
    Secp256r1,
    Secp384r1,
}

impl NamedGroup {
    pub const ALL: [NamedGroup; 2] = [NamedGroup::Secp256r1, NamedGroup::Secp384r1];

    pub fn iana(self) -> u16 {
        match self {
            NamedGroup::Secp256r1 => 0x0017,
            NamedGroup::Secp384r1 => 0x0018,
        }
    }

    pub fn from_iana(value: u16) -> Option<NamedGroup> {
        match value {
            0x0017 => Some(NamedGroup::Secp256r1),
            0x0018 => Some(NamedGroup::Secp384r1),
            _ => None,
        }
    }

    pub fn curve_bytes(self) -> usize {
        match self {
            NamedGroup::Secp256r1 => 32,
            NamedGroup::Secp384r1 => 48,
        }
    }

    fn index(self) -> usize {
        match self {
            NamedGroup::Secp256r1 => 0,
            NamedGroup::Secp384r1 => 1,
        }
    }
}

pub struct TlsCipher {
    transcript: TlsHash,
    client_random: [u8; RANDOM_SIZE],
    server_random: [u8; RANDOM_SIZE],
    ecdh: [Ecc; 2],
    group: Option<NamedGroup>,
    handshake_secret: [u8; 32],
    client_secret: [u8; 32],
    server_secret: [u8; 32],
    client_sequence: u64,
    server_sequence: u64,
    encoder: ChaCha20Encoder,
    encoding: bool,
    prng: Prng,
}

impl TlsCipher {
    /// Generates both ECDH keypairs up front; the server picks which one
    /// to consume.
    pub fn new(mut prng: Prng) -> Result<TlsCipher> {
        let p256 = Ecc::generate(32, &mut prng).or_code(ErrorCode::TlsCreateFailedCipher)?;
        let p384 = Ecc::generate(48, &mut prng).or_code(ErrorCode::TlsCreateFailedCipher)?;
        Ok(TlsCipher {
            transcript: TlsHash::new(),
            client_random: [0; RANDOM_SIZE],
            server_random: [0; RANDOM_SIZE],
            ecdh: [p256, p384],
            group: None,
            handshake_secret: [0; 32],
            client_secret: [0; 32],
            server_secret: [0; 32],
            client_sequence: 0,
            server_sequence: 0,
            encoder: ChaCha20Encoder::new(),
            encoding: false,
            prng,
        })
    }

    pub fn create_client_random(&mut self) -> Result<[u8; RANDOM_SIZE]> {
        self.prng
            .fill_bytes(&mut self.client_random)
            .or_code(ErrorCode::TlsHandshakeFailedClientHello)?;
        Ok(self.client_random)
    }

    pub fn set_server_random(&mut self, random: &[u8; RANDOM_SIZE]) {
        self.server_random = *random;
    }

    pub fn is_encoding(&self) -> bool {
        self.encoding
    }

    pub fn negotiated_group(&self) -> Option<NamedGroup> {
        self.group
    }

    /// Appends the SEC1 uncompressed public key for `group` to `out`.
    pub fn append_public_key(&self, group: NamedGroup, out: &mut TlsBuffer) -> Result<()> {
        let mut encoded = [0u8; 97]; // 2 * 48 + 1
        let written = self.ecdh[group.index()]
            .export_public_key(&mut encoded)
            .or_code(ErrorCode::TlsPublicKeyFailed)?;
        out.put_slice(&encoded[..written]);
        Ok(())
    }

    pub fn update_transcript(&mut self, data: &[u8]) {
        self.transcript.update(data);
    }

    pub fn transcript_hash(&self) -> [u8; 32] {
        self.transcript.snapshot()
    }

    /// First key install: ECDH against the server's share, then the
    /// handshake-traffic half of the schedule. The transcript must hold
    /// ClientHello..ServerHello.
    pub fn compute_handshake_keys(&mut self, group: NamedGroup, peer_key: &[u8]) -> Result<()> {
        let bytes = group.curve_bytes();
        let mut shared = [0u8; 48];
        {
            let ecc = &self.ecdh[group.index()];
            ecc.compute_shared_secret(peer_key, &mut shared[..bytes], &mut self.prng)
                .or_code(ErrorCode::TlsComputeKeyFailedSecret)?;
        }

        let zeros = [0u8; 32];
        let early_secret = hkdf_extract(&zeros, &zeros);
        let derived = derive_secret(&early_secret, b"derived", &sha256(b""));
        self.handshake_secret = hkdf_extract(&derived, &shared[..bytes]);

        let transcript = self.transcript.snapshot();
        self.client_secret = derive_secret(&self.handshake_secret, b"c hs traffic", &transcript);
        self.server_secret = derive_secret(&self.handshake_secret, b"s hs traffic", &transcript);
        self.install_traffic_keys();

        self.group = Some(group);
        self.encoding = true;
        Ok(())
    }

    /// Second key install: application traffic keys from the transcript
    /// snapshot taken through the server Finished.
    pub fn compute_application_keys(&mut self, transcript_hash: &[u8; 32]) -> Result<()> {
        if !self.encoding {
            return Err(Error::internal(ErrorCode::TlsComputeKeyFailedGroup));
        }
        let zeros = [0u8; 32];
        let derived = derive_secret(&self.handshake_secret, b"derived", &sha256(b""));
        let master_secret = hkdf_extract(&derived, &zeros);
        self.client_secret = derive_secret(&master_secret, b"c ap traffic", transcript_hash);
        self.server_secret = derive_secret(&master_secret, b"s ap traffic", transcript_hash);
        self.install_traffic_keys();
        Ok(())
    }

    fn install_traffic_keys(&mut self) {
        let client_key = expand_key(&self.client_secret);
        let client_iv = expand_iv(&self.client_secret);
        let server_key = expand_key(&self.server_secret);
        let server_iv = expand_iv(&self.server_secret);
        self.encoder.install(&client_key, &client_iv, &server_key, &server_iv);
        self.reset_sequence_numbers();
    }

    pub fn reset_sequence_numbers(&mut self) {
        self.client_sequence = 0;
        self.server_sequence = 0;
    }

    /// Finished verify data for one side: HMAC over the current
    /// transcript hash under that side's finished key.
    pub fn verify_data(&self, remote: bool) -> [u8; VERIFY_DATA_SIZE] {
        let secret = if remote { &self.server_secret } else { &self.client_secret };
        let expanded = hkdf_expand_label(secret, b"finished", &[], 32);
        let mut finished_key = [0u8; 32];
        finished_key.copy_from_slice(&expanded);
        hmac_sha256(&finished_key, &self.transcript.snapshot())
    }

    /// Protects one outgoing record body under the client write keys.
    pub fn encode_record(&mut self, out: &mut TlsBuffer, plaintext: &[u8], aad: &[u8]) -> Result<()> {
        if self.client_sequence >= SEQUENCE_LIMIT {
            return Err(Error::internal(ErrorCode::TlsSequenceOverflow));
        }
        self.encoder.encode(out, plaintext, aad, self.client_sequence)?;
        self.client_sequence += 1;
        Ok(())
    }

    /// Opens one incoming record body under the server write keys.
    pub fn decode_record(&mut self, body: &[u8], out: &mut TlsBuffer, aad: &[u8]) -> Result<()> {
        if self.server_sequence >= SEQUENCE_LIMIT {
            return Err(Error::internal(ErrorCode::TlsSequenceOverflow));
        }
        self.encoder.decode(body, out, aad, self.server_sequence)?;
        self.server_sequence += 1;
        Ok(())
    }
}

fn expand_key(secret: &[u8; 32]) -> [u8; KEY_SIZE] {
    let expanded = hkdf_expand_label(secret, b"key", &[], KEY_SIZE);
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&expanded);
    key
}

fn expand_iv(secret: &[u8; 32]) -> [u8; IV_SIZE] {
    let expanded = hkdf_expand_label(secret, b"iv", &[], IV_SIZE);
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&expanded);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::crypto::ecc::Ecc;

    // Builds a client cipher plus a hand-derived server view of the same
    // handshake secrets, so records can round-trip without a network.
    fn handshaken_pair() -> (TlsCipher, ChaCha20Encoder) {
        let mut cipher = TlsCipher::new(Prng::new(11)).unwrap();
        cipher.update_transcript(b"synthetic client hello");
        cipher.update_transcript(b"synthetic server hello");

        let mut server_rng = Prng::new(22);
        let server_ecdh = Ecc::generate(32, &mut server_rng).unwrap();
        let mut server_share = [0u8; 65];
        server_ecdh.export_public_key(&mut server_share).unwrap();

        cipher
            .compute_handshake_keys(NamedGroup::Secp256r1, &server_share)
            .unwrap();
        assert!(cipher.is_encoding());

        // Server side: same ECDH secret from the opposite keypair, then
        // the same schedule with the directions swapped.
        let mut client_share = TlsBuffer::new();
        cipher.append_public_key(NamedGroup::Secp256r1, &mut client_share).unwrap();
        let mut shared = [0u8; 32];
        server_ecdh
            .compute_shared_secret(client_share.as_slice(), &mut shared, &mut server_rng)
            .unwrap();

        let zeros = [0u8; 32];
        let early = hkdf_extract(&zeros, &zeros);
        let derived = derive_secret(&early, b"derived", &sha256(b""));
        let handshake_secret = hkdf_extract(&derived, &shared);
        let transcript = cipher.transcript_hash();
        let client_secret = derive_secret(&handshake_secret, b"c hs traffic", &transcript);
        let server_secret = derive_secret(&handshake_secret, b"s hs traffic", &transcript);

        let mut server_encoder = ChaCha20Encoder::new();
        server_encoder.install(
            &expand_key(&server_secret),
            &expand_iv(&server_secret),
            &expand_key(&client_secret),
            &expand_iv(&client_secret),
        );
        (cipher, server_encoder)
    }

    #[test]
    fn client_records_open_on_the_server_side() {
        let (mut cipher, server_encoder) = handshaken_pair();
        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x1b];

        let mut wire = TlsBuffer::new();
        cipher.encode_record(&mut wire, b"finished + content", &aad).unwrap();

        let mut plain = TlsBuffer::new();
        server_encoder.decode(wire.as_slice(), &mut plain, &aad, 0).unwrap();
        assert_eq!(plain.as_slice(), b"finished + content");
    }

    #[test]
    fn server_records_open_on_the_client_side() {
        let (mut cipher, server_encoder) = handshaken_pair();
        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x19];

        let mut wire = TlsBuffer::new();
        server_encoder.encode(&mut wire, b"encrypted extensions", &aad, 0).unwrap();

        let mut plain = TlsBuffer::new();
        cipher.decode_record(wire.as_slice(), &mut plain, &aad).unwrap();
        assert_eq!(plain.as_slice(), b"encrypted extensions");
    }

    #[test]
    fn sequence_numbers_advance_per_direction() {
        let (mut cipher, server_encoder) = handshaken_pair();
        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x15];

        let mut first = TlsBuffer::new();
        cipher.encode_record(&mut first, b"one", &aad).unwrap();
        let mut second = TlsBuffer::new();
        cipher.encode_record(&mut second, b"two", &aad).unwrap();

        let mut out = TlsBuffer::new();
        server_encoder.decode(first.as_slice(), &mut out, &aad, 0).unwrap();
        server_encoder.decode(second.as_slice(), &mut out, &aad, 1).unwrap();
        // Replaying the second record at the wrong sequence number fails.
        assert!(server_encoder.decode(second.as_slice(), &mut out, &aad, 0).is_err());
    }

    #[test]
    fn verify_data_binds_the_transcript() {
        let (cipher, _) = handshaken_pair();
        let before = cipher.verify_data(true);

        let (mut other, _) = handshaken_pair();
        other.update_transcript(b"one more message");
        // Same secrets, different transcript: different verify data.
        assert_ne!(before, other.verify_data(true));
        // Client and server finished keys differ.
        assert_ne!(cipher.verify_data(true), cipher.verify_data(false));
    }

    #[test]
    fn application_keys_replace_handshake_keys() {
        let (mut cipher, server_hs_encoder) = handshaken_pair();
        let transcript = cipher.transcript_hash();
        cipher.compute_application_keys(&transcript).unwrap();

        let aad = [0x17u8, 0x03, 0x03, 0x00, 0x14];
        let mut wire = TlsBuffer::new();
        cipher.encode_record(&mut wire, b"data", &aad).unwrap();

        // Handshake-phase keys can no longer open the record.
        let mut out = TlsBuffer::new();
        assert!(server_hs_encoder.decode(wire.as_slice(), &mut out, &aad, 0).is_err());
    }

    #[test]
    fn named_group_codes() {
        assert_eq!(NamedGroup::Secp256r1.iana(), 0x0017);
        assert_eq!(NamedGroup::Secp384r1.iana(), 0x0018);
        assert_eq!(NamedGroup::from_iana(0x0017), Some(NamedGroup::Secp256r1));
        assert_eq!(NamedGroup::from_iana(0x001D), None);
        assert_eq!(NamedGroup::Secp256r1.curve_bytes(), 32);
        assert_eq!(NamedGroup::Secp384r1.curve_bytes(), 48);
    }
}
