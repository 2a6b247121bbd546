//! ChaCha20 stream cipher (RFC 8439): 20 rounds, 256-bit key, 96-bit
//! nonce, 32-bit block counter.

const SIGMA: [u32; 4] = [0x61707865, 0x3320646e, 0x79622d32, 0x6b206574]; // "expand 32-byte k"

pub const BLOCK_SIZE: usize = 64;
pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

#[inline]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(16);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(12);
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(8);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(7);
}

/// One 64-byte keystream block.
pub fn block(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], counter: u32) -> [u8; BLOCK_SIZE] {
    let mut state = [0u32; 16];
    state[..4].copy_from_slice(&SIGMA);
    for (slot, chunk) in state[4..12].iter_mut().zip(key.chunks_exact(4)) {
        *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    state[12] = counter;
    for (slot, chunk) in state[13..16].iter_mut().zip(nonce.chunks_exact(4)) {
        *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let input = state;
    for _ in 0..10 {
        quarter_round(&mut state, 0, 4, 8, 12);
        quarter_round(&mut state, 1, 5, 9, 13);
        quarter_round(&mut state, 2, 6, 10, 14);
        quarter_round(&mut state, 3, 7, 11, 15);
        quarter_round(&mut state, 0, 5, 10, 15);
        quarter_round(&mut state, 1, 6, 11, 12);
        quarter_round(&mut state, 2, 7, 8, 13);
        quarter_round(&mut state, 3, 4, 9, 14);
    }

    let mut out = [0u8; BLOCK_SIZE];
    for (i, (word, start)) in state.iter().zip(input).enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.wrapping_add(start).to_le_bytes());
    }
    out
}

/// XORs `data` in place with the keystream starting at `counter`.
/// Encryption and decryption are the same operation.
pub fn apply_keystream(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE], counter: u32, data: &mut [u8]) {
    for (index, chunk) in data.chunks_mut(BLOCK_SIZE).enumerate() {
        let keystream = block(key, nonce, counter.wrapping_add(index as u32));
        for (byte, ks) in chunk.iter_mut().zip(keystream) {
            *byte ^= ks;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // RFC 8439 §2.3.2 block function test vector.
    #[test]
    fn rfc8439_block_vector() {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        let nonce = [0, 0, 0, 9, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let out = block(&key, &nonce, 1);
        assert_eq!(
            hex(&out),
            "10f1e7e4d13b5915500fdd1fa32071c4c7d1f4c733c068030422aa9ac3d46c4e\
             d2826446079faa0914c2d705d98b02a2b5129cd1de164eb9cbd083e8a2503c4e"
        );
    }

    // RFC 8439 §2.4.2 encryption test vector.
    #[test]
    fn rfc8439_encryption_vector() {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        let nonce = [0, 0, 0, 0, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let mut data = b"Ladies and Gentlemen of the class of '99: If I could offer you \
only one tip for the future, sunscreen would be it."
            .to_vec();
        apply_keystream(&key, &nonce, 1, &mut data);
        assert_eq!(
            hex(&data[..64]),
            "6e2e359a2568f98041ba0728dd0d6981e97e7aec1d4360c20a27afccfd9fae0b\
             f91b65c5524733ab8f593dabcd62b3571639d624e65152ab8f530c359f0861d8"
        );
        assert_eq!(hex(&data[96..]), "5af90bbf74a35be6b40b8eedf2785e42874d");
    }

    #[test]
    fn keystream_is_self_inverse() {
        let key = [0x42u8; 32];
        let nonce = [7u8; 12];
        let original: Vec<u8> = (0u8..=200).collect();
        let mut data = original.clone();
        apply_keystream(&key, &nonce, 5, &mut data);
        assert_ne!(data, original);
        apply_keystream(&key, &nonce, 5, &mut data);
        assert_eq!(data, original);
    }
}
