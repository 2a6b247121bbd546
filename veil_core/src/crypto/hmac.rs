//! HMAC (RFC 2104) over the SHA-2 family.
//! Block sizes: 64 bytes for SHA-224/256, 128 bytes for SHA-384/512.
//! Keys longer than the block are hashed first.

use super::sha2::{
    sha224, sha256, sha384, sha512, Sha224, Sha256, Sha384, Sha512, SHA256_BLOCK_SIZE,
    SHA512_BLOCK_SIZE,
};

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5C;

fn key_block_64(key: &[u8], hashed: &[u8]) -> [u8; SHA256_BLOCK_SIZE] {
    let mut block = [0u8; SHA256_BLOCK_SIZE];
    if key.len() > SHA256_BLOCK_SIZE {
        block[..hashed.len()].copy_from_slice(hashed);
    } else {
        block[..key.len()].copy_from_slice(key);
    }
    block
}

fn key_block_128(key: &[u8], hashed: &[u8]) -> [u8; SHA512_BLOCK_SIZE] {
    let mut block = [0u8; SHA512_BLOCK_SIZE];
    if key.len() > SHA512_BLOCK_SIZE {
        block[..hashed.len()].copy_from_slice(hashed);
    } else {
        block[..key.len()].copy_from_slice(key);
    }
    block
}

/// Incremental HMAC-SHA256, the workhorse of the TLS key schedule.
#[derive(Clone)]
pub struct HmacSha256 {
    inner: Sha256,
    opad_key: [u8; SHA256_BLOCK_SIZE],
}

impl HmacSha256 {
    pub fn new(key: &[u8]) -> HmacSha256 {
        let block = key_block_64(key, &sha256(key));
        let mut ipad_key = [0u8; SHA256_BLOCK_SIZE];
        let mut opad_key = [0u8; SHA256_BLOCK_SIZE];
        for i in 0..SHA256_BLOCK_SIZE {
            ipad_key[i] = block[i] ^ IPAD;
            opad_key[i] = block[i] ^ OPAD;
        }
        let mut inner = Sha256::new();
        inner.update(&ipad_key);
        HmacSha256 { inner, opad_key }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        let inner_hash = self.inner.finalize();
        let mut outer = Sha256::new();
        outer.update(&self.opad_key);
        outer.update(&inner_hash);
        outer.finalize()
    }
}

/// Incremental HMAC-SHA384 (128-byte block).
#[derive(Clone)]
pub struct HmacSha384 {
    inner: Sha384,
    opad_key: [u8; SHA512_BLOCK_SIZE],
}

impl HmacSha384 {
    pub fn new(key: &[u8]) -> HmacSha384 {
        let block = key_block_128(key, &sha384(key));
        let mut ipad_key = [0u8; SHA512_BLOCK_SIZE];
        let mut opad_key = [0u8; SHA512_BLOCK_SIZE];
        for i in 0..SHA512_BLOCK_SIZE {
            ipad_key[i] = block[i] ^ IPAD;
            opad_key[i] = block[i] ^ OPAD;
        }
        let mut inner = Sha384::new();
        inner.update(&ipad_key);
        HmacSha384 { inner, opad_key }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; 48] {
        let inner_hash = self.inner.finalize();
        let mut outer = Sha384::new();
        outer.update(&self.opad_key);
        outer.update(&inner_hash);
        outer.finalize()
    }
}

pub fn hmac_sha224(key: &[u8], message: &[u8]) -> [u8; 28] {
    let block = key_block_64(key, &sha224(key));
    let mut inner = Sha224::new();
    let mut ipad_key = [0u8; SHA256_BLOCK_SIZE];
    let mut opad_key = [0u8; SHA256_BLOCK_SIZE];
    for i in 0..SHA256_BLOCK_SIZE {
        ipad_key[i] = block[i] ^ IPAD;
        opad_key[i] = block[i] ^ OPAD;
    }
    inner.update(&ipad_key);
    inner.update(message);
    let inner_hash = inner.finalize();
    let mut outer = Sha224::new();
    outer.update(&opad_key);
    outer.update(&inner_hash);
    outer.finalize()
}

pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new(key);
    mac.update(message);
    mac.finalize()
}

pub fn hmac_sha384(key: &[u8], message: &[u8]) -> [u8; 48] {
    let mut mac = HmacSha384::new(key);
    mac.update(message);
    mac.finalize()
}

pub fn hmac_sha512(key: &[u8], message: &[u8]) -> [u8; 64] {
    let block = key_block_128(key, &sha512(key));
    let mut ipad_key = [0u8; SHA512_BLOCK_SIZE];
    let mut opad_key = [0u8; SHA512_BLOCK_SIZE];
    for i in 0..SHA512_BLOCK_SIZE {
        ipad_key[i] = block[i] ^ IPAD;
        opad_key[i] = block[i] ^ OPAD;
    }
    let mut inner = Sha512::new();
    inner.update(&ipad_key);
    inner.update(message);
    let inner_hash = inner.finalize();
    let mut outer = Sha512::new();
    outer.update(&opad_key);
    outer.update(&inner_hash);
    outer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // RFC 4231 test case 1: key = 0x0b * 20, data = "Hi There".
    #[test]
    fn rfc4231_case_1() {
        let key = [0x0bu8; 20];
        let data = b"Hi There";
        assert_eq!(
            hex(&hmac_sha224(&key, data)),
            "896fb1128abbdf196832107cd49df33f47b4b1169912ba4f53684b22"
        );
        assert_eq!(
            hex(&hmac_sha256(&key, data)),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
        assert_eq!(
            hex(&hmac_sha384(&key, data)),
            "afd03944d84895626b0825f4ab46907f15f9dadbe4101ec682aa034c7cebc59c\
             faea9ea9076ede7f4af152e8b2fa9cb6"
        );
        assert_eq!(
            hex(&hmac_sha512(&key, data)),
            "87aa7cdea5ef619d4ff0b4241a1d6cb02379f4e2ce4ec2787ad0b30545e17cde\
             daa833b7d6b8a702038b274eaea3f4e4be9d914eeb61f1702e696c203a126854"
        );
    }

    // RFC 4231 test case 2: key = "Jefe", data = "what do ya want for nothing?".
    #[test]
    fn rfc4231_case_2() {
        let key = b"Jefe";
        let data = b"what do ya want for nothing?";
        assert_eq!(
            hex(&hmac_sha256(key, data)),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert_eq!(
            hex(&hmac_sha384(key, data)),
            "af45d2e376484031617f78d2b58a6b1b9c7ef464f5a01b47e42ec3736322445e\
             8e2240ca5e69e2c78b3239ecfab21649"
        );
        assert_eq!(
            hex(&hmac_sha512(key, data)),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    // RFC 4231 test case 3: key = 0xaa * 20, data = 0xdd * 50.
    #[test]
    fn rfc4231_case_3() {
        let key = [0xaau8; 20];
        let data = [0xddu8; 50];
        assert_eq!(
            hex(&hmac_sha256(&key, &data)),
            "773ea91e36800e46854db8ebd09181a72959098b3ef8c122d9635514ced565fe"
        );
    }

    // RFC 4231 test case 6: 131-byte key, forcing the key-hash path.
    #[test]
    fn rfc4231_case_6_long_key() {
        let key = [0xaau8; 131];
        let data = b"Test Using Larger Than Block-Size Key - Hash Key First";
        assert_eq!(
            hex(&hmac_sha256(&key, data)),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
        assert_eq!(
            hex(&hmac_sha512(&key, data)),
            "80b24263c7c1a3ebb71493c1dd7be8b49b46d1f41b4aeec1121b013783f8f352\
             6b56d037e05f2598bd0fd2215d6a1e5295e64f73f63f0aec8b915a985d786598"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let key = b"a moderately sized key";
        let data = b"split across several updates to exercise buffering";
        let mut mac = HmacSha256::new(key);
        for chunk in data.chunks(9) {
            mac.update(chunk);
        }
        assert_eq!(mac.finalize(), hmac_sha256(key, data));
    }
}
