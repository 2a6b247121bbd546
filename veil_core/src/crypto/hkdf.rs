//! HKDF-SHA256 (RFC 5869) plus the TLS 1.3 Expand-Label scheme (RFC 8446
//! §7.1). The key schedule only ever needs the SHA-256 instantiation.

use super::hmac::hmac_sha256;
use super::sha2::SHA256_DIGEST_SIZE;

/// HKDF-Extract. An empty salt stands for 32 zero bytes.
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; SHA256_DIGEST_SIZE] {
    let zero = [0u8; SHA256_DIGEST_SIZE];
    hmac_sha256(if salt.is_empty() { &zero } else { salt }, ikm)
}

/// HKDF-Expand.
pub fn hkdf_expand(prk: &[u8; SHA256_DIGEST_SIZE], info: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut previous: [u8; SHA256_DIGEST_SIZE];
    let mut block = Vec::with_capacity(SHA256_DIGEST_SIZE + info.len() + 1);
    let rounds = (out_len + SHA256_DIGEST_SIZE - 1) / SHA256_DIGEST_SIZE;
    for counter in 1..=rounds as u8 {
        block.extend_from_slice(info);
        block.push(counter);
        previous = hmac_sha256(prk, &block);
        out.extend_from_slice(&previous);
        block.clear();
        block.extend_from_slice(&previous);
    }
    out.truncate(out_len);
    out
}

/// HKDF-Expand-Label: info = `[out_len:2][len]["tls13 " || label][len][context]`.
pub fn hkdf_expand_label(
    secret: &[u8; SHA256_DIGEST_SIZE],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Vec<u8> {
    const PREFIX: &[u8] = b"tls13 ";
    let mut info = Vec::with_capacity(4 + PREFIX.len() + label.len() + context.len());
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push((PREFIX.len() + label.len()) as u8);
    info.extend_from_slice(PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    hkdf_expand(secret, &info, out_len)
}

/// Derive-Secret: Expand-Label with a transcript hash as context.
pub fn derive_secret(
    secret: &[u8; SHA256_DIGEST_SIZE],
    label: &[u8],
    transcript_hash: &[u8; SHA256_DIGEST_SIZE],
) -> [u8; SHA256_DIGEST_SIZE] {
    let expanded = hkdf_expand_label(secret, label, transcript_hash, SHA256_DIGEST_SIZE);
    let mut out = [0u8; SHA256_DIGEST_SIZE];
    out.copy_from_slice(&expanded);
    out
}
