//! Hand-rolled cryptographic primitives for the transport stack.
//! Everything is rebuilt from arithmetic: no crypto crates.

pub mod aead;
pub mod chacha20;
pub mod ecc;
pub mod hkdf;
pub mod hmac;
pub mod poly1305;
pub mod sha2;
