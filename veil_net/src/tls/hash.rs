//! Running SHA-256 transcript hash over the handshake messages.

use veil_core::crypto::sha2::Sha256;

#[derive(Clone, Default)]
pub struct TlsHash {
    context: Sha256,
}

impl TlsHash {
    pub fn new() -> TlsHash {
        TlsHash::default()
    }

    pub fn reset(&mut self) {
        self.context = Sha256::new();
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.update(data);
    }

    /// Digest of everything fed so far; the transcript keeps running.
    pub fn snapshot(&self) -> [u8; 32] {
        self.context.clone().finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_core::crypto::sha2::sha256;

    #[test]
    fn snapshot_does_not_disturb_the_stream() {
        let mut transcript = TlsHash::new();
        transcript.update(b"client hello");
        assert_eq!(transcript.snapshot(), sha256(b"client hello"));
        transcript.update(b"server hello");
        assert_eq!(transcript.snapshot(), sha256(b"client helloserver hello"));
    }

    #[test]
    fn reset_starts_over() {
        let mut transcript = TlsHash::new();
        transcript.update(b"stale");
        transcript.reset();
        assert_eq!(transcript.snapshot(), sha256(b""));
    }
}
