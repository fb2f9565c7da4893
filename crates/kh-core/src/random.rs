use rand::RngCore;

/// Injected randomness source. `api_key`/claim-voucher generation goes
/// through this trait rather than calling `rand::thread_rng()` inline so
/// tests can substitute a deterministic source.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, buf: &mut [u8]);

    /// 64-hex-char secret from 32 bytes of CSPRNG output (spec §6).
    fn hex_secret(&self, num_bytes: usize) -> String {
        let mut buf = vec![0u8; num_bytes];
        self.fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_secret_is_64_chars_for_32_bytes() {
        let r = OsRandom;
        let secret = r.hex_secret(32);
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hex_secret_is_not_constant() {
        let r = OsRandom;
        let a = r.hex_secret(32);
        let b = r.hex_secret(32);
        assert_ne!(a, b);
    }
}
