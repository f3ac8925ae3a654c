//! XOR obfuscation ciphers.

use seg_stream::{Filter, Result};

/// XOR every byte with a fixed key.  Self-inverse.
pub struct XorFilter {
    key: u8,
}

impl XorFilter {
    pub fn new(key: u8) -> Self {
        Self { key }
    }
}

impl Filter for XorFilter {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.iter().map(|b| b ^ self.key).collect())
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.decode(data)
    }
}

/// The Blood RFF cipher: byte `i` is XORed with `seed + i/2`.
///
/// File payloads use seed 0; the file table uses `offFAT & 0xFF`.
/// Self-inverse, like all XOR ciphers.
pub struct RffCrypt {
    seed: u8,
}

impl RffCrypt {
    pub fn new(seed: u8) -> Self {
        Self { seed }
    }

    /// Apply the keystream to a standalone buffer.
    pub fn apply(seed: u8, data: &mut [u8]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= seed.wrapping_add((i / 2) as u8);
        }
    }
}

impl Filter for RffCrypt {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = data.to_vec();
        Self::apply(self.seed, &mut out);
        Ok(out)
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.decode(data)
    }
}
