//! CRC computation for sbgECom frames
//!
//! The frame CRC is a 16-bit CRC with the reflected CCITT polynomial (0x8408),
//! a zero initial value and no final XOR, i.e. the CRC-16/KERMIT catalog entry.
//! It spans every byte between the SYNC pair and the CRC field: message ID,
//! message class, length and payload. The CRC is sent little-endian.

use crc::{Crc, CRC_16_KERMIT};

/// CRC engine shared by the encoder and the parser.
pub static ECOM_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// Compute the CRC over a byte slice.
pub fn compute_crc(data: &[u8]) -> u16 {
    ECOM_CRC.checksum(data)
}

/// Verify a CRC-protected span.
///
/// `span` holds the covered bytes immediately followed by the 2-byte
/// little-endian CRC.
pub fn verify_crc(span: &[u8]) -> bool {
    if span.len() < 2 {
        return false;
    }

    let data_end = span.len() - 2;
    let computed = compute_crc(&span[..data_end]);
    let stored = u16::from_le_bytes([span[data_end], span[data_end + 1]]);

    computed == stored
}

/// Incremental CRC, fed one byte at a time while a frame is being parsed.
pub struct CrcAccumulator {
    digest: crc::Digest<'static, u16>,
}

impl CrcAccumulator {
    pub fn new() -> Self {
        Self {
            digest: ECOM_CRC.digest(),
        }
    }

    pub fn update(&mut self, byte: u8) {
        self.digest.update(&[byte]);
    }

    /// Consume the accumulator and return the CRC of everything fed so far.
    pub fn finalize(self) -> u16 {
        self.digest.finalize()
    }
}

impl Default for CrcAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_catalog_check_value() {
        // Standard check input for CRC catalogs
        assert_eq!(compute_crc(b"123456789"), 0x2189);
    }

    #[test]
    fn test_crc_empty_is_zero() {
        assert_eq!(compute_crc(&[]), 0x0000);
    }

    #[test]
    fn test_accumulator_matches_one_shot() {
        let data = [0x02, 0x01, 0x02, 0x00, 0xAA, 0xBB];
        let mut acc = CrcAccumulator::new();
        for &b in &data {
            acc.update(b);
        }
        assert_eq!(acc.finalize(), compute_crc(&data));
    }

    #[test]
    fn test_verify_crc_span() {
        let mut span = vec![0x04, 0x10, 0x01, 0x00, 0x07];
        let crc = compute_crc(&span);
        span.extend_from_slice(&crc.to_le_bytes());
        assert!(verify_crc(&span));

        // Corrupt the payload byte
        span[4] ^= 0x01;
        assert!(!verify_crc(&span));
    }

    #[test]
    fn test_verify_crc_short_span() {
        assert!(!verify_crc(&[0x00])); // Too short
    }

    #[test]
    fn test_single_bit_flips_change_crc() {
        let data = [0x02, 0x01, 0x02, 0x00, 0xAA, 0xBB];
        let reference = compute_crc(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data;
                flipped[byte] ^= 1 << bit;
                assert_ne!(compute_crc(&flipped), reference, "byte {byte} bit {bit}");
            }
        }
    }
}
