/// CRC32 used by MPEG-2 PSI sections (ITU-T H.222.0 / ISO/IEC 13818-1).
/// Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final xor.
const CRC32_MPEG2: u32 = 0x04C11DB7;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if (crc & 0x8000_0000) != 0 {
                (crc << 1) ^ CRC32_MPEG2
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = build_table();

/// MPEG-2 CRC32 calculator.
///
/// Used to reject corrupted PAT/PMT sections on ingest, and to sign the
/// sections produced by the test muxer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    pub fn new() -> Self {
        Self
    }

    /// Calculates the checksum of `data`.
    ///
    /// ```
    /// use tssegmenter::utils::Crc32Mpeg2;
    ///
    /// let crc = Crc32Mpeg2::new();
    /// assert_eq!(crc.calculate(&[0x01, 0x01]), 0xD66FB816);
    /// ```
    pub fn calculate(&self, data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            let index = ((crc >> 24) ^ (byte as u32)) & 0xFF;
            crc = (crc << 8) ^ TABLE[index as usize];
        }
        crc
    }

    /// True when `section` ends with its own valid CRC.
    pub fn verify(&self, section: &[u8]) -> bool {
        section.len() >= 4 && self.calculate(section) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_mpeg2_known_vector() {
        let crc = Crc32Mpeg2::new();
        // Test vector from STMicroelectronics community forum post
        assert_eq!(crc.calculate(&[0x01, 0x01]), 0xD66FB816);
    }

    #[test]
    fn test_section_with_crc_verifies() {
        let crc = Crc32Mpeg2::new();
        let mut pat = vec![
            0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xE1, 0x00,
        ];
        let value = crc.calculate(&pat);
        pat.extend_from_slice(&value.to_be_bytes());
        assert!(crc.verify(&pat));

        pat[4] ^= 0x80;
        assert!(!crc.verify(&pat));
    }
}
