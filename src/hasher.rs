use crc::{Crc, CRC_32_ISCSI};

pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// CRC-32/ISCSI of a byte slice, used to seal block descriptors.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_checksum() {
        // CRC-32C check value
        assert_eq!(checksum(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn test_different_data_different_checksums() {
        assert_ne!(checksum(b"hello"), checksum(b"world"));
    }
}
