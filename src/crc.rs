use ::crc::{CRC_16_XMODEM, CRC_32_ISCSI, Crc};

/// CRC16 (XMODEM) used by the user-friendly address form
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-32C (Castagnoli) used by the BoC checksum trailer
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32c_known_value() {
        // RFC 3720 test vector: crc32c of 32 zero bytes
        assert_eq!(CRC32C.checksum(&[0u8; 32]), 0x8a9136aa);
    }

    #[test]
    fn crc16_known_value() {
        assert_eq!(CRC16.checksum(b"123456789"), 0x31c3);
    }
}
