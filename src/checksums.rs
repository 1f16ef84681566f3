// src/checksums.rs
//
// Checksum helpers for sensor frame validation.

/// Sum of all bytes, truncated to 8 bits.
/// TF-Luna frames carry this over bytes 0..=7 in byte 8.
pub fn sum8_checksum(data: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for &byte in data {
        sum = sum.wrapping_add(byte);
    }
    sum
}

/// Check a frame whose last byte is the Sum8 of the preceding bytes.
/// Empty input never validates.
pub fn validate_trailing_sum8(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&expected, body)) => sum8_checksum(body) == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum8_checksum_basic() {
        // 0x01 + 0x02 + 0x03 + 0x04 + 0x05 = 0x0F
        assert_eq!(sum8_checksum(&[0x01, 0x02, 0x03, 0x04, 0x05]), 0x0F);
    }

    #[test]
    fn test_sum8_checksum_wraps() {
        assert_eq!(sum8_checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(sum8_checksum(&[]), 0x00);
    }

    #[test]
    fn test_validate_trailing_sum8() {
        // 0x59 + 0x59 + 0x64 + 0xC8 + 0x40 + 0x1F = 0x23D -> 0x3D
        let frame = [0x59, 0x59, 0x64, 0x00, 0xC8, 0x00, 0x40, 0x1F, 0x3D];
        assert!(validate_trailing_sum8(&frame));

        let mut bad = frame;
        bad[8] = 0x00;
        assert!(!validate_trailing_sum8(&bad));
        assert!(!validate_trailing_sum8(&[]));
    }
}
