//! Leading-zero-bit difficulty as used by NIP-13 proof of work.

use crate::error::{Error, Result};
use crate::hash::{Digest, DIGEST_LEN};

/// Tag name carrying the mined nonce.
pub const NONCE_TAG: &str = "nonce";

/// Highest meaningful difficulty for a 256-bit digest.
pub const MAX_DIFFICULTY: u32 = (DIGEST_LEN as u32) * 8;

/// Count leading zero bits of a digest read as a big-endian number.
///
/// Counts bits, not bytes: `0x00 0x0F ..` has 12 leading zero bits.
pub fn count_leading_zero_bits(hash: &Digest) -> u32 {
    let mut zeros = 0u32;
    for byte in hash.iter() {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

/// Whether a digest has at least `difficulty` leading zero bits.
#[inline]
pub fn meets_difficulty(hash: &Digest, difficulty: u32) -> bool {
    count_leading_zero_bits(hash) >= difficulty
}

/// Reject difficulties a 256-bit digest can never satisfy.
pub fn validate_difficulty(difficulty: u32) -> Result<u32> {
    if difficulty > MAX_DIFFICULTY {
        return Err(Error::InvalidArgument(format!(
            "difficulty {} exceeds {} bits",
            difficulty, MAX_DIFFICULTY
        )));
    }
    Ok(difficulty)
}

/// Expected number of attempts to reach a difficulty.
pub fn expected_attempts(difficulty: u32) -> f64 {
    2f64.powi(difficulty.min(MAX_DIFFICULTY) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_leading_zero_bits() {
        assert_eq!(count_leading_zero_bits(&[0x00; 32]), 256);
        assert_eq!(count_leading_zero_bits(&[0xFF; 32]), 0);

        let mut hash = [0xFF; 32];
        hash[0] = 0x00;
        hash[1] = 0x00;
        hash[2] = 0x0F;
        assert_eq!(count_leading_zero_bits(&hash), 20);
    }

    #[test]
    fn test_partial_byte_difficulty() {
        // 21 bits: two zero bytes then 0b0000_0111
        let mut hash = [0xFF; 32];
        hash[0] = 0x00;
        hash[1] = 0x00;
        hash[2] = 0x07;
        assert_eq!(count_leading_zero_bits(&hash), 21);
        assert!(meets_difficulty(&hash, 21));
        assert!(!meets_difficulty(&hash, 22));
    }

    #[test]
    fn test_later_zero_bytes_do_not_count() {
        let mut hash = [0x00; 32];
        hash[0] = 0x80;
        assert_eq!(count_leading_zero_bits(&hash), 0);
    }

    #[test]
    fn test_validate_difficulty() {
        assert!(validate_difficulty(0).is_ok());
        assert!(validate_difficulty(256).is_ok());
        assert!(validate_difficulty(257).is_err());
    }

    #[test]
    fn test_expected_attempts() {
        assert_eq!(expected_attempts(8), 256.0);
    }
}
