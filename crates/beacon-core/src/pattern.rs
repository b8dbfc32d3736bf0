//! Byte subsequence search used to find the nonce placeholder.

use crate::error::{Error, Result};

/// Index of the first occurrence of `pattern` in `buffer`.
///
/// Single forward scan with a partial-match counter. On a mismatch the scan
/// restarts one byte after the start of the failed candidate, so overlapping
/// prefixes are not skipped. Worst case is `O(n * m)`.
///
/// Returns `Ok(None)` when absent and `InvalidArgument` for an empty pattern.
pub fn find_subsequence(buffer: &[u8], pattern: &[u8]) -> Result<Option<usize>> {
    if pattern.is_empty() {
        return Err(Error::InvalidArgument(
            "non-empty byte pattern is required".to_string(),
        ));
    }

    let mut matched = 0usize;
    let mut offset = 0usize;
    while offset < buffer.len() {
        if buffer[offset] == pattern[matched] {
            matched += 1;
            if matched == pattern.len() {
                return Ok(Some(offset + 1 - matched));
            }
            offset += 1;
        } else if matched > 0 {
            offset = offset + 1 - matched;
            matched = 0;
        } else {
            offset += 1;
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_finds_first_occurrence() {
        assert_eq!(find_subsequence(b"abcabc", b"bc").unwrap(), Some(1));
        assert_eq!(find_subsequence(b"abc", b"abc").unwrap(), Some(0));
        assert_eq!(find_subsequence(b"xxabc", b"c").unwrap(), Some(4));
    }

    #[test]
    fn test_absent_pattern() {
        assert_eq!(find_subsequence(b"abc", b"abd").unwrap(), None);
        assert_eq!(find_subsequence(b"ab", b"abc").unwrap(), None);
        assert_eq!(find_subsequence(b"", b"a").unwrap(), None);
    }

    #[test]
    fn test_empty_pattern_is_invalid() {
        assert!(matches!(
            find_subsequence(b"abc", b""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_overlapping_prefix() {
        // A naive reset-to-zero would miss these matches.
        assert_eq!(find_subsequence(b"aab", b"ab").unwrap(), Some(1));
        assert_eq!(find_subsequence(b"aaab", b"aab").unwrap(), Some(1));
        assert_eq!(find_subsequence(b"abababc", b"ababc").unwrap(), Some(2));
    }

    fn naive(buffer: &[u8], pattern: &[u8]) -> Option<usize> {
        buffer.windows(pattern.len()).position(|w| w == pattern)
    }

    proptest! {
        #[test]
        fn prop_agrees_with_windows(
            buffer in proptest::collection::vec(0u8..3, 0..64),
            pattern in proptest::collection::vec(0u8..3, 1..5),
        ) {
            prop_assert_eq!(find_subsequence(&buffer, &pattern).unwrap(), naive(&buffer, &pattern));
        }
    }
}
