//! Deterministic test payloads.

use bytes::Bytes;

/// `len` bytes cycling through `0..=250`, starting at offset `seed`.
///
/// The cycle length is prime so misplaced chunks show up as mismatches.
#[must_use]
pub fn pattern(len: usize, seed: usize) -> Bytes { (0..=250u8).cycle().skip(seed % 251).take(len).collect() }

#[cfg(test)]
mod tests {
    use super::pattern;

    #[test]
    fn pattern_is_deterministic_and_seeded() {
        assert_eq!(pattern(300, 0), pattern(300, 0));
        assert_ne!(pattern(300, 0), pattern(300, 1));
        assert_eq!(pattern(300, 0)[251], 0);
        assert_eq!(pattern(4, 3).as_ref(), &[3, 4, 5, 6]);
    }
}
