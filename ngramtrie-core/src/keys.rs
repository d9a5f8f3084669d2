//! Byte-key to nybble-chain expansion.
//!
//! Keys are inserted/looked up a byte at a time but walked as a chain of
//! fixed-width nybbles, one trie level per nybble. `BitsPerLevel::Three` is
//! the documented irregular case: a byte splits into widths `2, 3, 3`
//! (summing to 8) rather than three equal 3-bit groups, which would only
//! sum to 9. Any code walking nybble widths must use [`BitsPerLevel::level_widths`]
//! rather than assuming a uniform width, or it will silently desync on the
//! three-bit variant.

use crate::error::{Result, TrieError};
use serde::{Deserialize, Serialize};

/// Trie fan-out exponent. Each level branches into `2^bits()` children,
/// except that `Three`'s first sub-level of every byte only uses 4 of its
/// node's 8 child slots (values 0..=3) — the node's child array is still
/// sized for the full `2^3` fan-out so every level shares one node layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitsPerLevel {
    Two,
    Three,
    Four,
    Eight,
}

impl BitsPerLevel {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(TrieError::UnsupportedBitsPerLevel(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Per-byte sequence of nybble widths, in MSB-first order.
    pub fn level_widths(self) -> &'static [u8] {
        match self {
            Self::Two => &[2, 2, 2, 2],
            Self::Three => &[2, 3, 3],
            Self::Four => &[4, 4],
            Self::Eight => &[8],
        }
    }

    /// Number of trie levels consumed per input byte.
    pub fn levels_per_byte(self) -> usize {
        self.level_widths().len()
    }

    /// Fan-out (child-array size) of every node at this setting: the widest
    /// nybble width that occurs, which for `Three` is 3 bits (8 slots) even
    /// though one sub-level per byte only populates 4 of them.
    pub fn fanout(self) -> usize {
        1usize << self.as_u8()
    }
}

/// Expand a single byte into its sequence of nybble values (MSB-first),
/// per [`BitsPerLevel::level_widths`].
pub fn byte_to_nybbles(byte: u8, bits: BitsPerLevel) -> Vec<u8> {
    let widths = bits.level_widths();
    let mut out = Vec::with_capacity(widths.len());
    let mut shift: i32 = 8;
    for &w in widths {
        shift -= w as i32;
        let mask: u8 = ((1u16 << w) - 1) as u8;
        out.push((byte >> shift) & mask);
    }
    out
}

/// Expand a full key into its flat nybble-value stream.
pub fn key_to_nybbles(key: &[u8], bits: BitsPerLevel) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * bits.levels_per_byte());
    for &b in key {
        out.extend(byte_to_nybbles(b, bits));
    }
    out
}

/// Reassemble a key from a flat nybble-value stream produced by
/// [`key_to_nybbles`]. `nybbles.len()` must be a multiple of
/// `bits.levels_per_byte()`; callers (trie enumeration) are responsible
/// for only calling this at leaves whose depth lands on a byte boundary —
/// a leaf whose bit length is not a whole number of bytes is never
/// reported during enumeration.
pub fn nybbles_to_key(nybbles: &[u8], bits: BitsPerLevel) -> Vec<u8> {
    let widths = bits.level_widths();
    let per_byte = widths.len();
    debug_assert_eq!(nybbles.len() % per_byte, 0);
    let mut out = Vec::with_capacity(nybbles.len() / per_byte);
    for chunk in nybbles.chunks(per_byte) {
        let mut byte = 0u8;
        let mut shift: i32 = 8;
        for (i, &w) in widths.iter().enumerate() {
            shift -= w as i32;
            byte |= chunk[i] << shift;
        }
        out.push(byte);
    }
    out
}

/// Whether a nybble-depth lands exactly on a byte boundary for this
/// bits-per-level setting.
pub fn is_byte_aligned(depth: usize, bits: BitsPerLevel) -> bool {
    depth % bits.levels_per_byte() == 0
}

/// ASCII space byte, skipped on insert/lookup when a trie's
/// `ignore_whitespace` flag is set.
pub const ASCII_SPACE: u8 = 0x20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_bit_roundtrip() {
        let key = b"the";
        let nybbles = key_to_nybbles(key, BitsPerLevel::Two);
        assert_eq!(nybbles.len(), key.len() * 4);
        let back = nybbles_to_key(&nybbles, BitsPerLevel::Two);
        assert_eq!(back, key);
    }

    #[test]
    fn eight_bit_is_identity_per_byte() {
        let key = b"xyz";
        let nybbles = key_to_nybbles(key, BitsPerLevel::Eight);
        assert_eq!(nybbles, key.to_vec());
        assert_eq!(nybbles_to_key(&nybbles, BitsPerLevel::Eight), key);
    }

    #[test]
    fn four_bit_roundtrip() {
        let key = b"ab";
        let nybbles = key_to_nybbles(key, BitsPerLevel::Four);
        assert_eq!(nybbles.len(), 4);
        assert_eq!(nybbles_to_key(&nybbles, BitsPerLevel::Four), key);
    }

    #[test]
    fn three_bit_irregular_split_roundtrips() {
        for byte in [0u8, 1, 42, 128, 200, 255] {
            let nybbles = byte_to_nybbles(byte, BitsPerLevel::Three);
            assert_eq!(nybbles.len(), 3);
            assert!(nybbles[0] <= 0b11); // first sub-level is only 2 bits wide
            let back = nybbles_to_key(&nybbles, BitsPerLevel::Three);
            assert_eq!(back[0], byte);
        }
    }

    #[test]
    fn three_bit_multibyte_roundtrip() {
        let key = b"hello";
        let nybbles = key_to_nybbles(key, BitsPerLevel::Three);
        assert_eq!(nybbles.len(), key.len() * 3);
        assert_eq!(nybbles_to_key(&nybbles, BitsPerLevel::Three), key);
    }

    #[test]
    fn unsupported_bits_per_level_is_rejected() {
        assert!(BitsPerLevel::from_u8(5).is_err());
        assert!(BitsPerLevel::from_u8(2).is_ok());
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_holds_for_all_bytes_two(bytes: Vec<u8>) {
            let nybbles = key_to_nybbles(&bytes, BitsPerLevel::Two);
            proptest::prop_assert_eq!(nybbles_to_key(&nybbles, BitsPerLevel::Two), bytes);
        }

        #[test]
        fn roundtrip_holds_for_all_bytes_three(bytes: Vec<u8>) {
            let nybbles = key_to_nybbles(&bytes, BitsPerLevel::Three);
            proptest::prop_assert_eq!(nybbles_to_key(&nybbles, BitsPerLevel::Three), bytes);
        }
    }
}
