//! Interface to the text preprocessing layer.
//!
//! Encoding conversion, whitespace policy and 16-bit padding live outside
//! this crate's scope — callers hand the builder an already-decoded byte
//! stream. What *is* in scope is the small vocabulary the builder needs to
//! interpret that stream correctly: which bigram-padding convention
//! produced it, since that determines which trigram positions must be
//! zeroed after counting and how fast the length-extension schedule
//! advances.

/// How the input byte stream was bigram-padded before reaching the
/// builder. `Ascii*`/`Utf8*` name the two encodings the trainer supports
/// pairing with 16-bit padding; `*LE`/`*BE` name the byte order of the
/// padding. `None` means no padding: every byte is native content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BigramMode {
    None,
    AsciiLe,
    AsciiBe,
    Utf8Le,
    Utf8Be,
}

impl BigramMode {
    /// Whether this mode pads content bytes into two-byte frames. Trigram
    /// positions that would straddle a frame boundary are disallowed, and
    /// the length-extension schedule advances twice as fast per step as
    /// the unpadded case.
    pub fn is_16bit_padded(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Length-extension step multiplier: padded streams carry one real
    /// content byte per two stream bytes, so the same `L` step covers
    /// twice as many stream bytes.
    pub fn expansion_factor(self) -> usize {
        if self.is_16bit_padded() {
            2
        } else {
            1
        }
    }

    /// Whether the trigram starting at stream offset `pos` (0-based) would
    /// cross a two-byte frame boundary and must be zeroed after counting.
    /// Unpadded streams never disallow a position.
    pub fn crosses_frame_boundary(self, pos: usize) -> bool {
        match self {
            Self::None => false,
            // A frame is two bytes; a trigram starting at an odd offset
            // within the content lane straddles into the next frame's
            // padding byte.
            Self::AsciiLe | Self::AsciiBe | Self::Utf8Le | Self::Utf8Be => pos % 2 != 0,
        }
    }
}

/// A decoded byte stream handed to the builder by the preprocessing layer.
/// The builder only ever needs sequential, repeatable access — training
/// re-streams the input once per length-extension step and once more for
/// coverage statistics — so the interface is a borrowed slice rather than
/// a generic iterator.
pub trait ByteSource {
    fn bytes(&self) -> &[u8];
    fn bigram_mode(&self) -> BigramMode {
        BigramMode::None
    }
}

impl ByteSource for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl ByteSource for &[u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// A byte stream paired with an explicit [`BigramMode`], for the common
/// case where the caller already knows how the stream was padded.
pub struct TaggedBytes<'a> {
    pub bytes: &'a [u8],
    pub mode: BigramMode,
}

impl<'a> ByteSource for TaggedBytes<'a> {
    fn bytes(&self) -> &[u8] {
        self.bytes
    }
    fn bigram_mode(&self) -> BigramMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpadded_mode_never_crosses_boundary() {
        for pos in 0..10 {
            assert!(!BigramMode::None.crosses_frame_boundary(pos));
        }
    }

    #[test]
    fn padded_mode_flags_odd_offsets() {
        assert!(!BigramMode::Utf8Le.crosses_frame_boundary(0));
        assert!(BigramMode::Utf8Le.crosses_frame_boundary(1));
        assert_eq!(BigramMode::AsciiBe.expansion_factor(), 2);
        assert_eq!(BigramMode::None.expansion_factor(), 1);
    }
}
