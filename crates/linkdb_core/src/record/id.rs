//! Record identities.

use crate::types::SegmentId;
use std::fmt;

/// Stable address of a persisted record: a segment plus a position in it.
///
/// Record ids are plain values. They may appear in any number of link
/// collections and indexes at once and never own the record they name.
/// Ordering is by segment, then position, which matches the ordering of
/// [`RecordId::to_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    segment: SegmentId,
    position: u64,
}

impl RecordId {
    /// Length of the encoded form.
    pub const ENCODED_LEN: usize = 12;

    /// Creates a record id.
    #[must_use]
    pub const fn new(segment: SegmentId, position: u64) -> Self {
        Self { segment, position }
    }

    /// Returns the segment.
    #[must_use]
    pub const fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Returns the position within the segment.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Encodes the id as 12 big-endian bytes whose byte order matches
    /// the id's ordering.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&self.segment.as_u32().to_be_bytes());
        out[4..12].copy_from_slice(&self.position.to_be_bytes());
        out
    }

    /// Decodes an id from the first 12 bytes of `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let mut segment = [0u8; 4];
        segment.copy_from_slice(&bytes[0..4]);
        let mut position = [0u8; 8];
        position.copy_from_slice(&bytes[4..12]);
        Some(Self::new(
            SegmentId::new(u32::from_be_bytes(segment)),
            u64::from_be_bytes(position),
        ))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.segment.as_u32(), self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(segment: u32, position: u64) -> RecordId {
        RecordId::new(SegmentId::new(segment), position)
    }

    #[test]
    fn ordering_is_segment_then_position() {
        assert!(rid(1, 900) < rid(2, 0));
        assert!(rid(2, 1) < rid(2, 2));
    }

    #[test]
    fn byte_order_matches_ordering() {
        let ids = [rid(0, 5), rid(1, 0), rid(1, 256), rid(7, u64::MAX)];
        for pair in ids.windows(2) {
            assert!(pair[0].to_bytes() < pair[1].to_bytes());
        }
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(RecordId::from_bytes(&[0u8; 5]).is_none());
        let id = rid(3, 17);
        assert_eq!(RecordId::from_bytes(&id.to_bytes()), Some(id));
    }

    #[test]
    fn display_format() {
        assert_eq!(rid(12, 0).to_string(), "#12:0");
    }
}
