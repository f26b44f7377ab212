//! Index key encoding.
//!
//! Keys are stored in trees as byte strings compared lexicographically, so
//! every encoding here preserves the natural order of its type.

use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;

/// A value that can be stored as an index key.
pub trait IndexKey: Clone + Ord + Send + Sync + 'static {
    /// Encodes the key. `a < b` implies `a.to_bytes() < b.to_bytes()`.
    fn to_bytes(&self) -> Vec<u8>;

    /// Decodes a key produced by [`to_bytes`](IndexKey::to_bytes).
    fn from_bytes(bytes: &[u8]) -> CoreResult<Self>;
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> CoreResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| CoreError::invalid_format(format!("expected {N} bytes for {what}")))
}

impl IndexKey for u64 {
    fn to_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        Ok(u64::from_be_bytes(fixed(bytes, "u64")?))
    }
}

impl IndexKey for i64 {
    fn to_bytes(&self) -> Vec<u8> {
        // Flipping the sign bit orders negatives before positives.
        ((*self as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        Ok((u64::from_be_bytes(fixed(bytes, "i64")?) ^ (1 << 63)) as i64)
    }
}

impl IndexKey for bool {
    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(CoreError::invalid_format("expected one byte for bool")),
        }
    }
}

impl IndexKey for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::invalid_format("invalid UTF-8"))
    }
}

impl IndexKey for Vec<u8> {
    fn to_bytes(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl IndexKey for RecordId {
    fn to_bytes(&self) -> Vec<u8> {
        RecordId::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != RecordId::ENCODED_LEN {
            return Err(CoreError::invalid_format("expected 12 bytes for record id"));
        }
        RecordId::from_bytes(bytes).ok_or_else(|| CoreError::invalid_format("bad record id"))
    }
}

// Composite components are escaped so that a shorter component sorts first:
// 0x00 becomes 0x00 0xFF and each component ends with 0x00 0x01.
const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

fn push_component(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

fn take_component(bytes: &[u8], pos: &mut usize) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let b = *bytes
            .get(*pos)
            .ok_or_else(|| CoreError::invalid_format("composite key truncated"))?;
        *pos += 1;
        if b != ESCAPE {
            out.push(b);
            continue;
        }
        let next = *bytes
            .get(*pos)
            .ok_or_else(|| CoreError::invalid_format("composite key truncated"))?;
        *pos += 1;
        match next {
            ESCAPED_ZERO => out.push(ESCAPE),
            TERMINATOR => return Ok(out),
            _ => return Err(CoreError::invalid_format("bad escape in composite key")),
        }
    }
}

/// Two-field composite key, ordered by `(first, second)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey2<A, B> {
    /// First key component.
    pub first: A,
    /// Second key component.
    pub second: B,
}

impl<A: IndexKey, B: IndexKey> CompositeKey2<A, B> {
    /// Creates a new composite key.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: IndexKey, B: IndexKey> IndexKey for CompositeKey2<A, B> {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_component(&mut out, &self.first.to_bytes());
        push_component(&mut out, &self.second.to_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let mut pos = 0;
        let first = A::from_bytes(&take_component(bytes, &mut pos)?)?;
        let second = B::from_bytes(&take_component(bytes, &mut pos)?)?;
        if pos != bytes.len() {
            return Err(CoreError::invalid_format("trailing bytes after composite key"));
        }
        Ok(Self { first, second })
    }
}

/// Three-field composite key, ordered by `(first, second, third)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey3<A, B, C> {
    /// First key component.
    pub first: A,
    /// Second key component.
    pub second: B,
    /// Third key component.
    pub third: C,
}

impl<A: IndexKey, B: IndexKey, C: IndexKey> CompositeKey3<A, B, C> {
    /// Creates a new composite key.
    pub fn new(first: A, second: B, third: C) -> Self {
        Self {
            first,
            second,
            third,
        }
    }
}

impl<A: IndexKey, B: IndexKey, C: IndexKey> IndexKey for CompositeKey3<A, B, C> {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_component(&mut out, &self.first.to_bytes());
        push_component(&mut out, &self.second.to_bytes());
        push_component(&mut out, &self.third.to_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let mut pos = 0;
        let first = A::from_bytes(&take_component(bytes, &mut pos)?)?;
        let second = B::from_bytes(&take_component(bytes, &mut pos)?)?;
        let third = C::from_bytes(&take_component(bytes, &mut pos)?)?;
        if pos != bytes.len() {
            return Err(CoreError::invalid_format("trailing bytes after composite key"));
        }
        Ok(Self {
            first,
            second,
            third,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;

    #[test]
    fn i64_order_preserved() {
        let values = [i64::MIN, -1000, -1, 0, 1, 42, i64::MAX];
        for pair in values.windows(2) {
            assert!(pair[0].to_bytes() < pair[1].to_bytes());
        }
        assert_eq!(i64::from_bytes(&(-7i64).to_bytes()).unwrap(), -7);
    }

    #[test]
    fn string_decodes() {
        let key = "hello".to_string();
        assert_eq!(String::from_bytes(&key.to_bytes()).unwrap(), key);
        assert!(String::from_bytes(&[0xFF, 0xFE]).is_err());
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(u64::from_bytes(&[1, 2, 3]).is_err());
        assert!(bool::from_bytes(&[2]).is_err());
    }

    #[test]
    fn record_id_key() {
        let rid = RecordId::new(SegmentId::new(3), 9);
        let bytes = IndexKey::to_bytes(&rid);
        assert_eq!(<RecordId as IndexKey>::from_bytes(&bytes).unwrap(), rid);
    }

    #[test]
    fn composite_orders_by_first_component() {
        let a = CompositeKey2::new("ab".to_string(), 9i64);
        let b = CompositeKey2::new("abc".to_string(), -5i64);
        let c = CompositeKey2::new("b".to_string(), i64::MIN);
        assert!(a.to_bytes() < b.to_bytes());
        assert!(b.to_bytes() < c.to_bytes());
    }

    #[test]
    fn composite_with_zero_bytes() {
        let key = CompositeKey3::new(vec![0u8, 1, 0], 7u64, true);
        let decoded = CompositeKey3::<Vec<u8>, u64, bool>::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);

        let shorter = CompositeKey2::new(vec![0u8], 0u64);
        let longer = CompositeKey2::new(vec![0u8, 0], 0u64);
        assert!(shorter.to_bytes() < longer.to_bytes());
    }

    #[test]
    fn composite_truncated() {
        let key = CompositeKey2::new("x".to_string(), 1u64).to_bytes();
        assert!(CompositeKey2::<String, u64>::from_bytes(&key[..key.len() - 1]).is_err());
    }
}
