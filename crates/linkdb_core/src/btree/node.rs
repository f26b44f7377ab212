//! On-page node format.
//!
//! ```text
//! header   kind:u8 | count:u16 | tree_size:u64
//! leaf     { key_len:u16 | key | rid:12 } * count
//! interior first_child:u64 { key_len:u16 | key | rid:12 | child:u64 } * count
//! ```
//!
//! All integers are big-endian. `tree_size` is only maintained on the root
//! page. Entries are ordered by key bytes, then record id.

use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use linkdb_storage::{PageIndex, StorageError};

pub(crate) const HEADER_LEN: usize = 11;
const KIND_LEAF: u8 = 1;
const KIND_INTERIOR: u8 = 2;
const CHILD_LEN: usize = 8;
const CELL_OVERHEAD: usize = 2 + RecordId::ENCODED_LEN;

/// One `(key, record)` pair stored in a tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeEntry {
    /// Encoded key.
    pub key: Vec<u8>,
    /// Record stored under the key.
    pub rid: RecordId,
}

impl TreeEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, rid: RecordId) -> Self {
        Self {
            key: key.into(),
            rid,
        }
    }

    fn cell_len(&self) -> usize {
        CELL_OVERHEAD + self.key.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf {
        entries: Vec<TreeEntry>,
    },
    Interior {
        children: Vec<PageIndex>,
        separators: Vec<TreeEntry>,
    },
}

/// Largest key that still lets four interior cells share one page.
pub(crate) fn max_key_len(page_size: usize) -> usize {
    (page_size - HEADER_LEN - CHILD_LEN) / 4 - CELL_OVERHEAD - CHILD_LEN
}

/// Nodes whose cells use fewer bytes than this are rebalanced.
pub(crate) fn min_fill(page_size: usize) -> usize {
    page_size / 3
}

/// Index splitting `cells` into two runs of roughly equal byte size, kept
/// within `[lo, cells.len() - hi]`.
pub(crate) fn byte_split_point(cells: &[TreeEntry], lo: usize, hi: usize) -> usize {
    let total: usize = cells.iter().map(TreeEntry::cell_len).sum();
    let mut acc = 0;
    let mut split = cells.len();
    for (i, cell) in cells.iter().enumerate() {
        if acc >= total / 2 {
            split = i;
            break;
        }
        acc += cell.cell_len();
    }
    split.clamp(lo, cells.len().saturating_sub(hi).max(lo))
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            entries: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Node::Leaf { entries } => {
                HEADER_LEN + entries.iter().map(TreeEntry::cell_len).sum::<usize>()
            }
            Node::Interior { separators, .. } => {
                HEADER_LEN
                    + CHILD_LEN
                    + separators
                        .iter()
                        .map(|s| s.cell_len() + CHILD_LEN)
                        .sum::<usize>()
            }
        }
    }

    pub fn encode(&self, page_size: usize, tree_size: u64) -> CoreResult<Vec<u8>> {
        let len = self.encoded_len();
        if len > page_size {
            return Err(CoreError::consistency_violation(format!(
                "node of {len} bytes does not fit a {page_size} byte page"
            )));
        }
        let mut buf = Vec::with_capacity(page_size);
        match self {
            Node::Leaf { entries } => {
                buf.push(KIND_LEAF);
                buf.extend_from_slice(&(entries.len() as u16).to_be_bytes());
                buf.extend_from_slice(&tree_size.to_be_bytes());
                for entry in entries {
                    put_entry(&mut buf, entry);
                }
            }
            Node::Interior {
                children,
                separators,
            } => {
                buf.push(KIND_INTERIOR);
                buf.extend_from_slice(&(separators.len() as u16).to_be_bytes());
                buf.extend_from_slice(&tree_size.to_be_bytes());
                buf.extend_from_slice(&children[0].as_u64().to_be_bytes());
                for (sep, child) in separators.iter().zip(&children[1..]) {
                    put_entry(&mut buf, sep);
                    buf.extend_from_slice(&child.as_u64().to_be_bytes());
                }
            }
        }
        buf.resize(page_size, 0);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(corrupted("page shorter than node header"));
        }
        let count = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let mut cursor = Cursor {
            buf,
            pos: HEADER_LEN,
        };
        match buf[0] {
            KIND_LEAF => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(cursor.entry()?);
                }
                Ok(Node::Leaf { entries })
            }
            KIND_INTERIOR => {
                let mut children = Vec::with_capacity(count + 1);
                let mut separators = Vec::with_capacity(count);
                children.push(PageIndex::new(cursor.u64()?));
                for _ in 0..count {
                    separators.push(cursor.entry()?);
                    children.push(PageIndex::new(cursor.u64()?));
                }
                Ok(Node::Interior {
                    children,
                    separators,
                })
            }
            kind => Err(corrupted(format!("unknown node kind {kind}"))),
        }
    }
}

pub(crate) fn tree_size(buf: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[3..11]);
    u64::from_be_bytes(arr)
}

pub(crate) fn set_tree_size(buf: &mut [u8], size: u64) {
    buf[3..11].copy_from_slice(&size.to_be_bytes());
}

fn put_entry(buf: &mut Vec<u8>, entry: &TreeEntry) {
    buf.extend_from_slice(&(entry.key.len() as u16).to_be_bytes());
    buf.extend_from_slice(&entry.key);
    buf.extend_from_slice(&entry.rid.to_bytes());
}

fn corrupted(message: impl Into<String>) -> CoreError {
    CoreError::Storage(StorageError::Corrupted(message.into()))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> CoreResult<&[u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(corrupted("node cell runs past page end"));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(arr))
    }

    fn entry(&mut self) -> CoreResult<TreeEntry> {
        let len_bytes = self.take(2)?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        let key = self.take(len)?.to_vec();
        let rid = RecordId::from_bytes(self.take(RecordId::ENCODED_LEN)?)
            .ok_or_else(|| corrupted("truncated record id"))?;
        Ok(TreeEntry { key, rid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;

    fn entry(key: &[u8], position: u64) -> TreeEntry {
        TreeEntry::new(key.to_vec(), RecordId::new(SegmentId::new(1), position))
    }

    #[test]
    fn leaf_encode_decode() {
        let node = Node::Leaf {
            entries: vec![entry(b"a", 1), entry(b"bb", 2)],
        };
        let buf = node.encode(256, 2).unwrap();
        assert_eq!(buf.len(), 256);
        assert_eq!(tree_size(&buf), 2);
        assert_eq!(Node::decode(&buf).unwrap(), node);
    }

    #[test]
    fn interior_encode_decode() {
        let node = Node::Interior {
            children: vec![PageIndex::new(4), PageIndex::new(9)],
            separators: vec![entry(b"m", 3)],
        };
        let buf = node.encode(256, 0).unwrap();
        assert_eq!(Node::decode(&buf).unwrap(), node);
    }

    #[test]
    fn entries_order_by_key_then_rid() {
        assert!(entry(b"a", 9) < entry(b"b", 1));
        assert!(entry(b"a", 1) < entry(b"a", 2));
    }

    #[test]
    fn oversized_node_rejected() {
        let entries = (0..40).map(|i| entry(b"0123456789", i)).collect();
        let node = Node::Leaf { entries };
        assert!(node.encode(256, 0).is_err());
    }

    #[test]
    fn zeroed_page_is_corrupted() {
        assert!(Node::decode(&[0u8; 64]).is_err());
    }

    #[test]
    fn four_max_keys_fit_interior() {
        let page = 256;
        let key = vec![7u8; max_key_len(page)];
        let node = Node::Interior {
            children: (0..5).map(PageIndex::new).collect(),
            separators: (0..4).map(|i| entry(&key, i)).collect(),
        };
        assert!(node.encoded_len() <= page);
    }

    #[test]
    fn split_point_balances_bytes() {
        let cells: Vec<_> = (0..10).map(|i| entry(b"k", i)).collect();
        assert_eq!(byte_split_point(&cells, 1, 1), 5);
        assert_eq!(byte_split_point(&cells[..2], 1, 1), 1);
    }

    #[test]
    fn tree_size_patch() {
        let mut buf = Node::empty_leaf().encode(256, 0).unwrap();
        set_tree_size(&mut buf, 77);
        assert_eq!(tree_size(&buf), 77);
    }
}
