//! B+tree algorithms over pages.
//!
//! Writes go through an [`AtomicOperation`]; reads are generic over
//! [`PageRead`] so the same code serves durable reads and reads inside an
//! operation. Splits move the upper half of a node to a new right sibling;
//! a root split copies the root's contents to a fresh page so the root
//! page index never changes. Deletion rebalances nodes below a third of a
//! page by merging with or borrowing from a sibling, and collapses a root
//! left with a single child.

use crate::btree::node::{self, byte_split_point, max_key_len, min_fill, Node, TreeEntry};
use crate::btree::pointer::CollectionPointer;
use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use linkdb_storage::{AtomicOperation, FileId, PageIndex, PageRead, StorageError};

pub(crate) fn read_node<R: PageRead + ?Sized>(
    pages: &R,
    file: FileId,
    page: PageIndex,
) -> CoreResult<Node> {
    Node::decode(&pages.read_page(file, page)?)
}

/// Returns the entry count kept on the root page.
pub(crate) fn size<R: PageRead + ?Sized>(pages: &R, ptr: CollectionPointer) -> CoreResult<u64> {
    let buf = pages.read_page(ptr.file(), ptr.root())?;
    Node::decode(&buf)?;
    Ok(node::tree_size(&buf))
}

/// Returns true if the exact entry is stored.
pub(crate) fn contains<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
    entry: &TreeEntry,
) -> CoreResult<bool> {
    let mut page = ptr.root();
    loop {
        match read_node(pages, ptr.file(), page)? {
            Node::Leaf { entries } => return Ok(entries.binary_search(entry).is_ok()),
            Node::Interior {
                children,
                separators,
            } => {
                page = children[separators.partition_point(|s| s <= entry)];
            }
        }
    }
}

/// Collects entries whose key lies in `lo..=hi`, in tree order.
pub(crate) fn range<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
    lo: &[u8],
    hi: &[u8],
) -> CoreResult<Vec<TreeEntry>> {
    let mut out = Vec::new();
    collect_range(pages, ptr.file(), ptr.root(), lo, hi, &mut out)?;
    Ok(out)
}

/// Returns the records stored under `key`, ordered by record id.
pub(crate) fn find<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
    key: &[u8],
) -> CoreResult<Vec<RecordId>> {
    Ok(range(pages, ptr, key, key)?
        .into_iter()
        .map(|e| e.rid)
        .collect())
}

/// Returns every entry in tree order.
pub(crate) fn scan<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
) -> CoreResult<Vec<TreeEntry>> {
    let mut out = Vec::new();
    collect_all(pages, ptr.file(), ptr.root(), &mut out)?;
    Ok(out)
}

/// Returns the smallest entry, if any.
pub(crate) fn first<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
) -> CoreResult<Option<TreeEntry>> {
    edge(pages, ptr, false)
}

/// Returns the largest entry, if any.
pub(crate) fn last<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
) -> CoreResult<Option<TreeEntry>> {
    edge(pages, ptr, true)
}

fn edge<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
    rightmost: bool,
) -> CoreResult<Option<TreeEntry>> {
    let mut page = ptr.root();
    loop {
        match read_node(pages, ptr.file(), page)? {
            Node::Leaf { mut entries } => {
                return Ok(if rightmost {
                    entries.pop()
                } else {
                    entries.into_iter().next()
                })
            }
            Node::Interior { children, .. } => {
                let next = if rightmost {
                    children.last()
                } else {
                    children.first()
                };
                page = *next.ok_or_else(|| {
                    CoreError::consistency_violation("interior node without children")
                })?;
            }
        }
    }
}

/// Returns every page owned by the tree, root first.
pub(crate) fn pages_of<R: PageRead + ?Sized>(
    pages: &R,
    ptr: CollectionPointer,
) -> CoreResult<Vec<PageIndex>> {
    let mut out = Vec::new();
    let mut stack = vec![ptr.root()];
    while let Some(page) = stack.pop() {
        out.push(page);
        if let Node::Interior { children, .. } = read_node(pages, ptr.file(), page)? {
            stack.extend(children.into_iter().rev());
        }
    }
    Ok(out)
}

fn collect_all<R: PageRead + ?Sized>(
    pages: &R,
    file: FileId,
    page: PageIndex,
    out: &mut Vec<TreeEntry>,
) -> CoreResult<()> {
    match read_node(pages, file, page)? {
        Node::Leaf { entries } => out.extend(entries),
        Node::Interior { children, .. } => {
            for child in children {
                collect_all(pages, file, child, out)?;
            }
        }
    }
    Ok(())
}

fn collect_range<R: PageRead + ?Sized>(
    pages: &R,
    file: FileId,
    page: PageIndex,
    lo: &[u8],
    hi: &[u8],
    out: &mut Vec<TreeEntry>,
) -> CoreResult<()> {
    match read_node(pages, file, page)? {
        Node::Leaf { entries } => {
            let start = entries.partition_point(|e| e.key.as_slice() < lo);
            out.extend(
                entries[start..]
                    .iter()
                    .take_while(|e| e.key.as_slice() <= hi)
                    .cloned(),
            );
        }
        Node::Interior {
            children,
            separators,
        } => {
            for (i, child) in children.iter().enumerate() {
                // child i holds entries in [separators[i-1], separators[i])
                if let Some(upper) = separators.get(i) {
                    if upper.key.as_slice() < lo {
                        continue;
                    }
                }
                if i > 0 && separators[i - 1].key.as_slice() > hi {
                    break;
                }
                collect_range(pages, file, *child, lo, hi, out)?;
            }
        }
    }
    Ok(())
}

enum InsertResult {
    Duplicate,
    Done,
    Split(TreeEntry, PageIndex),
}

struct RemoveResult {
    found: bool,
    underflow: bool,
}

/// Mutating access to one tree inside an atomic operation.
pub(crate) struct TreeWriter<'a> {
    op: &'a mut AtomicOperation,
    ptr: CollectionPointer,
    page_size: usize,
}

impl<'a> TreeWriter<'a> {
    pub fn new(op: &'a mut AtomicOperation, ptr: CollectionPointer) -> Self {
        let page_size = op.page_size();
        Self { op, ptr, page_size }
    }

    /// Allocates and initializes an empty tree in `file`.
    pub fn create(op: &mut AtomicOperation, file: FileId) -> CoreResult<CollectionPointer> {
        let root = allocate(op, file)?;
        let buf = Node::empty_leaf().encode(op.page_size(), 0)?;
        op.write_page(file, root, buf)?;
        Ok(CollectionPointer::new(file, root))
    }

    pub fn insert(&mut self, entry: TreeEntry) -> CoreResult<bool> {
        let max = max_key_len(self.page_size);
        if entry.key.len() > max {
            return Err(CoreError::KeyTooLarge {
                len: entry.key.len(),
                max,
            });
        }
        let root = self.ptr.root();
        match self.insert_into(root, &entry)? {
            InsertResult::Duplicate => return Ok(false),
            InsertResult::Done => {}
            InsertResult::Split(separator, right) => {
                // Keep the root page fixed: move its left half out.
                let left_half = self.read(root)?;
                let left = allocate(self.op, self.ptr.file())?;
                self.write(left, &left_half)?;
                let new_root = Node::Interior {
                    children: vec![left, right],
                    separators: vec![separator],
                };
                self.write(root, &new_root)?;
            }
        }
        self.adjust_size(1)?;
        Ok(true)
    }

    pub fn remove(&mut self, entry: &TreeEntry) -> CoreResult<bool> {
        let root = self.ptr.root();
        let result = self.remove_from(root, entry, true)?;
        if !result.found {
            return Ok(false);
        }
        self.collapse_root()?;
        self.adjust_size(-1)?;
        Ok(true)
    }

    /// Schedules every page of the tree to be freed.
    pub fn release(self) -> CoreResult<usize> {
        let pages = pages_of(&*self.op, self.ptr)?;
        let count = pages.len();
        for page in pages {
            self.op.free_page(self.ptr.file(), page);
        }
        Ok(count)
    }

    fn read(&self, page: PageIndex) -> CoreResult<Node> {
        read_node(&*self.op, self.ptr.file(), page)
    }

    fn write(&mut self, page: PageIndex, node: &Node) -> CoreResult<()> {
        let file = self.ptr.file();
        let size = if page == self.ptr.root() {
            node::tree_size(&self.op.read_page(file, page)?)
        } else {
            0
        };
        let buf = node.encode(self.page_size, size)?;
        self.op.write_page(self.ptr.file(), page, buf)?;
        Ok(())
    }

    fn adjust_size(&mut self, delta: i64) -> CoreResult<()> {
        let file = self.ptr.file();
        let root = self.ptr.root();
        let mut buf = self.op.read_page(file, root)?;
        let size = node::tree_size(&buf).saturating_add_signed(delta);
        node::set_tree_size(&mut buf, size);
        self.op.write_page(file, root, buf)?;
        Ok(())
    }

    fn insert_into(&mut self, page: PageIndex, entry: &TreeEntry) -> CoreResult<InsertResult> {
        match self.read(page)? {
            Node::Leaf { mut entries } => {
                let pos = match entries.binary_search(entry) {
                    Ok(_) => return Ok(InsertResult::Duplicate),
                    Err(pos) => pos,
                };
                entries.insert(pos, entry.clone());
                let node = Node::Leaf { entries };
                if node.encoded_len() <= self.page_size {
                    self.write(page, &node)?;
                    return Ok(InsertResult::Done);
                }
                self.split_leaf(page, node)
            }
            Node::Interior {
                mut children,
                mut separators,
            } => {
                let idx = separators.partition_point(|s| s <= entry);
                match self.insert_into(children[idx], entry)? {
                    InsertResult::Split(separator, right) => {
                        separators.insert(idx, separator);
                        children.insert(idx + 1, right);
                    }
                    other => return Ok(other),
                }
                let node = Node::Interior {
                    children,
                    separators,
                };
                if node.encoded_len() <= self.page_size {
                    self.write(page, &node)?;
                    return Ok(InsertResult::Done);
                }
                self.split_interior(page, node)
            }
        }
    }

    fn split_leaf(&mut self, page: PageIndex, node: Node) -> CoreResult<InsertResult> {
        let Node::Leaf { mut entries } = node else {
            return Err(CoreError::consistency_violation("leaf split of interior node"));
        };
        let mid = byte_split_point(&entries, 1, 1);
        let right_entries = entries.split_off(mid);
        let separator = right_entries[0].clone();
        let right = allocate(self.op, self.ptr.file())?;
        self.write(page, &Node::Leaf { entries })?;
        self.write(
            right,
            &Node::Leaf {
                entries: right_entries,
            },
        )?;
        Ok(InsertResult::Split(separator, right))
    }

    fn split_interior(&mut self, page: PageIndex, node: Node) -> CoreResult<InsertResult> {
        let Node::Interior {
            mut children,
            mut separators,
        } = node
        else {
            return Err(CoreError::consistency_violation("interior split of leaf node"));
        };
        let mid = byte_split_point(&separators, 1, 2);
        let right_separators = separators.split_off(mid + 1);
        let up = separators.pop().ok_or_else(|| {
            CoreError::consistency_violation("interior split without separator")
        })?;
        let right_children = children.split_off(mid + 1);
        let right = allocate(self.op, self.ptr.file())?;
        self.write(
            page,
            &Node::Interior {
                children,
                separators,
            },
        )?;
        self.write(
            right,
            &Node::Interior {
                children: right_children,
                separators: right_separators,
            },
        )?;
        Ok(InsertResult::Split(up, right))
    }

    fn remove_from(
        &mut self,
        page: PageIndex,
        entry: &TreeEntry,
        is_root: bool,
    ) -> CoreResult<RemoveResult> {
        let min = min_fill(self.page_size);
        match self.read(page)? {
            Node::Leaf { mut entries } => {
                let Ok(pos) = entries.binary_search(entry) else {
                    return Ok(RemoveResult {
                        found: false,
                        underflow: false,
                    });
                };
                entries.remove(pos);
                let node = Node::Leaf { entries };
                self.write(page, &node)?;
                Ok(RemoveResult {
                    found: true,
                    underflow: !is_root && node.encoded_len() < min,
                })
            }
            Node::Interior {
                children,
                separators,
            } => {
                let idx = separators.partition_point(|s| s <= entry);
                let child = self.remove_from(children[idx], entry, false)?;
                if !child.found {
                    return Ok(child);
                }
                if !child.underflow {
                    return Ok(RemoveResult {
                        found: true,
                        underflow: false,
                    });
                }
                let node = self.rebalance(
                    Node::Interior {
                        children,
                        separators,
                    },
                    idx,
                )?;
                self.write(page, &node)?;
                Ok(RemoveResult {
                    found: true,
                    underflow: !is_root && node.encoded_len() < min,
                })
            }
        }
    }

    /// Merges or redistributes the underflowing child `idx` of `parent`
    /// with a sibling and returns the updated parent.
    fn rebalance(&mut self, parent: Node, idx: usize) -> CoreResult<Node> {
        let Node::Interior {
            mut children,
            mut separators,
        } = parent
        else {
            return Err(CoreError::consistency_violation("rebalance under a leaf"));
        };
        if children.len() < 2 {
            return Ok(Node::Interior {
                children,
                separators,
            });
        }
        let (li, ri) = if idx + 1 < children.len() {
            (idx, idx + 1)
        } else {
            (idx - 1, idx)
        };
        let (left_page, right_page) = (children[li], children[ri]);

        match (self.read(left_page)?, self.read(right_page)?) {
            (Node::Leaf { entries: mut left }, Node::Leaf { entries: right }) => {
                left.extend(right);
                let merged = Node::Leaf { entries: left };
                if merged.encoded_len() <= self.page_size {
                    self.write(left_page, &merged)?;
                    self.op.free_page(self.ptr.file(), right_page);
                    separators.remove(li);
                    children.remove(ri);
                } else {
                    let Node::Leaf { entries: mut all } = merged else {
                        return Err(CoreError::consistency_violation("merged leaf changed kind"));
                    };
                    let mid = byte_split_point(&all, 1, 1);
                    let right_entries = all.split_off(mid);
                    separators[li] = right_entries[0].clone();
                    self.write(left_page, &Node::Leaf { entries: all })?;
                    self.write(
                        right_page,
                        &Node::Leaf {
                            entries: right_entries,
                        },
                    )?;
                }
            }
            (
                Node::Interior {
                    children: mut left_children,
                    separators: mut left_separators,
                },
                Node::Interior {
                    children: right_children,
                    separators: right_separators,
                },
            ) => {
                left_separators.push(separators[li].clone());
                left_separators.extend(right_separators);
                left_children.extend(right_children);
                let merged = Node::Interior {
                    children: left_children,
                    separators: left_separators,
                };
                if merged.encoded_len() <= self.page_size {
                    self.write(left_page, &merged)?;
                    self.op.free_page(self.ptr.file(), right_page);
                    separators.remove(li);
                    children.remove(ri);
                } else {
                    let Node::Interior {
                        children: mut all_children,
                        separators: mut all_separators,
                    } = merged
                    else {
                        return Err(CoreError::consistency_violation(
                            "merged interior changed kind",
                        ));
                    };
                    let mid = byte_split_point(&all_separators, 1, 2);
                    let right_separators = all_separators.split_off(mid + 1);
                    let up = all_separators.pop().ok_or_else(|| {
                        CoreError::consistency_violation("redistribution without separator")
                    })?;
                    let right_children = all_children.split_off(mid + 1);
                    separators[li] = up;
                    self.write(
                        left_page,
                        &Node::Interior {
                            children: all_children,
                            separators: all_separators,
                        },
                    )?;
                    self.write(
                        right_page,
                        &Node::Interior {
                            children: right_children,
                            separators: right_separators,
                        },
                    )?;
                }
            }
            _ => {
                return Err(CoreError::consistency_violation(
                    "sibling nodes at different depths",
                ))
            }
        }
        Ok(Node::Interior {
            children,
            separators,
        })
    }

    fn collapse_root(&mut self) -> CoreResult<()> {
        let root = self.ptr.root();
        loop {
            let Node::Interior { children, .. } = self.read(root)? else {
                return Ok(());
            };
            if children.len() != 1 {
                return Ok(());
            }
            let only = children[0];
            let child = self.read(only)?;
            self.write(root, &child)?;
            self.op.free_page(self.ptr.file(), only);
        }
    }
}

fn allocate(op: &mut AtomicOperation, file: FileId) -> CoreResult<PageIndex> {
    op.allocate_page(file).map_err(|e| match e {
        StorageError::OutOfSpace { .. } => CoreError::StorageAllocationFailure {
            file: op
                .store()
                .file_name(file)
                .unwrap_or_else(|_| file.to_string()),
            source: e,
        },
        other => CoreError::Storage(other),
    })
}
