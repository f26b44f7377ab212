//! Representation conversion thresholds.

use crate::error::{CoreError, CoreResult};

/// One direction of a [`ConversionPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// Converts at the given size.
    At(usize),
    /// Never converts in this direction.
    Disabled,
}

impl Threshold {
    /// Interprets a raw threshold: any negative value or `i32::MAX`
    /// disables the direction.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        if raw < 0 || raw == i32::MAX {
            Self::Disabled
        } else {
            Self::At(raw as usize)
        }
    }
}

/// When a link collection moves between its embedded and tree-backed forms.
///
/// An embedded collection converts to a tree when its size exceeds
/// `to_tree`. A tree-backed collection converts back when its size drops
/// to `to_embedded` or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPolicy {
    to_tree: Threshold,
    to_embedded: Threshold,
}

impl Default for ConversionPolicy {
    fn default() -> Self {
        Self {
            to_tree: Threshold::At(40),
            to_embedded: Threshold::Disabled,
        }
    }
}

impl ConversionPolicy {
    /// Creates a policy from raw thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] when both directions are
    /// enabled and `to_embedded >= to_tree`, which would convert back and
    /// forth on every mutation.
    pub fn new(to_tree: i32, to_embedded: i32) -> CoreResult<Self> {
        let policy = Self {
            to_tree: Threshold::from_raw(to_tree),
            to_embedded: Threshold::from_raw(to_embedded),
        };
        if let (Threshold::At(tree), Threshold::At(embedded)) = (policy.to_tree, policy.to_embedded)
        {
            if embedded >= tree {
                return Err(CoreError::invalid_operation(format!(
                    "to-embedded threshold {embedded} must be below to-tree threshold {tree}"
                )));
            }
        }
        Ok(policy)
    }

    /// A policy that never converts. Collections stay embedded.
    #[must_use]
    pub const fn embedded_only() -> Self {
        Self {
            to_tree: Threshold::Disabled,
            to_embedded: Threshold::Disabled,
        }
    }

    /// A policy that moves every non-empty collection to a tree and never
    /// back.
    #[must_use]
    pub const fn tree_only() -> Self {
        Self {
            to_tree: Threshold::At(0),
            to_embedded: Threshold::Disabled,
        }
    }

    /// Returns the embedded to tree threshold.
    #[must_use]
    pub const fn to_tree(&self) -> Threshold {
        self.to_tree
    }

    /// Returns the tree to embedded threshold.
    #[must_use]
    pub const fn to_embedded(&self) -> Threshold {
        self.to_embedded
    }

    pub(crate) fn wants_tree(&self, size: usize) -> bool {
        matches!(self.to_tree, Threshold::At(limit) if size > limit)
    }

    pub(crate) fn wants_embedded(&self, size: usize) -> bool {
        matches!(self.to_embedded, Threshold::At(limit) if size <= limit)
    }
}
