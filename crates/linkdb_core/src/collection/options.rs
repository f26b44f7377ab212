//! Per-collection settings.

use crate::collection::ConversionPolicy;

/// Settings fixed when a link collection is created.
///
/// `counter_max` caps how many times one record can be a member. The
/// default is unbounded, so a collection counts repeated additions; a cap
/// of 1 gives set semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// When the collection switches form.
    pub policy: ConversionPolicy,
    /// Largest count a single member can reach.
    pub counter_max: u32,
}

impl LinkOptions {
    /// Count cap of a collection that accepts any number of repeats.
    pub const UNBOUNDED: u32 = u32::MAX;

    /// Options with the given policy and no count cap.
    #[must_use]
    pub const fn new(policy: ConversionPolicy) -> Self {
        Self {
            policy,
            counter_max: Self::UNBOUNDED,
        }
    }

    /// Options for a collection with set semantics.
    #[must_use]
    pub const fn set(policy: ConversionPolicy) -> Self {
        Self {
            policy,
            counter_max: 1,
        }
    }

    /// Sets the count cap. A cap of 0 is treated as 1.
    #[must_use]
    pub const fn counter_max(mut self, max: u32) -> Self {
        self.counter_max = if max == 0 { 1 } else { max };
        self
    }
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new(ConversionPolicy::default())
    }
}

impl From<ConversionPolicy> for LinkOptions {
    fn from(policy: ConversionPolicy) -> Self {
        Self::new(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded() {
        let options = LinkOptions::default();
        assert_eq!(options.counter_max, LinkOptions::UNBOUNDED);
        assert_eq!(options.policy, ConversionPolicy::default());
    }

    #[test]
    fn set_and_caps() {
        let policy = ConversionPolicy::embedded_only();
        assert_eq!(LinkOptions::set(policy).counter_max, 1);
        assert_eq!(LinkOptions::new(policy).counter_max(3).counter_max, 3);
        assert_eq!(LinkOptions::new(policy).counter_max(0).counter_max, 1);
        assert_eq!(LinkOptions::from(policy).policy, policy);
    }
}
