//! Engine configuration.

use crate::collection::{ConversionPolicy, LinkOptions};
use linkdb_storage::DEFAULT_PAGE_SIZE;

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Conversion policy given to link collections created without an
    /// explicit one.
    pub link_policy: ConversionPolicy,

    /// Count cap given to link collections created without explicit
    /// options. Unbounded by default; 1 gives set semantics.
    pub link_counter_max: u32,

    /// Maximum number of commit hook passes before a commit is aborted.
    pub max_hook_passes: usize,

    /// Whether to flush the page store on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Page size for in-memory stores and newly created file stores.
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_policy: ConversionPolicy::default(),
            link_counter_max: LinkOptions::UNBOUNDED,
            max_hook_passes: 8,
            sync_on_commit: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default link collection conversion policy.
    #[must_use]
    pub const fn link_policy(mut self, policy: ConversionPolicy) -> Self {
        self.link_policy = policy;
        self
    }

    /// Sets the default link collection count cap.
    #[must_use]
    pub const fn link_counter_max(mut self, max: u32) -> Self {
        self.link_counter_max = max;
        self
    }

    /// Returns the options given to link collections created without
    /// explicit ones.
    #[must_use]
    pub const fn link_options(&self) -> LinkOptions {
        LinkOptions::new(self.link_policy).counter_max(self.link_counter_max)
    }

    /// Sets the commit hook pass bound.
    #[must_use]
    pub const fn max_hook_passes(mut self, passes: usize) -> Self {
        self.max_hook_passes = passes;
        self
    }

    /// Sets whether to flush the page store on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }
}
