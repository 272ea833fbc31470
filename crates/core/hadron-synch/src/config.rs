//! Tunables for a [`SyncDomain`](crate::SyncDomain).

/// Hard upper bound on how many hops a donation may travel.
pub const MAX_DONATION_DEPTH: usize = 64;

/// Default donation depth, deep enough for the nested-donation workloads the
/// kernel's test suite exercises.
pub const DEFAULT_DONATION_DEPTH: usize = 8;

/// Configuration for a [`SyncDomain`](crate::SyncDomain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    max_donation_depth: usize,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub const fn new() -> Self {
        Self {
            max_donation_depth: DEFAULT_DONATION_DEPTH,
        }
    }

    /// Sets how many lock hops a donation follows along a wait-for chain.
    ///
    /// Clamped to `1..=MAX_DONATION_DEPTH`.
    pub const fn with_max_donation_depth(mut self, depth: usize) -> Self {
        self.max_donation_depth = if depth == 0 {
            1
        } else if depth > MAX_DONATION_DEPTH {
            MAX_DONATION_DEPTH
        } else {
            depth
        };
        self
    }

    /// Maximum number of lock hops a donation follows.
    pub const fn max_donation_depth(&self) -> usize {
        self.max_donation_depth
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
