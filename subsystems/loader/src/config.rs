//! # Loader Configuration

use crate::{LoadError, LoadResult};

/// Default minimum number of fault journal entries
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

/// Upper bound on the fault journal
pub const MAX_JOURNAL_CAPACITY: usize = 1 << 20;

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Minimum fault journal capacity. The journal is sized to hold one
    /// fault per page of the image; events past it are counted as dropped.
    pub journal_capacity: usize,
    /// Refuse to launch when the entry lies outside every loadable segment
    pub require_entry_in_segment: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            require_entry_in_segment: false,
        }
    }
}

impl LoaderConfig {
    /// Check the values that can be checked without touching the host
    pub fn validate(&self) -> LoadResult<()> {
        if self.journal_capacity > MAX_JOURNAL_CAPACITY {
            return Err(LoadError::Config(format!(
                "journal capacity {} exceeds {}",
                self.journal_capacity, MAX_JOURNAL_CAPACITY
            )));
        }
        Ok(())
    }
}
