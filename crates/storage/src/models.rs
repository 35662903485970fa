//! Storage models.
//!
//! Plain data produced by backends, either fresh or out of the cache. Never
//! mutated after creation.

use crate::locator::Locator;
use time::OffsetDateTime;

/// Metadata describing a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResult {
    /// Size in bytes (zero for directories)
    pub size: u64,
    /// Last modified timestamp
    pub modified_at: OffsetDateTime,
    pub is_directory: bool,
    pub is_symlink: bool,
}
impl StatResult {
    pub fn file(size: u64, modified_at: OffsetDateTime) -> Self {
        Self { size, modified_at, is_directory: false, is_symlink: false }
    }

    pub fn directory(modified_at: OffsetDateTime) -> Self {
        Self { size: 0, modified_at, is_directory: true, is_symlink: false }
    }

    /// Directory with no backing object (remote prefixes, implicit archive
    /// directories): there is no timestamp to report.
    pub fn virtual_directory() -> Self {
        Self::directory(OffsetDateTime::UNIX_EPOCH)
    }
}

/// A child yielded by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub locator: Locator,
    pub stat: StatResult,
}
impl Entry {
    pub fn new(locator: Locator, stat: StatResult) -> Self {
        Self { locator, stat }
    }
}
