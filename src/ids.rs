//! Typed identifiers and the half-open interval used by finalization.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(ProjectId, "Tenant scope above a vault.");
string_id!(VaultId, "Namespace for files and blocks within a project.");
string_id!(FileId, "Server-assigned UUID naming a file within a vault.");
string_id!(
    BlockId,
    "Client-supplied content hash naming a block within a vault."
);
string_id!(
    StorageId,
    "Opaque key at which a block's payload lives in the object store."
);

impl FileId {
    /// Allocates a fresh server-assigned file id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a unix-seconds timestamp (as returned by
/// [`crate::backend::MetadataBackend::block_ref_modified`]) as RFC 3339 for
/// log lines and operator-facing summaries.
pub fn format_unix_seconds(seconds: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp(seconds)
        .map(|t| {
            t.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| seconds.to_string())
        })
        .unwrap_or_else(|_| seconds.to_string())
}

/// A half-open byte range `[offset, offset + size)` assigned to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub offset: u64,
    pub size: u64,
}

impl Interval {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Exclusive upper bound of the interval.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Whether `self` and `other` overlap (share at least one byte).
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Whether `self` immediately precedes `other` with no gap or overlap.
    pub fn is_contiguous_with(&self, other: &Interval) -> bool {
        self.end() == other.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_detect_overlap() {
        let a = Interval::new(0, 100);
        let b = Interval::new(50, 100);
        assert!(a.overlaps(&b));
    }

    #[test]
    fn intervals_detect_gap() {
        let a = Interval::new(0, 100);
        let b = Interval::new(150, 100);
        assert!(!a.overlaps(&b));
        assert!(!a.is_contiguous_with(&b));
    }

    #[test]
    fn intervals_detect_contiguity() {
        let a = Interval::new(0, 100);
        let b = Interval::new(100, 50);
        assert!(a.is_contiguous_with(&b));
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn file_ids_are_unique() {
        assert_ne!(FileId::new(), FileId::new());
    }

    #[test]
    fn formats_unix_seconds_as_rfc3339() {
        assert_eq!(format_unix_seconds(0), "1970-01-01T00:00:00Z");
    }
}
