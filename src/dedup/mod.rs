//! Duplicate content detection
//!
//! Exact duplicates are found through an unbounded content-hash index.
//! Near duplicates are found by comparing shingle sets against a bounded
//! window of the most recent records only, which keeps the cost of each
//! check constant while still catching republication within a session.
//!
//! # Components
//!
//! - `DuplicateDetector`: the two indexes and the `check` operation
//! - `DuplicateVerdict`: unique / exact duplicate / fuzzy duplicate
//! - `normalize`: text extraction, hashing and similarity keys

mod detector;
pub mod normalize;

pub use detector::{ContentRecord, DetectorSnapshot, DuplicateDetector};
pub use normalize::{content_hash, jaccard, normalize_content, similarity_key};

use std::fmt;

/// Result of checking a piece of content against the indexes
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateVerdict {
    /// Content not seen before
    Unique,

    /// Same normalized content already stored under another URL
    ExactDuplicate { original_url: String },

    /// Content overlapping a recent record above the similarity threshold
    FuzzyDuplicate { original_url: String, score: f64 },
}

impl DuplicateVerdict {
    /// Returns true for either kind of duplicate
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Self::Unique)
    }

    /// URL of the record this content duplicates, if any
    pub fn original_url(&self) -> Option<&str> {
        match self {
            Self::Unique => None,
            Self::ExactDuplicate { original_url } | Self::FuzzyDuplicate { original_url, .. } => {
                Some(original_url)
            }
        }
    }

    /// Converts the verdict kind to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::ExactDuplicate { .. } => "exact_duplicate",
            Self::FuzzyDuplicate { .. } => "fuzzy_duplicate",
        }
    }
}

impl fmt::Display for DuplicateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unique => write!(f, "unique"),
            Self::ExactDuplicate { original_url } => write!(f, "exact duplicate of {}", original_url),
            Self::FuzzyDuplicate {
                original_url,
                score,
            } => write!(f, "fuzzy duplicate of {} ({:.2})", original_url, score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_helpers() {
        assert!(!DuplicateVerdict::Unique.is_duplicate());
        assert_eq!(DuplicateVerdict::Unique.original_url(), None);

        let exact = DuplicateVerdict::ExactDuplicate {
            original_url: "https://a.com/".to_string(),
        };
        assert!(exact.is_duplicate());
        assert_eq!(exact.original_url(), Some("https://a.com/"));
        assert_eq!(exact.to_db_string(), "exact_duplicate");

        let fuzzy = DuplicateVerdict::FuzzyDuplicate {
            original_url: "https://b.com/".to_string(),
            score: 0.9,
        };
        assert_eq!(format!("{}", fuzzy), "fuzzy duplicate of https://b.com/ (0.90)");
    }
}
