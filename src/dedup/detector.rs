use crate::config::DedupConfig;
use crate::dedup::normalize::{content_hash, jaccard, normalize_content, similarity_key};
use crate::dedup::DuplicateVerdict;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One processed piece of content, as kept in the recency window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub url: String,
    pub content_hash: String,
    pub similarity_key: Vec<u64>,
    pub inserted_at: DateTime<Utc>,
    pub duplicate_of: Option<String>,
}

/// Serializable state of a detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorSnapshot {
    /// `(content_hash, first_url)` pairs of the exact index
    pub exact: Vec<(String, String)>,

    /// Recency window, oldest first
    pub recent: Vec<ContentRecord>,
}

/// Exact and near-duplicate detector
///
/// Safe to share between workers. The exact index serializes writers per
/// content hash; the recency window is guarded by a single mutex held only
/// for the scan and the insert.
pub struct DuplicateDetector {
    exact: DashMap<String, String>,

    /// Exact index entries added since the last `take_unsaved`
    unsaved: Mutex<Vec<(String, String)>>,
    recent: Mutex<VecDeque<ContentRecord>>,
    window: usize,
    threshold: f64,
    shingle_size: usize,
}

impl DuplicateDetector {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            exact: DashMap::new(),
            unsaved: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(config.scan_window)),
            window: config.scan_window.max(1),
            threshold: config.similarity_threshold,
            shingle_size: config.shingle_size.max(1),
        }
    }

    /// Rebuilds a detector from persisted state
    ///
    /// Only the newest `scan_window` recent records are kept if the window
    /// has shrunk since the snapshot was taken.
    pub fn from_snapshot(config: &DedupConfig, snapshot: DetectorSnapshot) -> Self {
        let detector = Self::new(config);

        for (hash, url) in snapshot.exact {
            detector.exact.entry(hash).or_insert(url);
        }

        {
            let mut recent = detector.recent.lock();
            let skip = snapshot.recent.len().saturating_sub(detector.window);
            recent.extend(snapshot.recent.into_iter().skip(skip));
        }

        detector
    }

    /// Checks raw content fetched from `url`
    pub fn check(&self, url: &str, content: &str) -> DuplicateVerdict {
        let normalized = normalize_content(content);
        self.check_normalized(url, &normalized).0
    }

    /// Checks content that has already been normalized
    ///
    /// Returns the verdict along with the content hash. Every call records
    /// the content in the recency window, duplicates included.
    pub fn check_normalized(&self, url: &str, normalized: &str) -> (DuplicateVerdict, String) {
        let hash = content_hash(normalized);

        let exact_hit = match self.exact.entry(hash.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                self.unsaved.lock().push((hash.clone(), url.to_string()));
                entry.insert(url.to_string());
                None
            }
        };

        let key = similarity_key(normalized, self.shingle_size);
        let mut recent = self.recent.lock();

        let verdict = match exact_hit {
            Some(original_url) if original_url != url => {
                DuplicateVerdict::ExactDuplicate { original_url }
            }
            Some(_) => DuplicateVerdict::Unique,
            None => self.scan_recent(&recent, url, &key),
        };

        if recent.len() >= self.window {
            recent.pop_front();
        }
        recent.push_back(ContentRecord {
            url: url.to_string(),
            content_hash: hash.clone(),
            similarity_key: key,
            inserted_at: Utc::now(),
            duplicate_of: verdict.original_url().map(str::to_string),
        });
        drop(recent);

        tracing::trace!("Dedup check for {}: {}", url, verdict);
        (verdict, hash)
    }

    fn scan_recent(
        &self,
        recent: &VecDeque<ContentRecord>,
        url: &str,
        key: &[u64],
    ) -> DuplicateVerdict {
        let mut best: Option<(&ContentRecord, f64)> = None;

        for record in recent.iter().rev() {
            if record.url == url {
                continue;
            }
            let score = jaccard(key, &record.similarity_key);
            if score < self.threshold {
                continue;
            }
            // strict comparison: on ties the newer record wins
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((record, score));
            }
        }

        match best {
            Some((record, score)) => DuplicateVerdict::FuzzyDuplicate {
                original_url: record.url.clone(),
                score,
            },
            None => DuplicateVerdict::Unique,
        }
    }

    /// Number of distinct content hashes seen
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Number of records currently in the recency window
    pub fn recent_len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Captures the detector's state for persistence
    pub fn snapshot(&self) -> DetectorSnapshot {
        let exact = self
            .exact
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let recent = self.recent.lock().iter().cloned().collect();
        DetectorSnapshot { exact, recent }
    }

    /// Captures what changed since the previous call
    ///
    /// The exact part holds only hashes first seen since then. The recency
    /// window is bounded and always included in full.
    pub fn take_unsaved(&self) -> DetectorSnapshot {
        let exact = std::mem::take(&mut *self.unsaved.lock());
        let recent = self.recent.lock().iter().cloned().collect();
        DetectorSnapshot { exact, recent }
    }

    /// Puts back exact entries whose save failed
    pub fn mark_unsaved(&self, exact: Vec<(String, String)>) {
        self.unsaved.lock().extend(exact);
    }
}
