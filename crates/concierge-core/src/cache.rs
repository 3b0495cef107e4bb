use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::session::turn::Turn;

/// Entries older than this are treated as absent and purged on access.
pub const RETENTION_DAYS: i64 = 7;
/// Per-conversation cap; oldest entries are evicted first.
pub const MAX_ENTRIES: usize = 50;
/// Minimum Jaccard similarity for a match.
pub const MATCH_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone)]
struct CacheEntry {
    query: String,
    turn: Turn,
    stored_at: DateTime<Utc>,
}

/// Per-conversation store of (query, response) snapshots with
/// approximate-match retrieval, used to answer semantically similar
/// queries without network access.
#[derive(Default)]
pub struct SimilarityCache {
    entries: HashMap<String, VecDeque<CacheEntry>>,
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot of a successful assistant turn under its query.
    pub fn put(&mut self, key: &str, query: &str, turn: Turn) {
        self.put_at(key, query, turn, Utc::now());
    }

    fn put_at(&mut self, key: &str, query: &str, turn: Turn, now: DateTime<Utc>) {
        let bucket = self.entries.entry(key.to_string()).or_default();
        Self::purge_expired(bucket, now);
        bucket.push_back(CacheEntry {
            query: normalize(query),
            turn,
            stored_at: now,
        });
        // FIFO, not LRU: insertion order only.
        while bucket.len() > MAX_ENTRIES {
            bucket.pop_front();
        }
    }

    /// Best approximate match for `query`, or `None`. Absence is a valid
    /// return, not an error. Ties go to the first-stored entry.
    pub fn get(&mut self, key: &str, query: &str) -> Option<Turn> {
        self.get_at(key, query, Utc::now())
    }

    fn get_at(&mut self, key: &str, query: &str, now: DateTime<Utc>) -> Option<Turn> {
        let bucket = self.entries.get_mut(key)?;
        Self::purge_expired(bucket, now);

        let probe = tokens(query);
        let mut best: Option<(&CacheEntry, f64)> = None;
        for entry in bucket.iter() {
            let score = jaccard(&probe, &tokens(&entry.query));
            // Strict greater-than keeps the first entry at the max score.
            if score >= MATCH_THRESHOLD && best.map_or(true, |(_, b)| score > b) {
                best = Some((entry, score));
            }
        }
        if let Some((entry, score)) = best {
            debug!(key, score, "similarity cache hit");
            return Some(entry.turn.clone());
        }
        None
    }

    pub fn len(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    fn purge_expired(bucket: &mut VecDeque<CacheEntry>, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        bucket.retain(|e| e.stored_at >= cutoff);
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Whitespace tokens of length > 2 from the normalized query.
fn tokens(query: &str) -> HashSet<String> {
    normalize(query)
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}
