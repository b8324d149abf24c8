//! Evaluation cache
//!
//! A bounded map from (url, current container, rule fingerprint, routing
//! preferences) to the evaluation result. Eviction is by insertion order, not recency: a hit does
//! not refresh an entry. Entries past the TTL read as absent and are dropped
//! lazily, or in bulk by `purge_expired`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::types::{is_uncontained, EvaluationResult, Preferences, RestrictAction, Rule};

// =============================================================================
// Clock
// =============================================================================

/// Millisecond time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// Clock backed by `std::time::Instant`.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Summary of an enabled-rule snapshot. Any add, remove, enable/disable or
/// update of an enabled rule changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RuleFingerprint {
    pub latest_modified: Option<DateTime<Utc>>,
    pub enabled_count: usize,
}

impl RuleFingerprint {
    /// Fingerprint the enabled rules of `rules`; disabled rules are skipped.
    pub fn of<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        let mut fingerprint = Self::default();
        for rule in rules.into_iter().filter(|rule| rule.enabled) {
            fingerprint.enabled_count += 1;
            if fingerprint.latest_modified.map_or(true, |latest| rule.modified > latest) {
                fingerprint.latest_modified = Some(rule.modified);
            }
        }
        fingerprint
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    container: Option<String>,
    fingerprint: RuleFingerprint,
    default_container: Option<String>,
    restrict_action: RestrictAction,
}

impl CacheKey {
    /// Both spellings of "uncontained" share a key. Only the preferences that
    /// change a decision are part of the key.
    pub fn new(
        url: &str,
        container: Option<&str>,
        fingerprint: RuleFingerprint,
        preferences: &Preferences,
    ) -> Self {
        let container = if is_uncontained(container) {
            None
        } else {
            container.map(str::to_string)
        };
        Self {
            url: url.to_string(),
            container,
            fingerprint,
            default_container: preferences.default_container_id.clone(),
            restrict_action: preferences.restrict_action,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub result: EvaluationResult,
    pub inserted_at: u64,
}

// =============================================================================
// Cache
// =============================================================================

pub struct EvaluationCache {
    capacity: usize,
    ttl_millis: u64,
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

impl EvaluationCache {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl_millis: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    #[inline]
    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.inserted_at) >= self.ttl_millis
    }

    /// Look up a live entry. Expired entries are removed and read as a miss.
    pub fn get(&mut self, key: &CacheKey, now: u64) -> Option<EvaluationResult> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.result.clone())
    }

    /// Insert a result, evicting the oldest-inserted entry when full.
    pub fn insert(&mut self, key: CacheKey, result: EvaluationResult, now: u64) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else {
            while self.entries.len() >= self.capacity {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                result,
                inserted_at: now,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl_millis;
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.inserted_at) < ttl);
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
