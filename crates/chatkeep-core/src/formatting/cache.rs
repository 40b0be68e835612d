use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Inputs longer than this are never memoized
pub const CACHE_INPUT_CEILING: usize = 16 * 1024;

/// Cache key: stage prefix plus a hash of the input text
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrectionCacheKey {
    stage: &'static str,
    hash: u64,
}

impl CorrectionCacheKey {
    pub fn new(stage: &'static str, content: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        stage.hash(&mut hasher);
        content.hash(&mut hasher);
        Self {
            stage,
            hash: hasher.finish(),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }
}

/// The input is kept next to its output so a hash collision reads as a miss.
struct CacheEntry {
    input: String,
    output: String,
}

struct CacheInner {
    entries: HashMap<CorrectionCacheKey, CacheEntry>,
    order: VecDeque<CorrectionCacheKey>,
}

/// Bounded memo of corrected outputs shared by the pipeline stages.
///
/// Eviction is least-recently-added: once the cache grows past its budget
/// the oldest half of the entries is dropped in one step.
pub struct CorrectionCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
}

impl CorrectionCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_size: max_size.max(1),
        }
    }

    /// Output memoized for exactly `input`.
    pub fn get(&self, key: &CorrectionCacheKey, input: &str) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(key)
            .filter(|entry| entry.input == input)
            .map(|entry| entry.output.clone())
    }

    pub fn insert(&self, key: CorrectionCacheKey, input: &str, output: String) {
        let mut inner = self.inner.lock();
        let entry = CacheEntry {
            input: input.to_string(),
            output,
        };
        if inner.entries.insert(key, entry).is_none() {
            inner.order.push_back(key);
        }
        if inner.entries.len() > self.max_size {
            let evict = inner.entries.len() / 2;
            for _ in 0..evict {
                if let Some(old) = inner.order.pop_front() {
                    inner.entries.remove(&old);
                }
            }
            tracing::debug!(evicted = evict, remaining = inner.entries.len(), "Correction cache trimmed");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

/// Counters shared by every stage of one pipeline
#[derive(Default)]
pub struct PerformanceMetrics {
    processed_chunks: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_skips: AtomicU64,
    total_time_us: AtomicU64,
    max_time_us: AtomicU64,
    slow_calls: AtomicU64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub processed_chunks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_skips: u64,
    pub slow_calls: u64,
    pub average_time: Duration,
    pub max_time: Duration,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.cache_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing(&self, elapsed: Duration, budget: Duration) -> bool {
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.processed_chunks.fetch_add(1, Ordering::Relaxed);
        self.total_time_us.fetch_add(micros, Ordering::Relaxed);
        self.max_time_us.fetch_max(micros, Ordering::Relaxed);
        let slow = elapsed > budget;
        if slow {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
        }
        slow
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed_chunks.load(Ordering::Relaxed);
        let total = self.total_time_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            processed_chunks: processed,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_skips: self.cache_skips.load(Ordering::Relaxed),
            slow_calls: self.slow_calls.load(Ordering::Relaxed),
            average_time: Duration::from_micros(total.checked_div(processed).unwrap_or(0)),
            max_time: Duration::from_micros(self.max_time_us.load(Ordering::Relaxed)),
        }
    }
}
