use std::time::Duration;

use similar::TextDiff;
use tracing::debug;

/// What to do with a `ContentFinal` payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotDecision {
    /// Treat the payload as one more delta
    Append,
    /// The payload is a full snapshot that supersedes the buffer
    Replace,
    /// Ignore the payload and keep what has accumulated
    Keep,
}

/// Tunable thresholds for snapshot handling
#[derive(Clone, Debug)]
pub struct SnapshotPolicy {
    /// Snapshots shorter than this share of the current text are truncation artifacts
    pub min_length_ratio: f64,
    /// Maximum relative length difference for a "cleaned" snapshot
    pub closeness_window: f64,
    /// Minimum character similarity for a "cleaned" snapshot
    pub min_similarity: f32,
    pub diff_timeout: Duration,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            min_length_ratio: 0.5,
            closeness_window: 0.1,
            min_similarity: 0.8,
            diff_timeout: Duration::from_millis(20),
        }
    }
}

/// Decides whether a backend's final snapshot can safely replace the
/// accumulated text.
#[derive(Clone, Debug, Default)]
pub struct ContentFinalValidator {
    policy: SnapshotPolicy,
}

impl ContentFinalValidator {
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy }
    }

    pub fn decide(&self, current: &str, snapshot: &str) -> SnapshotDecision {
        if snapshot.is_empty() {
            return SnapshotDecision::Keep;
        }
        if current.is_empty() {
            return SnapshotDecision::Append;
        }
        if snapshot == current {
            return SnapshotDecision::Keep;
        }
        if snapshot.starts_with(current) {
            debug!("ContentFinal extends accumulated text, replacing");
            return SnapshotDecision::Replace;
        }

        let current_len = current.chars().count() as f64;
        let snapshot_len = snapshot.chars().count() as f64;

        if snapshot_len < current_len * self.policy.min_length_ratio {
            debug!(
                current_len,
                snapshot_len, "ContentFinal looks truncated, keeping accumulated text"
            );
            return SnapshotDecision::Keep;
        }

        let current_fences = fence_score(current);
        let snapshot_fences = fence_score(snapshot);

        let closeness = (snapshot_len - current_len).abs() / current_len;
        if closeness <= self.policy.closeness_window
            && snapshot_fences >= current_fences
            && self.similarity(current, snapshot) >= self.policy.min_similarity
        {
            debug!("ContentFinal is a cleaned copy of accumulated text, replacing");
            return SnapshotDecision::Replace;
        }

        if snapshot_fences > current_fences && snapshot_len >= current_len {
            debug!("ContentFinal closes more fences, replacing");
            return SnapshotDecision::Replace;
        }

        SnapshotDecision::Append
    }

    fn similarity(&self, a: &str, b: &str) -> f32 {
        TextDiff::configure()
            .timeout(self.policy.diff_timeout)
            .diff_chars(a, b)
            .ratio()
    }
}

/// Higher is better: closed fences count, a dangling one costs a point
pub fn fence_score(text: &str) -> i32 {
    let fences = text
        .lines()
        .filter(|line| line.trim_start().starts_with("```"))
        .count() as i32;
    if fences % 2 == 0 { fences / 2 } else { fences / 2 - 1 }
}
