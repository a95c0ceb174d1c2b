use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

/// Result of comparing a cumulative sample against the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    /// No compatible prior sample existed; the value is now the baseline.
    FirstSample,
    /// Non-negative difference from the previous sample.
    Value(i64),
    /// The counter went backwards (reset or rollover).
    Reset,
}

impl Delta {
    /// Returns the delta, or `None` for a first sample or a reset.
    pub fn value(self) -> Option<i64> {
        match self {
            Self::Value(v) => Some(v),
            Self::FirstSample | Self::Reset => None,
        }
    }

    pub fn is_first_sample(self) -> bool {
        matches!(self, Self::FirstSample)
    }
}

#[derive(Debug, Clone)]
struct Sample<D> {
    value: i64,
    descriptor: D,
}

/// Tracks the last cumulative value per stream key and turns new samples
/// into deltas.
///
/// The descriptor captures the sample's shape (bucket count, field count).
/// A descriptor that differs from the stored one starts a new baseline.
/// Stored state always moves to the latest sample, including after a reset.
#[derive(Debug, Clone)]
pub struct DeltaTracker<K, D> {
    samples: HashMap<K, Sample<D>>,
}

impl<K, D> Default for DeltaTracker<K, D> {
    fn default() -> Self {
        Self {
            samples: HashMap::new(),
        }
    }
}

impl<K, D> DeltaTracker<K, D>
where
    K: Eq + Hash,
    D: PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the delta for `key` and stores `value` as the new baseline.
    pub fn compute(&mut self, key: K, value: i64, descriptor: D) -> Delta {
        match self.samples.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Sample { value, descriptor });
                Delta::FirstSample
            }
            Entry::Occupied(mut slot) => {
                let prev = slot.get_mut();
                let delta = if prev.descriptor != descriptor {
                    Delta::FirstSample
                } else {
                    match value.checked_sub(prev.value) {
                        Some(d) if d >= 0 => Delta::Value(d),
                        _ => Delta::Reset,
                    }
                };

                prev.value = value;
                prev.descriptor = descriptor;
                delta
            }
        }
    }

    /// Returns the stored baseline for `key`.
    pub fn last(&self, key: &K) -> Option<i64> {
        self.samples.get(key).map(|s| s.value)
    }

    /// Drops the stored state for `key`.
    pub fn forget(&mut self, key: &K) {
        self.samples.remove(key);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_sets_baseline() {
        let mut tracker = DeltaTracker::new();
        assert_eq!(tracker.compute("k", 1000, ()), Delta::FirstSample);
        assert_eq!(tracker.last(&"k"), Some(1000));
        assert!(Delta::FirstSample.is_first_sample());
        assert_eq!(Delta::FirstSample.value(), None);
    }

    #[test]
    fn test_increase_then_regression() {
        let mut tracker = DeltaTracker::new();
        tracker.compute(0u32, 100, 4u32);
        assert_eq!(tracker.compute(0, 250, 4), Delta::Value(150));
        assert_eq!(tracker.compute(0, 100, 4), Delta::Reset);
        // State follows the regressed value.
        assert_eq!(tracker.compute(0, 130, 4), Delta::Value(30));
    }

    #[test]
    fn test_equal_values_yield_zero() {
        let mut tracker = DeltaTracker::new();
        tracker.compute("x", 7, ());
        assert_eq!(tracker.compute("x", 7, ()), Delta::Value(0));
    }

    #[test]
    fn test_descriptor_change_rebaselines() {
        let mut tracker = DeltaTracker::new();
        tracker.compute("bucket", 50, 10u32);
        assert_eq!(tracker.compute("bucket", 80, 12), Delta::FirstSample);
        assert_eq!(tracker.compute("bucket", 90, 12), Delta::Value(10));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut tracker = DeltaTracker::new();
        tracker.compute("a", 1, ());
        tracker.compute("b", 100, ());
        assert_eq!(tracker.compute("a", 5, ()), Delta::Value(4));
        assert_eq!(tracker.compute("b", 50, ()), Delta::Reset);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_forget() {
        let mut tracker = DeltaTracker::new();
        tracker.compute("a", 1, ());
        tracker.forget(&"a");
        assert!(tracker.is_empty());
        assert_eq!(tracker.compute("a", 10, ()), Delta::FirstSample);
    }

    #[test]
    fn test_extreme_values_signal_reset() {
        let mut tracker = DeltaTracker::new();
        tracker.compute("a", i64::MAX, ());
        assert_eq!(tracker.compute("a", i64::MIN, ()), Delta::Reset);
        tracker.compute("b", i64::MIN, ());
        // Overflowing difference is not a valid delta.
        assert_eq!(tracker.compute("b", i64::MAX, ()), Delta::Reset);
    }
}
