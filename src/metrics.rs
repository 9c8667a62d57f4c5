use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, LazyLock,
};

static GLOBAL_COUNTER: LazyLock<DistanceCounter> = LazyLock::new(DistanceCounter::new);

#[derive(Debug, Clone, Default)]
/// A count of similarity and distance evaluations, shared by everything holding a clone of it.
///
/// Indexes report into the process-wide counter unless given their own, which keeps tests from observing each other's work.
/// The count is advisory; increments are relaxed atomic additions.
pub struct DistanceCounter(Arc<AtomicU64>);

impl DistanceCounter {
    /// Create a counter starting at zero, independent of the process-wide one.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the process-wide counter.
    pub fn global() -> Self {
        GLOBAL_COUNTER.clone()
    }

    /// Record `n` evaluations.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one evaluation.
    pub fn increment(&self) {
        self.add(1);
    }

    /// The number of evaluations recorded since creation or the last reset.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Reset the count to zero.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    /// Whether two handles share the same count.
    pub fn shares_count_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The number of distance computations recorded by the process-wide counter.
pub fn get_distance_computations() -> u64 {
    GLOBAL_COUNTER.get()
}

/// Reset the process-wide distance computation counter.
pub fn clear_distance_computations() {
    GLOBAL_COUNTER.clear()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::iter::{IntoParallelIterator, ParallelIterator};

    #[test]
    fn concurrent_increments_are_all_counted() {
        let counter = DistanceCounter::new();
        (0..10_000).into_par_iter().for_each(|_| counter.increment());
        assert_eq!(counter.get(), 10_000);
        counter.clear();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn clones_share_a_count() {
        let counter = DistanceCounter::new();
        let handle = counter.clone();
        handle.add(3);
        assert_eq!(counter.get(), 3);
        assert!(counter.shares_count_with(&handle));
        assert!(!counter.shares_count_with(&DistanceCounter::global()));
    }
}
