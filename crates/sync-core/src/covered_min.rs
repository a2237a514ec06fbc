//! Monotone minimum of a sparsely-seen integer sequence (spec §4.2).

use std::collections::BTreeSet;

/// Tracks the largest `N` such that every integer in `(initial, N]` has been
/// observed via [`CoveredMin::add`], even when integers arrive out of order.
#[derive(Debug, Clone)]
pub struct CoveredMin {
    min: u64,
    seen_above_min: BTreeSet<u64>,
}

impl CoveredMin {
    pub fn new(initial: u64) -> Self {
        Self {
            min: initial,
            seen_above_min: BTreeSet::new(),
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    /// Record that `v` has been observed. Values at or below the current
    /// minimum are ignored (already covered); duplicates above the minimum
    /// are ignored too.
    pub fn add(&mut self, v: u64) {
        if v <= self.min {
            return;
        }
        self.seen_above_min.insert(v);
        while self.seen_above_min.first() == Some(&(self.min + 1)) {
            self.seen_above_min.pop_first();
            self.min += 1;
        }
    }

    /// Force the floor to `v`, discarding any tracked values at or below it.
    pub fn set_min(&mut self, v: u64) {
        if v > self.min {
            self.min = v;
        }
        self.seen_above_min.retain(|&x| x > self.min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[test]
    fn consecutive_run_advances_min() {
        let mut cm = CoveredMin::new(0);
        cm.add(1);
        cm.add(2);
        cm.add(3);
        assert_eq!(cm.min(), 3);
    }

    #[test]
    fn out_of_order_arrival_still_advances() {
        let mut cm = CoveredMin::new(0);
        cm.add(3);
        cm.add(1);
        assert_eq!(cm.min(), 1);
        cm.add(2);
        assert_eq!(cm.min(), 3);
    }

    #[test]
    fn gap_blocks_advancement() {
        let mut cm = CoveredMin::new(0);
        cm.add(1);
        cm.add(2);
        cm.add(4);
        assert_eq!(cm.min(), 2);
    }

    #[test]
    fn values_at_or_below_min_are_ignored() {
        let mut cm = CoveredMin::new(5);
        cm.add(3);
        cm.add(5);
        assert_eq!(cm.min(), 5);
    }

    #[test]
    fn duplicate_values_ignored() {
        let mut cm = CoveredMin::new(0);
        cm.add(2);
        cm.add(2);
        cm.add(1);
        assert_eq!(cm.min(), 2);
    }

    #[test]
    fn set_min_forces_floor_and_drops_stale_entries() {
        let mut cm = CoveredMin::new(0);
        cm.add(5);
        cm.set_min(3);
        assert_eq!(cm.min(), 3);
        cm.add(4);
        assert_eq!(cm.min(), 5);
    }

    #[test]
    fn any_permutation_of_full_run_reaches_a_plus_n() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let mut values: Vec<u64> = (1..=10).collect();
            values.shuffle(&mut rng);
            let mut cm = CoveredMin::new(0);
            for v in values {
                cm.add(v);
            }
            assert_eq!(cm.min(), 10);
        }
    }

    #[test]
    fn strict_subset_stalls_at_longest_consecutive_run() {
        let mut cm = CoveredMin::new(0);
        for v in [1, 2, 3, 5, 6] {
            cm.add(v);
        }
        assert_eq!(cm.min(), 3);
    }
}
