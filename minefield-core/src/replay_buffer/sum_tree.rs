//! Sum tree for prioritized sampling.
//!
//! Code is adapted from https://github.com/jaromiru/AI-blog/blob/master/SumTree.py

/// Binary tree whose leaves hold sampling masses and whose inner nodes hold
/// the sum of their children.
///
/// Leaves of slot `ix` live at `ix + capacity - 1` in the heap layout. Sums are
/// recomputed from the children on every update, so they do not drift.
#[derive(Debug, Clone)]
pub struct SumTree {
    capacity: usize,
    tree: Vec<f64>,
}

impl SumTree {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tree: vec![0f64; 2 * capacity - 1],
        }
    }

    fn retrieve(&self, ix: usize, s: f64) -> usize {
        let left = 2 * ix + 1;
        let right = left + 1;

        if left >= self.tree.len() {
            return ix;
        }

        if s <= self.tree[left] || self.tree[right] == 0f64 {
            self.retrieve(left, s)
        } else {
            self.retrieve(right, s - self.tree[left])
        }
    }

    /// Sum of all masses.
    pub fn total(&self) -> f64 {
        self.tree[0]
    }

    /// Mass of slot `ix`.
    pub fn value(&self, ix: usize) -> f64 {
        self.tree[ix + self.capacity - 1]
    }

    /// Sets the mass of slot `ix`.
    pub fn set(&mut self, ix: usize, p: f64) {
        debug_assert!(ix < self.capacity);

        let mut node = ix + self.capacity - 1;
        self.tree[node] = p;
        while node > 0 {
            node = (node - 1) / 2;
            self.tree[node] = self.tree[2 * node + 1] + self.tree[2 * node + 2];
        }
    }

    /// Slot whose cumulative mass interval contains `s`, for `s` in `(0, total]`.
    pub fn get(&self, s: f64) -> usize {
        let ix = self.retrieve(0, s);
        debug_assert!(ix >= (self.capacity - 1));
        ix + 1 - self.capacity
    }

    /// Clears all masses.
    pub fn clear(&mut self) {
        self.tree.iter_mut().for_each(|v| *v = 0f64);
    }
}

#[cfg(test)]
mod tests {
    use super::SumTree;

    #[test]
    fn test_sum_tree_power_of_two() {
        let data = vec![0.5f64, 0.2, 0.8, 0.3, 1.1, 2.5, 3.9];
        let mut sum_tree = SumTree::new(8);
        for ix in 0..data.len() {
            sum_tree.set(ix, data[ix]);
        }

        assert!((sum_tree.total() - 9.3).abs() < 1e-9);
        assert_eq!(sum_tree.get(0.4), 0);
        assert_eq!(sum_tree.get(0.5), 0);
        assert_eq!(sum_tree.get(0.6), 1);
        assert_eq!(sum_tree.get(1.2), 2);
        assert_eq!(sum_tree.get(1.6), 3);
        assert_eq!(sum_tree.get(2.0), 4);
        assert_eq!(sum_tree.get(2.8), 4);
        assert_eq!(sum_tree.get(9.3), 6);
    }

    #[test]
    fn test_sum_tree_odd_capacity_skips_empty_slots() {
        let mut sum_tree = SumTree::new(5);
        sum_tree.set(0, 1.0);
        sum_tree.set(1, 2.0);
        let total = sum_tree.total();
        assert_eq!(total, 3.0);
        for k in 1..=300 {
            let s = total * k as f64 / 300.0;
            assert!(sum_tree.get(s) < 2);
        }

        sum_tree.set(1, 0.5);
        assert_eq!(sum_tree.total(), 1.5);
        assert_eq!(sum_tree.value(1), 0.5);
    }
}
