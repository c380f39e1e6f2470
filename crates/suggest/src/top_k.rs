/// Keeps the `capacity` highest-scoring items offered to it.
///
/// Backed by a binary min-heap on score, so the weakest retained item is
/// always at the root. Insert and pop are O(log K), peek is O(1).
#[derive(Debug, Clone)]
pub struct TopK<T, S> {
    heap: Vec<(S, T)>,
    capacity: usize,
}

impl<T, S: Ord + Copy + Default> TopK<T, S> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "TopK capacity must be positive");
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lowest retained score, or `S::default()` when empty.
    pub fn peek_min_score(&self) -> S {
        self.heap.first().map(|(s, _)| *s).unwrap_or_default()
    }

    /// Offers an item. When full, it replaces the current minimum only if
    /// its score is strictly greater; equal scores keep the incumbent.
    /// Returns whether the item was retained.
    pub fn insert(&mut self, item: T, score: S) -> bool {
        if self.heap.len() == self.capacity {
            if score <= self.heap[0].0 {
                return false;
            }
            self.pop_min();
        }
        self.heap.push((score, item));
        self.sift_up(self.heap.len() - 1);
        true
    }

    /// Removes and returns the item with the lowest score.
    pub fn pop_min(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let (_, item) = self.heap.swap_remove(0);
        self.sift_down(0);
        Some(item)
    }

    /// Consumes the selector, returning items highest score first.
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop_min() {
            out.push(item);
        }
        out.reverse();
        out
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].0 <= self.heap[i].0 {
                break;
            }
            self.heap.swap(parent, i);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let mut child = i * 2 + 1;
            if child >= len {
                break;
            }
            if child + 1 < len && self.heap[child + 1].0 < self.heap[child].0 {
                child += 1;
            }
            if self.heap[child].0 >= self.heap[i].0 {
                break;
            }
            self.heap.swap(child, i);
            i = child;
        }
    }
}
