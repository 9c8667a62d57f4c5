use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
/// The `k` most similar points offered so far.
///
/// A min-heap on similarity, so the weakest kept point is evicted first. Ties are broken towards the lower id.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<u32>)>>,
}

impl TopK {
    /// Create an empty buffer holding at most `k` points.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Offer a point to the buffer.
    ///
    /// # Arguments
    ///
    /// * `id` - The point's id; callers must not offer the same id twice.
    ///
    /// * `similarity` - The point's similarity to the query.
    ///
    /// # Returns
    ///
    /// Whether the point was kept.
    pub fn insert(&mut self, id: u32, similarity: f32) -> bool {
        if self.k == 0 {
            return false;
        }
        let entry = Reverse((OrderedFloat(similarity), Reverse(id)));
        if self.heap.len() < self.k {
            self.heap.push(entry);
            return true;
        }
        match self.heap.peek() {
            Some(weakest) if entry < *weakest => {
                self.heap.pop();
                self.heap.push(entry);
                true
            }
            _ => false,
        }
    }

    /// Whether `k` points are held.
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// The number of points held.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no points are held.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The similarity of the `k`-th best point, once `k` points are held.
    pub fn kth_similarity(&self) -> Option<f32> {
        match self.is_full() {
            true => self.heap.peek().map(|entry| entry.0 .0 .0),
            false => None,
        }
    }

    /// The held points, most similar first.
    pub fn into_sorted(self) -> Vec<(u32, f32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse((similarity, Reverse(id)))| (id, similarity.0))
            .collect()
    }
}
