use std::collections::HashMap;

use super::WaveletCoefficient;

/// Bounded set keeping the `capacity` largest-magnitude coefficients.
///
/// A binary min-heap ordered by `|value|` with a side map from coefficient
/// index to heap slot, so a coefficient that keeps receiving contributions
/// can be found and re-positioned in place.
#[derive(Debug, Clone)]
pub struct TopKCoefficientSet {
    capacity: usize,
    heap: Vec<WaveletCoefficient>,
    slots: HashMap<u64, usize>,
}

impl TopKCoefficientSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: Vec::with_capacity(capacity.min(1 << 16)),
            slots: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&WaveletCoefficient> {
        self.slots.get(&index).map(|&slot| &self.heap[slot])
    }

    /// Smallest-magnitude member.
    pub fn min(&self) -> Option<&WaveletCoefficient> {
        self.heap.first()
    }

    /// Inserts `coefficient`, replacing any member with the same index.
    ///
    /// When full, the smallest member is evicted if the newcomer is larger in
    /// magnitude; otherwise the newcomer is dropped. Whatever leaves the set
    /// is returned.
    pub fn add(&mut self, coefficient: WaveletCoefficient) -> Option<WaveletCoefficient> {
        if let Some(&slot) = self.slots.get(&coefficient.index) {
            let old = std::mem::replace(&mut self.heap[slot], coefficient);
            self.resift(slot);
            return Some(old);
        }
        if self.heap.len() < self.capacity {
            self.heap.push(coefficient);
            let slot = self.heap.len() - 1;
            self.slots.insert(self.heap[slot].index, slot);
            self.sift_up(slot);
            return None;
        }
        let larger = matches!(self.min(), Some(min) if coefficient.value.abs() > min.value.abs());
        if !larger {
            return Some(coefficient);
        }
        let evicted = std::mem::replace(&mut self.heap[0], coefficient);
        self.slots.remove(&evicted.index);
        self.slots.insert(self.heap[0].index, 0);
        self.sift_down(0);
        Some(evicted)
    }

    /// Adds `delta` to the member at `index`, or inserts it as a new
    /// coefficient when absent.
    pub fn append(&mut self, index: u64, level: i32, delta: f64) -> Option<WaveletCoefficient> {
        match self.slots.get(&index) {
            Some(&slot) => {
                self.heap[slot].value += delta;
                self.resift(slot);
                None
            }
            None => self.add(WaveletCoefficient::new(delta, level, index)),
        }
    }

    /// Members ordered by ascending index, the order they are persisted in.
    pub fn into_sorted(self) -> Vec<WaveletCoefficient> {
        let mut coefficients = self.heap;
        coefficients.sort_unstable_by_key(|c| c.index);
        coefficients
    }

    fn magnitude(&self, slot: usize) -> f64 {
        self.heap[slot].value.abs()
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.slots.insert(self.heap[a].index, a);
        self.slots.insert(self.heap[b].index, b);
    }

    fn resift(&mut self, slot: usize) {
        let slot = self.sift_up(slot);
        self.sift_down(slot);
    }

    fn sift_up(&mut self, mut slot: usize) -> usize {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.magnitude(slot) >= self.magnitude(parent) {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
        slot
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut smallest = slot;
            if left < self.heap.len() && self.magnitude(left) < self.magnitude(smallest) {
                smallest = left;
            }
            if right < self.heap.len() && self.magnitude(right) < self.magnitude(smallest) {
                smallest = right;
            }
            if smallest == slot {
                return;
            }
            self.swap(slot, smallest);
            slot = smallest;
        }
    }
}
