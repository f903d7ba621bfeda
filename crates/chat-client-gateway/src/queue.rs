//! Double-ended ring queue
//!
//! FIFO queue with O(1) front insertion, used by the send scheduler.
//! Back storage is a power-of-two ring; front insertions go to a stack so
//! that later front-inserts pop before earlier ones, and all of them pop
//! before any back item present at the time.

/// Smallest ring allocation; the ring never shrinks below this
const MIN_CAPACITY: usize = 16;

/// A double-ended queue over a resizable ring buffer
#[derive(Debug)]
pub struct RingQueue<T> {
    /// Power-of-two ring holding back-inserted items
    ring: Vec<Option<T>>,
    /// Index of the oldest back item
    head: usize,
    /// Number of items in the ring
    ring_len: usize,
    /// Stack of front-inserted items; popped before the ring
    front: Vec<T>,
}

impl<T> RingQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: Self::allocate(MIN_CAPACITY),
            head: 0,
            ring_len: 0,
            front: Vec::new(),
        }
    }

    fn allocate(capacity: usize) -> Vec<Option<T>> {
        debug_assert!(capacity.is_power_of_two());
        let mut ring = Vec::with_capacity(capacity);
        ring.resize_with(capacity, || None);
        ring
    }

    /// Append an item to the back
    pub fn push_back(&mut self, value: T) {
        if self.ring_len == self.ring.len() {
            self.resize(self.ring.len() * 2);
        }
        let tail = (self.head + self.ring_len) & (self.ring.len() - 1);
        self.ring[tail] = Some(value);
        self.ring_len += 1;
    }

    /// Insert an item at the front
    ///
    /// Items inserted this way pop in reverse insertion order relative to
    /// each other, and before any back item.
    pub fn push_front(&mut self, value: T) {
        self.front.push(value);
    }

    /// Remove and return the item at the front
    pub fn pop_front(&mut self) -> Option<T> {
        if let Some(value) = self.front.pop() {
            return Some(value);
        }
        if self.ring_len == 0 {
            return None;
        }
        let value = self.ring[self.head].take();
        self.head = (self.head + 1) & (self.ring.len() - 1);
        self.ring_len -= 1;

        // Halve the ring once occupancy drops to a quarter
        let quarter = self.ring.len() / 4;
        if self.ring.len() > MIN_CAPACITY && self.ring_len <= quarter {
            self.resize(self.ring.len() / 2);
        }

        value
    }

    /// Total number of queued items
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring_len + self.front.len()
    }

    /// Check whether the queue holds no items
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued item and release excess capacity
    pub fn clear(&mut self) {
        self.ring = Self::allocate(MIN_CAPACITY);
        self.head = 0;
        self.ring_len = 0;
        self.front.clear();
    }

    fn resize(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(MIN_CAPACITY);
        if new_capacity == self.ring.len() {
            return;
        }
        let mut next = Self::allocate(new_capacity);
        let mask = self.ring.len() - 1;
        for i in 0..self.ring_len {
            next[i] = self.ring[(self.head + i) & mask].take();
        }
        self.ring = next;
        self.head = 0;
    }
}

impl<T> Default for RingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_back_pops_in_arrival_order() {
        let mut q = RingQueue::new();
        for i in 0..5 {
            q.push_back(i);
        }
        assert_eq!(q.len(), 5);
        for i in 0..5 {
            assert_eq!(q.pop_front(), Some(i));
        }
        assert_eq!(q.pop_front(), None);
    }

    #[test]
    fn test_push_front_pops_in_reverse_arrival_order() {
        let mut q = RingQueue::new();
        q.push_front(1);
        q.push_front(2);
        q.push_front(3);
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(1));
    }

    #[test]
    fn test_front_items_precede_back_items() {
        let mut q = RingQueue::new();
        q.push_back("b1");
        q.push_back("b2");
        q.push_front("f1");
        q.push_front("f2");
        assert_eq!(q.pop_front(), Some("f2"));
        assert_eq!(q.pop_front(), Some("f1"));
        assert_eq!(q.pop_front(), Some("b1"));
        assert_eq!(q.pop_front(), Some("b2"));
    }

    #[test]
    fn test_interleaved_front_and_back() {
        let mut q = RingQueue::new();
        q.push_back(10);
        q.push_front(1);
        assert_eq!(q.pop_front(), Some(1));
        assert_eq!(q.pop_front(), Some(10));
        q.push_front(2);
        q.push_back(20);
        q.push_front(3);
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), Some(2));
        assert_eq!(q.pop_front(), Some(20));
        assert!(q.is_empty());
    }

    #[test]
    fn test_growth_preserves_order() {
        let mut q = RingQueue::new();
        // Force several doublings past MIN_CAPACITY.
        for i in 0..1000 {
            q.push_back(i);
        }
        assert_eq!(q.len(), 1000);
        for i in 0..1000 {
            assert_eq!(q.pop_front(), Some(i));
        }
    }

    #[test]
    fn test_growth_with_wrapped_head() {
        let mut q = RingQueue::new();
        // Advance the head so the ring wraps before growing.
        for i in 0..12 {
            q.push_back(i);
        }
        for i in 0..8 {
            assert_eq!(q.pop_front(), Some(i));
        }
        for i in 100..140 {
            q.push_back(i);
        }
        for i in 8..12 {
            assert_eq!(q.pop_front(), Some(i));
        }
        for i in 100..140 {
            assert_eq!(q.pop_front(), Some(i));
        }
    }

    #[test]
    fn test_shrinks_on_low_occupancy() {
        let mut q = RingQueue::new();
        for i in 0..256 {
            q.push_back(i);
        }
        assert!(q.ring.len() >= 256);
        for _ in 0..250 {
            q.pop_front();
        }
        assert!(q.ring.len() < 256);
        assert!(q.ring.len() >= MIN_CAPACITY);
        // Remaining items survive the shrink.
        for i in 250..256 {
            assert_eq!(q.pop_front(), Some(i));
        }
    }

    #[test]
    fn test_clear() {
        let mut q = RingQueue::new();
        for i in 0..100 {
            q.push_back(i);
            q.push_front(i);
        }
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.pop_front(), None);
        assert_eq!(q.ring.len(), MIN_CAPACITY);

        // Clear is idempotent.
        q.clear();
        assert!(q.is_empty());

        q.push_back(1);
        assert_eq!(q.pop_front(), Some(1));
    }
}
