//! A bounded cache of open, read-only sealed-segment handles.
//!
//! Exists to bound open file descriptors under random-read workloads that
//! touch many sealed segments; it is not a data cache — `get` always
//! re-reads from the file, it only avoids repeatedly opening/closing the
//! same file descriptor.

use std::collections::HashMap;

use crate::segment::Segment;

/// Default capacity, per spec.
pub const DEFAULT_CAPACITY: usize = 20;

struct Node {
    id: u64,
    segment: Segment,
    prev: Option<usize>,
    next: Option<usize>,
}

/// An ordered `(segment_id -> open segment)` cache with O(capacity)
/// promotion/eviction via linked traversal, acceptable at the default
/// capacity of 20.
pub struct SegmentLru {
    capacity: usize,
    slots: Vec<Option<Node>>,
    index: HashMap<u64, usize>,
    head: Option<usize>, // most-recently-used
    tail: Option<usize>, // least-recently-used
    free: Vec<usize>,
}

impl SegmentLru {
    /// Creates an empty cache with the given capacity.
    pub fn new(capacity: usize) -> SegmentLru {
        SegmentLru {
            capacity: capacity.max(1),
            slots: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            free: Vec::new(),
        }
    }

    /// Returns a mutable reference to the cached segment for `id`, promoting
    /// it to most-recently-used. `None` on a cache miss.
    pub fn get(&mut self, id: u64) -> Option<&mut Segment> {
        let slot = *self.index.get(&id)?;
        self.move_to_front(slot);
        Some(&mut self.slots[slot].as_mut().unwrap().segment)
    }

    /// Inserts a newly-opened segment handle at most-recently-used,
    /// evicting and closing the least-recently-used entry if at capacity.
    pub fn add(&mut self, id: u64, segment: Segment) {
        if self.index.contains_key(&id) {
            // Replace in place; close the stale handle first.
            self.remove(id);
        }
        if self.index.len() >= self.capacity {
            self.evict_lru();
        }
        let node = Node {
            id,
            segment,
            prev: None,
            next: self.head,
        };
        let slot = if let Some(free_slot) = self.free.pop() {
            self.slots[free_slot] = Some(node);
            free_slot
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        };
        if let Some(old_head) = self.head {
            self.slots[old_head].as_mut().unwrap().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
        self.index.insert(id, slot);
    }

    /// Closes every cached handle and empties the cache. Called after every
    /// merge, since the set of sealed segments changes wholesale and any
    /// cached ids may no longer exist on disk.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn remove(&mut self, id: u64) {
        if let Some(slot) = self.index.remove(&id) {
            self.unlink(slot);
            self.slots[slot] = None;
            self.free.push(slot);
        }
    }

    fn evict_lru(&mut self) {
        if let Some(tail) = self.tail {
            let id = self.slots[tail].as_ref().unwrap().id;
            self.index.remove(&id);
            self.unlink(tail);
            self.slots[tail] = None;
            self.free.push(tail);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.slots[slot].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        {
            let node = self.slots[slot].as_mut().unwrap();
            node.prev = None;
            node.next = self.head;
        }
        if let Some(old_head) = self.head {
            self.slots[old_head].as_mut().unwrap().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.index.len()
    }
}
