//! Edge Pool
//!
//! Arena of adjacency entries shared by every node of a DAG. Each node keeps
//! a singly linked list threaded through the arena, so a node can have any
//! number of children as long as the pool lasts.
//!
//! # Design
//! - Free slots are chained through the same `next` link as adjacency lists
//! - Append keeps a tail index so children stay in insertion order
//! - Exhaustion is reported, never panics

use super::node::NodeRef;
use crate::config::KCAPABILITY_EDGE_POOL;

/// Index of an entry in the [`EdgePool`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct EdgeIdx(u16);

impl EdgeIdx {
    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Data attached to a derivation edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct EdgeMeta {
    /// DAG operation counter at insertion time.
    pub seq: u64,
}

#[derive(Clone, Copy, Debug)]
struct EdgeSlot {
    target: NodeRef,
    meta: EdgeMeta,
    next: Option<EdgeIdx>,
    in_use: bool,
}

impl EdgeSlot {
    const FREE: Self = Self {
        target: NodeRef(0),
        meta: EdgeMeta { seq: 0 },
        next: None,
        in_use: false,
    };
}

/// Per-node adjacency list head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Adjacency {
    head: Option<EdgeIdx>,
    tail: Option<EdgeIdx>,
    len: u16,
}

impl Adjacency {
    /// List with no entries.
    pub const EMPTY: Self = Self {
        head: None,
        tail: None,
        len: 0,
    };

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if the list has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bounded arena of adjacency entries.
#[derive(Debug)]
pub struct EdgePool {
    slots: [EdgeSlot; KCAPABILITY_EDGE_POOL],
    free: Option<EdgeIdx>,
    in_use: usize,
}

impl EdgePool {
    /// Create a pool with every slot free.
    pub fn new() -> Self {
        let mut pool = Self {
            slots: [EdgeSlot::FREE; KCAPABILITY_EDGE_POOL],
            free: None,
            in_use: 0,
        };
        pool.reset();
        pool
    }

    /// Return every slot to the free list.
    pub fn reset(&mut self) {
        for i in 0..KCAPABILITY_EDGE_POOL {
            self.slots[i] = EdgeSlot {
                next: if i + 1 < KCAPABILITY_EDGE_POOL {
                    Some(EdgeIdx((i + 1) as u16))
                } else {
                    None
                },
                ..EdgeSlot::FREE
            };
        }
        self.free = Some(EdgeIdx(0));
        self.in_use = 0;
    }

    /// Number of entries currently allocated.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Number of entries left.
    #[inline]
    pub fn available(&self) -> usize {
        KCAPABILITY_EDGE_POOL - self.in_use
    }

    /// Append an edge to `list`.
    ///
    /// Returns false, leaving `list` untouched, if the pool is empty.
    pub fn push(&mut self, list: &mut Adjacency, target: NodeRef, meta: EdgeMeta) -> bool {
        let Some(idx) = self.free else {
            return false;
        };
        let slot = &mut self.slots[idx.index()];
        self.free = slot.next;
        *slot = EdgeSlot {
            target,
            meta,
            next: None,
            in_use: true,
        };
        self.in_use += 1;

        match list.tail {
            Some(tail) => self.slots[tail.index()].next = Some(idx),
            None => list.head = Some(idx),
        }
        list.tail = Some(idx);
        list.len += 1;
        true
    }

    /// Unlink the first edge to `target` from `list` and free it.
    ///
    /// Returns false if `list` has no such edge.
    pub fn remove(&mut self, list: &mut Adjacency, target: NodeRef) -> bool {
        let mut prev: Option<EdgeIdx> = None;
        let mut cur = list.head;

        while let Some(idx) = cur {
            let slot = self.slots[idx.index()];
            if slot.target == target {
                match prev {
                    Some(p) => self.slots[p.index()].next = slot.next,
                    None => list.head = slot.next,
                }
                if list.tail == Some(idx) {
                    list.tail = prev;
                }
                list.len -= 1;
                self.release(idx);
                return true;
            }
            prev = cur;
            cur = slot.next;
        }
        false
    }

    /// Free every entry of `list`.
    pub fn clear(&mut self, list: &mut Adjacency) {
        let mut cur = list.head;
        while let Some(idx) = cur {
            cur = self.slots[idx.index()].next;
            self.release(idx);
        }
        *list = Adjacency::EMPTY;
    }

    /// Iterate over the edges of `list` in insertion order.
    pub fn iter<'a>(&'a self, list: &Adjacency) -> EdgeIter<'a> {
        EdgeIter {
            pool: self,
            cur: list.head,
        }
    }

    fn release(&mut self, idx: EdgeIdx) {
        let slot = &mut self.slots[idx.index()];
        assert!(slot.in_use, "edge pool: double free of slot {}", idx.0);
        *slot = EdgeSlot {
            next: self.free,
            ..EdgeSlot::FREE
        };
        self.free = Some(idx);
        self.in_use -= 1;
    }
}

impl Default for EdgePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over one adjacency list.
pub struct EdgeIter<'a> {
    pool: &'a EdgePool,
    cur: Option<EdgeIdx>,
}

impl Iterator for EdgeIter<'_> {
    type Item = (NodeRef, EdgeMeta);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let slot = &self.pool.slots[idx.index()];
        self.cur = slot.next;
        Some((slot.target, slot.meta))
    }
}
