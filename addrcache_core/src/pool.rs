//! Fixed-slot node pool owned by each tree.
//!
//! Freed slots are recycled before the pool grows; every recycle bumps the
//! slot generation so stale [`NodeId`]s are detected instead of aliasing.

use crate::errors::Error;
use crate::prefix::Prefix;
use crate::types::{Node, NodeId};
use log::{error, trace};

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

#[derive(Debug)]
pub struct NodePool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: Option<usize>,
    active: usize,   // live nodes, glue included
    prefixes: usize, // live node-held prefixes
}

impl<T> NodePool<T> {
    /// Unbounded pool.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity: None,
            active: 0,
            prefixes: 0,
        }
    }

    /// Pool that refuses to hold more than `capacity` live nodes.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity.min(4096)),
            free: Vec::new(),
            capacity: Some(capacity),
            active: 0,
            prefixes: 0,
        })
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn live_prefixes(&self) -> usize {
        self.prefixes
    }

    /// Free slots left, `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.capacity.map(|c| c - self.active)
    }

    /// Fail unless `n` more nodes fit. Callers reserve before touching any
    /// link so an insert is never left half-built.
    pub fn reserve(&self, n: usize) -> Result<(), Error> {
        match self.available() {
            Some(avail) if avail < n => {
                error!(
                    "[ALLOC] Pool exhausted: need {} slots, have {} (capacity={:?})",
                    n, avail, self.capacity
                );
                Err(Error::CapacityExceeded)
            }
            _ => Ok(()),
        }
    }

    pub fn alloc(&mut self, node: Node<T>) -> Result<NodeId, Error> {
        self.reserve(1)?;
        if node.prefix.is_some() {
            self.prefixes += 1;
        }
        self.active += 1;
        // ① reuse a freed slot first
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.node.is_none(), "free list holds a live slot");
            slot.node = Some(node);
            trace!("[ALLOC] Reusing slot {} gen={}", index, slot.generation);
            return Ok(NodeId {
                index,
                generation: slot.generation,
            });
        }
        // ② grow
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        trace!("[ALLOC] New slot {}", index);
        Ok(NodeId {
            index,
            generation: 0,
        })
    }

    /// Release a node and return it. Panics on a stale handle.
    pub fn release(&mut self, id: NodeId) -> Node<T> {
        let slot = match self.slots.get_mut(id.index as usize) {
            Some(s) if s.generation == id.generation && s.node.is_some() => s,
            _ => panic!("[FREE] stale or unknown node handle {id:?}"),
        };
        let node = slot.node.take().expect("slot checked live above");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.active -= 1;
        if node.prefix.is_some() {
            self.prefixes -= 1;
        }
        node
    }

    pub fn get(&self, id: NodeId) -> Option<&Node<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Live node behind a link the tree itself holds. A dangling link means
    /// the tree is corrupt, which is unrecoverable.
    pub(crate) fn node(&self, id: NodeId) -> &Node<T> {
        match self.get(id) {
            Some(n) => n,
            None => panic!("dangling tree link {id:?}"),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.get_mut(id) {
            Some(n) => n,
            None => panic!("dangling tree link {id:?}"),
        }
    }

    /// Bind `prefix` to a glue node, promoting it to a concrete node.
    pub(crate) fn attach_prefix(&mut self, id: NodeId, prefix: Prefix) {
        let node = self.node_mut(id);
        assert!(node.prefix.is_none(), "prefix attached twice to {id:?}");
        node.bit = prefix.bitlen();
        node.prefix = Some(prefix);
        self.prefixes += 1;
    }

    /// Drop the prefix (and payload) of a concrete node, demoting it to glue.
    /// Panics when the node holds no prefix: that is a double release.
    pub(crate) fn detach_prefix(&mut self, id: NodeId) -> (Prefix, Option<T>) {
        let node = self.node_mut(id);
        let Some(prefix) = node.prefix.take() else {
            panic!("prefix released twice on {id:?}");
        };
        let data = node.data.take();
        self.prefixes -= 1;
        (prefix, data)
    }
}

impl<T> Default for NodePool<T> {
    fn default() -> Self {
        Self::new()
    }
}
