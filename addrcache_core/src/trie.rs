//! Binary PATRICIA trie keyed on address prefixes.
//!
//! Every node tests one bit (`node.bit`) to route further descent: 1 goes
//! right, 0 goes left. Concrete nodes carry a [`Prefix`] with
//! `bitlen == bit`; glue nodes carry none and exist only as fork points, so
//! they always have exactly two children. Bits at or beyond the tree width
//! read as zero.

use crate::errors::Error;
use crate::helpers::{common_prefix_len, comp_with_mask, get_bit};
use crate::pool::NodePool;
use crate::prefix::{Family, Prefix};
use crate::types::{Node, NodeId};
use log::{debug, info, trace};

pub struct Trie<T> {
    pool: NodePool<T>,
    root: Option<NodeId>,
    family: Family,
    maxbits: u8,
}

impl<T> Trie<T> {
    /// Empty, unbounded tree for one address family.
    pub fn new(family: Family) -> Self {
        Self::with_pool(family, NodePool::new())
    }

    /// Empty tree whose pool holds at most `capacity` nodes (glue included).
    pub fn with_capacity(family: Family, capacity: usize) -> Result<Self, Error> {
        Ok(Self::with_pool(family, NodePool::with_capacity(capacity)?))
    }

    pub fn with_pool(family: Family, pool: NodePool<T>) -> Self {
        Self {
            pool,
            root: None,
            family,
            maxbits: family.max_bits(),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn maxbits(&self) -> u8 {
        self.maxbits
    }

    /// Live nodes, glue nodes included.
    pub fn active_nodes(&self) -> usize {
        self.pool.active()
    }

    /// Stored prefixes.
    pub fn len(&self) -> usize {
        self.pool.live_prefixes()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn pool(&self) -> &NodePool<T> {
        &self.pool
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.pool.get(id)
    }

    pub fn prefix(&self, id: NodeId) -> Option<&Prefix> {
        self.pool.get(id).and_then(|n| n.prefix.as_ref())
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.pool.get(id).and_then(|n| n.data.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.pool.get_mut(id).and_then(|n| n.data.as_mut())
    }

    /// Store `data` on a concrete node, returning the previous payload.
    /// Glue nodes and stale handles are left untouched and get `data` back.
    pub fn set(&mut self, id: NodeId, data: T) -> Result<Option<T>, T> {
        match self.pool.get_mut(id) {
            Some(n) if n.prefix.is_some() => Ok(n.data.replace(data)),
            _ => Err(data),
        }
    }

    #[inline]
    fn test_bit(&self, key: u128, bit: u8) -> bool {
        bit < self.maxbits && get_bit(key, bit) == 1
    }

    #[inline]
    fn next(&self, node: &Node<T>, key: u128) -> Option<NodeId> {
        node.child(self.test_bit(key, node.bit))
    }

    fn accepts(&self, prefix: &Prefix) -> bool {
        prefix.family() == self.family && prefix.bitlen() <= self.maxbits
    }

    /// Node holding exactly `prefix` (same bit length, same bits).
    pub fn search_exact(&self, prefix: &Prefix) -> Option<NodeId> {
        if !self.accepts(prefix) {
            return None;
        }
        let key = prefix.key();
        let bitlen = prefix.bitlen();
        let mut cur = self.root?;
        loop {
            let node = self.pool.node(cur);
            if node.bit >= bitlen {
                break;
            }
            cur = self.next(node, key)?;
        }
        let node = self.pool.node(cur);
        if node.bit > bitlen {
            return None;
        }
        let stored = node.prefix.as_ref()?;
        if stored.bitlen() == bitlen && comp_with_mask(stored.key(), key, bitlen) {
            return Some(cur);
        }
        None
    }

    /// Longest stored prefix covering `prefix`.
    ///
    /// With `inclusive == false` a node holding `prefix` itself is skipped,
    /// which yields the closest strictly shorter cover.
    pub fn search_best(&self, prefix: &Prefix, inclusive: bool) -> Option<NodeId> {
        if !self.accepts(prefix) {
            return None;
        }
        let key = prefix.key();
        let bitlen = prefix.bitlen();
        // a descent path has strictly increasing bits, so at most maxbits+1 entries
        let mut stack: Vec<NodeId> = Vec::with_capacity(self.maxbits as usize + 1);
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = self.pool.node(id);
            if node.bit >= bitlen {
                break;
            }
            if node.prefix.is_some() {
                stack.push(id);
            }
            cur = self.next(node, key);
        }
        if inclusive {
            if let Some(id) = cur {
                if self.pool.node(id).prefix.is_some() {
                    stack.push(id);
                }
            }
        }
        while let Some(id) = stack.pop() {
            let Some(stored) = self.pool.node(id).prefix.as_ref() else {
                continue;
            };
            if stored.bitlen() <= bitlen && comp_with_mask(stored.key(), key, stored.bitlen()) {
                return Some(id);
            }
        }
        None
    }

    /// Find the node holding `prefix`, inserting it when absent.
    ///
    /// Allocates at most one concrete node and one glue node. The pool is
    /// checked before any link is rewritten, so a `CapacityExceeded` error
    /// leaves the tree untouched.
    pub fn lookup_or_insert(&mut self, prefix: &Prefix) -> Result<NodeId, Error> {
        if !self.accepts(prefix) {
            debug!(
                "[INSERT] Rejected {} for a {:?}/{} tree",
                prefix, self.family, self.maxbits
            );
            return Err(Error::InvalidPrefix);
        }
        let key = prefix.key();
        let bitlen = prefix.bitlen();

        // --- Case 1: Empty tree ---
        let Some(root) = self.root else {
            let id = self.pool.alloc(Node::concrete(*prefix))?;
            self.root = Some(id);
            trace!("[INSERT] {} became root {:?}", prefix, id);
            return Ok(id);
        };

        // --- Descend until a concrete node at or past bitlen, or a dead end ---
        let mut node_id = root;
        loop {
            let node = self.pool.node(node_id);
            if node.bit >= bitlen && node.prefix.is_some() {
                break;
            }
            match self.next(node, key) {
                Some(child) => node_id = child,
                None => break,
            }
        }
        let landing = self.pool.node(node_id);
        // glue nodes have two children, so a descent can only stop on a concrete node
        let Some(landing_key) = landing.prefix.as_ref().map(|p| p.key()) else {
            unreachable!("[INSERT] descent stopped on glue node {node_id:?}");
        };

        let check_bit = landing.bit.min(bitlen);
        let differ_bit = common_prefix_len(key, landing_key, check_bit);
        trace!(
            "[INSERT] {} landed on {:?} bit={} differ_bit={}",
            prefix,
            node_id,
            landing.bit,
            differ_bit
        );

        // --- The fork point may be above the landing node ---
        let mut parent = landing.parent;
        while let Some(p) = parent {
            let pn = self.pool.node(p);
            if pn.bit < differ_bit {
                break;
            }
            node_id = p;
            parent = pn.parent;
        }
        let node_bit = self.pool.node(node_id).bit;

        // --- Case 2: Exact depth match ---
        if differ_bit == bitlen && node_bit == bitlen {
            if self.pool.node(node_id).prefix.is_some() {
                trace!("[INSERT] {} already present at {:?}", prefix, node_id);
            } else {
                debug!("[INSERT] Promoting glue {:?} to hold {}", node_id, prefix);
                self.pool.attach_prefix(node_id, *prefix);
            }
            return Ok(node_id);
        }

        let needed = if node_bit == differ_bit || bitlen == differ_bit {
            1
        } else {
            2
        };
        self.pool.reserve(needed)?;
        let new_id = self.pool.alloc(Node::concrete(*prefix))?;

        // --- Case 3: Hang below the fork node ---
        if node_bit == differ_bit {
            let right = self.test_bit(key, node_bit);
            let node = self.pool.node_mut(node_id);
            debug_assert!(node.child(right).is_none(), "attach over a live child");
            node.set_child(right, Some(new_id));
            self.pool.node_mut(new_id).parent = Some(node_id);
            trace!("[INSERT] {} hung below {:?}", prefix, node_id);
            return Ok(new_id);
        }

        // --- Case 4: New key is a prefix of the existing path ---
        if bitlen == differ_bit {
            let right = self.test_bit(landing_key, bitlen);
            self.replace_link(node_id, new_id);
            self.pool.node_mut(new_id).set_child(right, Some(node_id));
            self.pool.node_mut(node_id).parent = Some(new_id);
            debug!("[INSERT] {} inserted above {:?}", prefix, node_id);
            return Ok(new_id);
        }

        // --- Case 5: Split with a glue node at differ_bit ---
        let glue_id = self.pool.alloc(Node::glue(differ_bit))?;
        let right = self.test_bit(key, differ_bit);
        {
            let glue = self.pool.node_mut(glue_id);
            glue.set_child(right, Some(new_id));
            glue.set_child(!right, Some(node_id));
        }
        self.replace_link(node_id, glue_id);
        self.pool.node_mut(node_id).parent = Some(glue_id);
        self.pool.node_mut(new_id).parent = Some(glue_id);
        debug!(
            "[INSERT] {} split at bit {} via glue {:?}",
            prefix, differ_bit, glue_id
        );
        Ok(new_id)
    }

    /// Put `new` in the slot `old` occupies under its parent (or at the root).
    fn replace_link(&mut self, old: NodeId, new: NodeId) {
        let parent = self.pool.node(old).parent;
        self.pool.node_mut(new).parent = parent;
        match parent {
            None => self.root = Some(new),
            Some(p) => {
                let pn = self.pool.node_mut(p);
                if pn.right == Some(old) {
                    pn.right = Some(new);
                } else {
                    pn.left = Some(new);
                }
            }
        }
    }

    /// Remove the entry held by `id`, returning its payload.
    ///
    /// A node with two children cannot be unlinked; it is demoted to a glue
    /// node instead. A glue parent left with a single child is spliced out.
    /// Panics when `id` is stale.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let Some(node) = self.pool.get(id) else {
            panic!("[REMOVE] stale or unknown node handle {id:?}");
        };
        let (parent, left, right) = (node.parent, node.left, node.right);

        match (left, right) {
            (Some(_), Some(_)) => {
                if node.prefix.is_none() {
                    return None;
                }
                let (prefix, data) = self.pool.detach_prefix(id);
                debug!("[REMOVE] {} demoted to glue at {:?}", prefix, id);
                data
            }
            (None, None) => {
                let freed = self.pool.release(id);
                trace!("[REMOVE] leaf {:?} released", id);
                let Some(parent_id) = parent else {
                    self.root = None;
                    return freed.data;
                };
                let pn = self.pool.node_mut(parent_id);
                let sibling = if pn.right == Some(id) {
                    pn.right = None;
                    pn.left
                } else {
                    pn.left = None;
                    pn.right
                };
                if pn.prefix.is_some() {
                    return freed.data;
                }
                // a glue parent must not survive with a single child
                let Some(sibling) = sibling else {
                    unreachable!("[REMOVE] glue node {parent_id:?} had a single child");
                };
                self.replace_link(parent_id, sibling);
                self.pool.release(parent_id);
                trace!("[REMOVE] glue {:?} collapsed", parent_id);
                freed.data
            }
            (Some(child), None) | (None, Some(child)) => {
                self.replace_link(id, child);
                let freed = self.pool.release(id);
                trace!("[REMOVE] {:?} spliced out", id);
                freed.data
            }
        }
    }

    /// Remove the entry holding exactly `prefix`.
    pub fn remove_prefix(&mut self, prefix: &Prefix) -> Option<T> {
        let id = self.search_exact(prefix)?;
        self.remove(id)
    }

    /// Pre-order walk over concrete nodes.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut stack = Vec::with_capacity(self.maxbits as usize + 1);
        if let Some(root) = self.root {
            stack.push(root);
        }
        Iter { trie: self, stack }
    }

    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(NodeId, &Prefix, Option<&T>),
    {
        for (id, prefix, data) in self.iter() {
            visit(id, prefix, data);
        }
    }

    /// Every live node id, glue nodes included, in pre-order.
    fn all_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.pool.active());
        let mut stack = Vec::with_capacity(self.maxbits as usize + 1);
        if let Some(root) = self.root {
            stack.push(root);
        }
        while let Some(id) = stack.pop() {
            let node = self.pool.node(id);
            out.push(id);
            stack.extend(node.right);
            stack.extend(node.left);
        }
        out
    }

    /// Drop every node. Afterwards `active_nodes() == 0` and `len() == 0`.
    pub fn clear(&mut self) {
        let nodes = self.all_nodes();
        let count = nodes.len();
        self.root = None;
        for id in nodes {
            self.pool.release(id);
        }
        debug_assert_eq!(self.pool.active(), 0, "nodes leaked by clear");
        debug_assert_eq!(self.pool.live_prefixes(), 0, "prefixes leaked by clear");
        info!("[CLEAR] Released {} nodes", count);
    }

    /// Panic if the tree breaks a structural invariant: glue nodes have two
    /// children, bits strictly increase with depth, concrete nodes sit at
    /// their bit length, parent links mirror child links, and the pool
    /// counters agree with what is reachable.
    #[doc(hidden)]
    pub fn assert_invariants(&self) {
        let mut seen = 0usize;
        let mut concrete = 0usize;
        let mut stack: Vec<(NodeId, Option<NodeId>)> = Vec::new();
        if let Some(root) = self.root {
            stack.push((root, None));
        }
        while let Some((id, expected_parent)) = stack.pop() {
            let node = self.pool.node(id);
            seen += 1;
            assert_eq!(node.parent, expected_parent, "bad parent link on {id:?}");
            assert!(node.bit <= self.maxbits, "bit past tree width on {id:?}");
            match &node.prefix {
                Some(p) => {
                    concrete += 1;
                    assert_eq!(p.bitlen(), node.bit, "prefix off its bit on {id:?}");
                }
                None => {
                    assert!(
                        node.left.is_some() && node.right.is_some(),
                        "glue node {id:?} without two children"
                    );
                    assert!(node.data.is_none(), "payload on glue node {id:?}");
                }
            }
            for child in [node.left, node.right].into_iter().flatten() {
                let cn = self.pool.node(child);
                assert!(cn.bit > node.bit, "bits not increasing below {id:?}");
                stack.push((child, Some(id)));
            }
        }
        assert_eq!(seen, self.pool.active(), "unreachable nodes in pool");
        assert_eq!(concrete, self.pool.live_prefixes(), "prefix count drift");
    }
}

impl<T> std::fmt::Debug for Trie<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trie")
            .field("family", &self.family)
            .field("maxbits", &self.maxbits)
            .field("active_nodes", &self.pool.active())
            .field("prefixes", &self.pool.live_prefixes())
            .finish()
    }
}

/// Iterator over `(id, prefix, payload)` of concrete nodes, pre-order.
pub struct Iter<'a, T> {
    trie: &'a Trie<T>,
    stack: Vec<NodeId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a Prefix, Option<&'a T>);

    fn next(&mut self) -> Option<Self::Item> {
        let trie = self.trie;
        while let Some(id) = self.stack.pop() {
            let node = trie.pool.node(id);
            self.stack.extend(node.right);
            self.stack.extend(node.left);
            if let Some(prefix) = node.prefix.as_ref() {
                return Some((id, prefix, node.data.as_ref()));
            }
        }
        None
    }
}
