//! Data structures for the Patricia tree

use crate::prefix::Prefix;

/// Handle to a node inside a tree's pool.
///
/// The generation changes every time a slot is recycled, so a handle kept
/// past the node's removal never aliases a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// A tree node. Glue nodes (`prefix == None`) only exist to fork the tree and
/// always have two children.
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub(crate) bit: u8,          // bit tested to route further descent
    pub(crate) prefix: Option<Prefix>,
    pub(crate) data: Option<T>,  // caller payload, only set on concrete nodes
    pub(crate) parent: Option<NodeId>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
}

impl<T> Node<T> {
    pub(crate) fn concrete(prefix: Prefix) -> Self {
        Self {
            bit: prefix.bitlen(),
            prefix: Some(prefix),
            data: None,
            parent: None,
            left: None,
            right: None,
        }
    }

    pub(crate) fn glue(bit: u8) -> Self {
        Self {
            bit,
            prefix: None,
            data: None,
            parent: None,
            left: None,
            right: None,
        }
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    pub fn prefix(&self) -> Option<&Prefix> {
        self.prefix.as_ref()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn is_glue(&self) -> bool {
        self.prefix.is_none()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    pub(crate) fn child(&self, right: bool) -> Option<NodeId> {
        if right {
            self.right
        } else {
            self.left
        }
    }

    pub(crate) fn set_child(&mut self, right: bool, child: Option<NodeId>) {
        if right {
            self.right = child;
        } else {
            self.left = child;
        }
    }
}
