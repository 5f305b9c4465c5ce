//! Ownership forest - which wrapper keeps which alive
//!
//! Design: nodes live in an arena indexed by [`NodeId`] (slot + generation,
//! so a recycled slot never aliases an old handle). Parent/child links are
//! plain indices; the strong reference a parent holds on a child lives in a
//! separate map keyed by the child's node. Nothing here drops a wrapper:
//! every operation hands the references it gave up back as [`Released`],
//! to be dropped once the runtime lock is no longer held.

use crate::error::{Error, Result};
use crate::logging;
use crate::wrapper::{Ownership, Wrapper};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Where ownership of a native object goes.
#[derive(Clone)]
pub enum TransferTarget {
    /// Native code owns it outright.
    None,
    /// Native code owns it and holds a reference to the wrapper.
    NoDynamicOwner,
    /// The owner wrapper keeps it alive.
    Owner(Arc<Wrapper>),
}

impl fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferTarget::None => f.write_str("None"),
            TransferTarget::NoDynamicOwner => f.write_str("NoDynamicOwner"),
            TransferTarget::Owner(o) => write!(f, "Owner({})", o.wrapper_type().name()),
        }
    }
}

/// Wrapper references given up by a forest operation.
#[must_use = "released references must be dropped outside the runtime lock"]
#[derive(Default)]
pub struct Released(Vec<Arc<Wrapper>>);

impl Released {
    fn push(&mut self, w: Arc<Wrapper>) {
        self.0.push(w);
    }

    pub(crate) fn extend(&mut self, other: Released) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Default)]
struct Node {
    generation: u32,
    occupied: bool,
    wrapper: Weak<Wrapper>,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    prev_sibling: Option<NodeId>,
}

#[derive(Default)]
pub struct OwnershipForest {
    nodes: Vec<Node>,
    free: Vec<u32>,
    /// Parent-held references, keyed by the child's node.
    owned: HashMap<NodeId, Arc<Wrapper>>,
    /// References held by native code (`NativeHasExtraRef`).
    native_refs: HashMap<NodeId, Arc<Wrapper>>,
}

impl OwnershipForest {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.index as usize)
            .filter(|n| n.occupied && n.generation == id.generation)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index as usize)
            .filter(|n| n.occupied && n.generation == id.generation)
    }

    fn node_of(&self, w: &Wrapper) -> Option<NodeId> {
        w.node().filter(|id| self.node(*id).is_some())
    }

    fn ensure_node(&mut self, w: &Arc<Wrapper>) -> NodeId {
        if let Some(id) = self.node_of(w) {
            return id;
        }
        let id = match self.free.pop() {
            Some(index) => {
                let node = &mut self.nodes[index as usize];
                node.occupied = true;
                node.wrapper = Arc::downgrade(w);
                NodeId {
                    index,
                    generation: node.generation,
                }
            }
            None => {
                let index = self.nodes.len() as u32;
                self.nodes.push(Node {
                    occupied: true,
                    wrapper: Arc::downgrade(w),
                    ..Node::default()
                });
                NodeId { index, generation: 0 }
            }
        };
        w.set_node(Some(id));
        id
    }

    pub fn parent(&self, w: &Wrapper) -> Option<Arc<Wrapper>> {
        let parent = self.node(self.node_of(w)?)?.parent?;
        self.node(parent)?.wrapper.upgrade()
    }

    /// Children, most recently attached first.
    pub fn children(&self, w: &Wrapper) -> Vec<Arc<Wrapper>> {
        let mut out = Vec::new();
        let mut next = self.node_of(w).and_then(|id| self.node(id)).and_then(|n| n.first_child);
        while let Some(id) = next {
            if let Some(child) = self.owned.get(&id) {
                out.push(child.clone());
            }
            next = self.node(id).and_then(|n| n.next_sibling);
        }
        out
    }

    pub fn is_owned_by_native(&self, w: &Wrapper) -> bool {
        self.node_of(w).is_some_and(|id| self.native_refs.contains_key(&id))
    }

    /// Make `child` the first child of `parent`, detaching it from any
    /// previous parent.
    pub fn attach(&mut self, child: &Arc<Wrapper>, parent: &Arc<Wrapper>) -> Result<Released> {
        if self.is_ancestor_or_self(child, parent) {
            return Err(Error::Value(format!(
                "{} object cannot be owned by itself or its descendants",
                child.wrapper_type().name()
            )));
        }
        let mut released = self.detach(child);
        let child_id = self.ensure_node(child);
        let parent_id = self.ensure_node(parent);

        let old_first = self.node(parent_id).and_then(|n| n.first_child);
        if let Some(first) = old_first.and_then(|id| self.node_mut(id)) {
            first.prev_sibling = Some(child_id);
        }
        if let Some(node) = self.node_mut(child_id) {
            node.parent = Some(parent_id);
            node.next_sibling = old_first;
            node.prev_sibling = None;
        }
        if let Some(node) = self.node_mut(parent_id) {
            node.first_child = Some(child_id);
        }
        if let Some(previous) = self.owned.insert(child_id, child.clone()) {
            released.push(previous);
        }
        logging::log_attach(child.wrapper_type().name(), parent.wrapper_type().name());
        Ok(released)
    }

    /// Unlink `child` from its parent. The parent's reference is released last.
    pub fn detach(&mut self, child: &Wrapper) -> Released {
        let mut released = Released::default();
        let Some(child_id) = self.node_of(child) else {
            return released;
        };
        if self.node(child_id).is_some_and(|n| n.parent.is_some()) {
            logging::log_detach(child.wrapper_type().name());
        }
        self.unlink(child_id);
        if let Some(strong) = self.owned.remove(&child_id) {
            released.push(strong);
        }
        released
    }

    fn unlink(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else { return };
        let (parent, prev, next) = (node.parent.take(), node.prev_sibling.take(), node.next_sibling.take());
        let Some(parent) = parent else { return };

        match prev {
            Some(prev) => {
                if let Some(p) = self.node_mut(prev) {
                    p.next_sibling = next;
                }
            }
            None => {
                if let Some(p) = self.node_mut(parent) {
                    p.first_child = next;
                }
            }
        }
        if let Some(n) = next.and_then(|id| self.node_mut(id)) {
            n.prev_sibling = prev;
        }
    }

    fn is_ancestor_or_self(&self, candidate: &Wrapper, of: &Wrapper) -> bool {
        let Some(candidate) = self.node_of(candidate) else {
            return std::ptr::eq(candidate, of);
        };
        let mut current = self.node_of(of);
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        false
    }

    fn hold_native_ref(&mut self, w: &Arc<Wrapper>) -> Option<Arc<Wrapper>> {
        let id = self.ensure_node(w);
        self.native_refs.insert(id, w.clone())
    }

    fn drop_native_ref(&mut self, w: &Wrapper) -> Option<Arc<Wrapper>> {
        let id = self.node_of(w)?;
        self.native_refs.remove(&id)
    }

    /// Hand ownership of `w`'s native object to native code.
    pub fn transfer_to(&mut self, w: &Arc<Wrapper>, target: TransferTarget) -> Result<Released> {
        let from = w.ownership();
        let mut released = Released::default();
        match target {
            TransferTarget::None => {
                match self.drop_native_ref(w) {
                    Some(strong) => released.push(strong),
                    None => released.extend(self.detach(w)),
                }
                w.set_ownership(Ownership::NativeOwned);
            }
            TransferTarget::NoDynamicOwner => {
                if from != Ownership::NativeHasExtraRef {
                    released.extend(self.detach(w));
                    if let Some(previous) = self.hold_native_ref(w) {
                        released.push(previous);
                    }
                    w.set_ownership(Ownership::NativeHasExtraRef);
                }
            }
            TransferTarget::Owner(owner) => {
                if self.is_ancestor_or_self(w, &owner) {
                    return Err(Error::Value(format!(
                        "{} object cannot be owned by itself or its descendants",
                        w.wrapper_type().name()
                    )));
                }
                if let Some(strong) = self.drop_native_ref(w) {
                    released.push(strong);
                }
                released.extend(self.attach(w, &owner)?);
                w.set_ownership(Ownership::DynamicOwned);
            }
        }
        logging::log_transfer(w.wrapper_type().name(), from.as_str(), w.ownership().as_str());
        Ok(released)
    }

    /// Hand ownership back to the dynamic side.
    pub fn transfer_back(&mut self, w: &Arc<Wrapper>) -> Released {
        let from = w.ownership();
        let mut released = Released::default();
        match self.drop_native_ref(w) {
            Some(strong) => released.push(strong),
            None => released.extend(self.detach(w)),
        }
        w.set_ownership(Ownership::DynamicOwned);
        logging::log_transfer(w.wrapper_type().name(), from.as_str(), Ownership::DynamicOwned.as_str());
        released
    }

    /// Native side destroyed `w`'s object: it no longer owns anything nor
    /// is owned by anyone.
    pub fn forget(&mut self, w: &Wrapper) -> Released {
        let mut released = self.detach(w);
        if let Some(strong) = self.drop_native_ref(w) {
            released.push(strong);
        }
        w.set_ownership(Ownership::NativeOwned);
        released
    }

    /// Free the node of a collected wrapper, releasing its children.
    pub fn release_node(&mut self, id: NodeId) -> Released {
        let mut released = Released::default();
        if self.node(id).is_none() {
            return released;
        }
        self.unlink(id);
        let mut next = self.node(id).and_then(|n| n.first_child);
        while let Some(child) = next {
            next = self.node(child).and_then(|n| n.next_sibling);
            if let Some(node) = self.node_mut(child) {
                node.parent = None;
                node.prev_sibling = None;
                node.next_sibling = None;
            }
            if let Some(strong) = self.owned.remove(&child) {
                released.push(strong);
            }
        }
        if let Some(strong) = self.owned.remove(&id) {
            released.push(strong);
        }
        if let Some(strong) = self.native_refs.remove(&id) {
            released.push(strong);
        }
        if let Some(node) = self.node_mut(id) {
            *node = Node {
                generation: node.generation.wrapping_add(1),
                ..Node::default()
            };
            self.free.push(id.index);
        }
        released
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests;
