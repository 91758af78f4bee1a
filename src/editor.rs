//! Editable storage for top-level trees.
//!
//! [`Expr`] nodes are immutable and shared, so edits work on a copy of each tree
//! decomposed into a generational arena. Every slot keeps the id of the node it
//! came from, and trees are rebuilt into `Expr` values carrying the same ids.
//! There are no back pointers: the place a node hangs from is found by scanning
//! the arena.

use crate::Error;
use crate::ast::{Expr, IdGen, Kind, SENTINEL_UID, Uid};
use std::sync::Arc;

/// Handle to an arena slot. A handle goes stale once its slot is freed, even if
/// the slot is reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
enum Cell {
    Pair(NodeRef, NodeRef),
    Leaf(Expr),
}

#[derive(Debug)]
struct Entry {
    id: Uid,
    cell: Cell,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Where a node hangs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Root(usize),
    First(NodeRef),
    Rest(NodeRef),
}

/// Top-level trees addressable by node id
#[derive(Debug)]
pub struct Forest {
    ids: Arc<IdGen>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    roots: Vec<NodeRef>,
}

fn missing(id: Uid) -> Error {
    Error::EditError(format!("No node with id {id}"))
}

impl Forest {
    /// Nodes created by edits (new cells, replacement nulls) draw ids from `ids`
    pub fn new(ids: Arc<IdGen>) -> Self {
        Forest {
            ids,
            slots: Vec::new(),
            free: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Append a tree, returning the id of its root
    pub fn add_tree(&mut self, expr: &Expr) -> Uid {
        if let Some(root) = self.store(expr) {
            self.roots.push(root);
        }
        tracing::debug!(id = expr.id(), trees = self.roots.len(), "tree added");
        expr.id()
    }

    /// Current state of every tree, in insertion order
    pub fn trees(&self) -> Vec<Expr> {
        self.roots.iter().filter_map(|&root| self.build(root)).collect()
    }

    /// The tree whose root currently has id `uid`
    pub fn tree(&self, uid: Uid) -> Option<Expr> {
        let root = self
            .roots
            .iter()
            .copied()
            .find(|&root| self.get(root).is_some_and(|entry| entry.id == uid))?;
        self.build(root)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of live arena slots
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn contains(&self, id: Uid) -> bool {
        self.find_node(id).is_some()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.roots.clear();
    }

    /// The node with `id` and the cell whose `first` holds it.
    ///
    /// The cell is `None` for a tree root and for the atom closing a chain.
    pub fn find_by_id(&self, id: Uid) -> (Option<Expr>, Option<Expr>) {
        let Some(target) = self.find_node(id) else {
            return (None, None);
        };
        let cell = match self.link_of(target) {
            Some(Link::First(cell)) => self.build(cell),
            _ => None,
        };
        (cell, self.build(target))
    }

    /// Unlink the node with `id` and return it.
    ///
    /// An element of a chain takes its cell with it: whatever pointed at the cell
    /// now points at the cell's `rest`. A root takes the whole tree. The atom
    /// closing a dotted chain is replaced by Null. Interior cells of a chain are
    /// not elements and cannot be removed.
    pub fn remove_by_id(&mut self, id: Uid) -> Option<Expr> {
        let target = self.find_node(id)?;
        let removed = self.build(target)?;
        self.detach(target)?;
        self.free_subtree(target);
        tracing::debug!(id, "removed");
        Some(removed)
    }

    /// Move the node with `id` into a new cell right after the cell holding `after`
    pub fn insert_after_id(&mut self, id: Uid, after: Uid) -> Result<(), Error> {
        let moving = self.find_node(id).ok_or_else(|| missing(id))?;
        let anchor = self.find_node(after).ok_or_else(|| missing(after))?;
        if self.subtree_contains(moving, anchor) {
            return Err(Error::EditError(format!(
                "Cannot insert node {id} after a node inside itself"
            )));
        }
        let Some(Link::First(anchor_cell)) = self.link_of(anchor) else {
            return Err(Error::EditError(format!(
                "Node {after} is not an element of a list"
            )));
        };
        self.detach(moving).ok_or_else(|| {
            Error::EditError(format!("Node {id} is an interior cell of a list"))
        })?;

        // Read after detaching: the anchor cell's rest may have been the moved cell
        let next = match self.get(anchor_cell).map(|entry| &entry.cell) {
            Some(Cell::Pair(_, rest)) => *rest,
            _ => return Err(missing(after)),
        };
        let uid = self.ids.fresh();
        let cell = self.alloc(uid, Cell::Pair(moving, next));
        self.relink(Link::Rest(anchor_cell), cell);
        tracing::debug!(id, after, "moved");
        Ok(())
    }

    /// Replace the subtree rooted at `id` with a copy of `expr`
    pub fn overwrite_by_id(&mut self, id: Uid, expr: &Expr) -> Result<(), Error> {
        let target = self.find_node(id).ok_or_else(|| missing(id))?;
        let link = self.link_of(target).ok_or_else(|| missing(id))?;
        if matches!(link, Link::Rest(_)) && self.is_pair(target) {
            return Err(Error::EditError(format!(
                "Node {id} is an interior cell of a list"
            )));
        }
        let replacement = self.store(expr).ok_or_else(|| missing(expr.id()))?;
        self.relink(link, replacement);
        self.free_subtree(target);
        tracing::debug!(id, with = expr.id(), "overwritten");
        Ok(())
    }

    //
    // Arena plumbing
    //

    fn alloc(&mut self, id: Uid, cell: Cell) -> NodeRef {
        let entry = Some(Entry { id, cell });
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = entry;
                NodeRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry,
                });
                NodeRef {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, node: NodeRef) {
        let Some(slot) = self.slots.get_mut(node.index) else {
            return;
        };
        if slot.generation == node.generation && slot.entry.take().is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(node.index);
        }
    }

    fn get(&self, node: NodeRef) -> Option<&Entry> {
        self.slots
            .get(node.index)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn get_mut(&mut self, node: NodeRef) -> Option<&mut Entry> {
        self.slots
            .get_mut(node.index)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn is_pair(&self, node: NodeRef) -> bool {
        matches!(self.get(node), Some(Entry { cell: Cell::Pair(..), .. }))
    }

    /// Decompose `expr` into slots, children before their cell
    fn store(&mut self, expr: &Expr) -> Option<NodeRef> {
        enum Step<'a> {
            Visit(&'a Expr),
            Join(Uid),
        }
        let mut pending = vec![Step::Visit(expr)];
        let mut stored = Vec::new();
        while let Some(step) = pending.pop() {
            match step {
                Step::Visit(expr) => match expr.kind() {
                    Kind::Pair(first, rest) => {
                        pending.push(Step::Join(expr.id()));
                        pending.push(Step::Visit(first));
                        pending.push(Step::Visit(rest));
                    }
                    _ => stored.push(self.alloc(expr.id(), Cell::Leaf(expr.clone()))),
                },
                Step::Join(id) => {
                    let first = stored.pop()?;
                    let rest = stored.pop()?;
                    stored.push(self.alloc(id, Cell::Pair(first, rest)));
                }
            }
        }
        stored.pop()
    }

    /// Rebuild the `Expr` rooted at `node`, keeping every id
    fn build(&self, node: NodeRef) -> Option<Expr> {
        enum Step {
            Visit(NodeRef),
            Join(Uid),
        }
        let mut pending = vec![Step::Visit(node)];
        let mut built = Vec::new();
        while let Some(step) = pending.pop() {
            match step {
                Step::Visit(node) => {
                    let entry = self.get(node)?;
                    match &entry.cell {
                        Cell::Pair(first, rest) => {
                            pending.push(Step::Join(entry.id));
                            pending.push(Step::Visit(*rest));
                            pending.push(Step::Visit(*first));
                        }
                        Cell::Leaf(expr) => built.push(expr.clone()),
                    }
                }
                Step::Join(id) => {
                    let rest = built.pop()?;
                    let first = built.pop()?;
                    built.push(Expr::with_id(id, Kind::Pair(first, rest)));
                }
            }
        }
        built.pop()
    }

    fn free_subtree(&mut self, node: NodeRef) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let Some(Cell::Pair(first, rest)) = self.get(node).map(|entry| &entry.cell) {
                stack.push(*first);
                stack.push(*rest);
            }
            self.release(node);
        }
    }

    fn subtree_contains(&self, root: NodeRef, needle: NodeRef) -> bool {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node == needle {
                return true;
            }
            if let Some(Cell::Pair(first, rest)) = self.get(node).map(|entry| &entry.cell) {
                stack.push(*first);
                stack.push(*rest);
            }
        }
        false
    }

    /// Lowest slot holding `id`
    fn find_node(&self, id: Uid) -> Option<NodeRef> {
        if id == SENTINEL_UID {
            return None;
        }
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .filter(|entry| entry.id == id)
                .map(|_| NodeRef {
                    index,
                    generation: slot.generation,
                })
        })
    }

    fn link_of(&self, target: NodeRef) -> Option<Link> {
        if let Some(i) = self.roots.iter().position(|&root| root == target) {
            return Some(Link::Root(i));
        }
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let here = NodeRef {
                index,
                generation: slot.generation,
            };
            match slot.entry.as_ref()?.cell {
                Cell::Pair(first, _) if first == target => Some(Link::First(here)),
                Cell::Pair(_, rest) if rest == target => Some(Link::Rest(here)),
                _ => None,
            }
        })
    }

    fn relink(&mut self, link: Link, to: NodeRef) {
        match link {
            Link::Root(i) => {
                if let Some(root) = self.roots.get_mut(i) {
                    *root = to;
                }
            }
            Link::First(cell) => {
                if let Some(Entry {
                    cell: Cell::Pair(first, _),
                    ..
                }) = self.get_mut(cell)
                {
                    *first = to;
                }
            }
            Link::Rest(cell) => {
                if let Some(Entry {
                    cell: Cell::Pair(_, rest),
                    ..
                }) = self.get_mut(cell)
                {
                    *rest = to;
                }
            }
        }
    }

    /// Unlink `target` from wherever it hangs, leaving its slots allocated
    fn detach(&mut self, target: NodeRef) -> Option<NodeRef> {
        match self.link_of(target)? {
            Link::Root(i) => {
                self.roots.remove(i);
            }
            Link::First(cell) => {
                let rest = match self.get(cell)?.cell {
                    Cell::Pair(_, rest) => rest,
                    Cell::Leaf(_) => return None,
                };
                if let Some(link) = self.link_of(cell) {
                    self.relink(link, rest);
                }
                self.release(cell);
            }
            Link::Rest(_) if self.is_pair(target) => return None,
            Link::Rest(owner) => {
                let null = Expr::null(&self.ids);
                let terminator = self.alloc(null.id(), Cell::Leaf(null));
                self.relink(Link::Rest(owner), terminator);
            }
        }
        Some(target)
    }
}
