//! The node arena: bump allocation, a transposition table, and memory
//! reclamation.
//!
//! Grounded on `original_source/src/engine/mcts/memory.h` and
//! `memory.cpp`: `memory::allocate_fused_node`, `transposition_check`,
//! and `free_unused`'s ancestor-preserving compaction. The original
//! allocates nodes as placement-new over raw byte blocks addressed by
//! `node*`, and its `free_unused` must copy survivors in a careful
//! lower-block-then-lower-address order because C++ pointers alias
//! their storage directly. Rust's `Vec<T>` already gives stable,
//! non-aliasing logical indices across growth, so this arena keeps the
//! *behavior* (block-sized growth, transposition reuse, reachability-
//! based compaction that preserves only the new root's subtree) while
//! replacing raw-byte placement-new with a slab of `Box<Node>` addressed
//! by [`NodeId`].
//!
//! Per spec.md §4.5/§5, two workers must be able to read and expand
//! different edges of the same tree concurrently -- the real
//! concurrency control lives in each [`Node`]'s own
//! [`crate::mcts::lock::ReentrantSpinlock`], not in the arena. The
//! arena's own `RwLock` is held only long enough to reserve or read a
//! slab slot; `get` returns a reference into a `Box<Node>`, whose heap
//! address is stable across `Vec` growth, so the read lock is dropped
//! before the reference is used. This is sound only because no element
//! is ever removed or replaced while references may be outstanding --
//! `clear`/`free_unused` are only ever called between searches, with no
//! worker threads alive.

use crate::error::{EngineError, EngineResult};
use crate::mcts::node::Node;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

const NO_ROOT: u32 = u32::MAX;

/// A stable index into the arena's node slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn new(index: usize) -> NodeId {
        NodeId(index as u32)
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The node arena plus the transposition table keyed on Zobrist hash.
///
/// Mirrors `memory`'s fields: `max_nn_batch_size`, `block_size`
/// (preserved here purely as the slab growth granularity), and
/// `transposition_table`. `nodes` and `transposition_table` are
/// independent locks -- a lookup in one never blocks on the other -- and
/// `root` is a plain atomic so the hot-path root read never blocks on
/// either.
pub struct Arena {
    nodes: RwLock<Vec<Box<Node>>>,
    block_size_nodes: usize,
    max_nn_batch_size: usize,
    transposition_table: Mutex<HashMap<u64, NodeId>>,
    root: AtomicU32,
}

impl Arena {
    pub fn new(block_size_bytes: usize, max_nn_batch_size: usize) -> Arena {
        let node_size = std::mem::size_of::<Node>().max(1);
        let block_size_nodes = (block_size_bytes / node_size).max(64);
        Arena {
            nodes: RwLock::new(Vec::with_capacity(block_size_nodes)),
            block_size_nodes,
            max_nn_batch_size,
            transposition_table: Mutex::new(HashMap::new()),
            root: AtomicU32::new(NO_ROOT),
        }
    }

    #[inline]
    pub fn max_nn_batch_size(&self) -> usize {
        self.max_nn_batch_size
    }

    /// Returns a reference to the node at `id`. Briefly takes the slab's
    /// read lock to fetch the `Box`'s heap pointer, then drops it -- see
    /// the module doc for why the resulting reference stays valid.
    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        let guard = self.nodes.read().unwrap();
        let ptr: *const Node = guard[id.index()].as_ref();
        drop(guard);
        unsafe { &*ptr }
    }

    #[inline]
    pub fn root(&self) -> Option<NodeId> {
        match self.root.load(Ordering::Acquire) {
            NO_ROOT => None,
            index => Some(NodeId::new(index as usize)),
        }
    }

    #[inline]
    pub fn set_root(&self, id: NodeId) {
        self.root.store(id.0, Ordering::Release);
    }

    /// Allocates a fresh node with `edges`, growing the slab in
    /// block-sized steps just as `sys_malloc_new_block` grows the raw
    /// arena in `block_size`-byte chunks. Fails with
    /// [`EngineError::OutOfMemory`] rather than aborting the process
    /// when the allocator can't satisfy the reservation -- out-of-memory
    /// is fatal to the current search only, per spec.md §4.4/§7.
    pub fn allocate_node(&self, node: Node) -> EngineResult<NodeId> {
        let mut guard = self.nodes.write().unwrap();
        if guard.len() == guard.capacity() {
            guard
                .try_reserve(self.block_size_nodes)
                .map_err(|_| EngineError::OutOfMemory { context: "mcts node arena" })?;
        }
        guard.push(Box::new(node));
        Ok(NodeId::new(guard.len() - 1))
    }

    /// Looks up an existing node for `hash`, registering `candidate` as
    /// the canonical node for that hash if none exists yet. Returns the
    /// id to actually use (mirrors `memory::transposition_check`: reuse
    /// an existing subtree when two move sequences reach the same
    /// position instead of re-expanding it).
    pub fn transposition_check(&self, hash: u64, candidate: NodeId) -> NodeId {
        *self.transposition_table.lock().unwrap().entry(hash).or_insert(candidate)
    }

    pub fn transposition_lookup(&self, hash: u64) -> Option<NodeId> {
        self.transposition_table.lock().unwrap().get(&hash).copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    /// True once accumulated node count crosses the deallocation
    /// threshold derived from `deallocation_minimum`/`deallocation_factor`
    /// (spec.md §9 Open Question 4): reclaim once there are at least
    /// `deallocation_minimum` nodes AND the unreachable fraction is
    /// worth the rebuild, approximated here as total nodes exceeding
    /// `deallocation_minimum` by a `deallocation_factor` multiple of the
    /// live subtree size.
    pub fn should_compact(&self, new_root: NodeId, deallocation_minimum: usize, deallocation_factor: usize) -> bool {
        let guard = self.nodes.read().unwrap();
        if guard.len() < deallocation_minimum {
            return false;
        }
        let live = count_reachable(&guard, new_root);
        guard.len() > live.saturating_mul(deallocation_factor).max(deallocation_minimum)
    }

    /// Reclaims memory by keeping only the subtree reachable from
    /// `new_root`, matching `memory::free_unused`'s intent (discard
    /// everything outside the path the game actually took) without its
    /// in-place address-ordering machinery -- see the module doc for
    /// why that part doesn't translate. Must only run with no worker
    /// threads holding node references.
    pub fn free_unused(&self, new_root: NodeId) {
        let mut guard = self.nodes.write().unwrap();
        let old_len = guard.len();
        let mut remap: Vec<Option<NodeId>> = vec![None; old_len];
        let mut order = Vec::new();
        let mut stack = vec![new_root];
        let mut seen = vec![false; old_len];
        while let Some(id) = stack.pop() {
            if seen[id.index()] {
                continue;
            }
            seen[id.index()] = true;
            order.push(id);
            guard[id.index()].with_edges_ref(|edges| {
                for edge in edges {
                    if let Some(child) = edge.child {
                        if !seen[child.index()] {
                            stack.push(child);
                        }
                    }
                }
            });
        }
        order.reverse();
        for (new_index, &old_id) in order.iter().enumerate() {
            remap[old_id.index()] = Some(NodeId::new(new_index));
        }

        let mut new_nodes = Vec::with_capacity(order.len());
        for &old_id in &order {
            let old_index = old_id.index();
            let mut node = std::mem::replace(&mut guard[old_index], Box::new(Node::new(Vec::new(), None)));
            node.with_edges(|edges| {
                for edge in edges.iter_mut() {
                    if let Some(child) = edge.child {
                        edge.child = remap[child.index()];
                    }
                }
            });
            new_nodes.push(node);
        }
        *guard = new_nodes;
        drop(guard);

        let mut table = self.transposition_table.lock().unwrap();
        table.retain(|_, id| remap[id.index()].is_some());
        for id in table.values_mut() {
            *id = remap[id.index()].unwrap();
        }
        drop(table);

        self.root.store(remap[new_root.index()].unwrap().0, Ordering::Release);
    }

    pub fn clear(&self) {
        self.nodes.write().unwrap().clear();
        self.transposition_table.lock().unwrap().clear();
        self.root.store(NO_ROOT, Ordering::Release);
    }
}

/// Counts nodes reachable from `root`, operating directly on an
/// already-locked slab so callers never take the arena's read lock
/// twice (the `RwLock` used here offers no reentrancy guarantee).
fn count_reachable(nodes: &[Box<Node>], root: NodeId) -> usize {
    let mut seen = vec![false; nodes.len()];
    let mut stack = vec![root];
    let mut count = 0;
    while let Some(id) = stack.pop() {
        if seen[id.index()] {
            continue;
        }
        seen[id.index()] = true;
        count += 1;
        nodes[id.index()].with_edges_ref(|edges| {
            for edge in edges {
                if let Some(child) = edge.child {
                    if !seen[child.index()] {
                        stack.push(child);
                    }
                }
            }
        });
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcts::node::Edge;
    use crate::types::{square, Move, Promotion, FILE_A, FILE_B, RANK_1, RANK_2};

    #[test]
    fn test_allocate_and_get() {
        let arena = Arena::new(4096, 16);
        let id = arena.allocate_node(Node::new(Vec::new(), None)).unwrap();
        assert_eq!(arena.get(id).visits(), 0);
    }

    #[test]
    fn test_transposition_reuse() {
        let arena = Arena::new(4096, 16);
        let a = arena.allocate_node(Node::new(Vec::new(), None)).unwrap();
        let b = arena.allocate_node(Node::new(Vec::new(), None)).unwrap();
        let chosen_first = arena.transposition_check(42, a);
        let chosen_second = arena.transposition_check(42, b);
        assert_eq!(chosen_first, a);
        assert_eq!(chosen_second, a);
    }

    #[test]
    fn test_free_unused_keeps_only_reachable() {
        let arena = Arena::new(4096, 16);
        let leaf = arena.allocate_node(Node::new(Vec::new(), None)).unwrap();
        let mv = Move::new(square(FILE_A, RANK_1), square(FILE_B, RANK_2), Promotion::None);
        let root_edges = vec![Edge { mv, prior: 1.0, child: Some(leaf), terminal_result: None }];
        let root = arena.allocate_node(Node::new(root_edges, None)).unwrap();
        let orphan = arena.allocate_node(Node::new(Vec::new(), None)).unwrap();
        let _ = orphan;
        arena.set_root(root);
        assert_eq!(arena.node_count(), 3);
        arena.free_unused(root);
        assert_eq!(arena.node_count(), 2);
    }
}
