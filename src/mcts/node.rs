//! `Node` and `Edge`: the MCTS tree's in-memory representation.
//!
//! Grounded directly on `original_source/src/engine/mcts/node.h` and
//! `node.cpp` -- `solution_state`, `game_state`, the `edge`/`node` pair,
//! `puct_select`, `make_solved`, `propagate_solved_value`, and
//! `adjust_value_for_solved_branch`. The original stores `N`/`W`/
//! `Npending` as `copyable_atomic<T>` so PUCT selection can read them
//! without taking the node lock, and only locks around structural
//! changes to the edge list (expansion, solving); this is preserved
//! here as atomics for the numeric stats plus a [`ReentrantSpinlock`]
//! guarding the edge list, since `propagate_solved_value` walks back up
//! through parents and can, via a transposition, re-enter a node it is
//! already holding.

use crate::mcts::lock::ReentrantSpinlock;
use crate::mcts::memory::NodeId;
use crate::types::Move;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionState {
    Unknown,
    Win,
    Draw,
    Loss,
}

impl SolutionState {
    fn to_u8(self) -> u8 {
        match self {
            SolutionState::Unknown => 0,
            SolutionState::Win => 1,
            SolutionState::Draw => 2,
            SolutionState::Loss => 3,
        }
    }

    fn from_u8(v: u8) -> SolutionState {
        match v {
            1 => SolutionState::Win,
            2 => SolutionState::Draw,
            3 => SolutionState::Loss,
            _ => SolutionState::Unknown,
        }
    }

    /// The solution state as seen from the opposite side to move, i.e.
    /// the parent's perspective one ply up.
    pub fn flip(self) -> SolutionState {
        match self {
            SolutionState::Win => SolutionState::Loss,
            SolutionState::Loss => SolutionState::Win,
            other => other,
        }
    }
}

/// Terminal classification of a position reached by expansion, mirroring
/// `game_state` in `original_source/src/chess/board.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Checkmate,
    Draw,
    TablebaseWin,
    TablebaseDraw,
    TablebaseLoss,
}

impl GameResult {
    /// The scalar value of this terminal result from the perspective of
    /// the side to move at the terminal node.
    pub fn value(&self) -> f64 {
        match self {
            GameResult::Checkmate => -1.0,
            GameResult::Draw | GameResult::TablebaseDraw => 0.0,
            GameResult::TablebaseWin => 1.0,
            GameResult::TablebaseLoss => -1.0,
        }
    }

    pub fn to_solution(&self) -> SolutionState {
        match self {
            GameResult::Checkmate | GameResult::TablebaseLoss => SolutionState::Loss,
            GameResult::Draw | GameResult::TablebaseDraw => SolutionState::Draw,
            GameResult::TablebaseWin => SolutionState::Win,
        }
    }
}

/// One outgoing edge from a node: a candidate move, its prior
/// probability from the policy head, and (once expanded) the child node
/// it leads to.
pub struct Edge {
    pub mv: Move,
    pub prior: f32,
    pub child: Option<NodeId>,
    /// Set when the position reached via this edge is known to be
    /// terminal without needing to expand a child node (mirrors
    /// `edge::set_terminal`): no node is allocated for a pure terminal.
    pub terminal_result: Option<GameResult>,
}

impl Edge {
    pub fn new(mv: Move, prior: f32) -> Edge {
        Edge { mv, prior, child: None, terminal_result: None }
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.child.is_some() || self.terminal_result.is_some()
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal_result.is_some()
    }
}

/// A node in the search tree: a position reached by some path from the
/// root, with one edge per legal move. `N`/`Npending`/`W` are atomics so
/// PUCT selection can read them without locking; the edge list and
/// solution state are guarded by `lock` because expansion mutates the
/// list's length and solving can touch ancestors out of order.
///
/// # Safety
/// `edges` is only ever read or written through [`Node::with_edges`],
/// which holds `lock` for the duration of the closure -- this is the
/// same invariant the original engine's raw-pointer-plus-spinlock
/// design relies on, made explicit here via `UnsafeCell` + a manual
/// `Sync` impl instead of C++'s implicit aliasing.
pub struct Node {
    edges: UnsafeCell<Vec<Edge>>,
    visits: AtomicU32,
    pending: AtomicU32,
    value_sum_bits: AtomicU64,
    moves_left_sum_bits: AtomicU64,
    solution: AtomicU8,
    pub terminal: Option<GameResult>,
    lock: ReentrantSpinlock,
}

unsafe impl Sync for Node {}

impl Node {
    pub fn new(edges: Vec<Edge>, terminal: Option<GameResult>) -> Node {
        let solution = terminal.map(|t| t.to_solution()).unwrap_or(SolutionState::Unknown);
        Node {
            edges: UnsafeCell::new(edges),
            visits: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            value_sum_bits: AtomicU64::new(0.0f64.to_bits()),
            moves_left_sum_bits: AtomicU64::new(0.0f64.to_bits()),
            solution: AtomicU8::new(solution.to_u8()),
            terminal,
            lock: ReentrantSpinlock::new(),
        }
    }

    #[inline]
    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_pending(&self, delta: i32) {
        if delta >= 0 {
            self.pending.fetch_add(delta as u32, Ordering::Relaxed);
        } else {
            self.pending.fetch_sub((-delta) as u32, Ordering::Relaxed);
        }
    }

    #[inline]
    fn value_sum(&self) -> f64 {
        f64::from_bits(self.value_sum_bits.load(Ordering::Relaxed))
    }

    fn add_f64(cell: &AtomicU64, delta: f64) {
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let new = f64::from_bits(current) + delta;
            match cell.compare_exchange_weak(current, new.to_bits(), Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Records one backpropagated visit: increments `N`, adds `value`
    /// to `W`, adds `moves_left` to the moves-left accumulator, and
    /// removes one pending (virtual-loss) count. Matches
    /// `node::update_value`.
    pub fn record_visit(&self, value: f64, moves_left: f64) {
        self.visits.fetch_add(1, Ordering::Relaxed);
        Self::add_f64(&self.value_sum_bits, value);
        Self::add_f64(&self.moves_left_sum_bits, moves_left);
        self.add_pending(-1);
    }

    /// Mean value from the perspective of the side to move at this
    /// node, `W / N`, or `0.0` for an unvisited node.
    #[inline]
    pub fn q(&self) -> f64 {
        let n = self.visits();
        if n == 0 {
            0.0
        } else {
            self.value_sum() / n as f64
        }
    }

    #[inline]
    pub fn moves_left(&self) -> f64 {
        let n = self.visits();
        if n == 0 {
            0.0
        } else {
            f64::from_bits(self.moves_left_sum_bits.load(Ordering::Relaxed)) / n as f64
        }
    }

    #[inline]
    pub fn solution(&self) -> SolutionState {
        SolutionState::from_u8(self.solution.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_solved(&self) -> bool {
        self.solution() != SolutionState::Unknown
    }

    /// Marks this node as solved with a known outcome, per
    /// `node::make_solved`.
    pub fn make_solved(&self, state: SolutionState) {
        self.solution.store(state.to_u8(), Ordering::Relaxed);
    }

    /// Runs `f` with exclusive access to the edge list, under `lock`.
    /// Reentrant: the same thread may call this again (directly or via
    /// recursion into a transposed ancestor) before releasing the outer
    /// call.
    pub fn with_edges<R>(&self, f: impl FnOnce(&mut Vec<Edge>) -> R) -> R {
        self.lock.lock();
        let result = f(unsafe { &mut *self.edges.get() });
        self.lock.unlock();
        result
    }

    /// Read-only snapshot access to the edge list, for selection.
    pub fn with_edges_ref<R>(&self, f: impl FnOnce(&[Edge]) -> R) -> R {
        self.lock.lock();
        let result = f(unsafe { &*self.edges.get() });
        self.lock.unlock();
        result
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.with_edges_ref(|edges| edges.len())
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.terminal.is_some() || self.edge_count() > 0
    }
}

/// PUCT selection score for one edge, given the parent's total visit
/// count (including pending). Mirrors `node::puct_select`'s per-edge
/// formula: `Q + c_puct * P * sqrt(N_parent) / (1 + N_child)`, with the
/// child's `Q` negated because it is stored from the child's own
/// perspective.
#[inline]
pub fn puct_score(edge: &Edge, child: Option<&Node>, parent_visits: u32, c_puct: f32) -> f32 {
    let (q, n_child) = match child {
        Some(node) => (-node.q() as f32, node.visits() + node.pending()),
        // An unexpanded edge gets Q = -1: pessimistic optimism for the
        // parent, so an edge never visited isn't treated as a known draw.
        None => (-1.0, 0),
    };
    let u = c_puct * edge.prior * (parent_visits as f32).sqrt() / (1.0 + n_child as f32);
    q + u
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{square, Promotion, FILE_E, RANK_2, RANK_4};

    #[test]
    fn test_q_of_unvisited_is_zero() {
        let node = Node::new(Vec::new(), None);
        assert_eq!(node.q(), 0.0);
    }

    #[test]
    fn test_record_visit_accumulates() {
        let node = Node::new(Vec::new(), None);
        node.add_pending(1);
        node.record_visit(1.0, 10.0);
        node.record_visit(-1.0, 20.0);
        assert_eq!(node.visits(), 2);
        assert_eq!(node.q(), 0.0);
        assert_eq!(node.moves_left(), 15.0);
        assert_eq!(node.pending(), 0);
    }

    #[test]
    fn test_puct_prefers_higher_prior_when_unexpanded() {
        let m = Move::new(square(FILE_E, RANK_2), square(FILE_E, RANK_4), Promotion::None);
        let low_prior = Edge::new(m, 0.1);
        let high_prior = Edge::new(m, 0.9);
        let low_score = puct_score(&low_prior, None, 1, 2.0);
        let high_score = puct_score(&high_prior, None, 1, 2.0);
        assert!(high_score > low_score);
    }

    #[test]
    fn test_solution_flip() {
        assert_eq!(SolutionState::Win.flip(), SolutionState::Loss);
        assert_eq!(SolutionState::Draw.flip(), SolutionState::Draw);
    }
}
