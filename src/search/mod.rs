//! The MCTS search orchestrator: a persistent worker pool, PUCT tree
//! traversal, cross-thread batched neural-network evaluation, and
//! time/node-budget management.
//!
//! Grounded on `original_source/src/engine/mcts/search.h`/`search.cpp`
//! for the algorithm (`search::search`, `prepare_search`,
//! `expand_tree_puct_worker_synchronous`, `advance_root`, `best_move`,
//! `expand_tree`'s deadline loop with periodic root-edge sampling) and
//! on the teacher's `engine/threading.rs`/`search/threading.rs` for the
//! persistent-pool-parked-on-a-condition-variable idiom. Workers are
//! spawned once and parked on `paused_cv` between searches rather than
//! spawned and joined per `go()` call, matching the original's
//! long-lived thread pool; leaves reached during concurrent descents
//! are pooled into one [`batch::SharedBatch`] per search so the network
//! is actually called on batches rather than one leaf at a time,
//! matching `add_to_shared_batch`/`process_shared_batch`.

mod batch;

use crate::chess::Position;
use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::inference::InferenceManager;
use crate::mcts::{classify_terminal, puct_score, Arena, Edge, Node, NodeId, SolutionState};
use crate::types::Move;
use batch::SharedBatch;
use log::{debug, info};
use rand::thread_rng;
use rand_distr::{Distribution, Gamma};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A node's edge paired with the node id it descends from, recorded
/// while walking the tree so backpropagation can retrace the path.
struct PathStep {
    node: NodeId,
    edge_index: usize,
}

/// Minimum visits a root edge needs before the sampling loop trusts its
/// visit count enough to act on it (spec.md §4.6's "once the search has
/// accumulated enough visits to be meaningful").
const MIN_VISITS_FOR_EARLY_EXIT: u32 = 200;
/// If the best root edge has at least this many times the visits of the
/// runner-up, the result is settled and the remaining time budget is
/// spent for nothing -- stop early.
const EARLY_EXIT_RATIO: u32 = 5;
/// If the runner-up is within this fraction of the best edge's visits,
/// the race is still close enough that cutting the search short would
/// be premature -- extend the deadline instead.
const EXTEND_RATIO_NUM: u32 = 9;
const EXTEND_RATIO_DEN: u32 = 10;
const EXTEND_STEP: Duration = Duration::from_millis(150);
/// How often the root-edge sampling loop wakes up to consider
/// extending or cutting short the deadline.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// State every worker thread shares, kept behind `Arc` so `Search`
/// itself can be cheaply handed a new deadline/batch per `go()` call
/// without touching the threads.
struct SharedState {
    arena: Arena,
    root_position: Mutex<Position>,
    inference: Arc<InferenceManager>,
    options: Mutex<EngineOptions>,
    stop_flag: AtomicBool,
    terminate: AtomicBool,
    paused: Mutex<bool>,
    paused_cv: Condvar,
    active_workers: AtomicUsize,
    nodes_done: AtomicU64,
    deadline: Mutex<Instant>,
    batch: Mutex<Option<Arc<SharedBatch>>>,
}

/// Owns the tree and drives a persistent pool of worker threads over
/// it. One `Search` exists per engine instance; `initialize`/
/// `advance_root` reuse its arena across moves the way
/// `search::initialize`/`advance_root` do.
pub struct Search {
    state: Arc<SharedState>,
    workers: Vec<JoinHandle<()>>,
}

impl Search {
    pub fn new(inference: Arc<InferenceManager>, options: EngineOptions) -> Search {
        let arena = Arena::new(options.block_size, options.max_nn_batch_size);
        let state = Arc::new(SharedState {
            arena,
            root_position: Mutex::new(Position::startpos()),
            inference,
            options: Mutex::new(options),
            stop_flag: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            paused: Mutex::new(true),
            paused_cv: Condvar::new(),
            active_workers: AtomicUsize::new(0),
            nodes_done: AtomicU64::new(0),
            deadline: Mutex::new(Instant::now()),
            batch: Mutex::new(None),
        });
        Search { state, workers: Vec::new() }
    }

    pub fn set_option(&self, name: &str, value: &str) {
        self.state.options.lock().unwrap().set(name, value);
    }

    /// Resets the tree to `position`, matching `search::initialize`.
    pub fn initialize(&self, position: Position) {
        self.state.arena.clear();
        *self.state.root_position.lock().unwrap() = position;
    }

    /// Replays `mv` at the root. If the move's edge already leads to an
    /// expanded child, that subtree becomes the new root and everything
    /// else is pruned (`memory::free_unused`); otherwise the tree is
    /// simply reset to the resulting position, matching
    /// `search::advance_root`. Only safe to call while no worker is
    /// active (`go()` always calls `stop()` before returning).
    pub fn advance_root(&self, mv: Move) {
        let mut root_position = self.state.root_position.lock().unwrap();
        let arena = &self.state.arena;
        let options = self.state.options.lock().unwrap();
        let mut reused = false;
        if let Some(root_id) = arena.root() {
            let child = arena.get(root_id).with_edges_ref(|edges| edges.iter().find(|e| e.mv == mv).and_then(|e| e.child));
            if let Some(child_id) = child {
                if arena.should_compact(child_id, options.deallocation_minimum, options.deallocation_factor) {
                    arena.free_unused(child_id);
                } else {
                    arena.set_root(child_id);
                }
                reused = true;
            }
        }
        if !reused {
            arena.clear();
        }
        root_position.make_move(mv);
    }

    pub fn is_searching(&self) -> bool {
        self.state.active_workers.load(Ordering::Relaxed) > 0
    }

    /// Grows the worker pool up to `options.threads`, spawning any
    /// threads still missing. The pool never shrinks across searches --
    /// a thread count lowered mid-engine-lifetime takes effect only on
    /// the next resize upward, a deliberate simplification recorded in
    /// DESIGN.md.
    fn ensure_workers(&mut self) {
        let wanted = self.state.options.lock().unwrap().threads.max(1);
        while self.workers.len() < wanted {
            let state = self.state.clone();
            self.workers.push(std::thread::spawn(move || worker_loop(state)));
        }
    }

    /// Sets the paused flag, notifies the pool so any thread parked on
    /// the condition variable wakes to check it, and spins until every
    /// worker has reported itself idle -- matching the review's required
    /// "`stop_search` sets paused flag; spin until every worker reports
    /// idle" contract rather than relying on `thread::join`.
    pub fn stop(&mut self) {
        self.state.stop_flag.store(true, Ordering::Relaxed);
        while self.state.active_workers.load(Ordering::Relaxed) > 0 {
            std::thread::yield_now();
        }
        *self.state.paused.lock().unwrap() = true;
    }

    /// Runs a search for up to `movetime`, waking the (already spawned)
    /// worker pool, then periodically samples the root edges' visit
    /// counts to extend or cut short the deadline before blocking until
    /// the workers finish, matching `search::expand_tree`'s deadline
    /// loop plus `search::best_move`.
    pub fn go(&mut self, movetime: Duration) -> EngineResult<Move> {
        self.prepare_root()?;
        self.ensure_workers();

        let options = self.state.options.lock().unwrap().clone();
        let mut deadline = Instant::now() + movetime.saturating_sub(Duration::from_millis(options.move_overhead_ms));
        *self.state.deadline.lock().unwrap() = deadline;

        self.state.stop_flag.store(false, Ordering::Relaxed);
        self.state.nodes_done.store(0, Ordering::Relaxed);
        *self.state.batch.lock().unwrap() =
            Some(Arc::new(SharedBatch::new(options.threads.max(1), Duration::from_millis(50))));

        *self.state.paused.lock().unwrap() = false;
        self.state.paused_cv.notify_all();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if options.nodes_limit != 0 && self.state.nodes_done.load(Ordering::Relaxed) >= options.nodes_limit {
                break;
            }
            std::thread::sleep(SAMPLE_INTERVAL.min(deadline - now));
            if let Some(adjusted) = self.sample_root_edges(deadline) {
                deadline = adjusted;
                *self.state.deadline.lock().unwrap() = deadline;
            }
        }

        self.stop();
        info!("search finished, {} nodes", self.state.nodes_done.load(Ordering::Relaxed));
        self.best_move()
    }

    /// Compares the top two root edges by visit count and decides
    /// whether the deadline should be cut short (the result is already
    /// settled) or extended (the race is still close), per spec.md
    /// §4.6's periodic root-edge sampling. Returns `None` when neither
    /// threshold is crossed, leaving the deadline untouched.
    fn sample_root_edges(&self, deadline: Instant) -> Option<Instant> {
        let arena = &self.state.arena;
        let root_id = arena.root()?;
        let root = arena.get(root_id);
        let mut visits: Vec<u32> = root.with_edges_ref(|edges| {
            edges.iter().map(|e| e.child.map(|c| arena.get(c).visits()).unwrap_or(0)).collect()
        });
        if visits.len() < 2 {
            return None;
        }
        visits.sort_unstable_by(|a, b| b.cmp(a));
        let (best, second) = (visits[0], visits[1]);
        if best < MIN_VISITS_FOR_EARLY_EXIT {
            return None;
        }
        if second.saturating_mul(EARLY_EXIT_RATIO) < best {
            return Some(Instant::now());
        }
        if second.saturating_mul(EXTEND_RATIO_DEN) > best.saturating_mul(EXTEND_RATIO_NUM) {
            return Some(deadline + EXTEND_STEP);
        }
        None
    }

    /// Ensures the root node exists and has Dirichlet noise mixed into
    /// its priors, matching `search::prepare_search`.
    fn prepare_root(&self) -> EngineResult<()> {
        let arena = &self.state.arena;
        if arena.root().is_some() {
            return Ok(());
        }
        let position = self.state.root_position.lock().unwrap().clone();
        let options = self.state.options.lock().unwrap().clone();
        let node_id = expand_leaf(arena, &self.state.inference, &position, options.temperature)?;
        arena.set_root(node_id);
        add_dirichlet_noise(arena, node_id, options.dirichlet_alpha, options.dirichlet_epsilon);
        Ok(())
    }

    /// Selects the root edge with the most visits, matching
    /// `search::best_move`'s primary criterion (an immediately solved
    /// win, if one exists, short-circuits the visit-count comparison).
    pub fn best_move(&self) -> EngineResult<Move> {
        let arena = &self.state.arena;
        let root_id = arena.root().ok_or_else(|| EngineError::Internal("search not initialized".into()))?;
        let root = arena.get(root_id);
        root.with_edges_ref(|edges| {
            if edges.is_empty() {
                return Err(EngineError::Internal("root has no legal moves".into()));
            }
            if let Some(winning) = edges.iter().find(|e| {
                e.terminal_result.map(|r| r.to_solution().flip() == SolutionState::Win).unwrap_or(false)
                    || e.child.map(|c| arena.get(c).is_solved() && arena.get(c).solution().flip() == SolutionState::Win).unwrap_or(false)
            }) {
                return Ok(winning.mv);
            }
            let best = edges.iter().max_by_key(|e| e.child.map(|c| arena.get(c).visits()).unwrap_or(0)).unwrap();
            Ok(best.mv)
        })
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.state.terminate.store(true, Ordering::Relaxed);
        self.state.stop_flag.store(true, Ordering::Relaxed);
        *self.state.paused.lock().unwrap() = false;
        self.state.paused_cv.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn add_dirichlet_noise(arena: &Arena, root_id: NodeId, alpha: f32, epsilon: f32) {
    if epsilon <= 0.0 {
        return;
    }
    let node = arena.get(root_id);
    node.with_edges(|edges| {
        if edges.is_empty() {
            return;
        }
        let gamma = match Gamma::new(alpha.max(1e-3), 1.0) {
            Ok(g) => g,
            Err(_) => return,
        };
        let mut rng = thread_rng();
        let mut noise: Vec<f32> = (0..edges.len()).map(|_| gamma.sample(&mut rng)).collect();
        let sum: f32 = noise.iter().sum();
        if sum > 0.0 {
            for n in noise.iter_mut() {
                *n /= sum;
            }
        }
        for (edge, n) in edges.iter_mut().zip(noise) {
            edge.prior = (1.0 - epsilon) * edge.prior + epsilon * n;
        }
    });
}

/// A persistent worker thread's body: parks on `paused_cv` between
/// searches, and while unpaused runs PUCT iterations until the stop
/// flag, deadline, or node limit fires, matching the original's
/// long-lived thread pool rather than a spawn-per-search model.
fn worker_loop(state: Arc<SharedState>) {
    loop {
        {
            let mut paused = state.paused.lock().unwrap();
            while *paused {
                if state.terminate.load(Ordering::Relaxed) {
                    return;
                }
                paused = state.paused_cv.wait(paused).unwrap();
            }
        }
        if state.terminate.load(Ordering::Relaxed) {
            return;
        }

        state.active_workers.fetch_add(1, Ordering::SeqCst);
        let batch = state.batch.lock().unwrap().clone();
        let options = state.options.lock().unwrap().clone();

        loop {
            if state.stop_flag.load(Ordering::Relaxed) || Instant::now() >= *state.deadline.lock().unwrap() {
                break;
            }
            if options.nodes_limit != 0 && state.nodes_done.load(Ordering::Relaxed) >= options.nodes_limit {
                break;
            }
            let Some(batch) = batch.as_ref() else { break };
            let root = state.root_position.lock().unwrap().clone();
            match run_one_iteration(&state.arena, &root, &state.inference, batch, &options) {
                Ok(()) => {
                    state.nodes_done.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    debug!("search iteration failed: {err}");
                    break;
                }
            }
        }

        state.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One full select -> expand -> backpropagate cycle, matching one pass
/// through `expand_tree_puct_worker_synchronous`'s inner loop.
fn run_one_iteration(
    arena: &Arena,
    root_position: &Position,
    inference: &InferenceManager,
    batch: &SharedBatch,
    options: &EngineOptions,
) -> EngineResult<()> {
    let mut position = root_position.clone();
    let mut path = Vec::new();

    let root_id = arena.root().ok_or_else(|| EngineError::Internal("root not initialized".into()))?;
    let mut current = root_id;

    let (value, moves_left) = loop {
        let node = arena.get(current);
        if node.is_solved() || node.terminal.is_some() {
            break (node.terminal.map(|t| t.value()).unwrap_or(0.0), 0.0);
        }
        // Spec.md §4.5: the PUCT numerator's parent term is the parent's
        // total visits *including* other workers' in-flight descents
        // through it, not just completed visits.
        let parent_visits_total = (node.visits() + node.pending()).max(1);
        let chosen = node.with_edges_ref(|edges| {
            if edges.is_empty() {
                return None;
            }
            let mut best_idx = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (i, edge) in edges.iter().enumerate() {
                let child = edge.child.map(|id| arena.get(id));
                let score = puct_score(edge, child, parent_visits_total, options.c_puct);
                if score > best_score {
                    best_score = score;
                    best_idx = i;
                }
            }
            Some(best_idx)
        });
        let edge_index = match chosen {
            Some(idx) => idx,
            None => break (0.0, 0.0),
        };

        let (mv, terminal_result, child) =
            node.with_edges_ref(|edges| { let e = &edges[edge_index]; (e.mv, e.terminal_result, e.child) });
        path.push(PathStep { node: current, edge_index });
        position.make_move(mv);

        if let Some(result) = terminal_result {
            break (result.value(), 0.0);
        }
        match child {
            Some(child_id) => {
                arena.get(child_id).add_pending(1);
                current = child_id;
            }
            None => {
                let (new_node_value, new_moves_left) =
                    expand_and_link(arena, inference, batch, current, edge_index, &position, options)?;
                break (new_node_value, new_moves_left);
            }
        }
    };

    backpropagate(arena, &path, value, moves_left);
    Ok(())
}

/// Expands the leaf reached at `(parent, edge_index)`: classifies it as
/// terminal, checks the transposition table, or submits it to the
/// shared batch for evaluation, then links the edge to the new (or
/// reused) node. Returns the value/moves-left to backpropagate, from
/// the new node's own perspective (the caller flips signs while walking
/// back up).
fn expand_and_link(
    arena: &Arena,
    inference: &InferenceManager,
    batch: &SharedBatch,
    parent: NodeId,
    edge_index: usize,
    position: &Position,
    options: &EngineOptions,
) -> EngineResult<(f64, f64)> {
    if let Some(result) = classify_terminal(position) {
        arena.get(parent).with_edges(|edges| edges[edge_index].terminal_result = Some(result));
        return Ok((result.value(), 0.0));
    }

    let hash = position.board().hash();
    if let Some(existing) = arena.transposition_lookup(hash) {
        arena.get(parent).with_edges(|edges| edges[edge_index].child = Some(existing));
        let node = arena.get(existing);
        return Ok((node.q(), node.moves_left()));
    }

    // Joins the search-wide shared batch instead of calling the network
    // alone: other workers' concurrent leaf expansions ride along in the
    // same inference call, per spec.md §4.6/§4.7.
    let eval = batch.evaluate(inference, position.clone(), options.temperature)?;
    let edges: Vec<Edge> = eval.priors.into_iter().map(|(mv, p)| Edge::new(mv, p)).collect();
    let value = eval.value as f64;
    let moves_left = eval.moves_left as f64;

    let new_id = arena.allocate_node(Node::new(edges, None))?;
    let canonical = arena.transposition_check(hash, new_id);
    arena.get(parent).with_edges(|edges| edges[edge_index].child = Some(canonical));
    Ok((value, moves_left))
}

/// Walks `path` from leaf to root, updating each node's `N`/`W` with
/// the value flipped at every ply (each node's `W` is stored from its
/// own side-to-move's perspective), matching `node::update_value`'s
/// backprop and `propagate_solved_value`'s minimax-style solution
/// update.
fn backpropagate(arena: &Arena, path: &[PathStep], leaf_value: f64, leaf_moves_left: f64) {
    let mut value = leaf_value;
    let mut moves_left = leaf_moves_left;
    for step in path.iter().rev() {
        value = -value;
        moves_left += 1.0;
        let node = arena.get(step.node);
        node.record_visit(value, moves_left);
        recompute_solution(arena, step.node);
    }
}

/// Recomputes `node`'s solution state from its children, matching
/// `propagate_solved_value`: a node is a proven win if any edge leads
/// to a proven loss for the side to move there (i.e. a win for us), a
/// proven loss if every edge is a proven win for the opponent, and a
/// proven draw if every edge is solved and none is better.
fn recompute_solution(arena: &Arena, node_id: NodeId) {
    let node = arena.get(node_id);
    if node.is_solved() || node.terminal.is_some() {
        return;
    }
    let outcome = node.with_edges_ref(|edges| {
        if edges.is_empty() {
            return None;
        }
        let mut all_solved = true;
        let mut worst_for_us = SolutionState::Win;
        for edge in edges {
            let child_solution = if let Some(result) = edge.terminal_result {
                Some(result.to_solution().flip())
            } else if let Some(child_id) = edge.child {
                let child = arena.get(child_id);
                if child.is_solved() {
                    Some(child.solution().flip())
                } else {
                    None
                }
            } else {
                None
            };
            match child_solution {
                Some(SolutionState::Win) => return Some(SolutionState::Win),
                Some(other) => {
                    if rank_for_us(other) < rank_for_us(worst_for_us) {
                        worst_for_us = other;
                    }
                }
                None => all_solved = false,
            }
        }
        if all_solved {
            Some(worst_for_us)
        } else {
            None
        }
    });
    if let Some(state) = outcome {
        node.make_solved(state);
    }
}

fn rank_for_us(state: SolutionState) -> i32 {
    match state {
        SolutionState::Win => 2,
        SolutionState::Draw => 1,
        SolutionState::Loss => 0,
        SolutionState::Unknown => -1,
    }
}

/// Evaluates and allocates a brand-new node for `position` with no
/// parent edge yet to link -- used only to create the root. This is a
/// one-off synchronous call, not part of the per-iteration hot path, so
/// it bypasses the shared batch and calls the network directly.
fn expand_leaf(arena: &Arena, inference: &InferenceManager, position: &Position, temperature: f32) -> EngineResult<NodeId> {
    if let Some(result) = classify_terminal(position) {
        return arena.allocate_node(Node::new(Vec::new(), Some(result)));
    }
    let evals = inference.evaluate(std::slice::from_ref(position), temperature)?;
    let eval = evals.into_iter().next().expect("evaluate returns one output per input");
    let edges: Vec<Edge> = eval.priors.into_iter().map(|(mv, p)| Edge::new(mv, p)).collect();
    arena.allocate_node(Node::new(edges, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{Backend, EvalInput, EvalOutput};
    use crate::policy_index::POLICY_SIZE;
    use std::sync::Arc;

    struct FixedOutputBackend {
        value: f32,
    }

    impl Backend for FixedOutputBackend {
        fn evaluate_batch(&self, inputs: &[EvalInput]) -> EngineResult<Vec<EvalOutput>> {
            Ok(inputs.iter().map(|_| EvalOutput { policy: vec![1.0; POLICY_SIZE], value: self.value, moves_left: 10.0 }).collect())
        }
    }

    fn search_with_fixed_value(value: f32) -> Search {
        let manager = InferenceManager::new(vec![Arc::new(FixedOutputBackend { value })]);
        let mut options = EngineOptions::default();
        options.threads = 1;
        Search::new(Arc::new(manager), options)
    }

    #[test]
    fn test_root_expansion_creates_legal_edges() {
        let search = search_with_fixed_value(0.0);
        search.initialize(Position::startpos());
        search.prepare_root().unwrap();
        let root = search.state.arena.root().unwrap();
        assert_eq!(search.state.arena.get(root).edge_count(), 20);
    }

    #[test]
    fn test_go_returns_a_legal_move() {
        let mut search = search_with_fixed_value(0.1);
        search.initialize(Position::startpos());
        let mv = search.go(Duration::from_millis(50)).unwrap();
        let legal = Position::startpos().legal_moves();
        assert!(legal.iter().any(|&m| m == mv));
    }

    #[test]
    fn test_advance_root_resets_to_new_position() {
        let mut search = search_with_fixed_value(0.0);
        search.initialize(Position::startpos());
        let mv = search.go(Duration::from_millis(20)).unwrap();
        search.advance_root(mv);
        let pos = search.state.root_position.lock().unwrap();
        assert_eq!(pos.board().to_move(), crate::types::BLACK);
    }

    #[test]
    fn test_multiple_threads_share_one_batch() {
        let manager = InferenceManager::new(vec![Arc::new(FixedOutputBackend { value: 0.2 })]);
        let mut options = EngineOptions::default();
        options.threads = 4;
        let mut search = Search::new(Arc::new(manager), options);
        search.initialize(Position::startpos());
        let mv = search.go(Duration::from_millis(80)).unwrap();
        let legal = Position::startpos().legal_moves();
        assert!(legal.iter().any(|&m| m == mv));
    }
}
