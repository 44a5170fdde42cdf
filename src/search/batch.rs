//! Cross-thread shared-batch evaluation, grounded on
//! `original_source/src/engine/mcts/search.cpp`'s
//! `add_to_shared_batch`/`process_shared_batch`: rather than every
//! worker calling the network with a single leaf, workers accumulate
//! leaves reached during concurrent tree descents into one shared
//! buffer and block on a condition variable until somebody evaluates
//! the whole buffer at once, matching spec.md §4.6/§4.7's "at most one
//! inference in flight per search" and "it waits on a condition
//! variable that the inference manager signals per-node."
//!
//! A worker that is first to arrive in a round starts its wait clock; if
//! the batch never reaches its target size before `max_wait` elapses
//! (a lone worker, or the rest of the pool busy backpropagating), that
//! worker force-fires the batch itself rather than waiting indefinitely
//! for batchmates that may never come.

use crate::chess::Position;
use crate::error::EngineResult;
use crate::inference::{InferenceManager, PositionEval};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct BatchState {
    positions: Vec<Position>,
    results: Option<EngineResult<Vec<PositionEval>>>,
    /// Bumped every time a round fires; lets a waiter notice its round
    /// finished even if it wasn't the thread that fired it.
    generation: u64,
    first_arrival: Option<Instant>,
}

pub struct SharedBatch {
    state: Mutex<BatchState>,
    cv: Condvar,
    target_size: usize,
    max_wait: Duration,
}

impl SharedBatch {
    pub fn new(target_size: usize, max_wait: Duration) -> SharedBatch {
        SharedBatch {
            state: Mutex::new(BatchState { positions: Vec::new(), results: None, generation: 0, first_arrival: None }),
            cv: Condvar::new(),
            target_size: target_size.max(1),
            max_wait,
        }
    }

    /// Adds `position` to the current round's batch and blocks until
    /// that round has been evaluated, returning this position's own
    /// result. The round fires either once `target_size` positions have
    /// joined, or once `max_wait` has elapsed since the first arrival,
    /// whichever comes first.
    pub fn evaluate(&self, inference: &InferenceManager, position: Position, temperature: f32) -> EngineResult<PositionEval> {
        let mut guard = self.state.lock().unwrap();
        let my_generation = guard.generation;
        let my_index = guard.positions.len();
        guard.positions.push(position);
        if guard.first_arrival.is_none() {
            guard.first_arrival = Some(Instant::now());
        }

        if guard.positions.len() >= self.target_size {
            self.fire(&mut guard, inference, temperature);
            return Self::extract(&guard, my_index);
        }

        loop {
            if guard.generation != my_generation {
                return Self::extract(&guard, my_index);
            }
            let deadline = guard.first_arrival.unwrap() + self.max_wait;
            let wait_for = deadline.saturating_duration_since(Instant::now());
            let (next_guard, timeout) = self.cv.wait_timeout(guard, wait_for).unwrap();
            guard = next_guard;
            if guard.generation != my_generation {
                return Self::extract(&guard, my_index);
            }
            if timeout.timed_out() {
                // Still my round and nobody else fired it: force-drain so
                // this worker never blocks indefinitely on batchmates that
                // may never arrive.
                self.fire(&mut guard, inference, temperature);
                return Self::extract(&guard, my_index);
            }
        }
    }

    fn fire(&self, guard: &mut BatchState, inference: &InferenceManager, temperature: f32) {
        let positions = std::mem::take(&mut guard.positions);
        guard.results = Some(inference.evaluate(&positions, temperature));
        guard.generation += 1;
        guard.first_arrival = None;
        self.cv.notify_all();
    }

    fn extract(guard: &BatchState, index: usize) -> EngineResult<PositionEval> {
        match guard.results.as_ref().expect("round must have fired before a waiter is released") {
            Ok(evals) => Ok(evals[index].clone()),
            Err(err) => Err(err.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Position;
    use crate::inference::{Backend, EvalInput, EvalOutput};
    use crate::policy_index::POLICY_SIZE;
    use std::sync::Arc;

    struct FixedBackend;

    impl Backend for FixedBackend {
        fn evaluate_batch(&self, inputs: &[EvalInput]) -> EngineResult<Vec<EvalOutput>> {
            Ok(inputs.iter().map(|_| EvalOutput { policy: vec![1.0; POLICY_SIZE], value: 0.25, moves_left: 8.0 }).collect())
        }
    }

    #[test]
    fn test_batch_fires_once_target_size_reached() {
        let inference = InferenceManager::new(vec![Arc::new(FixedBackend)]);
        let batch = Arc::new(SharedBatch::new(2, Duration::from_millis(200)));

        let b2 = batch.clone();
        let handle = std::thread::spawn(move || b2.evaluate(&InferenceManager::new(vec![Arc::new(FixedBackend)]), Position::startpos(), 1.0));
        let result = batch.evaluate(&inference, Position::startpos(), 1.0);
        let other = handle.join().unwrap();
        assert!(result.is_ok());
        assert!(other.is_ok());
    }

    #[test]
    fn test_lone_worker_force_drains_after_timeout() {
        let inference = InferenceManager::new(vec![Arc::new(FixedBackend)]);
        let batch = SharedBatch::new(4, Duration::from_millis(20));
        let result = batch.evaluate(&inference, Position::startpos(), 1.0);
        assert!(result.is_ok());
        assert!((result.unwrap().value - 0.25).abs() < 1e-6);
    }
}
