//! Batched neural-network inference: the `Backend` trait devices plug
//! into, and the manager that load-balances requests across them.
//!
//! Grounded on `original_source/src/engine/neural/network_manager.h`,
//! generalized from a libtorch-specific manager to a trait object over
//! backends (spec.md §9 polymorphism guidance) so this crate never
//! depends on a concrete tensor runtime. `SYNCHRONOUS_INFERENCE` in
//! `original_source/src/config.h` is why evaluation here is a plain
//! blocking call rather than a future/callback: batches are gathered
//! by the search workers and evaluated synchronously, matching spec.md
//! §4.7.

use crate::encoder::{self, Plane, INPUT_PLANES};
use crate::error::{EngineError, EngineResult};
use crate::policy_index::POLICY_SIZE;
use crate::chess::Position;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One position's encoded input, ready for a `Backend`.
pub struct EvalInput {
    pub planes: Vec<Plane>,
}

impl EvalInput {
    pub fn from_position(position: &Position) -> EvalInput {
        let planes = encoder::encode(position);
        debug_assert_eq!(planes.len(), INPUT_PLANES);
        EvalInput { planes }
    }
}

/// One position's raw network output: a full policy distribution over
/// [`POLICY_SIZE`] slots, a value in `[-1, 1]` from the perspective of
/// the side to move, and a moves-left estimate.
pub struct EvalOutput {
    pub policy: Vec<f32>,
    pub value: f32,
    pub moves_left: f32,
}

/// A device capable of evaluating batches of encoded positions. Decouples
/// the search core from any particular tensor runtime (libtorch, onnx,
/// a test double); `InferenceManager` only needs this much.
pub trait Backend: Send + Sync {
    fn evaluate_batch(&self, inputs: &[EvalInput]) -> EngineResult<Vec<EvalOutput>>;

    fn name(&self) -> &str {
        "backend"
    }

    /// Maximum batch size this backend accepts in one call.
    fn max_batch_size(&self) -> usize {
        256
    }
}

/// A `Backend` that knows no chess: uniform policy, zero value, a flat
/// moves-left guess. Stands in for a trained network the way the
/// teacher's `main.rs` wires up `RandomEvaluator` by default so the
/// binary runs end-to-end before any real weights are loaded -- real
/// deployments replace this with a `Backend` built from `load_weights`.
pub struct RandomBackend;

impl Backend for RandomBackend {
    fn evaluate_batch(&self, inputs: &[EvalInput]) -> EngineResult<Vec<EvalOutput>> {
        Ok(inputs.iter().map(|_| EvalOutput { policy: vec![1.0; POLICY_SIZE], value: 0.0, moves_left: 40.0 }).collect())
    }

    fn name(&self) -> &str {
        "random"
    }
}

struct Device {
    backend: Arc<dyn Backend>,
    in_flight: AtomicUsize,
}

/// Owns a pool of backends and routes batches to whichever currently has
/// the fewest positions in flight, mirroring the original's
/// least-loaded-device selection in `network_manager`.
pub struct InferenceManager {
    devices: Vec<Device>,
}

impl InferenceManager {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> InferenceManager {
        InferenceManager {
            devices: backends.into_iter().map(|backend| Device { backend, in_flight: AtomicUsize::new(0) }).collect(),
        }
    }

    fn least_loaded(&self) -> &Device {
        self.devices
            .iter()
            .min_by_key(|d| d.in_flight.load(Ordering::Relaxed))
            .expect("InferenceManager must have at least one backend")
    }

    /// Evaluates a batch of positions, returning, for each, the gathered
    /// policy prior for every legal move (softmax-with-temperature
    /// normalized over just those moves) plus the raw value and
    /// moves-left estimate.
    pub fn evaluate(&self, positions: &[Position], temperature: f32) -> EngineResult<Vec<PositionEval>> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        let device = self.least_loaded();
        device.in_flight.fetch_add(positions.len(), Ordering::Relaxed);
        let inputs: Vec<EvalInput> = positions.iter().map(EvalInput::from_position).collect();
        let result = device.backend.evaluate_batch(&inputs);
        device.in_flight.fetch_sub(positions.len(), Ordering::Relaxed);
        let outputs = result?;
        if outputs.len() != positions.len() {
            return Err(EngineError::Internal(format!(
                "backend {} returned {} outputs for {} inputs",
                device.backend.name(),
                outputs.len(),
                positions.len()
            )));
        }
        Ok(positions
            .iter()
            .zip(outputs)
            .map(|(position, output)| gather_policy(position, output, temperature))
            .collect())
    }
}

/// A position's evaluation, reduced to just the legal moves the search
/// tree cares about.
#[derive(Clone)]
pub struct PositionEval {
    pub priors: Vec<(crate::types::Move, f32)>,
    pub value: f32,
    pub moves_left: f32,
}

fn gather_policy(position: &Position, output: EvalOutput, temperature: f32) -> PositionEval {
    debug_assert_eq!(output.policy.len(), POLICY_SIZE);
    let legal = position.legal_moves();
    let mut logits: Vec<(crate::types::Move, f32)> = legal
        .iter()
        .filter_map(|&mv| crate::policy_index::policy_index(mv).map(|idx| (mv, output.policy[idx])))
        .collect();

    if logits.is_empty() {
        return PositionEval { priors: Vec::new(), value: output.value, moves_left: output.moves_left };
    }

    let t = temperature.max(1e-3);
    let max_logit = logits.iter().map(|&(_, l)| l).fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (_, l) in logits.iter_mut() {
        *l = ((*l - max_logit) / t).exp();
        sum += *l;
    }
    if sum > 0.0 {
        for (_, l) in logits.iter_mut() {
            *l /= sum;
        }
    }
    PositionEval { priors: logits, value: output.value, moves_left: output.moves_left }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Position;

    struct UniformBackend;

    impl Backend for UniformBackend {
        fn evaluate_batch(&self, inputs: &[EvalInput]) -> EngineResult<Vec<EvalOutput>> {
            Ok(inputs
                .iter()
                .map(|_| EvalOutput { policy: vec![1.0; POLICY_SIZE], value: 0.0, moves_left: 30.0 })
                .collect())
        }
    }

    #[test]
    fn test_uniform_policy_sums_to_one_over_legal_moves() {
        let manager = InferenceManager::new(vec![Arc::new(UniformBackend)]);
        let pos = Position::startpos();
        let evals = manager.evaluate(std::slice::from_ref(&pos), 1.0).unwrap();
        let sum: f32 = evals[0].priors.iter().map(|&(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(evals[0].priors.len(), 20);
    }

    #[test]
    fn test_least_loaded_routes_to_only_backend() {
        let manager = InferenceManager::new(vec![Arc::new(UniformBackend)]);
        let pos = Position::startpos();
        assert!(manager.evaluate(&[pos], 1.0).is_ok());
    }
}
