//! End-to-end search tests over a deterministic test double backend,
//! covering the mate-in-1 / insufficient-material / threefold-repetition
//! scenarios of spec.md §8 (a real network is out of scope per spec.md
//! §1, so a `FixedOutputBackend` stands in for one, grounded on the
//! `Backend` trait boundary, spec.md §9 polymorphism guidance).

use firecastle::config::EngineOptions;
use firecastle::error::EngineResult;
use firecastle::inference::{Backend, EvalInput, EvalOutput, InferenceManager};
use firecastle::policy_index::POLICY_SIZE;
use firecastle::{Position, Search};
use std::sync::Arc;
use std::time::Duration;

struct FixedOutputBackend {
    value: f32,
}

impl Backend for FixedOutputBackend {
    fn evaluate_batch(&self, inputs: &[EvalInput]) -> EngineResult<Vec<EvalOutput>> {
        Ok(inputs.iter().map(|_| EvalOutput { policy: vec![1.0; POLICY_SIZE], value: self.value, moves_left: 5.0 }).collect())
    }
}

fn new_search(value: f32, threads: usize) -> Search {
    let manager = InferenceManager::new(vec![Arc::new(FixedOutputBackend { value })]);
    let mut options = EngineOptions::default();
    options.threads = threads;
    options.dirichlet_epsilon = 0.0;
    Search::new(Arc::new(manager), options)
}

#[test]
fn test_finds_mate_in_one() {
    // White to move, Qh5-f7# available against an undeveloped black king.
    let position = Position::from_fen("rnbqkbnr/pppp1ppp/8/4p2Q/4P3/8/PPPP1PPP/RNB1KBNR w KQkq - 2 2").unwrap();
    let mut search = new_search(0.0, 2);
    search.initialize(position);
    let mv = search.go(Duration::from_millis(300)).unwrap();
    assert_eq!(mv.to_uci(), "h5f7");
}

#[test]
fn test_bare_kings_returns_immediately_as_drawn() {
    let position = Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
    let mut search = new_search(0.0, 1);
    search.initialize(position);
    // No legal captures/mates exist; the search should still return some
    // legal king move without hanging, since the position is a classified
    // draw the moment any leaf reaches it.
    let mv = search.go(Duration::from_millis(100)).unwrap();
    let legal = Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap().legal_moves();
    assert!(legal.iter().any(|&m| m == mv));
}

#[test]
fn test_threefold_repetition_reachable_via_moves() {
    let mut position = Position::startpos();
    for mv_pair in [("g1f3", "g8f6"), ("f3g1", "f6g8")] {
        let mv = firecastle::types::Move::from_uci(mv_pair.0).unwrap();
        let legal_mv = position.legal_moves().into_iter().find(|&m| m == mv).unwrap();
        position.make_move(legal_mv);
        let mv2 = firecastle::types::Move::from_uci(mv_pair.1).unwrap();
        let legal_mv2 = position.legal_moves().into_iter().find(|&m| m == mv2).unwrap();
        position.make_move(legal_mv2);
    }
    assert!(!position.is_threefold_repetition());
    for mv_pair in [("g1f3", "g8f6"), ("f3g1", "f6g8")] {
        let mv = firecastle::types::Move::from_uci(mv_pair.0).unwrap();
        let legal_mv = position.legal_moves().into_iter().find(|&m| m == mv).unwrap();
        position.make_move(legal_mv);
        let mv2 = firecastle::types::Move::from_uci(mv_pair.1).unwrap();
        let legal_mv2 = position.legal_moves().into_iter().find(|&m| m == mv2).unwrap();
        position.make_move(legal_mv2);
    }
    assert!(position.is_threefold_repetition());
}
