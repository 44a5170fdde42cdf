//! The MCTS tree: nodes, edges, the arena they live in, and the
//! reentrant per-node lock. See `search` for the orchestrator that
//! drives selection, expansion, and backpropagation over this tree.

pub mod lock;
pub mod memory;
pub mod node;

pub use memory::{Arena, NodeId};
pub use node::{puct_score, Edge, GameResult, Node, SolutionState};

use crate::chess::{generate_legal_moves, GameState, Position};

/// Classifies `position` as terminal if the game has already ended
/// there: checkmate, stalemate, insufficient material, the fifty-move
/// rule, or threefold repetition. Checkmate/stalemate/insufficient
/// material come straight from the move generator's board-derivable
/// `game_state` (spec.md §4.2); the two history-dependent draws are
/// layered on top here since the move generator can't see them.
/// Grounded on `original_source/src/engine/mcts/node.cpp`'s
/// `edge::expand`, whose threefold-repetition terminal branch was
/// commented out in the source; spec.md §9 Open Question 1 resolves
/// that in favor of treating repetition as a real draw, so it is
/// checked here (unlike the original).
pub fn classify_terminal(position: &Position) -> Option<GameResult> {
    match generate_legal_moves(position.board()).state {
        GameState::Checkmate => return Some(GameResult::Checkmate),
        GameState::Draw => return Some(GameResult::Draw),
        GameState::Playing => {}
    }
    if position.is_fifty_move_draw() || position.is_threefold_repetition() {
        return Some(GameResult::Draw);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Position;

    #[test]
    fn test_checkmate_classified() {
        // Fool's mate.
        let pos = Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
            .unwrap();
        assert_eq!(classify_terminal(&pos), Some(GameResult::Checkmate));
    }

    #[test]
    fn test_startpos_not_terminal() {
        assert_eq!(classify_terminal(&Position::startpos()), None);
    }

    #[test]
    fn test_bare_kings_is_draw() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert_eq!(classify_terminal(&pos), Some(GameResult::Draw));
    }
}
