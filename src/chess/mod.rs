//! The chess core: entangled-plane board representation, legal move
//! generation, and a thin `Position` wrapper that tracks the history
//! needed for threefold-repetition detection and neural-network input
//! encoding.

pub mod board;
pub mod movegen;
pub mod zobrist;

pub use board::Board;
pub use movegen::{apply_move, generate_legal_moves, GameState, MoveList, MovegenResult};

use crate::error::EngineError;
use crate::types::Move;

/// How many past boards the encoder needs (spec.md §4.6's 112-plane
/// input uses an 8-ply history window).
pub const HISTORY_LENGTH: usize = 8;

/// A board plus enough history to answer repetition queries and to
/// supply the encoder's history planes.
///
/// Grounded on the teacher's `Position` (`position/mod.rs`: board plus
/// halfmove/fullmove counters) generalized with a board-history stack,
/// since spec.md §9 Open Question 1 treats repetition as a real,
/// checkable draw condition rather than the original engine's
/// commented-out terminal branch.
#[derive(Clone)]
pub struct Position {
    board: Board,
    /// Boards since the last irreversible move (pawn move, capture,
    /// castling rights change), most recent last, used for repetition
    /// detection. Cleared whenever `halfmove_clock` resets to zero.
    history: Vec<Board>,
}

impl Position {
    pub fn new(board: Board) -> Position {
        Position { board, history: vec![board] }
    }

    pub fn from_fen(fen: &str) -> Result<Position, EngineError> {
        Ok(Position::new(Board::from_fen(fen)?))
    }

    pub fn startpos() -> Position {
        Position::new(Board::startpos())
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn legal_moves(&self) -> MoveList {
        generate_legal_moves(&self.board).moves
    }

    /// The board-derivable game state at the current position (playing,
    /// checkmate, or draw by stalemate/insufficient material). Fifty-move
    /// and threefold-repetition draws aren't board-derivable and are
    /// layered on top by `mcts::classify_terminal`.
    pub fn game_state(&self) -> GameState {
        generate_legal_moves(&self.board).state
    }

    /// Applies `mv`, pushing the prior board onto the repetition-history
    /// stack (or clearing it, if the move was irreversible).
    pub fn make_move(&mut self, mv: Move) {
        let next = apply_move(&self.board, mv);
        if next.halfmove_clock() == 0 {
            self.history.clear();
        }
        self.history.push(next);
        self.board = next;
    }

    /// True if the current position's hash has occurred three times in
    /// the reversible-move window, i.e. this is a threefold repetition.
    /// Per spec.md §9 Open Question 1 (resolved against
    /// `original_source`'s commented-out terminal branch), this is
    /// treated as a genuine draw, not skipped.
    pub fn is_threefold_repetition(&self) -> bool {
        let current = self.board.hash();
        self.history.iter().filter(|b| b.hash() == current).count() >= 3
    }

    /// True if `board` has occurred earlier in the reversible-move
    /// window at least once before, i.e. encoding it would set the
    /// encoder's repetition plane.
    pub fn is_repeated(&self, board: &Board) -> bool {
        self.history.iter().filter(|b| b.hash() == board.hash()).count() >= 2
    }

    pub fn is_fifty_move_draw(&self) -> bool {
        self.board.halfmove_clock() >= 100
    }

    /// Up to [`HISTORY_LENGTH`] most recent boards, oldest first,
    /// including the current one -- exactly the window the encoder
    /// walks to build history planes.
    pub fn recent_history(&self) -> &[Board] {
        let len = self.history.len();
        let start = len.saturating_sub(HISTORY_LENGTH);
        &self.history[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{square, Promotion, FILE_E, RANK_2, RANK_4};

    #[test]
    fn test_threefold_repetition() {
        let mut pos = Position::startpos();
        let knight_out = Move::new(square(crate::types::FILE_G, crate::types::RANK_1), square(crate::types::FILE_F, crate::types::RANK_3), Promotion::None);
        let knight_back = Move::new(square(crate::types::FILE_F, crate::types::RANK_3), square(crate::types::FILE_G, crate::types::RANK_1), Promotion::None);
        let black_out = Move::new(square(crate::types::FILE_G, crate::types::RANK_8), square(crate::types::FILE_F, crate::types::RANK_6), Promotion::None);
        let black_back = Move::new(square(crate::types::FILE_F, crate::types::RANK_6), square(crate::types::FILE_G, crate::types::RANK_8), Promotion::None);

        assert!(!pos.is_threefold_repetition());
        for _ in 0..2 {
            pos.make_move(knight_out);
            pos.make_move(black_out);
            pos.make_move(knight_back);
            pos.make_move(black_back);
        }
        assert!(pos.is_threefold_repetition());
    }

    #[test]
    fn test_irreversible_move_clears_history() {
        let mut pos = Position::startpos();
        pos.make_move(Move::new(square(FILE_E, RANK_2), square(FILE_E, RANK_4), Promotion::None));
        assert_eq!(pos.recent_history().len(), 1);
    }
}
