//! Zobrist hash tables, built once behind a `lazy_static!` from a fixed
//! seed so hashes are reproducible across runs (transposition lookups
//! and perft cross-checks depend on this).
//!
//! Grounded on the teacher's `ZobristArrays`, referenced (but not
//! present in the retrieved sources) from `position/board.rs` as
//! `zobrist: &'static ZobristArrays` -- we rebuild the table here using
//! the same `lazy_static` idiom the teacher uses for `BoardGeometry`.

use crate::types::{Color, PieceType, Square};
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Arbitrary fixed seed. Any constant works; reproducibility across
/// runs is the only requirement.
const ZOBRIST_SEED: u64 = 0x5a_0b_31_57_c0_ff_ee_42;

pub struct ZobristArrays {
    /// `pieces[color][piece_type][square]`.
    pub pieces: [[[u64; 64]; 6]; 2],
    pub castling: [u64; 16],
    /// `en_passant[file]`, with an extra slot (index 8) for "no file".
    pub en_passant: [u64; 9],
    pub side_to_move: u64,
}

impl ZobristArrays {
    fn build() -> ZobristArrays {
        let mut rng = StdRng::seed_from_u64(ZOBRIST_SEED);
        let mut pieces = [[[0u64; 64]; 6]; 2];
        for color in 0..2usize {
            for pt in 0..6usize {
                for sq in 0..64usize {
                    pieces[color][pt][sq] = rng.gen();
                }
            }
        }
        let mut castling = [0u64; 16];
        for entry in castling.iter_mut() {
            *entry = rng.gen();
        }
        let mut en_passant = [0u64; 9];
        for entry in en_passant.iter_mut() {
            *entry = rng.gen();
        }
        ZobristArrays { pieces, castling, en_passant, side_to_move: rng.gen() }
    }

    #[inline]
    pub fn piece(&self, color: Color, piece_type: PieceType, sq: Square) -> u64 {
        self.pieces[color][piece_type][sq]
    }
}

lazy_static! {
    pub static ref ZOBRIST: ZobristArrays = ZobristArrays::build();
}
