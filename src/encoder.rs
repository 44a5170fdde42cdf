//! Neural-network input encoding: history planes, auxiliary planes, and
//! canonical symmetry-transform selection.
//!
//! Grounded on `original_source/external/LeelaUtils/encoder.cpp`:
//! `ChooseTransform()`'s exact bit-level rules (no transform once
//! castling rights are gone, flip toward the queenside, mirror toward
//! the first ranks, transpose toward the a1-h8 diagonal, with a
//! tie-break comparison when the king sits exactly on that diagonal)
//! and `EncodePositionForNN()`'s history-plane traversal.

use crate::chess::{Board, Position};
use crate::types::{
    square, BISHOP, BLACK_KINGSIDE, BLACK_QUEENSIDE, FILE_A, FILE_H, KING, KNIGHT, NO_ENPASSANT_FILE, PAWN, QUEEN,
    RANK_1, RANK_8, ROOK, WHITE_KINGSIDE, WHITE_QUEENSIDE,
};

/// Planes per historical position: one per piece type per color (12),
/// plus one repetition plane -- matches spec.md §4.3's "planes 0..11
/// for the most recent position... plane 12 is all-ones iff the
/// position is a repetition."
const PLANES_PER_POSITION: usize = 13;
/// Eight ply of history (spec.md §4.3: "planes 13..25 for one ply
/// earlier,... 91..103 for seven earlier" -- eight positions in total
/// counting the most recent one).
const HISTORY_PLIES: usize = 8;
/// Auxiliary planes 104..111: two castling-rights planes, an
/// en-passant mask, the halfmove clock, two reserved planes, the
/// board-edge anchor, and one more reserved plane.
const AUX_PLANES: usize = 8;

pub const INPUT_PLANES: usize = HISTORY_PLIES * PLANES_PER_POSITION + AUX_PLANES;

/// One 8x8 plane of 0.0/1.0 values, row-major from a1 to h8.
pub type Plane = [f32; 64];

/// A symmetry transform applied to the board before encoding, chosen by
/// [`choose_transform`] to canonicalize equivalent positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub transpose: bool,
}

impl Transform {
    pub const IDENTITY: Transform =
        Transform { flip_horizontal: false, flip_vertical: false, transpose: false };

    #[inline]
    pub fn apply(&self, sq: usize) -> usize {
        let mut f = sq & 7;
        let mut r = sq >> 3;
        if self.flip_horizontal {
            f = 7 - f;
        }
        if self.flip_vertical {
            r = 7 - r;
        }
        if self.transpose {
            std::mem::swap(&mut f, &mut r);
        }
        r * 8 + f
    }
}

const QUEENSIDE_FILES: u64 = 0x0F0F0F0F0F0F0F0F;
const RANKS_5_TO_8: u64 = 0xFFFF_FFFF_0000_0000;
const UPPER_RIGHT_TRIANGLE: u64 = 0xE0C0_8000;
const DIAGONAL_A1H8: u64 = 0x1020_4080;

/// Chooses a canonical symmetry transform for `board`, from the
/// perspective of `board.to_move()`. Mirrors `ChooseTransform()`:
/// no transform while castling rights remain (castling is not
/// symmetry-invariant), otherwise fold the king into one canonical
/// quadrant, with the diagonal case broken by comparing piece
/// bitboards in a fixed priority order.
pub fn choose_transform(board: &Board) -> Transform {
    if board.castling().0 != 0 {
        return Transform::IDENTITY;
    }
    let us = board.to_move();
    let king_sq = board.king_square(us);
    let king_bit = 1u64 << king_sq;

    let mut t = Transform::IDENTITY;
    if king_bit & QUEENSIDE_FILES != 0 {
        t.flip_horizontal = true;
    }
    if board.pawns_bb() != 0 {
        return t;
    }
    if king_bit & RANKS_5_TO_8 != 0 {
        t.flip_vertical = true;
    }
    let folded_king = apply_fold(king_sq, t);
    if (1u64 << folded_king) & UPPER_RIGHT_TRIANGLE != 0 {
        t.transpose = true;
    } else if (1u64 << folded_king) & DIAGONAL_A1H8 != 0 {
        if compare_transposed_favors_transpose(board, t) {
            t.transpose = true;
        }
    }
    t
}

fn apply_fold(sq: usize, t: Transform) -> usize {
    let partial = Transform { flip_horizontal: t.flip_horizontal, flip_vertical: t.flip_vertical, transpose: false };
    partial.apply(sq)
}

/// Tie-break when the king sits exactly on the a1-h8 diagonal: compare
/// the position against its own transpose, piece bitboard by piece
/// bitboard in priority order (all pieces, own pieces, kings, queens,
/// rooks, knights, bishops), and prefer whichever orientation is
/// numerically smaller -- this recreates `CompareTransposing()`'s
/// recursive comparison without needing a second `Board` allocation.
fn compare_transposed_favors_transpose(board: &Board, t: Transform) -> bool {
    let planes: [(u64, u64); 6] = [
        (board.occupied(), board.occupied()),
        (board.color_bb(board.to_move()), board.color_bb(board.to_move())),
        (board.kings_bb(), board.kings_bb()),
        (board.queens_bb(), board.queens_bb()),
        (board.rooks_bb(), board.rooks_bb()),
        (board.knights_bb(), board.knights_bb()),
    ];
    for (bb, _) in planes {
        let plain = remap(bb, t);
        let transposed = remap(bb, Transform { transpose: true, ..t });
        if plain != transposed {
            return transposed < plain;
        }
    }
    false
}

fn remap(bb: u64, t: Transform) -> u64 {
    let mut out = 0u64;
    let mut b = bb;
    while b != 0 {
        let sq = crate::bits::bitscan_forward_and_reset(&mut b) as usize;
        out |= 1u64 << t.apply(sq);
    }
    out
}

/// Encodes `position` into `INPUT_PLANES` flattened 8x8 planes, from the
/// perspective of the side to move, under the canonical transform of
/// the current board.
///
/// Walks history oldest-last (most recent first), stopping early per
/// spec.md §4.3's history-traversal rules: a castling-rights change
/// relative to the most recent position, a halfmove-clock reset
/// (capture or pawn move), or an earlier en-passant flag all end the
/// walk, with the rest of the history window zero-filled.
pub fn encode(position: &Position) -> Vec<Plane> {
    let transform = choose_transform(position.board());
    let us = position.board().to_move();
    let current = position.board();
    let history = position.recent_history();

    let mut planes = Vec::with_capacity(INPUT_PLANES);
    let mut stopped = false;
    for ply in 0..HISTORY_PLIES {
        if stopped {
            for _ in 0..PLANES_PER_POSITION {
                planes.push([0.0; 64]);
            }
            continue;
        }
        let board = match history.iter().rev().nth(ply) {
            Some(b) => b,
            None => {
                for _ in 0..PLANES_PER_POSITION {
                    planes.push([0.0; 64]);
                }
                continue;
            }
        };
        if ply > 0 && board.castling() != current.castling() {
            for _ in 0..PLANES_PER_POSITION {
                planes.push([0.0; 64]);
            }
            stopped = true;
            continue;
        }
        let repeated = position.is_repeated(board);
        push_position_planes(&mut planes, board, us, transform, repeated);
        if ply > 0 && (board.halfmove_clock() == 0 || board.en_passant_file() != NO_ENPASSANT_FILE) {
            stopped = true;
        }
    }

    let board = position.board();
    // 104/105: castling rights as rook-square masks, one plane per side
    // (kingside/queenside) with a bit set at each color's corner rook
    // square that still retains that right.
    let mut kingside_mask = [0.0f32; 64];
    let mut queenside_mask = [0.0f32; 64];
    if board.castling().can(WHITE_KINGSIDE) {
        kingside_mask[transform.apply(square(FILE_H, RANK_1))] = 1.0;
    }
    if board.castling().can(BLACK_KINGSIDE) {
        kingside_mask[transform.apply(square(FILE_H, RANK_8))] = 1.0;
    }
    if board.castling().can(WHITE_QUEENSIDE) {
        queenside_mask[transform.apply(square(FILE_A, RANK_1))] = 1.0;
    }
    if board.castling().can(BLACK_QUEENSIDE) {
        queenside_mask[transform.apply(square(FILE_A, RANK_8))] = 1.0;
    }
    planes.push(kingside_mask);
    planes.push(queenside_mask);
    // 106: en-passant mask (canonical format), the destination file of a
    // legal en-passant capture, if any.
    planes.push(constant_plane(if board.en_passant_file() != NO_ENPASSANT_FILE { 1.0 } else { 0.0 }));
    // 107: halfmove clock.
    planes.push(constant_plane(board.halfmove_clock() as f32));
    // 108: reserved (armageddon side-to-move, unused here).
    planes.push([0.0; 64]);
    // 109: all-ones board-edge anchor.
    planes.push([1.0; 64]);
    // 110/111: reserved.
    planes.push([0.0; 64]);
    planes.push([0.0; 64]);

    debug_assert_eq!(planes.len(), INPUT_PLANES);
    planes
}

fn push_position_planes(planes: &mut Vec<Plane>, board: &Board, us: usize, transform: Transform, repeated: bool) {
    for &color in &[us, 1 - us] {
        for &pt in &[PAWN, KNIGHT, BISHOP, ROOK, QUEEN, KING] {
            planes.push(bitboard_plane(board.pieces_of(color, pt), transform));
        }
    }
    planes.push(constant_plane(if repeated { 1.0 } else { 0.0 }));
}

fn bitboard_plane(bb: u64, transform: Transform) -> Plane {
    let mut plane = [0.0f32; 64];
    let mut b = bb;
    while b != 0 {
        let sq = crate::bits::bitscan_forward_and_reset(&mut b) as usize;
        plane[transform.apply(sq)] = 1.0;
    }
    plane
}

fn constant_plane(value: f32) -> Plane {
    [value; 64]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::Position;

    #[test]
    fn test_encode_plane_count() {
        let pos = Position::startpos();
        let planes = encode(&pos);
        assert_eq!(planes.len(), INPUT_PLANES);
        assert_eq!(INPUT_PLANES, 112);
    }

    #[test]
    fn test_startpos_uses_identity_transform() {
        // Castling rights intact -> ChooseTransform must not transform.
        let pos = Position::startpos();
        assert_eq!(choose_transform(pos.board()), Transform::IDENTITY);
    }

    #[test]
    fn test_transform_folds_king_to_kingside_bottom() {
        let board = Board::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let t = choose_transform(&board);
        // King on e1 (queenside files a-d do not include e/f/g/h), so no
        // horizontal flip is expected here.
        assert!(!t.flip_horizontal);
    }
}
