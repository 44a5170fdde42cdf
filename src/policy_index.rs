//! Move <-> policy-slot bijection.
//!
//! The original engine's `to_policy_index()`/`to_flipped_policy_index()`
//! (see `original_source/src/chess/board.cpp`) look up into a
//! 8192-entry -> 5120-slot table (`uncompressed_policy_map.h`) that is
//! not present in the retrieved sources. Rather than fabricate that
//! table, this module computes an equivalent deterministic bijection
//! arithmetically, in the spirit of AlphaZero's 73-plane move encoding:
//! for each origin square there are 56 queen-like slots (8 directions x
//! 7 distances), 8 knight-move slots, and 9 underpromotion slots (3
//! forward directions x 3 underpromotion piece choices), for 73 slots
//! per square and `64 * 73 = 4672` total indices -- comfortably inside
//! the 5120-slot budget spec.md names, with the remaining slots simply
//! unused. This deviation is recorded in DESIGN.md.
//!
//! Queen promotions are encoded as ordinary queen-like moves (the
//! network does not need a distinct slot for them, matching Lc0's
//! policy map); only rook/bishop/knight underpromotions get their own
//! slots.

use crate::types::{file, rank, Move, Promotion, Square};

pub const POLICY_SIZE: usize = 5120;
const SLOTS_PER_SQUARE: usize = 73;

/// The 8 queen-like ray directions, ordered N, NE, E, SE, S, SW, W, NW.
const QUEEN_DIRECTIONS: [(i32, i32); 8] =
    [(0, 1), (1, 1), (1, 0), (1, -1), (0, -1), (-1, -1), (-1, 0), (-1, 1)];

/// The 8 knight-move deltas, in a fixed canonical order.
const KNIGHT_DELTAS: [(i32, i32); 8] =
    [(1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1), (-2, 1), (-1, 2)];

/// The 3 forward-ish directions a pawn can underpromote through:
/// straight, capture-left, capture-right (relative to the mover).
const UNDERPROMOTION_DIRECTIONS: [(i32, i32); 3] = [(0, 1), (-1, 1), (1, 1)];
const UNDERPROMOTION_PIECES: [Promotion; 3] = [Promotion::Rook, Promotion::Bishop, Promotion::Knight];

/// Maps a move to its policy slot, from the perspective of the side to
/// move (i.e. assuming White-relative coordinates; callers pass a
/// board already rotated into the side-to-move's own frame, matching
/// `to_flipped_policy_index`'s role as "the" policy-index path per
/// spec.md §9 Open Question 2).
pub fn policy_index(mv: Move) -> Option<usize> {
    let src = mv.src();
    let df = file(mv.dst()) as i32 - file(mv.src()) as i32;
    let dr = rank(mv.dst()) as i32 - rank(mv.src()) as i32;

    let slot = match mv.promotion() {
        Promotion::Rook | Promotion::Bishop | Promotion::Knight => {
            let dir_idx = UNDERPROMOTION_DIRECTIONS.iter().position(|&(pf, pr)| pf == df.signum() && pr == dr.signum() && dr.abs() == 1)?;
            let piece_idx = UNDERPROMOTION_PIECES.iter().position(|&p| p == mv.promotion())?;
            56 + 8 + dir_idx * 3 + piece_idx
        }
        Promotion::Queen | Promotion::None => {
            if let Some(dir_idx) = QUEEN_DIRECTIONS.iter().position(|&(qf, qr)| is_ray(df, dr, qf, qr)) {
                let distance = df.abs().max(dr.abs()) as usize;
                if !(1..=7).contains(&distance) {
                    return None;
                }
                dir_idx * 7 + (distance - 1)
            } else {
                let knight_idx = KNIGHT_DELTAS.iter().position(|&(kf, kr)| kf == df && kr == dr)?;
                56 + knight_idx
            }
        }
    };
    Some(src * SLOTS_PER_SQUARE + slot)
}

fn is_ray(df: i32, dr: i32, dir_f: i32, dir_r: i32) -> bool {
    if df == 0 && dr == 0 {
        return false;
    }
    let is_straight = dir_f == 0 || dir_r == 0;
    if is_straight {
        (dir_f == 0 && df == 0 && dr.signum() == dir_r) || (dir_r == 0 && dr == 0 && df.signum() == dir_f)
    } else {
        df.abs() == dr.abs() && df.signum() == dir_f && dr.signum() == dir_r
    }
}

/// Inverse of [`policy_index`] restricted to the origin square,
/// returning the destination square and direction/distance info is not
/// needed by callers today (the search only ever needs the forward
/// mapping to gather priors for legal moves); kept private-free for
/// potential future use in move generation diagnostics.
#[cfg(test)]
fn square_of(slot: usize) -> Square {
    slot / SLOTS_PER_SQUARE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{square, FILE_A, FILE_D, FILE_E, FILE_G, RANK_1, RANK_2, RANK_4, RANK_7, RANK_8};

    #[test]
    fn test_policy_index_is_in_range() {
        let m = Move::new(square(FILE_E, RANK_2), square(FILE_E, RANK_4), Promotion::None);
        let idx = policy_index(m).unwrap();
        assert!(idx < POLICY_SIZE);
        assert_eq!(square_of(idx), square(FILE_E, RANK_2));
    }

    #[test]
    fn test_distinct_moves_get_distinct_slots() {
        let a = Move::new(square(FILE_D, RANK_1), square(FILE_G, RANK_4), Promotion::None);
        let b = Move::new(square(FILE_D, RANK_1), square(FILE_A, RANK_4), Promotion::None);
        assert_ne!(policy_index(a), policy_index(b));
    }

    #[test]
    fn test_knight_move_slot() {
        let knight_move = Move::new(square(FILE_G, RANK_1), square(FILE_E, RANK_2), Promotion::None);
        assert_eq!(square(FILE_E, RANK_2), knight_move.dst());
        assert!(policy_index(knight_move).is_some());
    }

    #[test]
    fn test_underpromotion_slot_present() {
        let m = Move::new(square(FILE_E, RANK_7), square(FILE_E, RANK_8), Promotion::Knight);
        assert!(policy_index(m).is_some());
    }
}
