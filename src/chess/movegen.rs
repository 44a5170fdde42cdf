//! Legal move generation and move application.
//!
//! Generalized from the teacher's `position/move_generation.rs` (pin
//! detection via ray-casting from the king, check-aware legal-move
//! filtering, castling/en-passant/promotion handling) onto the
//! entangled-plane `Board` of `super::board` and the magic-bitboard
//! attack tables of `crate::geometry`.

use crate::chess::board::Board;
use crate::geometry::GEOMETRY;
use crate::types::*;
use arrayvec::ArrayVec;

/// A move list never exceeds the legal maximum of 218 moves in any
/// reachable chess position; 256 gives headroom without heap
/// allocation.
pub type MoveList = ArrayVec<Move, 256>;

/// The board-derivable classification of a position: everything
/// [`generate_legal_moves`] can determine without consulting game
/// history. Draws that depend on history (fifty-move, threefold
/// repetition) aren't board-derivable and are layered on top by
/// `mcts::classify_terminal`; likewise tablebase results require an
/// external probe this engine doesn't perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Playing,
    Checkmate,
    /// Covers both stalemate and insufficient material.
    Draw,
}

/// The result of move generation: the legal moves plus the position's
/// board-derivable game state, matching spec.md §4.2's "fill a movegen
/// result and return the game_state of the position" contract.
pub struct MovegenResult {
    pub moves: MoveList,
    pub state: GameState,
}

/// Generates every legal move available to the side to move, plus the
/// position's board-derivable game state.
pub fn generate_legal_moves(board: &Board) -> MovegenResult {
    let us = board.to_move();

    if is_insufficient_material(board) {
        return MovegenResult { moves: MoveList::new(), state: GameState::Draw };
    }

    let mut moves = MoveList::new();
    let them = 1 - us;
    let occupied = board.occupied();
    let own = board.color_bb(us);
    let enemy = board.color_bb(them);
    let king_sq = board.king_square(us);

    let checkers = attackers_of(board, king_sq, them, occupied);
    let checker_count = checkers.count_ones();
    let pinned = pinned_pieces(board, king_sq, us, occupied);

    generate_king_moves(board, &mut moves, king_sq, us, occupied, own);
    if checker_count <= 1 {
        if board.castling().for_color(us) != 0 && checker_count == 0 {
            generate_castling_moves(board, &mut moves, us, occupied);
        }

        let capture_or_block = if checker_count == 1 {
            let checker_sq = crate::bits::bitscan_1bit(checkers);
            checkers | GEOMETRY.between(king_sq, checker_sq)
        } else {
            u64::MAX
        };

        generate_pawn_moves(board, &mut moves, us, occupied, enemy, capture_or_block, pinned, king_sq);
        generate_piece_moves(board, &mut moves, KNIGHT, us, occupied, own, capture_or_block, pinned, king_sq);
        generate_piece_moves(board, &mut moves, BISHOP, us, occupied, own, capture_or_block, pinned, king_sq);
        generate_piece_moves(board, &mut moves, ROOK, us, occupied, own, capture_or_block, pinned, king_sq);
        generate_piece_moves(board, &mut moves, QUEEN, us, occupied, own, capture_or_block, pinned, king_sq);
    }

    let state = if moves.is_empty() {
        if checker_count > 0 {
            GameState::Checkmate
        } else {
            GameState::Draw
        }
    } else {
        GameState::Playing
    };
    MovegenResult { moves, state }
}

/// King-vs-king, king-and-minor-vs-king: the only insufficient-material
/// draws cheap enough to check without a full legality scan. Other
/// drawn material configurations (e.g. same-colored bishops) are left
/// to the network to learn, matching common engine practice.
fn is_insufficient_material(board: &Board) -> bool {
    if board.pawns_bb() != 0 || board.rooks_bb() != 0 || board.queens_bb() != 0 {
        return false;
    }
    let minors = (board.knights_bb() | board.bishops_bb()).count_ones();
    minors <= 1
}

/// Bitboard of pieces belonging to `attacker_color` that attack `sq`.
fn attackers_of(board: &Board, sq: Square, attacker_color: Color, occupied: u64) -> u64 {
    let mut attackers = 0u64;
    attackers |= GEOMETRY.pawn_attacks[1 - attacker_color][sq] & board.pieces_of(attacker_color, PAWN);
    attackers |= GEOMETRY.knight_attacks[sq] & board.pieces_of(attacker_color, KNIGHT);
    attackers |= GEOMETRY.king_attacks[sq] & board.pieces_of(attacker_color, KING);
    let diag = GEOMETRY.bishop_attacks(sq, occupied);
    attackers |= diag & (board.pieces_of(attacker_color, BISHOP) | board.pieces_of(attacker_color, QUEEN));
    let ortho = GEOMETRY.rook_attacks(sq, occupied);
    attackers |= ortho & (board.pieces_of(attacker_color, ROOK) | board.pieces_of(attacker_color, QUEEN));
    attackers
}

/// Pieces of `us` that are pinned against the `us` king by an aligned
/// enemy slider, restricted to the line through king and pinner.
fn pinned_pieces(board: &Board, king_sq: Square, us: Color, occupied: u64) -> Vec<(Square, u64)> {
    let them = 1 - us;
    let mut result = Vec::new();
    let sliders = (board.pieces_of(them, BISHOP) | board.pieces_of(them, QUEEN))
        & bishop_ray_from(king_sq)
        | (board.pieces_of(them, ROOK) | board.pieces_of(them, QUEEN)) & rook_ray_from(king_sq);
    let mut candidates = sliders;
    while candidates != 0 {
        let pinner_sq = crate::bits::bitscan_forward_and_reset(&mut candidates) as Square;
        let between = GEOMETRY.between(king_sq, pinner_sq);
        let blockers = between & occupied;
        if blockers.count_ones() == 1 && blockers & board.color_bb(us) != 0 {
            let pinned_sq = crate::bits::bitscan_1bit(blockers);
            result.push((pinned_sq, GEOMETRY.line_through(king_sq, pinner_sq)));
        }
    }
    result
}

fn bishop_ray_from(sq: Square) -> u64 {
    GEOMETRY.bishop_attacks(sq, 0)
}

fn rook_ray_from(sq: Square) -> u64 {
    GEOMETRY.rook_attacks(sq, 0)
}

fn pin_restriction(pinned: &[(Square, u64)], sq: Square) -> u64 {
    for &(pinned_sq, line) in pinned {
        if pinned_sq == sq {
            return line;
        }
    }
    u64::MAX
}

fn generate_king_moves(
    board: &Board,
    moves: &mut MoveList,
    king_sq: Square,
    us: Color,
    occupied: u64,
    own: u64,
) {
    let them = 1 - us;
    let occupied_without_king = occupied & !(1u64 << king_sq);
    let mut targets = GEOMETRY.king_attacks[king_sq] & !own;
    while targets != 0 {
        let to = crate::bits::bitscan_forward_and_reset(&mut targets) as Square;
        if attackers_of(board, to, them, occupied_without_king) == 0 {
            moves.push(Move::new(king_sq, to, Promotion::None));
        }
    }
}

fn generate_castling_moves(board: &Board, moves: &mut MoveList, us: Color, occupied: u64) {
    let them = 1 - us;
    let rank0 = if us == WHITE { RANK_1 } else { RANK_8 };
    let king_sq = square(FILE_E, rank0);
    let (kingside, queenside) = if us == WHITE {
        (WHITE_KINGSIDE, WHITE_QUEENSIDE)
    } else {
        (BLACK_KINGSIDE, BLACK_QUEENSIDE)
    };
    if board.castling().can(kingside) {
        let f = square(FILE_F, rank0);
        let g = square(FILE_G, rank0);
        if occupied & (1u64 << f | 1u64 << g) == 0
            && attackers_of(board, f, them, occupied) == 0
            && attackers_of(board, g, them, occupied) == 0
        {
            moves.push(Move::new(king_sq, g, Promotion::None));
        }
    }
    if board.castling().can(queenside) {
        let d = square(FILE_D, rank0);
        let c = square(FILE_C, rank0);
        let b = square(FILE_B, rank0);
        if occupied & (1u64 << d | 1u64 << c | 1u64 << b) == 0
            && attackers_of(board, d, them, occupied) == 0
            && attackers_of(board, c, them, occupied) == 0
        {
            moves.push(Move::new(king_sq, c, Promotion::None));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn generate_piece_moves(
    board: &Board,
    moves: &mut MoveList,
    pt: PieceType,
    us: Color,
    occupied: u64,
    own: u64,
    capture_or_block: u64,
    pinned: &[(Square, u64)],
    king_sq: Square,
) {
    let _ = king_sq;
    let mut pieces = board.pieces_of(us, pt);
    while pieces != 0 {
        let from = crate::bits::bitscan_forward_and_reset(&mut pieces) as Square;
        let attacks = match pt {
            KNIGHT => GEOMETRY.knight_attacks[from],
            BISHOP => GEOMETRY.bishop_attacks(from, occupied),
            ROOK => GEOMETRY.rook_attacks(from, occupied),
            QUEEN => GEOMETRY.queen_attacks(from, occupied),
            _ => unreachable!(),
        };
        let mut targets = attacks & !own & capture_or_block & pin_restriction(pinned, from);
        while targets != 0 {
            let to = crate::bits::bitscan_forward_and_reset(&mut targets) as Square;
            moves.push(Move::new(from, to, Promotion::None));
        }
    }
}

fn generate_pawn_moves(
    board: &Board,
    moves: &mut MoveList,
    us: Color,
    occupied: u64,
    enemy: u64,
    capture_or_block: u64,
    pinned: &[(Square, u64)],
    king_sq: Square,
) {
    let pawns = board.pieces_of(us, PAWN);
    let (forward, start_rank, promo_rank, ep_rank): (i32, Rank, Rank, Rank) = if us == WHITE {
        (8, RANK_2, RANK_8, RANK_5)
    } else {
        (-8, RANK_7, RANK_1, RANK_4)
    };
    let mut remaining = pawns;
    while remaining != 0 {
        let from = crate::bits::bitscan_forward_and_reset(&mut remaining) as Square;
        let restriction = pin_restriction(pinned, from);
        let one_sq = (from as i32 + forward) as usize;
        if one_sq < 64 && occupied & (1u64 << one_sq) == 0 && (1u64 << one_sq) & restriction != 0 {
            push_pawn_move(moves, from, one_sq, rank(one_sq) == promo_rank, capture_or_block);
            if rank(from) == start_rank {
                let two_sq = (from as i32 + 2 * forward) as usize;
                if occupied & (1u64 << two_sq) == 0 && (1u64 << two_sq) & restriction != 0 {
                    push_pawn_move(moves, from, two_sq, false, capture_or_block);
                }
            }
        }
        let mut attacks = GEOMETRY.pawn_attacks[us][from] & enemy & restriction & capture_or_block;
        while attacks != 0 {
            let to = crate::bits::bitscan_forward_and_reset(&mut attacks) as Square;
            push_pawn_move(moves, from, to, rank(to) == promo_rank, u64::MAX);
        }
        if rank(from) == ep_rank && board.en_passant_file() != NO_ENPASSANT_FILE {
            let ep_file = board.en_passant_file();
            if (file(from) as i32 - ep_file as i32).abs() == 1 {
                let capture_rank = ep_rank;
                let to_rank = if us == WHITE { RANK_6 } else { RANK_3 };
                let to = square(ep_file, to_rank);
                let captured_sq = square(ep_file, capture_rank);
                if is_en_passant_legal(board, us, from, to, captured_sq, king_sq) {
                    moves.push(Move::new(from, to, Promotion::None));
                }
            }
        }
    }
}

fn push_pawn_move(moves: &mut MoveList, from: Square, to: Square, promotes: bool, capture_or_block: u64) {
    if capture_or_block & (1u64 << to) == 0 {
        return;
    }
    if promotes {
        for &p in &[Promotion::Queen, Promotion::Rook, Promotion::Bishop, Promotion::Knight] {
            moves.push(Move::new(from, to, p));
        }
    } else {
        moves.push(Move::new(from, to, Promotion::None));
    }
}

/// En passant has a notorious horizontal-pin edge case (king and two
/// pawns on the same rank, with an enemy rook/queen behind): simulate
/// the capture and re-check king safety rather than reasoning about it
/// with the generic pin table.
fn is_en_passant_legal(
    board: &Board,
    us: Color,
    from: Square,
    to: Square,
    captured_sq: Square,
    king_sq: Square,
) -> bool {
    let them = 1 - us;
    let mut occupied = board.occupied();
    occupied &= !(1u64 << from);
    occupied &= !(1u64 << captured_sq);
    occupied |= 1u64 << to;
    attackers_of(board, king_sq, them, occupied) == 0
}

/// Applies `mv` to `board`, returning the resulting position. Assumes
/// `mv` was produced by [`generate_legal_moves`] for this exact board.
pub fn apply_move(board: &Board, mv: Move) -> Board {
    let mut next = *board;
    let us = board.to_move();
    let them = 1 - us;
    let (_, moving_pt) = board.piece_at(mv.src()).expect("move source must hold a piece");
    let is_castling = moving_pt == KING
        && (file(mv.dst()) as isize - file(mv.src()) as isize).abs() == 2;
    let is_en_passant = moving_pt == PAWN
        && file(mv.src()) != file(mv.dst())
        && board.piece_at(mv.dst()).is_none();

    let mut reset_halfmove = moving_pt == PAWN;

    if let Some((_, _captured_pt)) = next.piece_at(mv.dst()) {
        next.clear_square(mv.dst());
        reset_halfmove = true;
    }
    next.clear_square(mv.src());

    if is_en_passant {
        let capture_rank = if us == WHITE { RANK_5 } else { RANK_4 };
        let captured_sq = square(file(mv.dst()), capture_rank);
        next.clear_square(captured_sq);
    }

    let final_pt = mv.promotion().piece_type().unwrap_or(moving_pt);
    next.set_piece(us, final_pt, mv.dst());

    if is_castling {
        let rank0 = rank(mv.src());
        let (rook_from, rook_to) = if file(mv.dst()) == FILE_G {
            (square(FILE_H, rank0), square(FILE_F, rank0))
        } else {
            (square(FILE_A, rank0), square(FILE_D, rank0))
        };
        next.clear_square(rook_from);
        next.set_piece(us, ROOK, rook_to);
    }

    let mut rights = next.castling();
    if moving_pt == KING {
        let both = if us == WHITE {
            WHITE_KINGSIDE | WHITE_QUEENSIDE
        } else {
            BLACK_KINGSIDE | BLACK_QUEENSIDE
        };
        rights.clear(both);
    }
    for &(sq, mask) in &[
        (square(FILE_H, RANK_1), WHITE_KINGSIDE),
        (square(FILE_A, RANK_1), WHITE_QUEENSIDE),
        (square(FILE_H, RANK_8), BLACK_KINGSIDE),
        (square(FILE_A, RANK_8), BLACK_QUEENSIDE),
    ] {
        if mv.src() == sq || mv.dst() == sq {
            rights.clear(mask);
        }
    }
    next.set_castling(rights);

    let new_ep_file = if moving_pt == PAWN && (mv.dst() as isize - mv.src() as isize).abs() == 16 {
        let dst_file = file(mv.dst());
        let dst_rank = rank(mv.dst());
        let mut adjacent = 0u64;
        if dst_file > FILE_A {
            adjacent |= 1u64 << square(dst_file - 1, dst_rank);
        }
        if dst_file < FILE_H {
            adjacent |= 1u64 << square(dst_file + 1, dst_rank);
        }
        if next.pieces_of(them, PAWN) & adjacent != 0 {
            dst_file
        } else {
            NO_ENPASSANT_FILE
        }
    } else {
        NO_ENPASSANT_FILE
    };
    next.set_en_passant_file(new_ep_file);

    next.set_halfmove_clock(if reset_halfmove { 0 } else { board.halfmove_clock() + 1 });
    next.set_fullmove_number(board.fullmove_number() + if us == BLACK { 1 } else { 0 });
    next.set_to_move(them);
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startpos_move_count() {
        let b = Board::startpos();
        let result = generate_legal_moves(&b);
        assert_eq!(result.moves.len(), 20);
        assert!(matches!(result.state, GameState::Playing));
    }

    #[test]
    fn test_kiwipete_move_count() {
        let b = Board::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(generate_legal_moves(&b).moves.len(), 48);
    }

    #[test]
    fn test_pinned_piece_cannot_move_off_line() {
        // White king e1, white bishop e2 pinned by black rook e8: the
        // bishop has no legal moves at all (it can't stay on the e-file).
        let b = Board::from_fen("4r1k1/8/8/8/8/8/4B3/4K3 w - - 0 1").unwrap();
        let moves = generate_legal_moves(&b).moves;
        assert!(moves.iter().all(|m| m.src() != square(FILE_E, RANK_2)));
    }

    #[test]
    fn test_double_check_only_king_moves() {
        // Black rook on the open e-file and black knight on d3 both check
        // the white king on e1 simultaneously: neither checker can be
        // blocked or captured at once, so only king steps are legal.
        let b = Board::from_fen("k3r3/8/8/8/8/3n4/8/4K3 w - - 0 1").unwrap();
        let moves = generate_legal_moves(&b).moves;
        assert!(!moves.is_empty());
        let king_sq = square(FILE_E, RANK_1);
        assert!(moves.iter().all(|m| m.src() == king_sq));
        assert_eq!(moves.len(), 3);
    }

    #[test]
    fn test_en_passant_capture_generated() {
        let b = Board::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 1").unwrap();
        let moves = generate_legal_moves(&b).moves;
        assert!(moves.iter().any(|m| m.src() == square(FILE_E, RANK_5) && m.dst() == square(FILE_D, RANK_6)));
    }

    #[test]
    fn test_castling_generated_when_clear() {
        let b = Board::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let moves = generate_legal_moves(&b).moves;
        let king_sq = square(FILE_E, RANK_1);
        assert!(moves.iter().any(|m| m.src() == king_sq && m.dst() == square(FILE_G, RANK_1)));
        assert!(moves.iter().any(|m| m.src() == king_sq && m.dst() == square(FILE_C, RANK_1)));
    }

    #[test]
    fn test_checkmate_and_insufficient_material_states() {
        let mate = Board::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3").unwrap();
        assert!(matches!(generate_legal_moves(&mate).state, GameState::Checkmate));
        let bare_kings = Board::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(matches!(generate_legal_moves(&bare_kings).state, GameState::Draw));
    }

    #[test]
    fn test_apply_move_updates_hash_and_side() {
        let b = Board::startpos();
        let m = Move::new(square(FILE_E, RANK_2), square(FILE_E, RANK_4), Promotion::None);
        let next = apply_move(&b, m);
        assert_eq!(next.to_move(), BLACK);
        assert_ne!(next.hash(), b.hash());
        // No black pawn sits adjacent to e4 yet, so no en passant capture
        // is actually possible and the file must not be recorded.
        assert_eq!(next.en_passant_file(), NO_ENPASSANT_FILE);
    }

    #[test]
    fn test_double_push_sets_en_passant_only_with_adjacent_enemy_pawn() {
        // Black pawn sits on d4, adjacent to the e-file: e2-e4 must record
        // the en passant file since dxe3 would actually be legal next.
        let b = Board::from_fen("4k3/8/8/8/3p4/8/4P3/4K3 w - - 0 1").unwrap();
        let m = Move::new(square(FILE_E, RANK_2), square(FILE_E, RANK_4), Promotion::None);
        let next = apply_move(&b, m);
        assert_eq!(next.en_passant_file(), FILE_E);
    }
}
