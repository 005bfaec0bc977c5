use arrayvec::ArrayVec;
use shakmaty::{Color, Move, MoveList, Role};

use crate::position::Position;
use crate::see::see_capture;
use crate::types::{Score, HISTORY_MAX};

/// Quiet-move cutoff counters indexed by side to move, from- and to-square.
pub type HistoryTable = [[[u32; 64]; 64]; 2];

pub fn side_index(color: Color) -> usize {
    if color == Color::White { 0 } else { 1 }
}

const HASH_MOVE_SCORE: Score = 10_000_000;
const QUEEN_PROMOTION_SCORE: Score = 9_000_000;
const WINNING_CAPTURE_SCORE: Score = 8_000_000;
const KILLER_ONE_SCORE: Score = 7_500_000;
const KILLER_TWO_SCORE: Score = 6_500_000;
const LOSING_CAPTURE_SCORE: Score = 6_000_000;
const UNDER_PROMOTION_SCORE: Score = -1;

/// Orders a move list in place, best prospects first:
/// hash move, queen promotions, winning captures by SEE, killers, losing
/// captures by SEE, quiets by history, underpromotions last.
pub fn order_moves(
    moves: &mut MoveList,
    pos: &mut Position,
    hash_move: Option<&Move>,
    killers: &[Option<Move>; 2],
    history: &HistoryTable,
) {
    let stm = side_index(pos.side_to_move());
    let mut scores: ArrayVec<Score, 256> = ArrayVec::new();

    for m in moves.iter() {
        let score = if Some(m) == hash_move {
            HASH_MOVE_SCORE
        } else if m.is_promotion() {
            if m.promotion() == Some(Role::Queen) {
                QUEEN_PROMOTION_SCORE
            } else {
                UNDER_PROMOTION_SCORE
            }
        } else if m.is_capture() {
            // seeCapture cannot value en passant; score it as an even trade
            let see = if m.is_en_passant() { 0 } else { see_capture(pos, m) };
            if see >= 0 { WINNING_CAPTURE_SCORE + see } else { LOSING_CAPTURE_SCORE + see }
        } else if killers[0].as_ref() == Some(m) {
            KILLER_ONE_SCORE
        } else if killers[1].as_ref() == Some(m) {
            KILLER_TWO_SCORE
        } else {
            let from = m.from().expect("quiet moves always have an origin") as usize;
            let to = m.to() as usize;
            history[stm][from][to].min(HISTORY_MAX) as Score
        };
        scores.push(score);
    }

    sort_moves_by_score(moves, &mut scores);
}

/// Selection sort; the list tops out at 256 entries and is usually far
/// shorter, and stability keeps tied moves in generation order.
fn sort_moves_by_score(moves: &mut MoveList, scores: &mut [Score]) {
    if moves.is_empty() {
        return;
    }
    for i in 0..moves.len() - 1 {
        let mut max = i;
        for j in i + 1..moves.len() {
            if scores[j] > scores[max] {
                max = j;
            }
        }
        if max != i {
            moves.swap(i, max);
            scores.swap(i, max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network;
    use shakmaty::CastlingMode;

    fn pos(fen: &str) -> Position {
        network::init().unwrap();
        Position::from_fen(fen, CastlingMode::Standard).unwrap()
    }

    fn uci(p: &Position, m: &Move) -> String {
        m.to_uci(p.castling_mode()).to_string()
    }

    fn empty_killers() -> [Option<Move>; 2] {
        [None, None]
    }

    fn empty_history() -> Box<HistoryTable> {
        Box::new([[[0; 64]; 64]; 2])
    }

    #[test]
    fn test_hash_move_sorts_first() {
        let mut p = pos("r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4");
        let mut moves = p.legal_moves();
        let hash_move = moves
            .iter()
            .find(|m| uci(&p, m) == "b1c3")
            .cloned()
            .unwrap();
        order_moves(&mut moves, &mut p, Some(&hash_move), &empty_killers(), &empty_history());
        assert_eq!(moves[0], hash_move, "hash move must lead the list");
    }

    #[test]
    fn test_winning_capture_before_quiets() {
        // Nxe5 wins a pawn and should come before every quiet move
        let mut p = pos("rnbqkb1r/pppp1ppp/8/4p3/4n3/5N2/PPPPQPPP/RNB1KB1R w KQkq - 0 4");
        let mut moves = p.legal_moves();
        order_moves(&mut moves, &mut p, None, &empty_killers(), &empty_history());
        assert!(
            moves[0].is_capture(),
            "expected a capture first, got {}",
            uci(&p, &moves[0])
        );
    }

    #[test]
    fn test_queen_promotion_outranks_captures() {
        let mut p = pos("3q3k/2P5/8/8/8/8/8/4K3 w - - 0 1");
        let mut moves = p.legal_moves();
        order_moves(&mut moves, &mut p, None, &empty_killers(), &empty_history());
        assert_eq!(
            moves[0].promotion(),
            Some(Role::Queen),
            "a queen promotion should lead, got {}",
            uci(&p, &moves[0])
        );
    }

    #[test]
    fn test_underpromotions_sort_last() {
        let mut p = pos("7k/2P5/8/8/8/8/8/4K3 w - - 0 1");
        let mut moves = p.legal_moves();
        order_moves(&mut moves, &mut p, None, &empty_killers(), &empty_history());
        let last = &moves[moves.len() - 1];
        assert!(
            last.is_promotion() && last.promotion() != Some(Role::Queen),
            "an underpromotion should sort last, got {}",
            uci(&p, last)
        );
    }

    #[test]
    fn test_killers_rank_between_captures() {
        let mut p = pos("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let mut moves = p.legal_moves();
        let killer = moves.iter().find(|m| uci(&p, m) == "g1f3").cloned().unwrap();
        let killers = [Some(killer.clone()), None];
        order_moves(&mut moves, &mut p, None, &killers, &empty_history());
        assert_eq!(moves[0], killer, "with no captures on offer the killer should lead");
    }

    #[test]
    fn test_history_orders_quiets() {
        let mut p = pos("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let mut moves = p.legal_moves();
        let mut history = empty_history();
        // e2e4: from e2 (12) to e4 (28)
        history[0][12][28] = 5000;
        order_moves(&mut moves, &mut p, None, &empty_killers(), &history);
        assert_eq!(uci(&p, &moves[0]), "e2e4", "the history-boosted quiet should lead");
    }
}
