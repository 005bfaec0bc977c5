use shakmaty::{Color, Role, Square};

use crate::position::Position;
use crate::see::piece_value;
use crate::types::{Score, EVAL_MAX};

/// Distance from the four centre squares, used to drive the weak king to the
/// board edge.
#[rustfmt::skip]
const CENTER_DISTANCE: [Score; 64] = [
    6, 5, 4, 3, 3, 4, 5, 6,
    5, 4, 3, 2, 2, 3, 4, 5,
    4, 3, 2, 1, 1, 2, 3, 4,
    3, 2, 1, 0, 0, 1, 2, 3,
    3, 2, 1, 0, 0, 1, 2, 3,
    4, 3, 2, 1, 1, 2, 3, 4,
    5, 4, 3, 2, 2, 3, 4, 5,
    6, 5, 4, 3, 3, 4, 5, 6,
];

fn chebyshev_distance(a: Square, b: Square) -> Score {
    let file_diff = (u32::from(a.file()) as i32 - u32::from(b.file()) as i32).abs();
    let rank_diff = (u32::from(a.rank()) as i32 - u32::from(b.rank()) as i32).abs();
    file_diff.max(rank_diff)
}

fn material_score(pos: &Position, side: Color) -> Score {
    [Role::Pawn, Role::Knight, Role::Bishop, Role::Rook, Role::Queen]
        .iter()
        .map(|&role| piece_value(role) * pos.piece_bb(side, role).count() as Score)
        .sum()
}

/// KX-vs-K family: drive the bare king to the edge, bring our king closer.
/// Scores land in (EVAL_MAX, EVAL_MAX + 700] so they dominate any ordinary
/// evaluation while staying clear of mate scores.
fn kx_vs_k(pos: &Position, stronger: Color) -> Score {
    let strong_king = pos.king_square(stronger);
    let weak_king = pos.king_square(!stronger);

    let progress = material_score(pos, stronger) / 10
        + 20 * CENTER_DISTANCE[weak_king as usize]
        - 20 * chebyshev_distance(strong_king, weak_king);

    let score = (EVAL_MAX + 100 + progress).clamp(EVAL_MAX + 1, EVAL_MAX + 700);
    if stronger == Color::White { score } else { -score }
}

/// Returns a forcing heuristic score when the material matches a known
/// winning pattern, bypassing the network entirely.
pub fn endgame_match(pos: &Position) -> Option<Score> {
    let mut weaker = None;
    if pos.pieces_of(Color::Black) == pos.piece_bb(Color::Black, Role::King) {
        weaker = Some(Color::Black);
    }
    if pos.pieces_of(Color::White) == pos.piece_bb(Color::White, Role::King) {
        weaker = Some(Color::White);
    }

    let weaker = weaker?;
    let stronger = !weaker;

    // KRvK and KQvK, with the stronger side free to hold extra material
    if pos.piece_bb(stronger, Role::Rook).any() || pos.piece_bb(stronger, Role::Queen).any() {
        return Some(kx_vs_k(pos, stronger));
    }

    None
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

    #[test]
    fn test_krk_dominates_ordinary_eval() {
        let p = pos("8/8/8/4k3/8/8/4K3/4R3 w - - 0 1");
        let score = endgame_match(&p).expect("KRvK should match");
        assert!(score > EVAL_MAX, "KRvK score {} should exceed EVAL_MAX", score);
        assert!(score <= EVAL_MAX + 700, "KRvK score {} above the oracle band", score);
    }

    #[test]
    fn test_black_queen_mirrors_sign() {
        let p = pos("4k3/8/8/8/8/8/8/q3K3 b - - 0 1");
        let score = endgame_match(&p).expect("KQvK should match");
        assert!(score < -EVAL_MAX, "Black-stronger score {} should be very negative", score);
    }

    #[test]
    fn test_cornered_king_scores_higher() {
        let centre = pos("8/8/8/4k3/8/8/4K3/4R3 w - - 0 1");
        let corner = pos("k7/8/8/8/8/8/4K3/4R3 w - - 0 1");
        let centre_score = endgame_match(&centre).unwrap();
        let corner_score = endgame_match(&corner).unwrap();
        assert!(
            corner_score > centre_score,
            "cornered king {} should beat centred king {}",
            corner_score,
            centre_score
        );
    }

    #[test]
    fn test_minor_only_material_is_not_matched() {
        let p = pos("8/8/8/4k3/8/3B4/4K3/8 w - - 0 1");
        assert!(endgame_match(&p).is_none(), "KBvK has no forced win to report");
    }

    #[test]
    fn test_pawns_on_weak_side_disable_oracle() {
        let p = pos("8/4p3/8/4k3/8/8/4K3/4R3 w - - 0 1");
        assert!(endgame_match(&p).is_none(), "weak side with a pawn is not a bare king");
    }
}
