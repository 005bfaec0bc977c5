use shakmaty::{attacks, Color, Role};

use crate::endgame;
use crate::position::Position;
use crate::types::{Score, DRAW, EVAL_MAX, EVAL_MIN};

const TEMPO: Score = 10;
const EVAL_CACHE_SIZE: usize = 1 << 16;

/// Direct-mapped per-thread cache of adjusted evaluations, keyed by Zobrist.
pub struct EvalCache {
    entries: Vec<(u64, Score)>,
}

impl EvalCache {
    pub fn new() -> Self {
        Self { entries: vec![(0, 0); EVAL_CACHE_SIZE] }
    }

    fn probe(&self, key: u64) -> Option<Score> {
        let (stored, eval) = self.entries[key as usize % EVAL_CACHE_SIZE];
        if stored == key { Some(eval) } else { None }
    }

    fn store(&mut self, key: u64, eval: Score) {
        self.entries[key as usize % EVAL_CACHE_SIZE] = (key, eval);
    }
}

impl Default for EvalCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Full static evaluation in centipawns from White's perspective: network
/// output plus the hand adjustments, clamped inside the ordinary-score band.
pub fn evaluate_position(pos: &Position, cache: &mut EvalCache) -> Score {
    if dead_position(pos) {
        return DRAW;
    }
    if let Some(score) = endgame::endgame_match(pos) {
        return score;
    }

    let key = pos.zobrist_key();
    if let Some(eval) = cache.probe(key) {
        return eval.clamp(EVAL_MIN, EVAL_MAX);
    }

    let mut eval = pos.get_evaluation() + mobility_adjustment(pos);
    eval += tempo_adjustment(pos);
    eval = complexity_scale(eval, pos);

    cache.store(key, eval);
    eval.clamp(EVAL_MIN, EVAL_MAX)
}

/// No pawns, no majors, and at most one minor on one side: no mate can be
/// forced by any series of legal moves.
pub fn dead_position(pos: &Position) -> bool {
    for color in [Color::White, Color::Black] {
        if pos.piece_bb(color, Role::Pawn).any()
            || pos.piece_bb(color, Role::Rook).any()
            || pos.piece_bb(color, Role::Queen).any()
        {
            return false;
        }
    }

    let white_minor = (pos.piece_bb(Color::White, Role::Knight)
        | pos.piece_bb(Color::White, Role::Bishop))
    .count();
    let black_minor = (pos.piece_bb(Color::Black, Role::Knight)
        | pos.piece_bb(Color::Black, Role::Bishop))
    .count();

    matches!((white_minor, black_minor), (0, 0) | (1, 0) | (0, 1))
}

fn tempo_adjustment(pos: &Position) -> Score {
    if pos.side_to_move() == Color::White { TEMPO } else { -TEMPO }
}

/// Free squares for knights and bishops; a cheap term the network does not
/// see through the piece-square inputs alone.
fn mobility_adjustment(pos: &Position) -> Score {
    let occupied = pos.all_pieces();
    let mut score = 0;

    for (color, sign) in [(Color::White, 1), (Color::Black, -1)] {
        for sq in pos.piece_bb(color, Role::Knight) {
            score += sign * (attacks::knight_attacks(sq) & !occupied).count() as Score;
        }
        for sq in pos.piece_bb(color, Role::Bishop) {
            score += sign * (attacks::bishop_attacks(sq, occupied) & !occupied).count() as Score;
        }
    }

    score
}

/// Attenuate the evaluation when the leading side is low on non-pawn
/// material: with fewer than four units (minor 1, rook 2, queen 4) the win
/// usually has to come from the pawns, so scale by their number.
fn complexity_scale(eval: Score, pos: &Position) -> Score {
    let stronger = match eval {
        e if e > 0 => Color::White,
        e if e < 0 => Color::Black,
        _ => return eval,
    };

    let units = (pos.piece_bb(stronger, Role::Knight) | pos.piece_bb(stronger, Role::Bishop))
        .count() as Score
        + 2 * pos.piece_bb(stronger, Role::Rook).count() as Score
        + 4 * pos.piece_bb(stronger, Role::Queen).count() as Score;

    if units >= 4 {
        return eval;
    }

    let pawns = pos.piece_bb(stronger, Role::Pawn).count() as Score;
    eval * (pawns * 32).min(256) / 256
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
    fn test_startpos_is_small_and_white_leaning() {
        let p = Position::startpos();
        network::init().unwrap();
        let eval = evaluate_position(&p, &mut EvalCache::new());
        assert!((0..=30).contains(&eval), "startpos eval {} should be a small tempo edge", eval);
    }

    #[test]
    fn test_dead_positions_evaluate_to_zero() {
        for fen in [
            "8/8/8/4k3/8/8/4K3/8 w - - 0 1",
            "8/8/8/4k3/8/3N4/4K3/8 w - - 0 1",
            "8/8/8/3bk3/8/8/4K3/8 w - - 0 1",
        ] {
            let p = pos(fen);
            assert!(dead_position(&p), "{} should be a dead position", fen);
            assert_eq!(evaluate_position(&p, &mut EvalCache::new()), DRAW);
        }
    }

    #[test]
    fn test_two_minors_are_not_dead() {
        let p = pos("8/8/8/4k3/8/2NN4/4K3/8 w - - 0 1");
        assert!(!dead_position(&p));
    }

    #[test]
    fn test_minor_each_side_is_not_dead() {
        // KBvKN can still be mated with cooperation; follow the strict rule
        let p = pos("8/8/8/3bk3/8/3N4/4K3/8 w - - 0 1");
        assert!(!dead_position(&p));
    }

    #[test]
    fn test_material_advantage_shows_up() {
        let p = pos("rnb1kbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
        let eval = evaluate_position(&p, &mut EvalCache::new());
        assert!(eval > 800, "queen-up eval {} should be large and positive", eval);
    }

    #[test]
    fn test_eval_is_pure_in_the_zobrist_key() {
        let mut cache = EvalCache::new();
        let p1 = pos("r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3");
        let p2 = pos("r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3");
        assert_eq!(p1.zobrist_key(), p2.zobrist_key());
        assert_eq!(
            evaluate_position(&p1, &mut cache),
            evaluate_position(&p2, &mut cache),
            "equal keys must evaluate equally"
        );
    }

    #[test]
    fn test_pawnless_minor_lead_is_attenuated() {
        // White is a knight up with no pawns: scaled all the way to zero
        let p = pos("8/8/8/4k3/8/2NN4/4K3/8 w - - 0 1");
        let eval = evaluate_position(&p, &mut EvalCache::new());
        assert_eq!(eval, 0, "pawnless two-minor lead should scale to zero, got {}", eval);
    }

    #[test]
    fn test_clamp_keeps_eval_in_band() {
        let p = pos("7k/7p/8/8/8/RRRRRR2/RRRRRR2/K7 w - - 0 1");
        let eval = evaluate_position(&p, &mut EvalCache::new());
        assert!(eval <= EVAL_MAX, "eval {} escaped the clamp", eval);
    }
}
