use shakmaty::{Color, Move, Role, Square};

use crate::position::Position;
use crate::types::Score;

const PIECE_VALUES: [Score; 6] = [100, 320, 330, 500, 900, 20_000];

pub fn piece_value(role: Role) -> Score {
    PIECE_VALUES[role as usize - 1]
}

/// Square of the least valuable piece of `side` attacking `square` in the
/// current SEE state.
fn smallest_attacker(pos: &Position, square: Square, side: Color) -> Option<Square> {
    pos.see_attackers(square, side)
        .into_iter()
        .filter_map(|sq| pos.see_piece_at(sq).map(|p| (piece_value(p.role), sq)))
        .min_by_key(|&(value, _)| value)
        .map(|(_, sq)| sq)
}

/// Best material balance `side` can get by continuing the capture sequence on
/// `square`. A side that would lose material simply stops capturing, hence
/// the floor at zero.
pub fn see(pos: &mut Position, square: Square, side: Color) -> Score {
    let mut value = 0;

    if let Some(from) = smallest_attacker(pos, square, side) {
        let capture_value = pos.see_piece_at(square).map(|p| piece_value(p.role)).unwrap_or(0);
        pos.apply_see_capture(from, square);
        value = (capture_value - see(pos, square, !side)).max(0);
        pos.revert_see_capture();
    }

    value
}

/// Material outcome of playing the capture `m` with both sides then trading
/// optimally on the target square. Not valid for en passant or promotions;
/// callers filter those out.
pub fn see_capture(pos: &mut Position, m: &Move) -> Score {
    debug_assert!(m.is_capture() && !m.is_en_passant() && !m.is_promotion());

    let side = pos.side_to_move();
    let from = m.from().expect("a capture always has an origin square");
    let capture_value = pos
        .see_piece_at(m.to())
        .map(|p| piece_value(p.role))
        .expect("capture target is empty");

    pos.apply_see_capture(from, m.to());
    let value = capture_value - see(pos, m.to(), !side);
    pos.revert_see_capture();

    value
}
