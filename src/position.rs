use shakmaty::fen::Fen;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{
    Bitboard, Board, CastlingMode, CastlingSide, Chess, Color, EnPassantMode, Move, MoveList,
    Piece, Position as _, Role, Square,
};

use crate::network::{feature_index, Accumulator, DeltaArray};
use crate::types::Score;

pub const ROLES: [Role; 6] = [
    Role::Pawn,
    Role::Knight,
    Role::Bishop,
    Role::Rook,
    Role::Queen,
    Role::King,
];

#[derive(Clone)]
struct Frame {
    pos: Chess,
    key: u64,
    capture_square: Option<Square>,
}

#[derive(Clone)]
struct SeeUndo {
    from: Square,
    to: Square,
    attacker: Piece,
    victim: Option<Piece>,
}

/// Search-side view of the game: a make/unmake stack over `shakmaty::Chess`
/// with Zobrist keys, the repetition history of the played game, and the
/// network accumulator kept in lock-step with every mutation.
#[derive(Clone)]
pub struct Position {
    stack: Vec<Frame>,
    game_history: Vec<u64>,
    accumulator: Accumulator,
    castling_mode: CastlingMode,
    see_board: Board,
    see_undo: Vec<SeeUndo>,
}

impl Position {
    pub fn startpos() -> Self {
        Self::from_parts(Chess::default(), CastlingMode::Standard)
    }

    pub fn from_fen(fen: &str, mode: CastlingMode) -> Result<Self, String> {
        let parsed: Fen = fen.parse().map_err(|e| format!("{}", e))?;
        let chess: Chess = parsed.into_position(mode).map_err(|e| format!("{}", e))?;
        Ok(Self::from_parts(chess, mode))
    }

    fn from_parts(pos: Chess, castling_mode: CastlingMode) -> Self {
        let key = compute_key(&pos);
        let accumulator = Accumulator::from_active_features(&active_features(pos.board()));
        let see_board = pos.board().clone();
        Self {
            stack: vec![Frame { pos, key, capture_square: None }],
            game_history: Vec::new(),
            accumulator,
            castling_mode,
            see_board,
            see_undo: Vec::new(),
        }
    }

    fn top(&self) -> &Frame {
        self.stack.last().expect("position stack is never empty")
    }

    pub fn chess(&self) -> &Chess {
        &self.top().pos
    }

    pub fn board(&self) -> &Board {
        self.top().pos.board()
    }

    pub fn castling_mode(&self) -> CastlingMode {
        self.castling_mode
    }

    pub fn side_to_move(&self) -> Color {
        self.top().pos.turn()
    }

    pub fn zobrist_key(&self) -> u64 {
        self.top().key
    }

    /// Plies on the 50-move clock.
    pub fn half_move_clock(&self) -> u32 {
        self.top().pos.halfmoves()
    }

    /// Plies played since the start of the game.
    pub fn turn_count(&self) -> u32 {
        let pos = &self.top().pos;
        (pos.fullmoves().get() - 1) * 2 + if pos.turn() == Color::Black { 1 } else { 0 }
    }

    pub fn en_passant_square(&self) -> Option<Square> {
        self.top().pos.ep_square(EnPassantMode::Legal)
    }

    pub fn can_castle(&self, color: Color, side: CastlingSide) -> bool {
        self.top().pos.castles().has(color, side)
    }

    pub fn piece_bb(&self, color: Color, role: Role) -> Bitboard {
        self.board().by_piece(Piece { color, role })
    }

    pub fn pieces_of(&self, color: Color) -> Bitboard {
        self.board().by_color(color)
    }

    pub fn all_pieces(&self) -> Bitboard {
        self.board().occupied()
    }

    pub fn piece_count(&self) -> usize {
        self.board().occupied().count()
    }

    pub fn king_square(&self, color: Color) -> Square {
        self.board().king_of(color).expect("a king is always on the board")
    }

    pub fn is_in_check(&self) -> bool {
        self.top().pos.is_check()
    }

    pub fn legal_moves(&self) -> MoveList {
        self.top().pos.legal_moves()
    }

    /// Captures and promotions only, for the quiescence search.
    pub fn quiescence_moves(&self) -> MoveList {
        let mut moves = self.legal_moves();
        moves.retain(|m| m.is_capture() || m.is_promotion());
        moves
    }

    /// Keys of all earlier positions, oldest first; the current key is not
    /// included.
    pub fn previous_key_count(&self) -> usize {
        self.game_history.len() + self.stack.len() - 1
    }

    pub fn previous_key(&self, i: usize) -> u64 {
        if i < self.game_history.len() {
            self.game_history[i]
        } else {
            self.stack[i - self.game_history.len()].key
        }
    }

    pub fn last_capture_square(&self) -> Option<Square> {
        self.top().capture_square
    }

    /// Raw network output for the current accumulator top, White's view.
    pub fn get_evaluation(&self) -> Score {
        self.accumulator.evaluate()
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// Accumulator rebuilt from scratch; the incremental top must equal it.
    pub fn recomputed_accumulator(&self) -> Accumulator {
        Accumulator::from_active_features(&active_features(self.board()))
    }

    pub fn apply_move(&mut self, m: &Move) {
        let delta = move_delta(self.side_to_move(), m);
        let mut next = self.top().pos.clone();
        next.play_unchecked(m);
        let key = compute_key(&next);
        let capture_square = if m.is_capture() { Some(m.to()) } else { None };
        self.stack.push(Frame { pos: next, key, capture_square });
        self.accumulator.apply_delta(&delta);
    }

    pub fn revert_move(&mut self) {
        self.stack.pop();
        debug_assert!(!self.stack.is_empty(), "reverted past the root");
        self.accumulator.apply_inverse_delta();
    }

    /// Swap the side to move. Fails (and changes nothing) only when the side
    /// to move is in check.
    pub fn apply_null_move(&mut self) -> bool {
        match self.top().pos.clone().swap_turn() {
            Ok(next) => {
                let key = compute_key(&next);
                self.stack.push(Frame { pos: next, key, capture_square: None });
                self.accumulator.push_duplicate();
                true
            }
            Err(_) => false,
        }
    }

    pub fn revert_null_move(&mut self) {
        self.stack.pop();
        debug_assert!(!self.stack.is_empty(), "reverted past the root");
        self.accumulator.apply_inverse_delta();
    }

    /// Permanently play a move, folding the old position into the game
    /// history. Used while processing `position ... moves`.
    pub fn play_root_move(&mut self, m: &Move) {
        let prev_key = self.zobrist_key();
        self.apply_move(m);
        let root = self.stack.pop().expect("position stack is never empty");
        self.stack.clear();
        self.stack.push(root);
        self.game_history.push(prev_key);
        self.accumulator.recalculate(&active_features(self.board()));
    }

    // SEE capture sequences run on a scratch board with no legality rules;
    // the scratch is (re)seeded from the real board whenever the SEE stack is
    // empty.

    pub fn apply_see_capture(&mut self, from: Square, to: Square) {
        if self.see_undo.is_empty() {
            self.see_board = self.board().clone();
        }
        let attacker = self
            .see_board
            .remove_piece_at(from)
            .expect("SEE capture from an empty square");
        let victim = self.see_board.remove_piece_at(to);
        self.see_board.set_piece_at(to, attacker);
        self.see_undo.push(SeeUndo { from, to, attacker, victim });
    }

    pub fn revert_see_capture(&mut self) {
        let undo = self.see_undo.pop().expect("SEE revert without a capture applied");
        self.see_board.remove_piece_at(undo.to);
        if let Some(victim) = undo.victim {
            self.see_board.set_piece_at(undo.to, victim);
        }
        self.see_board.set_piece_at(undo.from, undo.attacker);
    }

    fn see_view(&self) -> &Board {
        if self.see_undo.is_empty() { self.board() } else { &self.see_board }
    }

    pub fn see_piece_at(&self, sq: Square) -> Option<Piece> {
        self.see_view().piece_at(sq)
    }

    /// Pieces of `side` attacking `sq` in the current SEE state.
    pub fn see_attackers(&self, sq: Square, side: Color) -> Bitboard {
        let board = self.see_view();
        board.attacks_to(sq, side, board.occupied()) & board.by_color(side)
    }
}

fn compute_key(pos: &Chess) -> u64 {
    pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
}

fn active_features(board: &Board) -> Vec<usize> {
    let mut active = Vec::with_capacity(32);
    for color in [Color::White, Color::Black] {
        for role in ROLES {
            for sq in board.by_piece(Piece { color, role }) {
                active.push(feature_index(color, role, sq));
            }
        }
    }
    active
}

/// The one-hot input flips a move induces, at most four of them.
fn move_delta(us: Color, m: &Move) -> DeltaArray {
    let mut d = DeltaArray::default();
    match m {
        Move::Normal { role, from, capture, to, promotion } => {
            d.remove(feature_index(us, *role, *from));
            match promotion {
                Some(promo) => d.add(feature_index(us, *promo, *to)),
                None => d.add(feature_index(us, *role, *to)),
            }
            if let Some(victim) = capture {
                d.remove(feature_index(!us, *victim, *to));
            }
        }
        Move::EnPassant { from, to } => {
            d.remove(feature_index(us, Role::Pawn, *from));
            d.add(feature_index(us, Role::Pawn, *to));
            let captured = Square::from_coords(to.file(), from.rank());
            d.remove(feature_index(!us, Role::Pawn, captured));
        }
        Move::Castle { king, rook } => {
            let side =
                if rook < king { CastlingSide::QueenSide } else { CastlingSide::KingSide };
            let king_to = Square::from_coords(side.king_to_file(), king.rank());
            let rook_to = Square::from_coords(side.rook_to_file(), rook.rank());
            d.remove(feature_index(us, Role::King, *king));
            d.remove(feature_index(us, Role::Rook, *rook));
            d.add(feature_index(us, Role::King, king_to));
            d.add(feature_index(us, Role::Rook, rook_to));
        }
        Move::Put { .. } => {}
    }
    d
}
