use shakmaty::{Color, Move, Rank, Role};

use crate::evaluation::{dead_position, evaluate_position, EvalCache};
use crate::movegen::{order_moves, side_index, HistoryTable};
use crate::position::Position;
use crate::see::{piece_value, see, see_capture};
use crate::syzygy::SyzygyProber;
use crate::threads::ThreadSharedData;
use crate::time::{SearchTimeManage, Timer, NO_TIME_LIMIT};
use crate::tt::{pack_move, Bound, TTEntry, TranspositionTable};
use crate::types::{
    mate_in, mated_in, Score, SearchResult, DRAW, HIGH_INF, HISTORY_MAX, LOW_INF, MAX_DEPTH,
};

const NULL_MOVE_REDUCTION: i32 = 3;
/// From this depth on the null-move reduction grows to 4.
const VARIABLE_NULL_DEPTH: i32 = 7;
const FUTILITY_MARGINS: [Score; 5] = [100, 150, 250, 400, 600];
const ASPIRATION_WINDOW: Score = 25;
const DELTA_MARGIN: Score = 200;

/// Per-worker search state.
pub struct SearchData {
    /// Triangular PV table indexed by distance from root.
    pub pv_table: Vec<Vec<Move>>,
    pub killers: Vec<[Option<Move>; 2]>,
    pub history: Box<HistoryTable>,
    pub time_manage: SearchTimeManage,
    pub eval_cache: EvalCache,
}

impl SearchData {
    pub fn new() -> Self {
        Self {
            pv_table: vec![Vec::new(); (MAX_DEPTH + 1) as usize],
            killers: vec![[None, None]; (MAX_DEPTH + 1) as usize],
            history: Box::new([[[0; 64]; 64]; 2]),
            time_manage: SearchTimeManage::new(),
            eval_cache: EvalCache::new(),
        }
    }
}

impl Default for SearchData {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SearchLimits {
    pub allowed_ms: i64,
    pub max_depth: i32,
    pub node_limit: Option<u64>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self { allowed_ms: NO_TIME_LIMIT, max_depth: MAX_DEPTH, node_limit: None }
    }
}

/// Read-only handles every node needs.
pub struct SearchContext<'a> {
    pub shared: &'a ThreadSharedData,
    pub tt: &'a TranspositionTable,
    pub tb: Option<&'a SyzygyProber>,
}

/// One worker's iterative-deepening loop. Returns the best move this worker
/// saw confirmed inside an aspiration window.
pub fn search_position(
    mut pos: Position,
    limits: &SearchLimits,
    thread_id: usize,
    shared: &ThreadSharedData,
    tt: &TranspositionTable,
    tb: Option<&SyzygyProber>,
) -> Option<Move> {
    let mut locals = SearchData::new();
    locals.time_manage.start_search(limits.allowed_ms);
    if let Some(nodes) = limits.node_limit {
        locals.time_manage.set_node_limit(nodes);
    }
    let search_timer = Timer::new();
    let ctx = SearchContext { shared, tt, tb };
    let colour = if pos.side_to_move() == Color::White { 1 } else { -1 };

    let mut best_move: Option<Move> = None;
    let mut alpha = LOW_INF;
    let mut beta = HIGH_INF;
    let mut prev_score = 0;
    let mut aspiration_research = false;
    let mut depth = 1;

    loop {
        let keep_going = !locals.time_manage.abort_search(shared.nodes())
            && locals.time_manage.continue_search()
            && depth <= limits.max_depth;
        // depth 1 always runs so a move exists even under extreme pressure
        if !(keep_going || depth == 1) {
            break;
        }

        if !aspiration_research && shared.should_skip_depth(depth) {
            depth += 1;
            continue;
        }
        shared.report_depth(depth, thread_id);
        // count the root so an immediate hash hit still shows progress
        shared.add_node();

        let search =
            negascout(&mut pos, depth, depth, alpha, beta, colour, 0, false, &mut locals, &ctx);
        let mut score = search.score();

        if depth > 1 && locals.time_manage.abort_search(shared.nodes()) {
            break;
        }
        if shared.thread_abort(depth) {
            score = shared.aspiration_score();
        }

        if score <= alpha {
            alpha = (prev_score - (prev_score - alpha).abs() * 4).max(LOW_INF);
            aspiration_research = true;
            continue;
        }
        if score >= beta {
            beta = (prev_score + (prev_score - beta).abs() * 4).min(HIGH_INF);
            aspiration_research = true;
            continue;
        }
        aspiration_research = false;

        if let Some(m) = search.best_move() {
            best_move = Some(m.clone());
        }
        shared.report_result(
            depth,
            search_timer.elapsed_ms(),
            score,
            alpha,
            beta,
            &pos,
            best_move.as_ref(),
            &locals,
            tt,
        );

        depth += 1;
        alpha = score - ASPIRATION_WINDOW;
        beta = score + ASPIRATION_WINDOW;
        prev_score = score;
    }

    best_move
}

#[allow(clippy::too_many_arguments)]
pub fn negascout(
    pos: &mut Position,
    initial_depth: i32,
    mut depth_remaining: i32,
    mut alpha: Score,
    mut beta: Score,
    colour: i32,
    distance_from_root: i32,
    allowed_null: bool,
    locals: &mut SearchData,
    ctx: &SearchContext,
) -> SearchResult {
    ctx.shared.add_node();

    // abort sentinels; callers discard the value
    if distance_from_root > 0 && locals.time_manage.abort_search(ctx.shared.nodes()) {
        return SearchResult::score_only(-1);
    }
    if ctx.shared.thread_abort(initial_depth) {
        return SearchResult::score_only(-1);
    }
    if distance_from_root >= MAX_DEPTH {
        return SearchResult::score_only(DRAW);
    }

    let dist = distance_from_root as usize;
    locals.pv_table[dist].clear();

    if dead_position(pos) {
        return SearchResult::score_only(DRAW);
    }
    if check_for_rep(pos, distance_from_root) {
        return SearchResult::score_only(DRAW);
    }

    // tablebase probe: DTZ-aware at the root, WDL in the tree
    if let Some(tb) = ctx.tb {
        if pos.piece_count() <= tb.max_pieces() {
            let static_eval = colour * evaluate_position(pos, &mut locals.eval_cache);
            if distance_from_root == 0 {
                if let Some(result) = tb.probe_root(pos, static_eval) {
                    ctx.shared.add_tb_hit();
                    return result;
                }
            } else if let Some(score) = tb.probe_search(pos, static_eval) {
                ctx.shared.add_tb_hit();
                return SearchResult::score_only(score);
            }
        }
    }

    let key = pos.zobrist_key();
    if let Some(mut entry) = ctx.tt.probe(key, depth_remaining) {
        ctx.tt.touch(key, pos.turn_count(), distance_from_root);

        // distrust stored scores for positions we have already visited
        let mut rep = 1;
        for i in 0..pos.previous_key_count() {
            if pos.previous_key(i) == key {
                rep += 1;
                break;
            }
        }
        if rep < 2 {
            entry.mate_score_adjustment(distance_from_root);
            if use_transposition(&entry, alpha, beta) {
                let best = resolve_move(pos, entry.packed_move);
                return SearchResult::new(entry.score, best);
            }
        }
    }

    // horizon reached: resolve captures before standing still
    if depth_remaining <= 0 && !pos.is_in_check() {
        return quiescence(
            pos,
            initial_depth,
            alpha,
            beta,
            colour,
            distance_from_root,
            depth_remaining,
            locals,
            ctx,
        );
    }

    // null move pruning, backed by a verification search
    if allowed_null_move(allowed_null, pos, beta, alpha, depth_remaining) {
        let reduction = NULL_MOVE_REDUCTION + i32::from(depth_remaining >= VARIABLE_NULL_DEPTH);
        if pos.apply_null_move() {
            let score = -negascout(
                pos,
                initial_depth,
                depth_remaining - reduction - 1,
                -beta,
                -beta + 1,
                -colour,
                distance_from_root + 1,
                false,
                locals,
                ctx,
            )
            .score();
            pos.revert_null_move();

            if score >= beta {
                let verification = negascout(
                    pos,
                    initial_depth,
                    depth_remaining - reduction - 1,
                    beta - 1,
                    beta,
                    colour,
                    distance_from_root,
                    false,
                    locals,
                    ctx,
                );
                if verification.score() >= beta {
                    return verification;
                }
            }
        }
    }

    // mate distance pruning
    alpha = alpha.max(mated_in(distance_from_root));
    beta = beta.min(mate_in(distance_from_root));
    if alpha >= beta {
        return SearchResult::score_only(alpha);
    }

    let mut best_move: Option<Move> = None;
    let mut score = LOW_INF;
    let mut a = alpha;
    let mut b = beta;

    // search the hash move before generating anything, hoping for a cutoff
    let hash_move = get_hash_move(pos, ctx, distance_from_root);
    if let Some(hash_move) = &hash_move {
        if pos.half_move_clock() < 100 {
            pos.apply_move(hash_move);
            ctx.tt.prefetch(pos.zobrist_key());
            let extended = depth_remaining + extension(pos, hash_move, alpha, beta);
            let new_score = -negascout(
                pos,
                initial_depth,
                extended - 1,
                -b,
                -a,
                -colour,
                distance_from_root + 1,
                true,
                locals,
                ctx,
            )
            .score();
            pos.revert_move();

            if new_score > score {
                score = new_score;
                best_move = Some(hash_move.clone());
            }
            if score > a {
                a = score;
                update_pv(hash_move, dist, &mut locals.pv_table);
            }
            if a >= beta {
                add_killer(hash_move, dist, &mut locals.killers);
                add_history(hash_move, depth_remaining, &mut locals.history, pos.side_to_move());
                if !locals.time_manage.abort_search(ctx.shared.nodes())
                    && !ctx.shared.thread_abort(initial_depth)
                {
                    store_score(ctx, pos, score, alpha, beta, depth_remaining, distance_from_root, best_move.as_ref());
                }
                return SearchResult::new(score, best_move);
            }
            b = a + 1;
        }
    }

    let mut moves = pos.legal_moves();
    if moves.is_empty() {
        return SearchResult::score_only(terminal_score(pos, distance_from_root));
    }
    // 50-move rule, now that checkmate is excluded
    if pos.half_move_clock() >= 100 {
        return SearchResult::score_only(DRAW);
    }

    let killers = locals.killers[dist].clone();
    order_moves(&mut moves, pos, hash_move.as_ref(), &killers, &locals.history);

    let in_check = pos.is_in_check();
    let static_score = colour * evaluate_position(pos, &mut locals.eval_cache);

    // internal iterative deepening: without a hash move a shallower pass
    // seeds this node's ordering cheaply
    if hash_move.is_none() && depth_remaining > 3 {
        depth_remaining -= 1;
    }

    let futile_node = depth_remaining < FUTILITY_MARGINS.len() as i32
        && static_score + FUTILITY_MARGINS[depth_remaining.max(0) as usize] < a;

    for (i, m) in moves.iter().enumerate() {
        if Some(m) == hash_move.as_ref() {
            continue;
        }

        pos.apply_move(m);
        ctx.tt.prefetch(pos.zobrist_key());

        if i > 0 && futile_node && is_futile(m, beta, alpha, in_check, pos) {
            pos.revert_move();
            continue;
        }

        let extended = depth_remaining + extension(pos, m, alpha, beta);

        // late move reductions: a zero-window look at reduced depth first
        if i > 3 && lmr_allowed(m, in_check, pos, depth_remaining) {
            let r = reduction(depth_remaining, i as i32, alpha, beta);
            let reduced = -negascout(
                pos,
                initial_depth,
                extended - 1 - r,
                -a - 1,
                -a,
                -colour,
                distance_from_root + 1,
                true,
                locals,
                ctx,
            )
            .score();
            if reduced <= a {
                pos.revert_move();
                continue;
            }
        }

        let mut new_score = -negascout(
            pos,
            initial_depth,
            extended - 1,
            -b,
            -a,
            -colour,
            distance_from_root + 1,
            true,
            locals,
            ctx,
        )
        .score();
        if new_score > a && new_score < beta && i >= 1 {
            // the zero-window guess was wrong, take the full window
            new_score = -negascout(
                pos,
                initial_depth,
                extended - 1,
                -beta,
                -a,
                -colour,
                distance_from_root + 1,
                true,
                locals,
                ctx,
            )
            .score();
        }
        pos.revert_move();

        if new_score > score {
            score = new_score;
            best_move = Some(m.clone());
        }
        if score > a {
            a = score;
            update_pv(m, dist, &mut locals.pv_table);
        }
        if a >= beta {
            add_killer(m, dist, &mut locals.killers);
            add_history(m, depth_remaining, &mut locals.history, pos.side_to_move());
            break;
        }
        b = a + 1;
    }

    if !locals.time_manage.abort_search(ctx.shared.nodes())
        && !ctx.shared.thread_abort(initial_depth)
    {
        store_score(ctx, pos, score, alpha, beta, depth_remaining, distance_from_root, best_move.as_ref());
    }

    SearchResult::new(score, best_move)
}

#[allow(clippy::too_many_arguments)]
fn quiescence(
    pos: &mut Position,
    initial_depth: i32,
    mut alpha: Score,
    beta: Score,
    colour: i32,
    distance_from_root: i32,
    depth_remaining: i32,
    locals: &mut SearchData,
    ctx: &SearchContext,
) -> SearchResult {
    if locals.time_manage.abort_search(ctx.shared.nodes()) {
        return SearchResult::score_only(-1);
    }
    if ctx.shared.thread_abort(initial_depth) {
        return SearchResult::score_only(-1);
    }
    if distance_from_root >= MAX_DEPTH {
        return SearchResult::score_only(DRAW);
    }

    let dist = distance_from_root as usize;
    locals.pv_table[dist].clear();

    if pos.is_in_check() && pos.legal_moves().is_empty() {
        return SearchResult::score_only(terminal_score(pos, distance_from_root));
    }

    let static_score = colour * evaluate_position(pos, &mut locals.eval_cache);
    if static_score >= beta {
        return SearchResult::score_only(static_score);
    }
    if static_score > alpha {
        alpha = static_score;
    }

    let mut moves = pos.quiescence_moves();
    if moves.is_empty() {
        return SearchResult::score_only(static_score);
    }

    let hash_move = get_hash_move(pos, ctx, distance_from_root);
    let killers = locals.killers[dist].clone();
    order_moves(&mut moves, pos, hash_move.as_ref(), &killers, &locals.history);

    let mut best_move: Option<Move> = None;
    let mut score = static_score;

    for m in &moves {
        // plain captures get a SEE verdict; a promotion is worth a queen
        let mut see_value = if m.is_capture() && !m.is_en_passant() && !m.is_promotion() {
            see_capture(pos, m)
        } else {
            0
        };
        if m.is_promotion() {
            see_value += piece_value(Role::Queen);
        }

        // delta pruning: even the best case cannot reach alpha
        if static_score + see_value + DELTA_MARGIN < alpha {
            break;
        }
        // losing captures, and everything ordered after them
        if see_value < 0 {
            break;
        }
        // equal trades only as recaptures
        if see_value <= 0 && pos.last_capture_square() != Some(m.to()) {
            continue;
        }
        if m.is_promotion() && m.promotion() != Some(Role::Queen) {
            continue;
        }

        pos.apply_move(m);
        let new_score = -quiescence(
            pos,
            initial_depth,
            -beta,
            -alpha,
            -colour,
            distance_from_root + 1,
            depth_remaining - 1,
            locals,
            ctx,
        )
        .score();
        pos.revert_move();

        if new_score > score {
            score = new_score;
            best_move = Some(m.clone());
        }
        if score > alpha {
            alpha = score;
            update_pv(m, dist, &mut locals.pv_table);
        }
        if score >= beta {
            break;
        }
    }

    if !locals.time_manage.abort_search(ctx.shared.nodes())
        && !ctx.shared.thread_abort(initial_depth)
    {
        store_score(ctx, pos, score, alpha, beta, depth_remaining, distance_from_root, best_move.as_ref());
    }

    SearchResult::new(score, best_move)
}

/// Count occurrences of the current key among the previous positions. Three
/// is always a draw; a single repeat counts too when it happened inside the
/// local search tree rather than the played game.
fn check_for_rep(pos: &Position, distance_from_root: i32) -> bool {
    let mut total_rep = 1;
    let current = pos.zobrist_key();
    let count = pos.previous_key_count();

    for i in 0..count {
        if pos.previous_key(i) == current {
            total_rep += 1;
            if total_rep == 3 {
                return true;
            }
            if total_rep == 2 && (count - i) as i32 <= distance_from_root {
                return true;
            }
        }
    }
    false
}

fn use_transposition(entry: &TTEntry, alpha: Score, beta: Score) -> bool {
    match entry.bound {
        Bound::Exact => true,
        Bound::Lower => entry.score.max(alpha) >= beta,
        Bound::Upper => alpha >= entry.score.min(beta),
        Bound::Empty => false,
    }
}

fn get_hash_move(pos: &Position, ctx: &SearchContext, distance_from_root: i32) -> Option<Move> {
    let key = pos.zobrist_key();
    let packed = ctx.tt.probe_move(key)?;
    ctx.tt.touch(key, pos.turn_count(), distance_from_root);
    resolve_move(pos, packed)
}

/// A stored move is only a hint until it matches a generated legal move.
fn resolve_move(pos: &Position, packed: u16) -> Option<Move> {
    if packed == 0 {
        return None;
    }
    pos.legal_moves().into_iter().find(|m| pack_move(m) == packed)
}

#[allow(clippy::too_many_arguments)]
fn store_score(
    ctx: &SearchContext,
    pos: &Position,
    score: Score,
    alpha_original: Score,
    beta: Score,
    depth_remaining: i32,
    distance_from_root: i32,
    best_move: Option<&Move>,
) {
    let bound = if score <= alpha_original {
        Bound::Upper
    } else if score >= beta {
        Bound::Lower
    } else {
        Bound::Exact
    };
    let packed = best_move.map(pack_move).unwrap_or(0);
    ctx.tt.store(
        packed,
        pos.zobrist_key(),
        score,
        depth_remaining,
        pos.turn_count(),
        distance_from_root,
        bound,
    );
}

fn terminal_score(pos: &Position, distance_from_root: i32) -> Score {
    if pos.is_in_check() { mated_in(distance_from_root) } else { DRAW }
}

fn is_pv(beta: Score, alpha: Score) -> bool {
    beta != alpha + 1
}

/// Only kings and pawns left; null moves are zugzwang traps here.
fn is_endgame(pos: &Position) -> bool {
    pos.all_pieces() == (pos.board().kings() | pos.board().pawns())
}

fn allowed_null_move(
    allowed_null: bool,
    pos: &Position,
    beta: Score,
    alpha: Score,
    depth_remaining: i32,
) -> bool {
    allowed_null
        && !pos.is_in_check()
        && !is_pv(beta, alpha)
        && !is_endgame(pos)
        && depth_remaining > NULL_MOVE_REDUCTION + 1
        && pos.piece_count() >= 5
}

/// Check and about-to-promote extensions, measured on the child position.
fn extension(pos: &mut Position, m: &Move, alpha: Score, beta: Score) -> i32 {
    let mut ext = 0;

    if is_pv(beta, alpha) {
        if pos.is_in_check() {
            ext += 1;
        }
    } else {
        let stm = pos.side_to_move();
        if pos.is_in_check() && see(pos, m.to(), stm) == 0 {
            ext += 1;
        }
    }

    if let Some(piece) = pos.board().piece_at(m.to()) {
        if piece.role == Role::Pawn {
            let rank = m.to().rank();
            if (piece.color == Color::White && rank == Rank::Seventh)
                || (piece.color == Color::Black && rank == Rank::Second)
            {
                ext += 1;
            }
        }
    }

    ext
}

fn lmr_allowed(m: &Move, parent_in_check: bool, pos: &Position, depth_remaining: i32) -> bool {
    !m.is_capture()
        && !m.is_promotion()
        && !parent_in_check
        && !is_endgame(pos)
        && !pos.is_in_check()
        && depth_remaining > 3
}

fn is_futile(m: &Move, beta: Score, alpha: Score, parent_in_check: bool, pos: &Position) -> bool {
    !is_pv(beta, alpha)
        && !m.is_capture()
        && !m.is_promotion()
        && !parent_in_check
        && !pos.is_in_check()
}

/// Reduction formula adapted from Fruit Reloaded via the chess programming
/// wiki; gentler inside the PV.
fn reduction(depth: i32, i: i32, alpha: Score, beta: Score) -> i32 {
    let sum = ((depth - 1) as f64).sqrt() + ((i - 1) as f64).sqrt();
    if is_pv(beta, alpha) { (sum / 3.0) as i32 } else { (sum / 2.0) as i32 }
}

fn update_pv(m: &Move, dist: usize, pv_table: &mut [Vec<Move>]) {
    let (head, tail) = pv_table.split_at_mut(dist + 1);
    let row = &mut head[dist];
    row.clear();
    row.push(m.clone());
    if let Some(child) = tail.first() {
        row.extend(child.iter().cloned());
    }
}

fn add_killer(m: &Move, dist: usize, killers: &mut [[Option<Move>; 2]]) {
    if m.is_capture() || m.is_promotion() || killers[dist][0].as_ref() == Some(m) {
        return;
    }
    if killers[dist][1].as_ref() == Some(m) {
        killers[dist].swap(0, 1);
    } else {
        killers[dist][1] = Some(m.clone());
    }
}

fn add_history(m: &Move, depth_remaining: i32, history: &mut HistoryTable, stm: Color) {
    if m.is_capture() || m.is_promotion() {
        return;
    }
    let from = m.from().expect("quiet moves always have an origin") as usize;
    let to = m.to() as usize;
    let counter = &mut history[side_index(stm)][from][to];
    let bonus = (depth_remaining * depth_remaining) as u32;
    *counter = counter.saturating_add(bonus).min(HISTORY_MAX);
}


// NegaScout searches the first (hash) move with the full window and every
// later move with a zero-width window, re-searching only on a surprise. All
// pruning lives here: verified null move, mate-distance, futility, LMR, and
// the quiescence capture resolver at the horizon.

// Aborts return -1 through the normal return path; callers recognise the
// abort via the time manager / completed-depth checks and drop the value, so
// nothing poisoned ever reaches the transposition table.
