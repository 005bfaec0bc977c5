use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use shakmaty::Move;

use crate::position::Position;
use crate::search::{search_position, SearchData, SearchLimits};
use crate::syzygy::SyzygyProber;
use crate::time::KEEP_SEARCHING;
use crate::tt::TranspositionTable;
use crate::types::{Score, MATE_SCORE, TERMINAL_SCORE};

struct Announce {
    current_best_move: Option<Move>,
    prev_score: Score,
}

/// State shared by the workers of one `go` command. Announcements are
/// serialised under the mutex; the counters are relaxed atomics.
pub struct ThreadSharedData {
    announce: Mutex<Announce>,
    completed_depth: AtomicU32,
    search_depths: Vec<AtomicU32>,
    nodes: AtomicU64,
    tb_hits: AtomicU64,
    no_output: bool,
}

impl ThreadSharedData {
    pub fn new(threads: usize, no_output: bool) -> Self {
        Self {
            announce: Mutex::new(Announce { current_best_move: None, prev_score: 0 }),
            completed_depth: AtomicU32::new(0),
            search_depths: (0..threads).map(|_| AtomicU32::new(0)).collect(),
            nodes: AtomicU64::new(0),
            tb_hits: AtomicU64::new(0),
            no_output,
        }
    }

    pub fn best_move(&self) -> Option<Move> {
        self.announce.lock().unwrap().current_best_move.clone()
    }

    pub fn aspiration_score(&self) -> Score {
        self.announce.lock().unwrap().prev_score
    }

    /// True once any worker has fully announced this depth; in-flight frames
    /// of the same iteration drop out early.
    pub fn thread_abort(&self, initial_depth: i32) -> bool {
        initial_depth as u32 <= self.completed_depth.load(Ordering::Relaxed)
    }

    pub fn completed_depth(&self) -> u32 {
        self.completed_depth.load(Ordering::Relaxed)
    }

    pub fn report_depth(&self, depth: i32, thread_id: usize) {
        let _guard = self.announce.lock().unwrap();
        self.search_depths[thread_id].store(depth as u32, Ordering::Relaxed);
    }

    /// Skip an iteration when more than half of the workers are already at
    /// or past it.
    pub fn should_skip_depth(&self, depth: i32) -> bool {
        let _guard = self.announce.lock().unwrap();
        let at_or_past = self
            .search_depths
            .iter()
            .filter(|d| d.load(Ordering::Relaxed) >= depth as u32)
            .count();
        at_or_past > self.search_depths.len() / 2
    }

    pub fn add_node(&self) {
        self.nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    pub fn add_tb_hit(&self) {
        self.tb_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tb_hits(&self) -> u64 {
        self.tb_hits.load(Ordering::Relaxed)
    }

    /// Only the first full-window result of each depth wins, and only it is
    /// printed.
    #[allow(clippy::too_many_arguments)]
    pub fn report_result(
        &self,
        depth: i32,
        time_ms: i64,
        score: Score,
        alpha: Score,
        beta: Score,
        pos: &Position,
        best_move: Option<&Move>,
        locals: &SearchData,
        tt: &TranspositionTable,
    ) {
        let mut announce = self.announce.lock().unwrap();
        if alpha < score && score < beta && self.completed_depth.load(Ordering::Relaxed) < depth as u32
        {
            if !self.no_output {
                self.print_search_info(depth, time_ms, score, alpha, beta, pos, best_move, locals, tt);
            }
            self.completed_depth.store(depth as u32, Ordering::Relaxed);
            announce.current_best_move = best_move.cloned();
            announce.prev_score = score;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn print_search_info(
        &self,
        depth: i32,
        time_ms: i64,
        score: Score,
        alpha: Score,
        beta: Score,
        pos: &Position,
        best_move: Option<&Move>,
        locals: &SearchData,
        tt: &TranspositionTable,
    ) {
        let mut pv: Vec<Move> = locals.pv_table[0].clone();
        if pv.is_empty() {
            if let Some(m) = best_move {
                pv.push(m.clone());
            }
        }

        let mut line = format!("info depth {} seldepth {}", depth, pv.len());

        if score.abs() > TERMINAL_SCORE {
            // plies to mate, rounded up to full moves
            let moves_to_mate = (-score.abs() - MATE_SCORE + 1) / 2;
            let signed = if score > 0 { moves_to_mate } else { -moves_to_mate };
            let _ = write!(line, " score mate {}", signed);
        } else {
            let _ = write!(line, " score cp {}", score);
        }
        if score <= alpha {
            line.push_str(" upperbound");
        }
        if score >= beta {
            line.push_str(" lowerbound");
        }

        let nodes = self.nodes();
        let nps = nodes * 1000 / (time_ms.max(1) as u64);
        let _ = write!(
            line,
            " time {} nodes {} nps {} hashfull {} tbhits {} multipv 1 pv",
            time_ms,
            nodes,
            nps,
            tt.hashfull(pos.turn_count()),
            self.tb_hits(),
        );
        for m in &pv {
            let _ = write!(line, " {}", m.to_uci(pos.castling_mode()));
        }

        println!("{}", line);
    }
}

/// Launch one iterative-deepening worker per thread on the same root, join
/// them, and print the best announcement. Every worker shares the table and
/// the announcement state; everything else is private per thread.
pub fn multithreaded_search(
    pos: &Position,
    tt: Arc<TranspositionTable>,
    tb: Option<Arc<SyzygyProber>>,
    limits: SearchLimits,
    thread_count: usize,
) -> Option<Move> {
    KEEP_SEARCHING.store(true, Ordering::Relaxed);
    let shared = Arc::new(ThreadSharedData::new(thread_count.max(1), false));

    thread::scope(|scope| {
        for id in 0..thread_count.max(1) {
            let worker_pos = pos.clone();
            let shared = Arc::clone(&shared);
            let tt = Arc::clone(&tt);
            let tb = tb.clone();
            let limits = limits.clone();
            scope.spawn(move || {
                search_position(worker_pos, &limits, id, &shared, &tt, tb.as_deref());
            });
        }
    });

    // no full iteration finished: fall back to any legal move at all
    let best = shared.best_move().or_else(|| pos.legal_moves().first().cloned());
    print_best_move(best.as_ref(), pos);
    best
}

fn print_best_move(best: Option<&Move>, pos: &Position) {
    match best {
        Some(m) => println!("bestmove {}", m.to_uci(pos.castling_mode())),
        None => println!("bestmove (none)"),
    }
}

/// Single-threaded, silent search used by tests and benches. Returns the
/// best move, the last announced score and the node count.
pub fn search_silent(
    pos: &Position,
    tt: &TranspositionTable,
    depth: i32,
) -> (Option<Move>, Score, u64) {
    KEEP_SEARCHING.store(true, Ordering::Relaxed);
    let shared = ThreadSharedData::new(1, true);
    let limits = SearchLimits { max_depth: depth, ..Default::default() };
    let best = search_position(pos.clone(), &limits, 0, &shared, tt, None);
    (best, shared.aspiration_score(), shared.nodes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network;
    use crate::time::NO_TIME_LIMIT;

    #[test]
    fn test_single_worker_never_skips() {
        let shared = ThreadSharedData::new(1, true);
        for depth in 1..20 {
            shared.report_depth(depth, 0);
            assert!(
                !shared.should_skip_depth(depth + 1),
                "a lone worker must search every depth"
            );
        }
    }

    #[test]
    fn test_majority_of_workers_triggers_skip() {
        let shared = ThreadSharedData::new(4, true);
        shared.report_depth(5, 0);
        shared.report_depth(5, 1);
        shared.report_depth(5, 2);
        shared.report_depth(1, 3);
        assert!(shared.should_skip_depth(5), "three of four workers at depth 5 should skip");
        assert!(!shared.should_skip_depth(6), "nobody reached depth 6 yet");
    }

    #[test]
    fn test_only_first_announcement_of_a_depth_wins() {
        network::init().unwrap();
        let pos = Position::startpos();
        let tt = TranspositionTable::new(1);
        let shared = ThreadSharedData::new(2, true);
        let locals = SearchData::new();

        let moves = pos.legal_moves();
        let (first, second) = (&moves[0], &moves[1]);

        shared.report_result(3, 1, 10, -100, 100, &pos, Some(first), &locals, &tt);
        assert_eq!(shared.completed_depth(), 3);
        shared.report_result(3, 2, 50, -100, 100, &pos, Some(second), &locals, &tt);
        assert_eq!(
            shared.best_move().as_ref(),
            Some(first),
            "the second depth-3 result must be ignored"
        );
        assert_eq!(shared.aspiration_score(), 10);
    }

    #[test]
    fn test_out_of_window_results_are_not_announced() {
        network::init().unwrap();
        let pos = Position::startpos();
        let tt = TranspositionTable::new(1);
        let shared = ThreadSharedData::new(1, true);
        let locals = SearchData::new();

        shared.report_result(2, 1, 150, -100, 100, &pos, None, &locals, &tt);
        assert_eq!(shared.completed_depth(), 0, "a fail-high result must not complete a depth");
    }

    #[test]
    fn test_thread_abort_tracks_completed_depth() {
        let shared = ThreadSharedData::new(1, true);
        assert!(!shared.thread_abort(1));
        shared.completed_depth.store(4, Ordering::Relaxed);
        assert!(shared.thread_abort(3));
        assert!(shared.thread_abort(4));
        assert!(!shared.thread_abort(5));
    }

    #[test]
    fn test_multithreaded_search_agrees_on_a_move() {
        network::init().unwrap();
        let pos = Position::startpos();
        let tt = Arc::new(TranspositionTable::new(4));
        let limits = SearchLimits { allowed_ms: NO_TIME_LIMIT, max_depth: 4, node_limit: None };
        let best = multithreaded_search(&pos, tt, None, limits, 3);
        assert!(best.is_some(), "three workers should settle on a move");
    }
}
