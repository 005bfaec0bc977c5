use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Color};

use crate::position::Position;
use crate::search::SearchLimits;
use crate::syzygy::SyzygyProber;
use crate::threads::multithreaded_search;
use crate::time::{stop_searching, NO_TIME_LIMIT};
use crate::tt::TranspositionTable;
use crate::types::{EngineConfig, MAX_DEPTH};

struct EngineState {
    position: Position,
    config: EngineConfig,
    tt: Arc<TranspositionTable>,
    syzygy: Option<Arc<SyzygyProber>>,
    search_thread: Option<thread::JoinHandle<()>>,
}

impl EngineState {
    fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            position: Position::startpos(),
            tt: Arc::new(TranspositionTable::new(config.hash_mb)),
            syzygy: None,
            config,
            search_thread: None,
        }
    }

    fn castling_mode(&self) -> CastlingMode {
        if self.config.chess960 { CastlingMode::Chess960 } else { CastlingMode::Standard }
    }

    fn wait_for_search(&mut self) {
        if let Some(handle) = self.search_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Blocking UCI loop over stdin. Returns on `quit` or closed input.
pub fn run() {
    let stdin = io::stdin();
    let mut state = EngineState::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens[0] {
            "uci" => {
                println!("id name pyrite");
                println!("id author pyrite developers");
                println!("option name Hash type spin default 32 min 1 max 65536");
                println!("option name Threads type spin default 1 min 1 max 256");
                println!("option name MultiPV type spin default 1 min 1 max 256");
                println!("option name SyzygyPath type string default <empty>");
                println!("option name UCI_Chess960 type check default false");
                println!("option name Clear Hash type button");
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "ucinewgame" => {
                state.wait_for_search();
                state.position = Position::startpos();
                state.tt.clear();
            }
            "position" => {
                state.wait_for_search();
                parse_position(&tokens, &mut state);
            }
            "go" => {
                state.wait_for_search();
                let params = parse_go(&tokens);
                start_search(&mut state, params);
            }
            "stop" => {
                stop_searching();
                state.wait_for_search();
            }
            "quit" => {
                stop_searching();
                state.wait_for_search();
                return;
            }
            "setoption" => {
                state.wait_for_search();
                parse_setoption(&tokens, &mut state);
            }
            _ => println!("info string unable to handle command {}", line),
        }
    }

    // stdin closed without a quit; do not leave a search running
    stop_searching();
    state.wait_for_search();
}

/// Parsed `go` parameters, all optional.
#[derive(Default)]
struct GoParams {
    depth: Option<i32>,
    movetime: Option<i64>,
    wtime: Option<i64>,
    btime: Option<i64>,
    winc: Option<i64>,
    binc: Option<i64>,
    moves_to_go: Option<i64>,
    nodes: Option<u64>,
    mate: Option<i32>,
    infinite: bool,
}

impl GoParams {
    /// Milliseconds this search may spend, or NO_TIME_LIMIT when only depth
    /// or node limits apply.
    fn allowed_ms(&self, side: Color) -> i64 {
        if self.infinite {
            return NO_TIME_LIMIT;
        }
        if let Some(movetime) = self.movetime {
            return movetime;
        }

        let (time, inc) = if side == Color::White {
            (self.wtime, self.winc.unwrap_or(0))
        } else {
            (self.btime, self.binc.unwrap_or(0))
        };
        let Some(time) = time else {
            return NO_TIME_LIMIT;
        };

        // a slice of the clock plus most of the increment, never more than
        // 80% of what is left
        let moves_left = self.moves_to_go.unwrap_or(30).max(1);
        let allocated = time / moves_left + inc * 3 / 4;
        allocated.min(time * 4 / 5).max(1)
    }

    fn limits(&self, side: Color) -> SearchLimits {
        let max_depth = match (self.depth, self.mate) {
            (Some(d), _) => d.clamp(1, MAX_DEPTH),
            // a mate in n is at most 2n-1 plies deep
            (None, Some(n)) => (2 * n - 1).clamp(1, MAX_DEPTH),
            _ => MAX_DEPTH,
        };
        SearchLimits { allowed_ms: self.allowed_ms(side), max_depth, node_limit: self.nodes }
    }
}

fn parse_go(tokens: &[&str]) -> GoParams {
    let mut params = GoParams::default();
    let mut i = 1;
    while i < tokens.len() {
        let value = tokens.get(i + 1);
        match tokens[i] {
            "depth" => {
                params.depth = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "movetime" => {
                params.movetime = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "wtime" => {
                params.wtime = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "btime" => {
                params.btime = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "winc" => {
                params.winc = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "binc" => {
                params.binc = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "movestogo" => {
                params.moves_to_go = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "nodes" => {
                params.nodes = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "mate" => {
                params.mate = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "infinite" => params.infinite = true,
            _ => {}
        }
        i += 1;
    }
    params
}

fn start_search(state: &mut EngineState, params: GoParams) {
    let limits = params.limits(state.position.side_to_move());
    let pos = state.position.clone();
    let tt = Arc::clone(&state.tt);
    let tb = state.syzygy.clone();
    let threads = state.config.threads;

    state.search_thread = Some(thread::spawn(move || {
        multithreaded_search(&pos, tt, tb, limits, threads);
    }));
}

fn parse_position(tokens: &[&str], state: &mut EngineState) {
    if tokens.len() < 2 {
        println!("info string unable to handle command position");
        return;
    }

    let mode = state.castling_mode();
    let mut idx = 1;
    let mut position = match tokens[idx] {
        "startpos" => {
            idx += 1;
            Position::startpos()
        }
        "fen" => {
            idx += 1;
            let mut fen_parts: Vec<&str> = Vec::new();
            while idx < tokens.len() && tokens[idx] != "moves" && fen_parts.len() < 6 {
                fen_parts.push(tokens[idx]);
                idx += 1;
            }
            match Position::from_fen(&fen_parts.join(" "), mode) {
                Ok(pos) => pos,
                Err(err) => {
                    println!("info string error bad fen: {}", err);
                    return;
                }
            }
        }
        _ => {
            println!("info string unable to handle command {}", tokens.join(" "));
            return;
        }
    };

    if idx < tokens.len() && tokens[idx] == "moves" {
        for move_str in &tokens[idx + 1..] {
            let parsed: Uci = match move_str.parse() {
                Ok(uci) => uci,
                Err(_) => {
                    println!("info string error bad move {}", move_str);
                    return;
                }
            };
            match parsed.to_move(position.chess()) {
                Ok(m) => position.play_root_move(&m),
                Err(_) => {
                    println!("info string error illegal move {}", move_str);
                    return;
                }
            }
        }
    }

    state.position = position;
}

fn parse_setoption(tokens: &[&str], state: &mut EngineState) {
    let name_idx = tokens.iter().position(|&t| t == "name");
    let value_idx = tokens.iter().position(|&t| t == "value");

    let Some(ni) = name_idx else {
        println!("info string unable to handle command {}", tokens.join(" "));
        return;
    };
    let name_end = value_idx.unwrap_or(tokens.len());
    let name = tokens[ni + 1..name_end].join(" ");
    let value = value_idx.map(|vi| tokens[vi + 1..].join(" ")).unwrap_or_default();

    match name.to_lowercase().as_str() {
        "hash" => match value.parse::<usize>() {
            Ok(mb) if mb.is_power_of_two() && (1..=65536).contains(&mb) => {
                state.config.hash_mb = mb;
                state.tt = Arc::new(TranspositionTable::new(mb));
            }
            _ => println!("info string error Hash must be a power of two between 1 and 65536"),
        },
        "threads" => match value.parse::<usize>() {
            Ok(threads) if (1..=256).contains(&threads) => {
                // capped at the machine's core count
                state.config.threads = threads.min(num_cpus::get().max(1));
            }
            _ => println!("info string error Threads must be between 1 and 256"),
        },
        "multipv" => match value.parse::<usize>() {
            Ok(n) if (1..=256).contains(&n) => state.config.multi_pv = n,
            _ => println!("info string error MultiPV must be between 1 and 256"),
        },
        "syzygypath" => {
            if value.is_empty() || value == "<empty>" {
                state.config.syzygy_path = None;
                state.syzygy = None;
            } else {
                match SyzygyProber::new(&value) {
                    Some(prober) => {
                        state.config.syzygy_path = Some(value);
                        state.syzygy = Some(Arc::new(prober));
                    }
                    None => println!("info string error no tablebases found at {}", value),
                }
            }
        }
        "uci_chess960" => match value.to_lowercase().as_str() {
            "true" => state.config.chess960 = true,
            "false" => state.config.chess960 = false,
            _ => println!("info string error UCI_Chess960 must be true or false"),
        },
        "clear hash" => state.tt.clear(),
        _ => println!("info string unable to handle command setoption name {}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network;

    #[test]
    fn test_parse_go_collects_limits() {
        let tokens = vec!["go", "wtime", "60000", "btime", "59000", "winc", "1000", "depth", "9"];
        let params = parse_go(&tokens);
        assert_eq!(params.wtime, Some(60000));
        assert_eq!(params.btime, Some(59000));
        assert_eq!(params.winc, Some(1000));
        assert_eq!(params.depth, Some(9));
        assert!(!params.infinite);
    }

    #[test]
    fn test_go_infinite_has_no_deadline() {
        let params = parse_go(&["go", "infinite"]);
        assert_eq!(params.allowed_ms(Color::White), NO_TIME_LIMIT);
    }

    #[test]
    fn test_time_allocation_is_bounded() {
        let mut params = GoParams::default();
        params.wtime = Some(60_000);
        params.winc = Some(1_000);
        let allowed = params.allowed_ms(Color::White);
        assert!(allowed > 0);
        assert!(allowed <= 48_000, "allocation {} exceeds 80% of the clock", allowed);
    }

    #[test]
    fn test_mate_limit_maps_to_depth() {
        let params = parse_go(&["go", "mate", "3"]);
        let limits = params.limits(Color::White);
        assert_eq!(limits.max_depth, 5);
    }

    #[test]
    fn test_parse_position_startpos_with_moves() {
        network::init().unwrap();
        let mut state = EngineState::new();
        let tokens = vec!["position", "startpos", "moves", "e2e4", "e7e5"];
        parse_position(&tokens, &mut state);
        assert_eq!(state.position.previous_key_count(), 2);
        assert_eq!(state.position.side_to_move(), Color::White);
    }

    #[test]
    fn test_parse_position_fen() {
        network::init().unwrap();
        let mut state = EngineState::new();
        let tokens = vec![
            "position",
            "fen",
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR",
            "b",
            "KQkq",
            "-",
            "0",
            "1",
        ];
        parse_position(&tokens, &mut state);
        assert_eq!(state.position.side_to_move(), Color::Black);
    }

    #[test]
    fn test_bad_fen_is_rejected_and_state_kept() {
        network::init().unwrap();
        let mut state = EngineState::new();
        let before = state.position.zobrist_key();
        let tokens = vec!["position", "fen", "not", "a", "fen", "at", "all", "1"];
        parse_position(&tokens, &mut state);
        assert_eq!(state.position.zobrist_key(), before, "bad FEN must leave the position alone");
    }

    #[test]
    fn test_setoption_hash_requires_power_of_two() {
        network::init().unwrap();
        let mut state = EngineState::new();
        parse_setoption(&["setoption", "name", "Hash", "value", "64"], &mut state);
        assert_eq!(state.config.hash_mb, 64);
        parse_setoption(&["setoption", "name", "Hash", "value", "48"], &mut state);
        assert_eq!(state.config.hash_mb, 64, "a non-power-of-two size must be rejected");
    }

    #[test]
    fn test_setoption_threads_clamped() {
        network::init().unwrap();
        let mut state = EngineState::new();
        let expected = 8.min(num_cpus::get().max(1));
        parse_setoption(&["setoption", "name", "Threads", "value", "8"], &mut state);
        assert_eq!(state.config.threads, expected);
        parse_setoption(&["setoption", "name", "Threads", "value", "0"], &mut state);
        assert_eq!(state.config.threads, expected, "zero threads must be rejected");
    }

    #[test]
    fn test_setoption_chess960_toggles() {
        network::init().unwrap();
        let mut state = EngineState::new();
        parse_setoption(&["setoption", "name", "UCI_Chess960", "value", "true"], &mut state);
        assert!(state.config.chess960);
        assert_eq!(state.castling_mode(), CastlingMode::Chess960);
    }
}
