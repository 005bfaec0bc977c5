use std::path::Path;

use shakmaty::{Chess, Move};
use shakmaty_syzygy::{SyzygyError, Tablebase, Wdl};

use crate::position::Position;
use crate::types::{Score, SearchResult};

pub struct SyzygyProber {
    tablebase: Tablebase<Chess>,
}

impl SyzygyProber {
    /// Load tablebases from a directory. Returns None if the path is not a
    /// directory or holds no usable tables.
    pub fn new(path: &str) -> Option<Self> {
        if !Path::new(path).is_dir() {
            return None;
        }

        let mut tablebase = Tablebase::new();
        match tablebase.add_directory(path) {
            Ok(n) if n > 0 => Some(Self { tablebase }),
            _ => None,
        }
    }

    /// Largest piece count the loaded tables can answer for.
    pub fn max_pieces(&self) -> usize {
        self.tablebase.max_pieces()
    }

    /// In-tree WDL probe, translated into the bounded score bands: decisive
    /// results live at +-(5000 + eval/10), cursed/blessed results hug zero.
    /// `static_eval` is from the side to move's perspective, as is the result.
    pub fn probe_search(&self, pos: &Position, static_eval: Score) -> Option<Score> {
        match self.tablebase.probe_wdl_after_zeroing(pos.chess()) {
            Ok(wdl) => Some(wdl_to_score(wdl, static_eval)),
            Err(SyzygyError::MissingTable { .. }) => None,
            Err(_) => None,
        }
    }

    /// DTZ-aware root probe: the move that preserves the table result, with
    /// the same banded score.
    pub fn probe_root(&self, pos: &Position, static_eval: Score) -> Option<SearchResult> {
        let best: Option<(Move, _)> = match self.tablebase.best_move(pos.chess()) {
            Ok(best) => best,
            Err(_) => None,
        };
        let m = best.map(|(m, _)| m)?;
        let score = self.probe_search(pos, static_eval)?;
        Some(SearchResult::new(score, Some(m)))
    }
}

fn wdl_to_score(wdl: Wdl, static_eval: Score) -> Score {
    match wdl {
        Wdl::Win => 5_000 + static_eval / 10,
        Wdl::CursedWin => (static_eval / 100).max(1),
        Wdl::Draw => 0,
        Wdl::BlessedLoss => (static_eval / 100).min(-1),
        Wdl::Loss => -5_000 + static_eval / 10,
    }
}


// Probe results map into score bands between ordinary evals and mates:
// +-(5000 + eval/10) for decisive results, around zero for cursed/blessed
// ones. The bands keep table wins comparable against each other without ever
// being mistaken for a mate score.
