use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Process-wide kill switch, cleared by `stop`/`quit` and by the hard
/// deadline. Every search entry point observes it.
pub static KEEP_SEARCHING: AtomicBool = AtomicBool::new(true);

pub fn keep_searching() -> bool {
    KEEP_SEARCHING.load(Ordering::Relaxed)
}

pub fn stop_searching() {
    KEEP_SEARCHING.store(false, Ordering::Relaxed);
}

pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-search deadlines. The hard deadline aborts mid-tree; the soft check
/// decides whether another whole iteration is worth starting. The clock is
/// polled once every 1024 calls, the cached answer is served in between.
pub struct SearchTimeManage {
    timer: Timer,
    allowed_ms: i64,
    node_limit: Option<u64>,
    calls: u32,
    aborted: bool,
}

/// Effectively unbounded, for `go infinite` and depth-limited searches.
pub const NO_TIME_LIMIT: i64 = i64::MAX / 4;

impl SearchTimeManage {
    pub fn new() -> Self {
        Self {
            timer: Timer::new(),
            allowed_ms: NO_TIME_LIMIT,
            node_limit: None,
            calls: 0,
            aborted: false,
        }
    }

    pub fn start_search(&mut self, allowed_ms: i64) {
        self.timer.restart();
        self.allowed_ms = allowed_ms.max(1);
        self.calls = 0;
        self.aborted = false;
    }

    pub fn set_node_limit(&mut self, nodes: u64) {
        self.node_limit = Some(nodes);
    }

    /// Should the search stop right now?
    pub fn abort_search(&mut self, nodes: u64) -> bool {
        if !keep_searching() {
            return true;
        }
        if self.aborted {
            return true;
        }
        if let Some(limit) = self.node_limit {
            if nodes >= limit {
                self.aborted = true;
                return true;
            }
        }

        self.calls = self.calls.wrapping_add(1);
        if self.calls % 1024 == 0 && self.timer.elapsed_ms() >= self.allowed_ms {
            self.aborted = true;
            // one worker hitting the wall stops the whole pool
            stop_searching();
        }
        self.aborted
    }

    /// Is another full iteration likely to finish in the remaining budget?
    pub fn continue_search(&self) -> bool {
        self.timer.elapsed_ms() * 2 < self.allowed_ms
    }
}

impl Default for SearchTimeManage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A single test because every case manipulates the process-wide flag
    #[test]
    fn test_abort_conditions() {
        KEEP_SEARCHING.store(true, Ordering::Relaxed);

        // fresh manager with a generous budget
        let mut manage = SearchTimeManage::new();
        manage.start_search(60_000);
        assert!(!manage.abort_search(0));
        assert!(manage.continue_search());

        // node limit
        manage.set_node_limit(100);
        assert!(!manage.abort_search(99));
        assert!(manage.abort_search(100));

        // expired hard deadline, once the polling throttle lets it look
        let mut manage = SearchTimeManage::new();
        manage.start_search(0);
        let mut aborted = false;
        for _ in 0..4096 {
            aborted = manage.abort_search(0);
        }
        assert!(aborted, "a 0ms budget must abort once the clock is polled");

        // cleared global flag
        KEEP_SEARCHING.store(true, Ordering::Relaxed);
        let mut manage = SearchTimeManage::new();
        manage.start_search(60_000);
        stop_searching();
        assert!(manage.abort_search(0));
        KEEP_SEARCHING.store(true, Ordering::Relaxed);
    }
}
