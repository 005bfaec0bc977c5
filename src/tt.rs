use std::sync::atomic::{AtomicU64, Ordering};

use shakmaty::Move;

use crate::types::{Score, TERMINAL_SCORE};

/// 16-bit move encoding for table entries: from(6) | to(6) | promotion(3) |
/// castle(1). Zero doubles as the uninitialised sentinel; a packed move is
/// only ever acted on after matching a freshly generated legal move.
pub fn pack_move(m: &Move) -> u16 {
    let from = m.from().map(|sq| sq as u16).unwrap_or(0);
    let to = m.to() as u16;
    let promotion = m.promotion().map(|role| role as u16).unwrap_or(0);
    from | (to << 6) | (promotion << 12) | ((m.is_castle() as u16) << 15)
}

/// Ring length of the age counter: `(turn_count - distance_from_root) % 16`
/// identifies the search generation an entry was written in.
const AGE_MODULO: i64 = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bound {
    Empty,
    Exact,
    Lower,
    Upper,
}

impl Bound {
    fn from_bits(bits: u64) -> Bound {
        match bits & 0b11 {
            1 => Bound::Exact,
            2 => Bound::Lower,
            3 => Bound::Upper,
            _ => Bound::Empty,
        }
    }

    fn bits(self) -> u64 {
        match self {
            Bound::Empty => 0,
            Bound::Exact => 1,
            Bound::Lower => 2,
            Bound::Upper => 3,
        }
    }
}

/// Decoded view of one table slot.
#[derive(Copy, Clone, Debug)]
pub struct TTEntry {
    pub packed_move: u16,
    pub score: Score,
    pub depth: i32,
    pub bound: Bound,
    pub age: u8,
}

impl TTEntry {
    /// Mate scores are stored relative to the node; re-anchor to the probing
    /// node's distance from root.
    pub fn mate_score_adjustment(&mut self, distance_from_root: i32) {
        if self.score > TERMINAL_SCORE {
            self.score -= distance_from_root;
        }
        if self.score < -TERMINAL_SCORE {
            self.score += distance_from_root;
        }
    }
}

fn pack(packed_move: u16, score: Score, depth: i32, bound: Bound, age: u8) -> u64 {
    (packed_move as u64)
        | ((score as i16 as u16 as u64) << 16)
        | ((depth as i8 as u8 as u64) << 32)
        | (bound.bits() << 40)
        | (((age & 0xF) as u64) << 44)
}

fn unpack(data: u64) -> TTEntry {
    TTEntry {
        packed_move: data as u16,
        score: (data >> 16) as u16 as i16 as Score,
        depth: (data >> 32) as u8 as i8 as i32,
        bound: Bound::from_bits(data >> 40),
        age: ((data >> 44) & 0xF) as u8,
    }
}

/// One slot: a data word plus `key ^ data`. Readers re-derive the key and
/// treat any mismatch, including a torn pair, as a miss. No locks anywhere.
struct AtomicEntry {
    data: AtomicU64,
    check: AtomicU64,
}

impl AtomicEntry {
    fn new() -> Self {
        Self { data: AtomicU64::new(0), check: AtomicU64::new(0) }
    }

    fn read(&self, key: u64) -> Option<u64> {
        let data = self.data.load(Ordering::Relaxed);
        let check = self.check.load(Ordering::Relaxed);
        if data != 0 && check ^ data == key { Some(data) } else { None }
    }

    fn raw(&self) -> u64 {
        self.data.load(Ordering::Relaxed)
    }

    fn write(&self, key: u64, data: u64) {
        self.data.store(data, Ordering::Relaxed);
        self.check.store(key ^ data, Ordering::Relaxed);
    }
}

const BUCKET_ENTRIES: usize = 4;

/// One cache line of slots; a write never crosses the line.
#[repr(align(64))]
struct Bucket {
    entries: [AtomicEntry; BUCKET_ENTRIES],
}

impl Bucket {
    fn new() -> Self {
        Self { entries: std::array::from_fn(|_| AtomicEntry::new()) }
    }
}

/// Shared transposition table. Probing and storing are plain `&self`
/// operations safe from any number of worker threads.
pub struct TranspositionTable {
    buckets: Vec<Bucket>,
}

fn age_of(turn_count: u32, distance_from_root: i32) -> u8 {
    (turn_count as i64 - distance_from_root as i64).rem_euclid(AGE_MODULO) as u8
}

impl TranspositionTable {
    /// Bucket count is simply bytes / 64; no power-of-two rounding, the
    /// index is the key modulo the bucket count.
    pub fn new(mb: usize) -> Self {
        let bucket_count = (mb * 1024 * 1024 / std::mem::size_of::<Bucket>()).max(1);
        let buckets = (0..bucket_count).map(|_| Bucket::new()).collect();
        Self { buckets }
    }

    fn bucket(&self, key: u64) -> &Bucket {
        let index = (key % self.buckets.len() as u64) as usize;
        &self.buckets[index]
    }

    /// First slot whose signature verifies against `key` and whose depth
    /// covers `depth_remaining`.
    pub fn probe(&self, key: u64, depth_remaining: i32) -> Option<TTEntry> {
        for entry in &self.bucket(key).entries {
            if let Some(data) = entry.read(key) {
                let decoded = unpack(data);
                if decoded.bound != Bound::Empty && decoded.depth >= depth_remaining {
                    return Some(decoded);
                }
            }
        }
        None
    }

    /// Best move of any entry for `key`, regardless of depth. Useful as an
    /// ordering hint even when the stored score is too shallow.
    pub fn probe_move(&self, key: u64) -> Option<u16> {
        for entry in &self.bucket(key).entries {
            if let Some(data) = entry.read(key) {
                let decoded = unpack(data);
                if decoded.bound != Bound::Empty && decoded.packed_move != 0 {
                    return Some(decoded.packed_move);
                }
            }
        }
        None
    }

    /// Install an entry, choosing a victim in priority order: an empty slot,
    /// then a slot from another generation, then a shallower slot. If every
    /// slot is deeper and current, the incoming entry is dropped.
    pub fn store(
        &self,
        packed_move: u16,
        key: u64,
        mut score: Score,
        depth: i32,
        turn_count: u32,
        distance_from_root: i32,
        bound: Bound,
    ) {
        // Make mate scores node-relative so the entry is valid from any
        // distance to the root
        if score > TERMINAL_SCORE {
            score += distance_from_root;
        }
        if score < -TERMINAL_SCORE {
            score -= distance_from_root;
        }

        let age = age_of(turn_count, distance_from_root);
        let data = pack(packed_move, score, depth, bound, age);
        let bucket = self.bucket(key);

        for entry in &bucket.entries {
            if entry.raw() == 0 {
                entry.write(key, data);
                return;
            }
        }
        for entry in &bucket.entries {
            if unpack(entry.raw()).age != age {
                entry.write(key, data);
                return;
            }
        }
        for entry in &bucket.entries {
            if unpack(entry.raw()).depth < depth {
                entry.write(key, data);
                return;
            }
        }
    }

    /// Refresh the age of a matching entry to the current generation so the
    /// replacement policy keeps it.
    pub fn touch(&self, key: u64, turn_count: u32, distance_from_root: i32) {
        let age = age_of(turn_count, distance_from_root);
        for entry in &self.bucket(key).entries {
            if let Some(data) = entry.read(key) {
                let refreshed = (data & !(0xFu64 << 44)) | (((age & 0xF) as u64) << 44);
                entry.write(key, refreshed);
                return;
            }
        }
    }

    /// Hint the bucket for `key` into cache ahead of the probe.
    pub fn prefetch(&self, key: u64) {
        #[cfg(target_arch = "x86_64")]
        {
            use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
            let index = (key % self.buckets.len() as u64) as usize;
            let ptr = (&self.buckets[index] as *const Bucket).cast::<i8>();
            unsafe { _mm_prefetch(ptr, _MM_HINT_T0) };
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = key;
    }

    /// Per-mille of slots written in the current generation.
    pub fn hashfull(&self, turn_count: u32) -> u32 {
        let current = age_of(turn_count, 0);
        let mut filled = 0usize;
        let mut total = 0usize;
        for bucket in &self.buckets {
            for entry in &bucket.entries {
                total += 1;
                let raw = entry.raw();
                if raw != 0 && unpack(raw).age == current {
                    filled += 1;
                }
            }
        }
        (filled * 1000 / total) as u32
    }

    pub fn clear(&self) {
        for bucket in &self.buckets {
            for entry in &bucket.entries {
                entry.data.store(0, Ordering::Relaxed);
                entry.check.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{mate_in, EVAL_MAX};

    #[test]
    fn test_bucket_is_one_cache_line() {
        assert_eq!(std::mem::size_of::<Bucket>(), 64);
    }

    #[test]
    fn test_store_and_probe_roundtrip() {
        let tt = TranspositionTable::new(1);
        let key = 0x1234_5678_9ABC_DEF0;
        tt.store(42, key, 150, 7, 10, 2, Bound::Exact);

        let entry = tt.probe(key, 0).expect("stored entry should be found");
        assert_eq!(entry.packed_move, 42);
        assert_eq!(entry.score, 150);
        assert_eq!(entry.depth, 7);
        assert_eq!(entry.bound, Bound::Exact);
    }

    #[test]
    fn test_probe_miss_on_other_key() {
        let tt = TranspositionTable::new(1);
        tt.store(1, 0xAAAA, 0, 1, 0, 0, Bound::Exact);
        assert!(tt.probe(0xBBBB_0000, 0).is_none());
    }

    #[test]
    fn test_mate_score_roundtrip_law() {
        // Storing s at distance d1 and reading at d2 yields s + (d1 - d2)
        let tt = TranspositionTable::new(1);
        let key = 0xFEED;
        let s = mate_in(5);
        let (d1, d2) = (3, 1);
        tt.store(0, key, s, 10, 20, d1, Bound::Exact);

        let mut entry = tt.probe(key, 0).expect("mate entry should be found");
        entry.mate_score_adjustment(d2);
        assert_eq!(entry.score, s + (d1 - d2));
    }

    #[test]
    fn test_mate_roundtrip_is_sign_symmetric() {
        let tt = TranspositionTable::new(1);
        let key = 0xBEEF;
        let s = crate::types::mated_in(5);
        tt.store(0, key, s, 10, 20, 4, Bound::Exact);

        let mut entry = tt.probe(key, 0).expect("mated entry should be found");
        entry.mate_score_adjustment(0);
        assert_eq!(entry.score, s - 4);
    }

    #[test]
    fn test_ordinary_scores_are_not_adjusted() {
        let tt = TranspositionTable::new(1);
        let key = 0xCAFE;
        tt.store(0, key, EVAL_MAX + 500, 5, 12, 6, Bound::Lower);

        let mut entry = tt.probe(key, 0).expect("entry should be found");
        entry.mate_score_adjustment(3);
        assert_eq!(entry.score, EVAL_MAX + 500, "tablebase-band scores must not move");
    }

    #[test]
    fn test_same_generation_keeps_deeper_entry() {
        let tt = TranspositionTable::new(1);
        // Fill the whole bucket with deep entries of the current generation
        let base = 0x10;
        let count = tt.buckets.len() as u64;
        for i in 0..BUCKET_ENTRIES as u64 {
            tt.store(1, base + i * count, 10, 12, 8, 0, Bound::Exact);
        }
        // A shallower entry mapping to the same bucket is dropped
        let extra = base + BUCKET_ENTRIES as u64 * count;
        tt.store(2, extra, 10, 3, 8, 0, Bound::Exact);
        assert!(tt.probe(extra, 0).is_none(), "shallow entry should have been dropped");

        // A deeper one replaces
        tt.store(3, extra, 10, 20, 8, 0, Bound::Exact);
        assert!(tt.probe(extra, 0).is_some(), "deeper entry should replace");
    }

    #[test]
    fn test_stale_generation_is_evicted() {
        let tt = TranspositionTable::new(1);
        let count = tt.buckets.len() as u64;
        let base = 0x20;
        for i in 0..BUCKET_ENTRIES as u64 {
            tt.store(1, base + i * count, 10, 12, 8, 0, Bound::Exact);
        }
        // Next generation: even a shallow entry gets a slot
        let extra = base + BUCKET_ENTRIES as u64 * count;
        tt.store(2, extra, 10, 1, 9, 0, Bound::Exact);
        assert!(tt.probe(extra, 0).is_some(), "stale entries should lose their slot");
    }

    #[test]
    fn test_touch_refreshes_age() {
        let tt = TranspositionTable::new(1);
        let key = 0x77;
        tt.store(5, key, 100, 6, 8, 0, Bound::Exact);
        tt.touch(key, 9, 0);
        let entry = tt.probe(key, 0).expect("touched entry still present");
        assert_eq!(entry.age, 9 % 16, "touch should move the entry into the new generation");
        assert_eq!(entry.score, 100, "touch must not disturb the payload");
    }

    #[test]
    fn test_clear_empties_the_table() {
        let tt = TranspositionTable::new(1);
        tt.store(1, 0x55, 10, 5, 0, 0, Bound::Exact);
        tt.clear();
        assert!(tt.probe(0x55, 0).is_none());
        assert_eq!(tt.hashfull(0), 0);
    }

    #[test]
    fn test_bucket_count_is_not_rounded() {
        // 3 MB = 49152 buckets, not a power of two
        let tt = TranspositionTable::new(3);
        assert_eq!(tt.buckets.len(), 3 * 1024 * 1024 / 64);
        assert!(!tt.buckets.len().is_power_of_two());
    }
}

// Entries are written racily from every worker. The second word of a slot is
// key XOR data, so a reader that observes a torn pair simply fails the check
// and treats the slot as empty. Replacement prefers empty slots, then slots
// from older generations ((turn_count - distance) mod 16), then shallower
// ones; a bucket full of deeper, current entries drops the write.
