//! Process-wide hybrid clock.
//!
//! Revision ids, local document ids and transaction ids are all drawn from a
//! single monotonic 64-bit tick: the upper bits carry wall-clock milliseconds,
//! the low 20 bits a counter. The counter guarantees uniqueness within one
//! millisecond; the max() against the last issued tick guarantees monotonicity
//! even when the wall clock steps backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of low bits reserved for the per-millisecond counter.
const COUNTER_BITS: u32 = 20;

static LAST_TICK: AtomicU64 = AtomicU64::new(0);

fn wall_clock_component() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    millis << COUNTER_BITS
}

/// Issue the next tick. Strictly greater than every tick issued before.
pub fn next_tick() -> u64 {
    let candidate = wall_clock_component();
    let mut last = LAST_TICK.load(Ordering::Relaxed);
    loop {
        let next = candidate.max(last + 1);
        match LAST_TICK.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

/// The most recently issued tick, without advancing the clock.
pub fn current_tick() -> u64 {
    LAST_TICK.load(Ordering::Acquire)
}

/// Fast-forward the clock to at least `tick`.
///
/// Called when ids assigned elsewhere (a restore, a plan from the
/// coordinator) are observed locally, so that freshly issued ticks stay above
/// everything already seen.
pub fn update_tick(tick: u64) {
    let mut last = LAST_TICK.load(Ordering::Relaxed);
    while last < tick {
        match LAST_TICK.compare_exchange_weak(last, tick, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => last = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_strictly_monotonic() {
        let mut prev = next_tick();
        for _ in 0..10_000 {
            let t = next_tick();
            assert!(t > prev, "tick {} must exceed {}", t, prev);
            prev = t;
        }
    }

    #[test]
    fn test_update_tick_fast_forwards() {
        let far_ahead = next_tick() + (1 << 30);
        update_tick(far_ahead);
        assert!(next_tick() > far_ahead);
    }

    #[test]
    fn test_ticks_unique_across_threads() {
        use std::collections::HashSet;
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let tx = tx.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tx.send(next_tick()).expect("channel should accept tick");
                    }
                })
            })
            .collect();
        drop(tx);
        for t in threads {
            t.join().expect("tick thread should not panic");
        }
        let seen: Vec<u64> = rx.iter().collect();
        let unique: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), unique.len(), "ticks must never repeat");
    }
}
