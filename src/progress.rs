//! Throughput reporting and cooperative cancellation for the pipeline
//! (spec §4.6.4, §5, §9's "global mutable state" design note).
//!
//! The process-wide interrupt flag and the progress clock are modeled as
//! explicit context objects threaded through the pipeline rather than true
//! globals, so tests can inject a fake clock and flip the interrupt flag
//! deterministically instead of racing a real `SIGINT`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A cooperative, shareable cancellation flag. A signal handler (or a test)
/// sets it; the slot loop checks it once per slot and stops at the next
/// boundary rather than mid-write (spec §4.6.4).
#[derive(Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An injectable time source, so throughput math and the info array's
/// `time_t` stamps are reproducible in tests without sleeping.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u32;
    fn monotonic(&self) -> Instant;
}

/// The clock used outside of tests: wall-clock seconds since the epoch for
/// the info array, `Instant::now()` for elapsed-time math.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u32 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Snapshot {
    pub slots_done: u64,
    pub slots_total: u64,
    pub bytes_done: u64,
}

struct State {
    slots_done: u64,
    slots_total: u64,
    started: Option<Instant>,
}

/// Throughput counters updated from the slot loop — and, during the fan-out
/// read step, concurrently from the per-disk worker threads, hence the
/// `parking_lot::Mutex` rather than a plain `RefCell`.
pub struct Progress {
    state: Mutex<State>,
    bytes_done: AtomicU64,
    log_every: u64,
}

impl Progress {
    pub fn new(slots_total: u64) -> Progress {
        Progress {
            state: Mutex::new(State { slots_done: 0, slots_total, started: None }),
            bytes_done: AtomicU64::new(0),
            log_every: 256,
        }
    }

    pub fn start(&self, clock: &dyn Clock) {
        self.state.lock().started = Some(clock.monotonic());
    }

    /// Adds `bytes` to the running total; safe to call from any of the
    /// per-disk read workers concurrently.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Marks one more slot processed, logging a `debug`-level throughput
    /// line every `log_every` slots to avoid spamming the log on a large
    /// array (spec's "per-slot throughput logged at debug level every N
    /// slots").
    pub fn slot_done(&self, slot: u64, clock: &dyn Clock) {
        let mut state = self.state.lock();
        state.slots_done += 1;
        if state.slots_done % self.log_every == 0 || state.slots_done == state.slots_total {
            let elapsed = state.started.map(|s| clock.monotonic().duration_since(s)).unwrap_or(Duration::ZERO);
            let bytes = self.bytes_done.load(Ordering::Relaxed);
            let mb_per_s = if elapsed.as_secs_f64() > 0.0 {
                (bytes as f64 / 1_000_000.0) / elapsed.as_secs_f64()
            } else {
                0.0
            };
            tracing::debug!(
                slot,
                slots_done = state.slots_done,
                slots_total = state.slots_total,
                mb_per_s,
                "pipeline progress"
            );
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            slots_done: state.slots_done,
            slots_total: state.slots_total,
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
        }
    }
}
