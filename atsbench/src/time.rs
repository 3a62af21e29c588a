use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock abstraction so that id minting and timestamping can be driven by
/// a fake clock in tests.
pub trait SysTime: Send + Sync + 'static {
    /// Current time in milliseconds since the epoch.
    fn millis(&self) -> u64;

    /// Current time in nanoseconds since the epoch.
    fn nanos(&self) -> i64;
}

/// System clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunTime;

impl RunTime {
    fn since_epoch() -> std::time::Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl SysTime for RunTime {
    fn millis(&self) -> u64 {
        Self::since_epoch().as_millis() as u64
    }

    fn nanos(&self) -> i64 {
        Self::since_epoch().as_nanos() as i64
    }
}

/// Settable clock used in tests.
#[derive(Debug, Default)]
pub struct SimTime {
    nanos: AtomicU64,
}

impl SimTime {
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the current time, in milliseconds since the epoch.
    pub fn set_millis(&self, millis: u64) {
        self.nanos.store(millis * 1_000_000, Ordering::SeqCst);
    }

    /// Advances the current time by `millis`.
    pub fn add_millis(&self, millis: u64) {
        self.nanos.fetch_add(millis * 1_000_000, Ordering::SeqCst);
    }
}

impl SysTime for SimTime {
    fn millis(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst) / 1_000_000
    }

    fn nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst) as i64
    }
}

/// Mints run identifiers from wall-clock nanoseconds. Identifiers are forced
/// to be strictly increasing within the process even if the clock stalls or
/// jumps backwards.
#[derive(Debug, Default)]
pub struct RunIdGen {
    last: AtomicI64,
}

impl RunIdGen {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn next(&self, time: &dyn SysTime) -> i64 {
        let now = time.nanos();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
