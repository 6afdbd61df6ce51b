//! Explicit runtime context passed at construction: clock source and working
//! directory. Replaces the ambient singletons the panel would otherwise lean
//! on, and lets tests drive virtual time.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Local};

/// Time source used for alert ids, debounce math, and snapshot filenames.
pub trait Clock: Send + Sync {
    /// Epoch milliseconds.
    fn now_ms(&self) -> i64;
    /// Wall-clock time in the local zone.
    fn now(&self) -> DateTime<Local>;
}

/// Production clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Local::now().timestamp_millis()
    }

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Shared runtime context.
#[derive(Clone)]
pub struct Context {
    pub clock: Arc<dyn Clock>,
    pub data_dir: PathBuf,
}

impl Context {
    pub fn new(clock: Arc<dyn Clock>, data_dir: PathBuf) -> Self {
        Self { clock, data_dir }
    }

    pub fn system(data_dir: PathBuf) -> Self {
        Self::new(Arc::new(SystemClock), data_dir)
    }

    /// Directory snapshot PNGs are written into.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Hand-cranked clock for deterministic tests.
    pub struct ManualClock {
        ms: AtomicI64,
    }

    impl ManualClock {
        pub fn new(start_ms: i64) -> Self {
            Self {
                ms: AtomicI64::new(start_ms),
            }
        }

        pub fn advance(&self, delta_ms: i64) {
            self.ms.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.ms.load(Ordering::SeqCst)
        }

        fn now(&self) -> DateTime<Local> {
            Local
                .timestamp_millis_opt(self.now_ms())
                .single()
                .expect("manual clock timestamp in range")
        }
    }

    pub fn manual_context(start_ms: i64, data_dir: PathBuf) -> (Arc<ManualClock>, Context) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let ctx = Context::new(clock.clone(), data_dir);
        (clock, ctx)
    }
}
