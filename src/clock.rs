//! # Wall Clock
//!
//! Clip names, day buckets and fix timestamps all come from the local wall
//! clock. The [`Clock`] trait lets tests drive midnight crossings.

use chrono::{DateTime, Local};

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    /// Current local time
    fn now(&self) -> DateTime<Local>;
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use chrono::TimeZone;

    /// Clock that starts at a fixed instant and advances with tokio time
    ///
    /// Combined with `#[tokio::test(start_paused = true)]`, every
    /// `tokio::time::sleep` moves this clock forward by the same amount.
    pub struct TokioClock {
        base: DateTime<Local>,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        pub fn starting_at(base: DateTime<Local>) -> Self {
            Self {
                base,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Local> {
            let elapsed = tokio::time::Instant::now() - self.origin;
            self.base + chrono::Duration::from_std(elapsed).unwrap()
        }
    }

    /// Build a local timestamp for tests
    pub fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }
}
