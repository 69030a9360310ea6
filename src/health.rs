//! # Loop Liveness
//!
//! Every long-running loop owns a [`Liveness`] record. The status
//! aggregator queries it instead of inspecting loop internals.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Liveness record of one loop
#[derive(Debug, Default)]
pub struct Liveness {
    alive: AtomicBool,
    beats: AtomicU64,
    last_beat_ms: AtomicI64,
}

impl Liveness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark the loop as running until the returned guard is dropped
    pub fn enter(self: &Arc<Self>) -> LivenessGuard {
        self.alive.store(true, Ordering::Release);
        self.beat();
        LivenessGuard(Arc::clone(self))
    }

    /// Record progress
    pub fn beat(&self) {
        self.beats.fetch_add(1, Ordering::Relaxed);
        self.last_beat_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Number of recorded beats
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// Time of the most recent beat, if any
    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        match self.last_beat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

/// Clears the alive flag on every exit path of a loop
#[derive(Debug)]
pub struct LivenessGuard(Arc<Liveness>);

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.0.alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_liveness_is_not_alive() {
        let liveness = Liveness::new();
        assert!(!liveness.is_alive());
        assert_eq!(liveness.beats(), 0);
        assert!(liveness.last_beat().is_none());
    }

    #[test]
    fn test_guard_tracks_loop_lifetime() {
        let liveness = Liveness::new();
        {
            let _guard = liveness.enter();
            assert!(liveness.is_alive());
            assert!(liveness.last_beat().is_some());
        }
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_beats_are_counted() {
        let liveness = Liveness::new();
        liveness.beat();
        liveness.beat();
        assert_eq!(liveness.beats(), 2);
    }
}
