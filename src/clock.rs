//! Monotonic time sources
//!
//! All trial timing is expressed in milliseconds on a monotonic timeline that is
//! immune to wall-clock adjustment. Wall-clock timestamps (session start/end) use
//! `chrono` and never participate in RT arithmetic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic clock abstraction
pub trait TimeSource: Send + Sync {
    /// Milliseconds since this source's origin; never regresses
    fn now(&self) -> f64;

    fn elapsed_since(&self, start: f64) -> f64 {
        self.now() - start
    }
}

/// Process clock backed by `std::time::Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock backed by `tokio::time::Instant`, so paused test time is honoured
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    /// Tokio instant corresponding to a timeline position
    pub fn instant_at(&self, ms: f64) -> tokio::time::Instant {
        self.origin + std::time::Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }
}

impl TimeSource for TokioClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock for deterministic runs
///
/// Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    bits: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::starting_at(0.0)
    }

    pub fn starting_at(ms: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(ms.to_bits())),
        }
    }

    /// Move the clock forward to `ms`; earlier targets are ignored
    pub fn advance_to(&self, ms: f64) {
        let current = self.now();
        if ms > current {
            self.bits.store(ms.to_bits(), Ordering::SeqCst);
        }
    }

    pub fn advance_by(&self, delta_ms: f64) {
        if delta_ms > 0.0 {
            self.advance_to(self.now() + delta_ms);
        }
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
