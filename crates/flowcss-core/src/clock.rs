#![forbid(unsafe_code)]

//! Frame clock for budgeted execution.
//!
//! The scheduler measures "time left in this frame" against a [`Clock`]. In
//! production the clock reads `web_time::Instant`, which works both natively
//! and in the browser. Tests use a [`LabClock`], whose time only moves when
//! the test moves it.
//!
//! # Invariants
//!
//! 1. `now_ms()` is monotonically non-decreasing for a given clock.
//! 2. All clones of a `LabClock` observe the same time.
//! 3. An auto-advancing `LabClock` moves forward by exactly its step on every
//!    read, which lets tests stub "work takes time" without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

/// A manually-advanceable clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
    step_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
            step_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.offset_us.fetch_add(duration_us(delta), Ordering::Release);
    }

    /// Advance by `step` every time the clock is read. `Duration::ZERO`
    /// turns auto-advance off.
    pub fn set_auto_advance(&self, step: Duration) {
        self.step_us.store(duration_us(step), Ordering::Release);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        let step = self.step_us.load(Ordering::Acquire);
        let offset = if step == 0 {
            self.offset_us.load(Ordering::Acquire)
        } else {
            self.offset_us.fetch_add(step, Ordering::AcqRel) + step
        };
        self.epoch + Duration::from_micros(offset)
    }

    /// Milliseconds elapsed since the clock was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.now().duration_since(self.epoch).as_micros() as f64 / 1000.0
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_us(d: Duration) -> u64 {
    d.as_micros().min(u64::MAX as u128) as u64
}

/// Time source for the engine.
#[derive(Debug, Clone)]
pub enum Clock {
    /// Real wall-clock time, measured from `epoch`.
    Real { epoch: Instant },
    /// Deterministic lab clock.
    Lab(LabClock),
}

impl Clock {
    /// A real clock whose epoch is now.
    #[must_use]
    pub fn real() -> Self {
        Self::Real {
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn lab(clock: &LabClock) -> Self {
        Self::Lab(clock.clone())
    }

    /// Milliseconds since the clock's epoch.
    #[must_use]
    pub fn now_ms(&self) -> f64 {
        match self {
            Self::Real { epoch } => epoch.elapsed().as_micros() as f64 / 1000.0,
            Self::Lab(c) => c.elapsed_ms(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::real()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_clock_starts_at_zero() {
        let clock = LabClock::new();
        assert_eq!(clock.elapsed_ms(), 0.0);
    }

    #[test]
    fn lab_clock_advance_accumulates() {
        let clock = LabClock::new();
        clock.advance(Duration::from_millis(100));
        clock.advance(Duration::from_millis(200));
        assert!((clock.elapsed_ms() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn clones_share_time() {
        let clock = LabClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_millis(5));
        assert!((other.elapsed_ms() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn auto_advance_moves_on_every_read() {
        let clock = LabClock::new();
        clock.set_auto_advance(Duration::from_millis(2));
        assert!((clock.elapsed_ms() - 2.0).abs() < 1e-9);
        assert!((clock.elapsed_ms() - 4.0).abs() < 1e-9);
        clock.set_auto_advance(Duration::ZERO);
        assert!((clock.elapsed_ms() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn clock_enum_reads_lab_time() {
        let lab = LabClock::new();
        let clock = Clock::lab(&lab);
        assert!(clock.is_lab());
        lab.advance(Duration::from_millis(16));
        assert!((clock.now_ms() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn real_clock_is_monotonic() {
        let clock = Clock::real();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(!clock.is_lab());
    }
}
