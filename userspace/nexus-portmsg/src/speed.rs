// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: One-second event-rate sampling for the adaptive receive loop.
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Internal (crate public for embedding loops)
//! TEST_COVERAGE: Unit tests with a synthetic clock

use std::time::Instant;

/// Length of one measurement window.
pub const WINDOW_NS: u64 = 1_000_000_000;

/// Monotonic time source.
pub trait Clock {
    /// Nanoseconds since an arbitrary, fixed origin.
    fn now_ns(&self) -> u64;
}

/// Clock backed by `std::time::Instant`.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is now.
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        let elapsed = self.start.elapsed();
        elapsed
            .as_secs()
            .saturating_mul(1_000_000_000)
            .saturating_add(elapsed.subsec_nanos() as u64)
    }
}

/// Counts events and yields the count once per elapsed window.
#[derive(Debug)]
pub struct SpeedMeter<C: Clock = MonotonicClock> {
    clock: C,
    window_start_ns: u64,
    events: u64,
}

impl SpeedMeter<MonotonicClock> {
    /// Meter on the monotonic clock; the first window starts now.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for SpeedMeter<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SpeedMeter<C> {
    /// Meter on `clock`; the first window starts at the clock's current time.
    pub fn with_clock(clock: C) -> Self {
        let window_start_ns = clock.now_ns();
        Self { clock, window_start_ns, events: 0 }
    }

    /// Adds `count` events to the current window.
    pub fn track(&mut self, count: u64) {
        self.events = self.events.saturating_add(count);
    }

    /// Events tracked so far in the current window.
    pub fn pending(&self) -> u64 {
        self.events
    }

    /// Returns the window's event count once a full window has elapsed, then restarts it.
    pub fn collect(&mut self) -> Option<u64> {
        let now = self.clock.now_ns();
        if now.saturating_sub(self.window_start_ns) < WINDOW_NS {
            return None;
        }
        self.window_start_ns = now;
        Some(core::mem::take(&mut self.events))
    }
}
