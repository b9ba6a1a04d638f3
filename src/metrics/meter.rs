//! Exponentially weighted moving average rates over 1, 5 and 15 minute
//! windows, the same load-average style decay unix uses. Instead of a
//! background ticker the meter catches up on elapsed ticks lazily whenever it
//! is marked or read.

use std::time::{Duration, Instant};

const TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Ewma {
    alpha: f64,
    /// Events per second.
    rate: f64,
    uncounted: i64,
    initialized: bool,
}

impl Ewma {
    fn over_minutes(minutes: f64) -> Self {
        Self {
            alpha: 1.0 - (-TICK_INTERVAL.as_secs_f64() / 60.0 / minutes).exp(),
            rate: 0.0,
            uncounted: 0,
            initialized: false,
        }
    }

    fn update(&mut self, n: i64) {
        self.uncounted += n;
    }

    fn tick(&mut self) {
        let instant_rate = self.uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        self.uncounted = 0;
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Apply `n` ticks. Only the first can carry uncounted events, the rest
    /// decay the rate in closed form.
    fn tick_n(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        self.tick();
        if n > 1 {
            let idle = i32::try_from(n - 1).unwrap_or(i32::MAX);
            self.rate *= (1.0 - self.alpha).powi(idle);
        }
    }
}

/// Counts events and tracks their rate.
#[derive(Debug, Clone)]
pub(crate) struct Meter {
    count: i64,
    start: Instant,
    last_tick: Instant,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Meter {
    pub(crate) fn starting_at(now: Instant) -> Self {
        Self {
            count: 0,
            start: now,
            last_tick: now,
            m1: Ewma::over_minutes(1.0),
            m5: Ewma::over_minutes(5.0),
            m15: Ewma::over_minutes(15.0),
        }
    }

    pub(crate) fn mark_at(&mut self, now: Instant, n: i64) {
        self.catch_up(now);
        self.count += n;
        self.m1.update(n);
        self.m5.update(n);
        self.m15.update(n);
    }

    fn catch_up(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let ticks = (elapsed.as_nanos() / TICK_INTERVAL.as_nanos()) as u64;
        if ticks == 0 {
            return;
        }
        self.m1.tick_n(ticks);
        self.m5.tick_n(ticks);
        self.m15.tick_n(ticks);
        self.last_tick += TICK_INTERVAL * u32::try_from(ticks).unwrap_or(u32::MAX);
    }

    /// Bring the averages up to `now` and read them.
    pub(crate) fn snapshot_at(&mut self, now: Instant) -> MeterSnapshot {
        self.catch_up(now);
        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        MeterSnapshot {
            rate1: self.m1.rate,
            rate5: self.m5.rate,
            rate15: self.m15.rate,
            rate_mean: if elapsed > 0.0 {
                self.count as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub(crate) struct MeterSnapshot {
    pub(crate) rate1: f64,
    pub(crate) rate5: f64,
    pub(crate) rate15: f64,
    pub(crate) rate_mean: f64,
}
