//! A forward-decaying priority reservoir. It keeps a bounded, weighted random
//! sample of observations biased toward recent ones, which lets histograms
//! approximate a distribution without storing every value.
//!
//! Each observation gets the priority `exp(alpha * age_of_landmark) / u` with
//! `u` uniform in (0, 1]. The reservoir keeps the `size` highest priorities.
//! Priorities grow without bound as the landmark ages, so every hour the
//! landmark is moved forward and stored priorities are rescaled.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    time::{Duration, Instant},
};

const RESCALE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

/// Reservoir tuning shared by histograms and timers.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ReservoirOpts {
    /// Maximum number of retained observations.
    pub size: usize,
    /// Decay factor. Larger values bias harder toward recent observations.
    pub alpha: f64,
}

impl Default for ReservoirOpts {
    fn default() -> Self {
        Self {
            size: 1028,
            alpha: 0.015,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Weighted {
    priority: f64,
    value: i64,
}

impl PartialEq for Weighted {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Weighted {}

impl PartialOrd for Weighted {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Weighted {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.total_cmp(&other.priority)
    }
}

#[derive(Debug)]
pub(crate) struct ExpDecaySample {
    opts: ReservoirOpts,
    count: i64,
    landmark: Instant,
    next_rescale: Instant,
    /// Min-heap on priority so the weakest entry is evicted first.
    values: BinaryHeap<Reverse<Weighted>>,
}

impl ExpDecaySample {
    pub(crate) fn new(opts: ReservoirOpts) -> Self {
        Self::starting_at(opts, Instant::now())
    }

    pub(crate) fn starting_at(opts: ReservoirOpts, now: Instant) -> Self {
        let opts = ReservoirOpts {
            size: opts.size.max(1),
            ..opts
        };
        Self {
            opts,
            count: 0,
            landmark: now,
            next_rescale: now + RESCALE_THRESHOLD,
            values: BinaryHeap::with_capacity(opts.size),
        }
    }

    pub(crate) fn update(&mut self, value: i64) {
        self.update_at(Instant::now(), value)
    }

    pub(crate) fn update_at(&mut self, now: Instant, value: i64) {
        if now >= self.next_rescale {
            self.rescale(now);
        }
        self.count += 1;
        let age = now.saturating_duration_since(self.landmark).as_secs_f64();
        // 1.0 - [0, 1) keeps the divisor in (0, 1].
        let u = 1.0 - rand::random::<f64>();
        let item = Weighted {
            priority: (self.opts.alpha * age).exp() / u,
            value,
        };
        if self.values.len() < self.opts.size {
            self.values.push(Reverse(item));
            return;
        }
        if let Some(mut weakest) = self.values.peek_mut() {
            if item.priority > weakest.0.priority {
                *weakest = Reverse(item);
            }
        }
    }

    fn rescale(&mut self, now: Instant) {
        let shift = now.saturating_duration_since(self.landmark).as_secs_f64();
        let factor = (-self.opts.alpha * shift).exp();
        let values = std::mem::take(&mut self.values);
        self.values = values
            .into_iter()
            .map(|Reverse(w)| {
                Reverse(Weighted {
                    priority: w.priority * factor,
                    value: w.value,
                })
            })
            .collect();
        self.landmark = now;
        self.next_rescale = now + RESCALE_THRESHOLD;
    }

    /// Copy the retained values out so statistics can be computed without
    /// holding the owner's lock.
    pub(crate) fn snapshot(&self) -> SampleSnapshot {
        let mut values: Vec<i64> = self.values.iter().map(|Reverse(w)| w.value).collect();
        values.sort_unstable();
        SampleSnapshot {
            count: self.count,
            values,
        }
    }
}

/// Sorted copy of a reservoir plus the total number of observations ever
/// made, which can exceed the number of retained values.
#[derive(Debug, Clone, Default)]
pub(crate) struct SampleSnapshot {
    count: i64,
    values: Vec<i64>,
}

impl SampleSnapshot {
    pub(crate) fn count(&self) -> i64 {
        self.count
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    pub(crate) fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    pub(crate) fn sum(&self) -> i64 {
        self.values.iter().fold(0i64, |acc, v| acc.wrapping_add(*v))
    }

    pub(crate) fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|v| *v as f64).sum::<f64>() / self.values.len() as f64
    }

    /// Population variance of the retained values.
    pub(crate) fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.values
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.values.len() as f64
    }

    pub(crate) fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Interpolated percentile, `p` in [0, 1]. Positions below the first or
    /// past the last value clamp to that value. NaN reports 0.
    pub(crate) fn percentile(&self, p: f64) -> f64 {
        let size = self.values.len();
        if size == 0 || p.is_nan() {
            return 0.0;
        }
        let pos = p * (size + 1) as f64;
        if pos < 1.0 {
            return self.values[0] as f64;
        }
        if pos >= size as f64 {
            return self.values[size - 1] as f64;
        }
        let lower = self.values[pos as usize - 1] as f64;
        let upper = self.values[pos as usize] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }
}
