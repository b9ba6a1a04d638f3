use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    collector::Collector,
    desc::{Desc, Labels},
    metric::{Kind, Metric, Value},
};

use super::{
    histogram::{percentile_name, Statistic},
    meter::{Meter, MeterSnapshot},
    sample::{ExpDecaySample, ReservoirOpts, SampleSnapshot},
    MetricVec, VecChild,
};

/// Statistics a timer can report. Durations are in nanoseconds, rates in
/// observations per second.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerStatistic {
    Min,
    Max,
    Mean,
    Count,
    Sum,
    StdDev,
    Variance,
    Rate1,
    Rate5,
    Rate15,
    RateMean,
}

impl TimerStatistic {
    pub fn as_str(&self) -> &'static str {
        match self.as_sample() {
            Some(stat) => stat.as_str(),
            None => match self {
                TimerStatistic::Rate1 => "rate1",
                TimerStatistic::Rate5 => "rate5",
                TimerStatistic::Rate15 => "rate15",
                _ => "rateMean",
            },
        }
    }

    fn as_sample(&self) -> Option<Statistic> {
        Some(match self {
            TimerStatistic::Min => Statistic::Min,
            TimerStatistic::Max => Statistic::Max,
            TimerStatistic::Mean => Statistic::Mean,
            TimerStatistic::Count => Statistic::Count,
            TimerStatistic::Sum => Statistic::Sum,
            TimerStatistic::StdDev => Statistic::StdDev,
            TimerStatistic::Variance => Statistic::Variance,
            _ => return None,
        })
    }

    fn value(&self, sample: &SampleSnapshot, rates: &MeterSnapshot) -> Value {
        if let Some(stat) = self.as_sample() {
            return stat.value(sample);
        }
        Value::Float(match self {
            TimerStatistic::Rate1 => rates.rate1,
            TimerStatistic::Rate5 => rates.rate5,
            TimerStatistic::Rate15 => rates.rate15,
            _ => rates.rate_mean,
        })
    }
}

impl fmt::Display for TimerStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimerOpts {
    pub statistics: Vec<TimerStatistic>,
    pub percentiles: Vec<f64>,
    pub reservoir: ReservoirOpts,
}

impl Default for TimerOpts {
    fn default() -> Self {
        Self {
            statistics: vec![TimerStatistic::Min, TimerStatistic::Max, TimerStatistic::Mean],
            percentiles: Vec::new(),
            reservoir: ReservoirOpts::default(),
        }
    }
}

struct TimerState {
    sample: ExpDecaySample,
    meter: Meter,
}

struct TimerInner {
    desc: Arc<Desc>,
    labels: Labels,
    interval: Duration,
    opts: Arc<TimerOpts>,
    state: Mutex<TimerState>,
}

/// A histogram of durations plus a meter of how often they are recorded.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

pub type TimerVec = MetricVec<Timer>;

impl Timer {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        opts: TimerOpts,
    ) -> Self {
        Self::new_child(
            Arc::new(Desc::new(fq_name, help, step, &[])),
            Labels::default(),
            interval,
            &Arc::new(opts),
        )
    }

    pub fn update(&self, elapsed: Duration) {
        self.update_at(Instant::now(), elapsed)
    }

    fn update_at(&self, now: Instant, elapsed: Duration) {
        let nanos = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
        let mut state = self.inner.state.lock();
        state.sample.update_at(now, nanos);
        state.meter.mark_at(now, 1);
    }

    /// Start timing. The elapsed time is recorded when the guard drops.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            timer: self,
            started: Instant::now(),
        }
    }

    /// Run `f` and record how long it took. The duration is recorded even if
    /// `f` panics.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.start();
        f()
    }

    /// Await `fut` and record how long it took to complete. Dropping the
    /// returned future early records the time spent so far.
    pub async fn time_future<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.start();
        fut.await
    }

    pub fn desc(&self) -> &Arc<Desc> {
        &self.inner.desc
    }

    pub fn ptr_eq(&self, other: &Timer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn snapshot_at(&self, now: Instant) -> (SampleSnapshot, MeterSnapshot) {
        let mut state = self.inner.state.lock();
        let rates = state.meter.snapshot_at(now);
        (state.sample.snapshot(), rates)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("desc", &self.inner.desc)
            .field("labels", &self.inner.labels)
            .finish_non_exhaustive()
    }
}

/// Records the time since [`Timer::start`] into its timer when dropped.
#[must_use = "the elapsed time is recorded when the guard is dropped"]
pub struct TimerGuard<'a> {
    timer: &'a Timer,
    started: Instant,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.update(self.started.elapsed());
    }
}

impl TimerVec {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        label_keys: &[&str],
        opts: TimerOpts,
    ) -> Self {
        Self::from_parts(
            Desc::new(fq_name, help, step, label_keys),
            interval,
            Arc::new(opts),
        )
    }
}

impl VecChild for Timer {
    type Opts = Arc<TimerOpts>;

    fn new_child(desc: Arc<Desc>, labels: Labels, interval: Duration, opts: &Arc<TimerOpts>) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(TimerInner {
                desc,
                labels,
                interval,
                state: Mutex::new(TimerState {
                    sample: ExpDecaySample::starting_at(opts.reservoir, now),
                    meter: Meter::starting_at(now),
                }),
                opts: opts.clone(),
            }),
        }
    }

    fn emit(&self, sink: &mut dyn FnMut(Metric)) {
        let inner = &*self.inner;
        let (sample, rates) = self.snapshot_at(Instant::now());
        let fq_name = inner.desc.fq_name();
        for stat in &inner.opts.statistics {
            sink(Metric::from_parts(
                &inner.desc,
                format!("{fq_name}.{stat}"),
                Kind::Gauge,
                stat.value(&sample, &rates),
                inner.labels.clone(),
            ));
        }
        for p in &inner.opts.percentiles {
            sink(Metric::from_parts(
                &inner.desc,
                percentile_name(fq_name, *p),
                Kind::Gauge,
                Value::Float(sample.percentile(*p)),
                inner.labels.clone(),
            ));
        }
    }
}

impl Collector for Timer {
    fn interval(&self) -> Duration {
        self.inner.interval
    }

    fn describe(&self, sink: &mut dyn FnMut(Arc<Desc>)) {
        sink(self.inner.desc.clone())
    }

    fn collect(&self, sink: &mut dyn FnMut(Metric)) {
        self.emit(sink)
    }
}
