use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::{
    collector::Collector,
    desc::{Desc, Labels},
    metric::{Kind, Metric, Value},
};

use super::{
    sample::{ExpDecaySample, ReservoirOpts, SampleSnapshot},
    MetricVec, VecChild,
};

/// A summary statistic computed over a reservoir.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Statistic {
    Min,
    Max,
    Mean,
    Count,
    Sum,
    StdDev,
    Variance,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Mean => "mean",
            Statistic::Count => "count",
            Statistic::Sum => "sum",
            Statistic::StdDev => "stddev",
            Statistic::Variance => "variance",
        }
    }

    pub(crate) fn value(&self, snap: &SampleSnapshot) -> Value {
        match self {
            Statistic::Min => Value::Int(snap.min()),
            Statistic::Max => Value::Int(snap.max()),
            Statistic::Mean => Value::Float(snap.mean()),
            Statistic::Count => Value::Int(snap.count()),
            Statistic::Sum => Value::Int(snap.sum()),
            Statistic::StdDev => Value::Float(snap.stddev()),
            Statistic::Variance => Value::Float(snap.variance()),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a histogram reports on every collection.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramOpts {
    pub statistics: Vec<Statistic>,
    /// Fractions in [0, 1], reported as `<name>.<p:.2>`.
    pub percentiles: Vec<f64>,
    pub reservoir: ReservoirOpts,
}

impl Default for HistogramOpts {
    fn default() -> Self {
        Self {
            statistics: vec![Statistic::Min, Statistic::Max, Statistic::Mean],
            percentiles: Vec::new(),
            reservoir: ReservoirOpts::default(),
        }
    }
}

/// Name of the series carrying percentile `p` of `fq_name`.
pub(crate) fn percentile_name(fq_name: &str, p: f64) -> String {
    format!("{fq_name}.{p:.2}")
}

struct HistogramInner {
    desc: Arc<Desc>,
    labels: Labels,
    interval: Duration,
    opts: Arc<HistogramOpts>,
    sample: Mutex<ExpDecaySample>,
}

/// Tracks the distribution of integer observations with a bounded decaying
/// reservoir.
#[derive(Clone)]
pub struct Histogram {
    inner: Arc<HistogramInner>,
}

pub type HistogramVec = MetricVec<Histogram>;

impl Histogram {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        opts: HistogramOpts,
    ) -> Self {
        Self::new_child(
            Arc::new(Desc::new(fq_name, help, step, &[])),
            Labels::default(),
            interval,
            &Arc::new(opts),
        )
    }

    pub fn observe(&self, value: i64) {
        self.inner.sample.lock().update(value);
    }

    pub fn desc(&self) -> &Arc<Desc> {
        &self.inner.desc
    }

    pub fn ptr_eq(&self, other: &Histogram) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("desc", &self.inner.desc)
            .field("labels", &self.inner.labels)
            .finish_non_exhaustive()
    }
}

impl HistogramVec {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        label_keys: &[&str],
        opts: HistogramOpts,
    ) -> Self {
        Self::from_parts(
            Desc::new(fq_name, help, step, label_keys),
            interval,
            Arc::new(opts),
        )
    }
}

impl VecChild for Histogram {
    type Opts = Arc<HistogramOpts>;

    fn new_child(desc: Arc<Desc>, labels: Labels, interval: Duration, opts: &Arc<HistogramOpts>) -> Self {
        Self {
            inner: Arc::new(HistogramInner {
                desc,
                labels,
                interval,
                sample: Mutex::new(ExpDecaySample::new(opts.reservoir)),
                opts: opts.clone(),
            }),
        }
    }

    fn emit(&self, sink: &mut dyn FnMut(Metric)) {
        let inner = &*self.inner;
        let snap = inner.sample.lock().snapshot();
        let fq_name = inner.desc.fq_name();
        for stat in &inner.opts.statistics {
            sink(Metric::from_parts(
                &inner.desc,
                format!("{fq_name}.{stat}"),
                Kind::Gauge,
                stat.value(&snap),
                inner.labels.clone(),
            ));
        }
        for p in &inner.opts.percentiles {
            sink(Metric::from_parts(
                &inner.desc,
                percentile_name(fq_name, *p),
                Kind::Gauge,
                Value::Float(snap.percentile(*p)),
                inner.labels.clone(),
            ));
        }
    }
}

impl Collector for Histogram {
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
