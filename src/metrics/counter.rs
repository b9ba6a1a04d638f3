use std::{
    sync::{atomic, Arc},
    time::Duration,
};

use crate::{
    collector::Collector,
    desc::{Desc, Labels},
    metric::{Kind, Metric, Value},
};

use super::{MetricVec, VecChild};

/// How a counter turns its accumulator into a reported value.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CounterMode {
    /// Report the running total as a [`Kind::Counter`].
    #[default]
    Cumulative,
    /// Report `(total - total at last collection) / step` as a
    /// [`Kind::Gauge`]. Every collection moves the baseline forward.
    Rate,
}

#[derive(Debug)]
struct CounterInner {
    desc: Arc<Desc>,
    labels: Labels,
    interval: Duration,
    mode: CounterMode,
    count: atomic::AtomicI64,
    last_collected: atomic::AtomicI64,
}

/// A signed 64 bit accumulator. Totals may go negative.
#[derive(Debug, Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

pub type CounterVec = MetricVec<Counter>;

impl Counter {
    pub fn new(fq_name: impl Into<String>, help: impl Into<String>, step: u32, interval: Duration) -> Self {
        Self::with_mode(fq_name, help, step, interval, CounterMode::default())
    }

    pub fn with_mode(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        mode: CounterMode,
    ) -> Self {
        Self::new_child(
            Arc::new(Desc::new(fq_name, help, step, &[])),
            Labels::default(),
            interval,
            &mode,
        )
    }

    pub fn inc(&self, n: i64) {
        self.inner.count.fetch_add(n, atomic::Ordering::Relaxed);
    }

    pub fn dec(&self, n: i64) {
        self.inner.count.fetch_sub(n, atomic::Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.inner.count.store(0, atomic::Ordering::Relaxed);
    }

    pub fn count(&self) -> i64 {
        self.inner.count.load(atomic::Ordering::Relaxed)
    }

    pub fn desc(&self) -> &Arc<Desc> {
        &self.inner.desc
    }

    /// True if both handles point at the same accumulator.
    pub fn ptr_eq(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn snapshot(&self) -> Metric {
        let inner = &*self.inner;
        let count = self.count();
        let (kind, value) = match inner.mode {
            CounterMode::Cumulative => (Kind::Counter, Value::Int(count)),
            CounterMode::Rate => {
                let previous = inner.last_collected.swap(count, atomic::Ordering::Relaxed);
                let step = inner.desc.step().max(1) as f64;
                (Kind::Gauge, Value::Float(count.wrapping_sub(previous) as f64 / step))
            }
        };
        Metric::from_parts(
            &inner.desc,
            inner.desc.fq_name().to_string(),
            kind,
            value,
            inner.labels.clone(),
        )
    }
}

impl CounterVec {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        label_keys: &[&str],
    ) -> Self {
        Self::with_mode(fq_name, help, step, interval, label_keys, CounterMode::default())
    }

    pub fn with_mode(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        label_keys: &[&str],
        mode: CounterMode,
    ) -> Self {
        Self::from_parts(Desc::new(fq_name, help, step, label_keys), interval, mode)
    }
}

impl VecChild for Counter {
    type Opts = CounterMode;

    fn new_child(desc: Arc<Desc>, labels: Labels, interval: Duration, mode: &CounterMode) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                desc,
                labels,
                interval,
                mode: *mode,
                count: atomic::AtomicI64::new(0),
                last_collected: atomic::AtomicI64::new(0),
            }),
        }
    }

    fn emit(&self, sink: &mut dyn FnMut(Metric)) {
        sink(self.snapshot())
    }
}

impl Collector for Counter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn collect_one(c: &impl Collector) -> Vec<Metric> {
        let mut out = Vec::new();
        c.collect(&mut |m| out.push(m));
        out
    }

    #[test]
    fn inc_dec_clear() {
        let counter = Counter::new("jobs.done", "", 5, Duration::from_secs(1));
        counter.inc(1);
        counter.inc(2);
        assert_eq!(counter.count(), 3);
        counter.dec(5);
        assert_eq!(counter.count(), -2);
        counter.clear();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn cumulative_collect_reports_total() {
        let counter = Counter::new("jobs.done", "", 5, Duration::from_secs(1));
        counter.inc(4);
        let first = collect_one(&counter);
        counter.inc(1);
        let second = collect_one(&counter);
        assert_eq!(first[0].value, Value::Int(4));
        assert_eq!(first[0].kind, Kind::Counter);
        assert_eq!(second[0].value, Value::Int(5));
        assert_eq!(second[0].step, 5);
    }

    #[test]
    fn rate_collect_reports_delta_over_step() {
        let counter = Counter::with_mode("jobs.rate", "", 5, Duration::from_secs(1), CounterMode::Rate);
        counter.inc(10);
        let first = collect_one(&counter);
        assert_eq!(first[0].kind, Kind::Gauge);
        assert_eq!(first[0].value, Value::Float(2.0));

        let idle = collect_one(&counter);
        assert_eq!(idle[0].value, Value::Float(0.0));

        counter.inc(25);
        assert_eq!(collect_one(&counter)[0].value, Value::Float(5.0));
    }

    #[test]
    fn vec_returns_same_child() {
        let vec = CounterVec::new("http.requests", "", 5, Duration::from_secs(1), &["endpoint"]);
        let a = vec.with_label_values(&["/api"]);
        let b = vec.with_label_values(&["/api"]);
        assert!(a.ptr_eq(&b));
        a.inc(1);
        b.inc(2);
        assert_eq!(a.count(), 3);
        assert_eq!(vec.len(), 1);

        let metrics = collect_one(&vec);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].endpoint, "/api");
        assert_eq!(metrics[0].value, Value::Int(3));
    }

    #[test]
    fn rate_survives_extreme_swings() {
        let counter = Counter::with_mode("jobs.swing", "", 5, Duration::from_secs(1), CounterMode::Rate);
        counter.inc(i64::MAX);
        collect_one(&counter);
        counter.clear();
        counter.dec(i64::MAX);
        counter.dec(1);
        assert_eq!(counter.count(), i64::MIN);
        assert_eq!(collect_one(&counter)[0].value, Value::Float(0.2));
    }

    #[test]
    fn vec_keeps_values_with_separators_apart() {
        let vec = CounterVec::new("kv.pairs", "", 5, Duration::from_secs(1), &["a", "b"]);
        let first = vec.with_label_values(&["1,b=2", "3"]);
        let second = vec.with_label_values(&["1", "2,b=3"]);
        assert!(!first.ptr_eq(&second));
        first.inc(1);
        second.inc(2);
        assert_eq!(vec.len(), 2);

        let mut metrics = collect_one(&vec);
        metrics.sort_by_key(|m| m.value.as_f64() as i64);
        assert_eq!(metrics[0].labels["a"], "1,b=2");
        assert_eq!(metrics[0].labels["b"], "3");
        assert_eq!(metrics[1].labels["a"], "1");
        assert_eq!(metrics[1].labels["b"], "2,b=3");
    }

    #[test]
    fn vec_with_reorders_pairs() {
        let vec = CounterVec::new("rpc.calls", "", 5, Duration::from_secs(1), &["method", "status"]);
        let ordered = vec.with_label_values(&["Push", "ok"]);
        let mapped = vec.with(&[("status", "ok"), ("method", "Push")]);
        assert!(ordered.ptr_eq(&mapped));

        let partial = vec.with(&[("method", "Push")]);
        assert!(!partial.ptr_eq(&ordered));
        assert_eq!(partial.desc().fq_name(), "rpc.calls");
        assert_eq!(vec.len(), 2);
    }

    #[test]
    fn vec_rejects_bad_labels() {
        let vec = CounterVec::new("rpc.calls", "", 5, Duration::from_secs(1), &["method", "status"]);
        assert_eq!(
            vec.try_with_label_values(&["Push"]).unwrap_err(),
            Error::LabelArity {
                name: "rpc.calls".into(),
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(
            vec.try_with(&[("code", "200")]).unwrap_err(),
            Error::UnknownLabelKey {
                name: "rpc.calls".into(),
                key: "code".into()
            }
        );
        assert!(vec.is_empty());
    }

    #[test]
    #[should_panic(expected = "rpc.calls: expected 2 label values but got 3")]
    fn vec_with_label_values_panics_on_arity() {
        let vec = CounterVec::new("rpc.calls", "", 5, Duration::from_secs(1), &["method", "status"]);
        vec.with_label_values(&["a", "b", "c"]);
    }

    #[test]
    fn vec_concurrent_creation_shares_child() {
        let vec = CounterVec::new("load.hits", "", 5, Duration::from_secs(1), &["shard"]);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        vec.with_label_values(&["a"]).inc(1);
                    }
                });
            }
        });
        assert_eq!(vec.len(), 1);
        assert_eq!(vec.with_label_values(&["a"]).count(), 8000);
    }
}
