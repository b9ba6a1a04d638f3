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

#[derive(Debug)]
struct GaugeInner {
    desc: Arc<Desc>,
    labels: Labels,
    interval: Duration,
    /// Bit pattern of the last f64 written.
    bits: atomic::AtomicU64,
}

/// Holds the last value it was updated with. Collection reports that value
/// every period whether or not it changed.
#[derive(Debug, Clone)]
pub struct Gauge {
    inner: Arc<GaugeInner>,
}

pub type GaugeVec = MetricVec<Gauge>;

impl Gauge {
    pub fn new(fq_name: impl Into<String>, help: impl Into<String>, step: u32, interval: Duration) -> Self {
        Self::new_child(
            Arc::new(Desc::new(fq_name, help, step, &[])),
            Labels::default(),
            interval,
            &(),
        )
    }

    pub fn update(&self, val: f64) {
        self.inner.bits.store(val.to_bits(), atomic::Ordering::Relaxed)
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.inner.bits.load(atomic::Ordering::Relaxed))
    }

    pub fn desc(&self) -> &Arc<Desc> {
        &self.inner.desc
    }

    pub fn ptr_eq(&self, other: &Gauge) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl GaugeVec {
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        step: u32,
        interval: Duration,
        label_keys: &[&str],
    ) -> Self {
        Self::from_parts(Desc::new(fq_name, help, step, label_keys), interval, ())
    }
}

impl VecChild for Gauge {
    type Opts = ();

    fn new_child(desc: Arc<Desc>, labels: Labels, interval: Duration, _opts: &()) -> Self {
        Self {
            inner: Arc::new(GaugeInner {
                desc,
                labels,
                interval,
                bits: atomic::AtomicU64::new(0f64.to_bits()),
            }),
        }
    }

    fn emit(&self, sink: &mut dyn FnMut(Metric)) {
        let inner = &*self.inner;
        sink(Metric::from_parts(
            &inner.desc,
            inner.desc.fq_name().to_string(),
            Kind::Gauge,
            Value::Float(self.value()),
            inner.labels.clone(),
        ))
    }
}

impl Collector for Gauge {
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
