//! In-process metrics for long running services.
//!
//! Instruments ([`Counter`], [`Gauge`], [`Histogram`], [`Timer`] and their
//! labelled vec forms) are [`Collector`]s. Register them with a [`Registry`],
//! attach a [`Reporter`] and call [`Registry::run`]: each collector is sampled
//! on its own interval and the snapshots flow through one bounded queue to the
//! reporter.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use aura::{BatchReporter, CounterVec, Registry, RegistryOpts, ReporterOpts, WriterSink};
//!
//! # async fn demo() -> aura::Result<()> {
//! let requests = CounterVec::new("http.requests", "Requests served.", 60, Duration::from_secs(60), &["code"]);
//! let registry = Registry::new(RegistryOpts::default());
//! registry.register(requests.clone())?;
//! registry.add_reporter(BatchReporter::new(WriterSink::stdout(), ReporterOpts::default()));
//!
//! requests.with_label_values(&["200"]).inc(1);
//! registry.run().await
//! # }
//! ```

mod collector;
mod desc;
mod error;
mod metric;
mod metrics;
mod registry;
mod reporter;
mod runtime;
mod utils;

pub use collector::Collector;
pub use desc::{build_fq_name, Desc, Labels};
pub use error::{DeliveryError, Error, Result};
pub use metric::{Kind, Metric, Value, ENDPOINT_LABEL};
pub use metrics::{
    counter::{Counter, CounterMode, CounterVec},
    gauge::{Gauge, GaugeVec},
    histogram::{Histogram, HistogramOpts, HistogramVec, Statistic},
    sample::ReservoirOpts,
    timer::{Timer, TimerGuard, TimerOpts, TimerStatistic, TimerVec},
    MetricVec, VecChild,
};
pub use registry::{Health, Metadata, Registry, RegistryOpts, RegistryState};
pub use reporter::{
    BatchReporter, MetricQueue, MetricReported, OtlpSink, Reporter, ReporterOpts, Sink, WriterSink,
};
pub use runtime::RuntimeCollector;
