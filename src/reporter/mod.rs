//! Consumers of the registry's metric queue.
//!
//! A [`Reporter`] receives the queue once, when the registry starts running,
//! and owns everything downstream of it. [`BatchReporter`] is the usual shape:
//! a fixed pool of workers pulling from the shared queue, batching privately
//! and handing full (or timed out) batches to a [`Sink`].

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex},
    time::{Instant, MissedTickBehavior},
};

use crate::{error::DeliveryError, metric::Metric};

mod otlp;
mod stream;

pub use otlp::OtlpSink;
pub use stream::{MetricReported, WriterSink};

/// The consuming end of the registry's bounded metric queue. Clones share the
/// one underlying receiver, so each metric is delivered to exactly one caller
/// of [`MetricQueue::recv`].
#[derive(Clone)]
pub struct MetricQueue {
    inner: Arc<Mutex<mpsc::Receiver<Metric>>>,
}

impl MetricQueue {
    pub(crate) fn new(rx: mpsc::Receiver<Metric>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait for the next metric. Returns `None` once every publisher is gone
    /// and the queue is drained. Cancel safe.
    pub async fn recv(&self) -> Option<Metric> {
        self.inner.lock().await.recv().await
    }
}

/// Anything that can consume the registry's metric stream.
pub trait Reporter: Send + Sync + 'static {
    /// Start consuming `queue`. Called once from within the tokio runtime
    /// driving [`Registry::run`](crate::Registry::run); implementations spawn
    /// their consumers and return.
    fn report(&self, queue: MetricQueue);
}

/// The delivery half of a [`BatchReporter`].
pub trait Sink: Send + Sync + 'static {
    /// Wire representation of one metric.
    type Item: Send + 'static;

    fn convert(&self, metric: Metric) -> Self::Item;

    /// Deliver one batch. The batch may be empty when a flush tick fires with
    /// nothing buffered. Failures are logged by the caller and the batch is
    /// dropped.
    fn flush(&self, batch: Vec<Self::Item>) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterOpts {
    /// Flush as soon as a worker holds this many items.
    pub batch_size: usize,
    /// Flush whatever is buffered at this period.
    pub flush_interval: Duration,
    /// Number of workers pulling from the queue.
    pub concurrency: usize,
}

impl Default for ReporterOpts {
    fn default() -> Self {
        Self {
            batch_size: 200,
            flush_interval: Duration::from_secs(5),
            concurrency: 3,
        }
    }
}

/// A [`Reporter`] running a pool of batching workers in front of a [`Sink`].
/// Ordering is only preserved within one worker's batch.
pub struct BatchReporter<S> {
    sink: Arc<S>,
    opts: ReporterOpts,
}

impl<S: Sink> BatchReporter<S> {
    pub fn new(sink: S, opts: ReporterOpts) -> Self {
        Self {
            sink: Arc::new(sink),
            opts: ReporterOpts {
                batch_size: opts.batch_size.max(1),
                flush_interval: opts.flush_interval.max(Duration::from_millis(1)),
                concurrency: opts.concurrency.max(1),
            },
        }
    }
}

impl<S: Sink> Reporter for BatchReporter<S> {
    fn report(&self, queue: MetricQueue) {
        tracing::info!(
            message = "starting reporter",
            workers = self.opts.concurrency,
            batch_size = self.opts.batch_size,
            flush_interval = ?self.opts.flush_interval
        );
        for worker_id in 0..self.opts.concurrency {
            tokio::spawn(run_worker(
                worker_id,
                self.sink.clone(),
                queue.clone(),
                self.opts.clone(),
            ));
        }
    }
}

async fn run_worker<S: Sink>(worker_id: usize, sink: Arc<S>, queue: MetricQueue, opts: ReporterOpts) {
    let mut ticker = tokio::time::interval_at(Instant::now() + opts.flush_interval, opts.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(opts.batch_size);
    loop {
        tokio::select! {
            metric = queue.recv() => match metric {
                Some(metric) => {
                    batch.push(sink.convert(metric));
                    if batch.len() >= opts.batch_size {
                        flush(worker_id, &*sink, &mut batch, opts.batch_size).await;
                    }
                }
                None => {
                    if !batch.is_empty() {
                        flush(worker_id, &*sink, &mut batch, 0).await;
                    }
                    tracing::debug!(message = "metric queue closed, worker exiting", worker_id);
                    return;
                }
            },
            _ = ticker.tick() => {
                flush(worker_id, &*sink, &mut batch, opts.batch_size).await;
            }
        }
    }
}

async fn flush<S: Sink>(worker_id: usize, sink: &S, batch: &mut Vec<S::Item>, capacity: usize) {
    let items = std::mem::replace(batch, Vec::with_capacity(capacity));
    let len = items.len();
    if let Err(e) = sink.flush(items).await {
        tracing::warn!(message = "dropping metric batch", worker_id, metrics = len, error = %e);
    }
}
