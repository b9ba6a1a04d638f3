use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};

use crate::{
    collector::Collector,
    desc::Desc,
    error::{Error, Result},
    metric::Metric,
    reporter::{MetricQueue, Reporter},
};

const DEFAULT_METRIC_CAPACITY: usize = 2500;
const DEFAULT_DESC_CAPACITY: usize = 20;
const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(5);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOpts {
    /// Capacity of the queue shared by every collector. Publishers wait when
    /// it is full.
    pub metric_capacity: usize,
    /// Initial buffer for descriptors drained during registration.
    pub desc_capacity: usize,
    /// Delay before a collector's first collection, so collectors registered
    /// together don't all fire at process start.
    pub grace_delay: Duration,
}

impl Default for RegistryOpts {
    fn default() -> Self {
        Self {
            metric_capacity: DEFAULT_METRIC_CAPACITY,
            desc_capacity: DEFAULT_DESC_CAPACITY,
            grace_delay: DEFAULT_GRACE_DELAY,
        }
    }
}

/// Introspection record for one registered metric name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub metric: String,
    pub help: String,
    pub step: u32,
}

impl From<&Desc> for Metadata {
    fn from(desc: &Desc) -> Self {
        Self {
            metric: desc.fq_name().to_string(),
            help: desc.help().to_string(),
            step: desc.step(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryState {
    Idle,
    Running,
    Stopped,
}

/// Liveness view for an admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub state: RegistryState,
    pub collectors: usize,
    pub metrics: usize,
}

#[derive(Default)]
struct Tables {
    /// Every registered collector, once each, in registration order.
    collectors: Vec<Arc<dyn Collector>>,
    /// Collectors indexed by each descriptor name they own.
    by_name: HashMap<String, Arc<dyn Collector>>,
    metadata: HashMap<String, Arc<Desc>>,
}

/// Owns a set of collectors and, once running, samples each of them on its own
/// interval and feeds the results to a reporter through one bounded queue.
pub struct Registry {
    opts: RegistryOpts,
    tables: RwLock<Tables>,
    reporter: Mutex<Option<Box<dyn Reporter>>>,
    state: Mutex<RegistryState>,
    stop: watch::Sender<bool>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryOpts::default())
    }
}

impl Registry {
    pub fn new(opts: RegistryOpts) -> Self {
        let opts = RegistryOpts {
            metric_capacity: if opts.metric_capacity == 0 {
                DEFAULT_METRIC_CAPACITY
            } else {
                opts.metric_capacity
            },
            desc_capacity: if opts.desc_capacity == 0 {
                DEFAULT_DESC_CAPACITY
            } else {
                opts.desc_capacity
            },
            grace_delay: opts.grace_delay,
        };
        let (stop, _) = watch::channel(false);
        Self {
            opts,
            tables: Default::default(),
            reporter: Mutex::new(None),
            state: Mutex::new(RegistryState::Idle),
            stop,
        }
    }

    /// Attach the reporter that [`Registry::run`] hands the queue to. Replaces
    /// any previously attached reporter.
    pub fn add_reporter(&self, reporter: impl Reporter) {
        *self.reporter.lock() = Some(Box::new(reporter));
    }

    /// Validate every descriptor the collector describes and index it under
    /// each name. Either all names are registered or none are. A collector
    /// describing nothing is not indexed and never scheduled.
    pub fn register(&self, collector: impl Collector) -> Result<()> {
        let collector: Arc<dyn Collector> = Arc::new(collector);
        let mut descs: Vec<Arc<Desc>> = Vec::with_capacity(self.opts.desc_capacity);
        collector.describe(&mut |desc| descs.push(desc));
        if descs.is_empty() {
            tracing::debug!(message = "collector describes no metrics, skipping");
            return Ok(());
        }

        let mut tables = self.tables.write();
        for (idx, desc) in descs.iter().enumerate() {
            if let Some(e) = desc.error() {
                return Err(e);
            }
            let name = desc.fq_name();
            if tables.metadata.contains_key(name)
                || descs[..idx].iter().any(|d| d.fq_name() == name)
            {
                return Err(Error::DuplicateMetric(name.to_string()));
            }
        }
        for desc in descs.iter() {
            let name = desc.fq_name().to_string();
            tables.by_name.insert(name.clone(), collector.clone());
            tables.metadata.insert(name, desc.clone());
        }
        tables.collectors.push(collector);
        tracing::debug!(
            message = "registered collector",
            metrics = ?descs.iter().map(|d| d.fq_name()).collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Like [`Registry::register`] but a bad or duplicate descriptor is a
    /// configuration error and panics.
    pub fn must_register(&self, collector: impl Collector) {
        if let Err(e) = self.register(collector) {
            panic!("{e}");
        }
    }

    /// The collector owning the metric `name`.
    pub fn collector(&self, name: &str) -> Option<Arc<dyn Collector>> {
        self.tables.read().by_name.get(name).cloned()
    }

    /// Metadata of every registered metric, sorted by name.
    pub fn metadata(&self) -> Vec<Metadata> {
        let tables = self.tables.read();
        let mut out: Vec<Metadata> = tables.metadata.values().map(|d| Metadata::from(&**d)).collect();
        out.sort_by(|a, b| a.metric.cmp(&b.metric));
        out
    }

    pub fn health(&self) -> Health {
        let tables = self.tables.read();
        Health {
            state: *self.state.lock(),
            collectors: tables.collectors.len(),
            metrics: tables.metadata.len(),
        }
    }

    /// Start one sampling task per registered collector, hand the metric queue
    /// to the reporter and wait until [`Registry::stop`] is called.
    ///
    /// Collectors registered after this point are not scheduled.
    pub async fn run(&self) -> Result<()> {
        let reporter = {
            let mut state = self.state.lock();
            if *state != RegistryState::Idle {
                return Err(Error::AlreadyRunning);
            }
            let reporter = self.reporter.lock().take().ok_or(Error::MissingReporter)?;
            *state = RegistryState::Running;
            reporter
        };

        let (tx, rx) = mpsc::channel(self.opts.metric_capacity);
        let collectors = self.tables.read().collectors.clone();
        tracing::info!(
            message = "registry running",
            collectors = collectors.len(),
            queue_capacity = self.opts.metric_capacity
        );
        for collector in collectors {
            tokio::spawn(schedule(
                collector,
                tx.clone(),
                self.stop.subscribe(),
                self.opts.grace_delay,
            ));
        }
        // Only the scheduling tasks publish. Once they all exit the queue
        // closes and the reporter drains it.
        drop(tx);
        reporter.report(MetricQueue::new(rx));

        stopped(&mut self.stop.subscribe()).await;
        tracing::info!(message = "registry stopped");
        Ok(())
    }

    /// Signal every sampling task to exit at its next wait and unblock
    /// [`Registry::run`]. Only valid while running; a second call is an error.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != RegistryState::Running {
            return Err(Error::NotRunning);
        }
        *state = RegistryState::Stopped;
        self.stop.send_replace(true);
        Ok(())
    }
}

/// Sampling loop for one collector: grace delay, one collection, then one per
/// tick until stopped. The stop signal is only observed while waiting, never
/// in the middle of a collection or a publish.
async fn schedule(
    collector: Arc<dyn Collector>,
    tx: mpsc::Sender<Metric>,
    mut stop: watch::Receiver<bool>,
    grace_delay: Duration,
) {
    tokio::select! {
        _ = tokio::time::sleep(grace_delay) => {}
        _ = stopped(&mut stop) => return,
    }
    if publish(&*collector, &tx).await.is_err() {
        return;
    }

    let mut period = collector.interval();
    if period < MIN_INTERVAL {
        tracing::warn!(message = "collector interval too small, clamping", interval = ?period, min = ?MIN_INTERVAL);
        period = MIN_INTERVAL;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if publish(&*collector, &tx).await.is_err() {
                    return;
                }
            }
            _ = stopped(&mut stop) => {
                tracing::debug!(message = "collector stopped");
                return;
            }
        }
    }
}

/// Resolves once the stop flag is set, or the registry is gone.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Run one collection and push the results onto the queue in order, waiting
/// for space when it is full. Fails only if the queue has been closed.
async fn publish(collector: &dyn Collector, tx: &mpsc::Sender<Metric>) -> std::result::Result<(), ()> {
    let mut batch = Vec::new();
    collector.collect(&mut |metric| batch.push(metric));
    for metric in batch {
        if tx.send(metric).await.is_err() {
            tracing::debug!(message = "metric queue closed, collector exiting");
            return Err(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        metric::{Kind, Value},
        metrics::{
            counter::Counter,
            gauge::Gauge,
            histogram::{Histogram, HistogramOpts, Statistic},
        },
    };

    /// Sends every received metric into a shared buffer.
    #[derive(Clone, Default)]
    struct CaptureReporter {
        seen: Arc<Mutex<Vec<Metric>>>,
    }

    impl Reporter for CaptureReporter {
        fn report(&self, queue: MetricQueue) {
            let seen = self.seen.clone();
            tokio::spawn(async move {
                while let Some(metric) = queue.recv().await {
                    seen.lock().push(metric);
                }
            });
        }
    }

    /// Reporter that takes the queue and never reads it.
    struct StalledReporter;

    impl Reporter for StalledReporter {
        fn report(&self, queue: MetricQueue) {
            tokio::spawn(async move {
                let _queue = queue;
                std::future::pending::<()>().await;
            });
        }
    }

    /// Custom collector with several descriptors that counts its collections
    /// and emits the collection number.
    #[derive(Clone)]
    struct Probe {
        descs: Vec<Arc<Desc>>,
        interval: Duration,
        collects: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(names: &[&str], interval: Duration) -> Self {
            Self {
                descs: names.iter().map(|n| Arc::new(Desc::new(*n, "probe", 5, &[]))).collect(),
                interval,
                collects: Default::default(),
            }
        }

        fn collects(&self) -> usize {
            self.collects.load(Ordering::SeqCst)
        }
    }

    impl Collector for Probe {
        fn interval(&self) -> Duration {
            self.interval
        }

        fn describe(&self, sink: &mut dyn FnMut(Arc<Desc>)) {
            for desc in &self.descs {
                sink(desc.clone());
            }
        }

        fn collect(&self, sink: &mut dyn FnMut(Metric)) {
            let n = self.collects.fetch_add(1, Ordering::SeqCst) + 1;
            sink(Metric::must_new_const(&self.descs[0], Kind::Gauge, n as i64, &[]))
        }
    }

    fn spawn_run(registry: &Arc<Registry>) -> tokio::task::JoinHandle<Result<()>> {
        let registry = registry.clone();
        tokio::spawn(async move { registry.run().await })
    }

    #[test]
    fn duplicate_registration_leaves_tables_unchanged() {
        let registry = Registry::default();
        registry
            .register(Counter::new("app.requests", "requests", 5, Duration::from_secs(1)))
            .unwrap();
        let before = registry.metadata();

        let err = registry
            .register(Probe::new(&["app.fresh", "app.requests"], Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err, Error::DuplicateMetric("app.requests".into()));
        assert_eq!(registry.metadata(), before);
        assert!(registry.collector("app.fresh").is_none());
        assert_eq!(registry.health().collectors, 1);
    }

    #[test]
    fn duplicate_inside_one_collector_is_rejected() {
        let registry = Registry::default();
        let err = registry
            .register(Probe::new(&["a.b", "a.b"], Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err, Error::DuplicateMetric("a.b".into()));
        assert!(registry.metadata().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn collector_without_descriptors_is_not_scheduled() {
        let registry = Arc::new(Registry::default());
        let silent = Probe::new(&[], Duration::from_secs(1));
        registry.register(silent.clone()).unwrap();
        assert_eq!(registry.health().collectors, 0);
        assert!(registry.metadata().is_empty());

        registry.add_reporter(CaptureReporter::default());
        let run = spawn_run(&registry);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(silent.collects(), 0);

        registry.stop().unwrap();
        run.await.unwrap().unwrap();
    }

    #[test]
    fn invalid_descriptor_is_rejected() {
        let registry = Registry::default();
        let err = registry
            .register(Gauge::new("app.temp", "", 0, Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor { .. }));
        assert!(registry.metadata().is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate metric fq name: app.requests")]
    fn must_register_panics() {
        let registry = Registry::default();
        registry.must_register(Counter::new("app.requests", "", 5, Duration::from_secs(1)));
        registry.must_register(Counter::new("app.requests", "", 5, Duration::from_secs(1)));
    }

    #[test]
    fn metadata_and_index() {
        let registry = Registry::default();
        let probe = Probe::new(&["host.load.1", "host.load.5"], Duration::from_secs(1));
        registry.register(probe).unwrap();
        registry
            .register(Counter::new("app.uptime", "seconds up", 10, Duration::from_secs(1)))
            .unwrap();

        let names: Vec<String> = registry.metadata().into_iter().map(|m| m.metric).collect();
        assert_eq!(names, ["app.uptime", "host.load.1", "host.load.5"]);
        assert_eq!(
            registry.metadata()[0],
            Metadata {
                metric: "app.uptime".into(),
                help: "seconds up".into(),
                step: 10
            }
        );
        let a = registry.collector("host.load.1").unwrap();
        let b = registry.collector("host.load.5").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            registry.health(),
            Health {
                state: RegistryState::Idle,
                collectors: 2,
                metrics: 3
            }
        );
    }

    #[tokio::test]
    async fn run_requires_reporter() {
        let registry = Registry::default();
        assert_eq!(registry.run().await, Err(Error::MissingReporter));
        assert_eq!(registry.health().state, RegistryState::Idle);
    }

    #[test]
    fn stop_requires_running() {
        let registry = Registry::default();
        assert_eq!(registry.stop(), Err(Error::NotRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_flows_to_reporter() {
        let registry = Arc::new(Registry::default());
        let counter = Counter::new("service.uptime", "", 5, Duration::from_secs(1));
        registry.register(counter.clone()).unwrap();
        let reporter = CaptureReporter::default();
        registry.add_reporter(reporter.clone());

        let run = spawn_run(&registry);
        counter.inc(2);
        counter.inc(1);
        // grace delay plus two ticks
        tokio::time::sleep(Duration::from_millis(7500)).await;

        {
            let seen = reporter.seen.lock();
            assert!(seen.len() >= 2, "saw {} metrics", seen.len());
            for metric in seen.iter() {
                assert_eq!(metric.metric, "service.uptime");
                assert_eq!(metric.kind, Kind::Counter);
                assert_eq!(metric.value, Value::Int(3));
                assert_eq!(metric.step, 5);
            }
        }

        assert_eq!(registry.health().state, RegistryState::Running);
        assert_eq!(registry.run().await, Err(Error::AlreadyRunning));
        registry.stop().unwrap();
        assert_eq!(run.await.unwrap(), Ok(()));
        assert_eq!(registry.stop(), Err(Error::NotRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn histogram_emits_every_configured_series() {
        let registry = Arc::new(Registry::default());
        let hist = Histogram::new(
            "api.latency",
            "",
            5,
            Duration::from_secs(60),
            HistogramOpts {
                statistics: vec![Statistic::Min, Statistic::Max, Statistic::Mean],
                percentiles: vec![0.5, 0.9],
                ..Default::default()
            },
        );
        registry.register(hist.clone()).unwrap();
        for v in [10, 20, 30, 40, 50] {
            hist.observe(v);
        }
        let reporter = CaptureReporter::default();
        registry.add_reporter(reporter.clone());
        let run = spawn_run(&registry);

        // one collection: the grace delay has passed, the first tick has not
        tokio::time::sleep(Duration::from_secs(6)).await;
        let names: Vec<String> = reporter.seen.lock().iter().map(|m| m.metric.clone()).collect();
        assert_eq!(
            names,
            [
                "api.latency.min",
                "api.latency.max",
                "api.latency.mean",
                "api.latency.0.50",
                "api.latency.0.90",
            ]
        );

        registry.stop().unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn collectors_keep_their_own_cadence() {
        let registry = Arc::new(Registry::default());
        let fast = Probe::new(&["fast"], Duration::from_secs(1));
        let slow = Probe::new(&["slow"], Duration::from_secs(10));
        registry.register(fast.clone()).unwrap();
        registry.register(slow.clone()).unwrap();
        registry.add_reporter(CaptureReporter::default());
        let run = spawn_run(&registry);

        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(fast.collects(), 5);
        assert_eq!(slow.collects(), 1);

        registry.stop().unwrap();
        run.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fast.collects(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_grace_delay_skips_collection() {
        let registry = Arc::new(Registry::default());
        let probe = Probe::new(&["probe"], Duration::from_secs(1));
        registry.register(probe.clone()).unwrap();
        registry.add_reporter(StalledReporter);
        let run = spawn_run(&registry);

        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.stop().unwrap();
        run.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(probe.collects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_blocks_publisher() {
        let probe = Probe::new(&["probe"], Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(schedule(
            Arc::new(probe.clone()),
            tx,
            stop_rx,
            Duration::from_secs(5),
        ));

        // t=5 fills the queue, t=6 collects and waits for space, after that
        // no more collections happen no matter how many ticks pass
        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(probe.collects(), 2);

        assert_eq!(rx.recv().await.unwrap().value, Value::Int(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        // the waiting metric moved in and the next collection is now blocked
        assert_eq!(probe.collects(), 3);
        assert_eq!(rx.recv().await.unwrap().value, Value::Int(2));

        stop_tx.send_replace(true);
        drop(rx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn publish_preserves_order() {
        struct Burst(Arc<Desc>);

        impl Collector for Burst {
            fn interval(&self) -> Duration {
                Duration::from_secs(1)
            }

            fn describe(&self, sink: &mut dyn FnMut(Arc<Desc>)) {
                sink(self.0.clone())
            }

            fn collect(&self, sink: &mut dyn FnMut(Metric)) {
                for v in 0..10i64 {
                    sink(Metric::must_new_const(&self.0, Kind::Gauge, v, &[]));
                }
            }
        }

        let (tx, mut rx) = mpsc::channel::<Metric>(2);
        let burst = Burst(Arc::new(Desc::new("burst", "", 5, &[])));
        let reader = tokio::spawn(async move {
            let mut values = Vec::new();
            while let Some(m) = rx.recv().await {
                values.push(m.value);
            }
            values
        });
        publish(&burst, &tx).await.unwrap();
        drop(tx);
        let values = reader.await.unwrap();
        assert_eq!(values, (0..10).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn zero_capacities_fall_back_to_defaults() {
        let registry = Registry::new(RegistryOpts {
            metric_capacity: 0,
            desc_capacity: 0,
            grace_delay: Duration::ZERO,
        });
        assert_eq!(registry.opts.metric_capacity, DEFAULT_METRIC_CAPACITY);
        assert_eq!(registry.opts.desc_capacity, DEFAULT_DESC_CAPACITY);
    }

    #[test]
    fn registry_tables_are_shared_by_reference() {
        let registry = Registry::default();
        let counter = Counter::new("shared", "", 5, Duration::from_secs(1));
        registry.register(counter.clone()).unwrap();
        let tables = registry.tables.read();
        assert!(Arc::ptr_eq(&tables.metadata["shared"], counter.desc()));
    }
}
