//! Tokio runtime stats as a ready-made collector. Register it next to your own
//! metrics to get scheduler health for free.

use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;

use crate::{
    collector::Collector,
    desc::{build_fq_name, Desc},
    metric::{Kind, Metric},
};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Samples the runtime that runs its collection: worker count, alive tasks
/// and global queue depth. Emits nothing when called outside a runtime.
pub struct RuntimeCollector {
    interval: Duration,
    workers: Arc<Desc>,
    tasks: Arc<Desc>,
    queue_depth: Arc<Desc>,
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new("", DEFAULT_INTERVAL)
    }
}

impl RuntimeCollector {
    /// Metrics are named `{namespace}.tokio.*`, or `tokio.*` with an empty
    /// namespace.
    pub fn new(namespace: &str, interval: Duration) -> Self {
        let step = interval.as_secs().max(1) as u32;
        let desc = |name: &str, help: &str, keys: &[&str]| {
            Arc::new(Desc::new(build_fq_name(namespace, "tokio", name), help, step, keys))
        };
        Self {
            interval,
            workers: desc("workers", "Worker threads in the runtime.", &[]),
            tasks: desc("tasks", "Tasks in the runtime by state.", &["state"]),
            queue_depth: desc(
                "global_queue_depth",
                "Tasks waiting in the runtime's injection queue.",
                &[],
            ),
        }
    }
}

impl Collector for RuntimeCollector {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn describe(&self, sink: &mut dyn FnMut(Arc<Desc>)) {
        sink(self.workers.clone());
        sink(self.tasks.clone());
        sink(self.queue_depth.clone());
    }

    fn collect(&self, sink: &mut dyn FnMut(Metric)) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let metrics = handle.metrics();
        sink(Metric::must_new_const(
            &self.workers,
            Kind::Gauge,
            metrics.num_workers() as i64,
            &[],
        ));
        sink(Metric::must_new_const(
            &self.tasks,
            Kind::Gauge,
            metrics.num_alive_tasks() as i64,
            &["alive"],
        ));
        sink(Metric::must_new_const(
            &self.queue_depth,
            Kind::Gauge,
            metrics.global_queue_depth() as i64,
            &[],
        ));
    }
}
