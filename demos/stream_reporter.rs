use std::{sync::Arc, time::Duration};

use aura::{
    BatchReporter, CounterVec, Registry, RegistryOpts, ReporterOpts, RuntimeCollector, Timer,
    TimerOpts, TimerStatistic, WriterSink,
};

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let registry = Arc::new(Registry::new(RegistryOpts {
        grace_delay: Duration::from_secs(1),
        ..Default::default()
    }));
    let requests = CounterVec::new(
        "demo.requests",
        "Requests handled by the demo loop.",
        1,
        Duration::from_secs(1),
        &["endpoint", "route"],
    );
    let latency = Timer::new(
        "demo.latency",
        "Time spent handling a request.",
        1,
        Duration::from_secs(2),
        TimerOpts {
            statistics: vec![TimerStatistic::Count, TimerStatistic::Mean, TimerStatistic::Rate1],
            percentiles: vec![0.5, 0.99],
            ..Default::default()
        },
    );
    registry.register(requests.clone())?;
    registry.register(latency.clone())?;
    registry.register(RuntimeCollector::new("demo", Duration::from_secs(5)))?;
    registry.add_reporter(BatchReporter::new(
        WriterSink::stdout(),
        ReporterOpts {
            batch_size: 20,
            flush_interval: Duration::from_secs(1),
            concurrency: 1,
        },
    ));

    let running = tokio::spawn({
        let registry = registry.clone();
        async move { registry.run().await }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    for i in 0..100u64 {
        ticker.tick().await;
        let route = if i % 3 == 0 { "/login" } else { "/home" };
        latency
            .time_future(tokio::time::sleep(Duration::from_millis(i % 7)))
            .await;
        requests.with_label_values(&["demo-host", route]).inc(1);
    }

    registry.stop()?;
    running.await??;
    // let the reporter drain what was queued before stop
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}
