use std::{
    fmt::Write as _,
    future::{ready, Future},
    io::Write,
};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    error::DeliveryError,
    metric::{Metric, Value},
};

use super::Sink;

/// Flat JSON form of a metric as push gateways expect it: labels folded into
/// one `k=v,k=v` string with keys sorted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReported {
    pub endpoint: String,
    pub metric: String,
    pub step: u32,
    pub value: Value,
    #[serde(rename = "counterType")]
    pub counter_type: String,
    pub tags: String,
    pub timestamp: i64,
}

impl From<Metric> for MetricReported {
    fn from(m: Metric) -> Self {
        // labels are a BTreeMap so iteration is already key sorted
        let mut tags = String::new();
        for (idx, (k, v)) in m.labels.iter().enumerate() {
            if idx > 0 {
                tags.push(',');
            }
            let _ = write!(tags, "{k}={v}");
        }
        Self {
            endpoint: m.endpoint,
            metric: m.metric,
            step: m.step,
            value: m.value,
            counter_type: m.kind.to_string(),
            tags,
            timestamp: m.timestamp,
        }
    }
}

/// Writes each metric as one line of JSON to any writer, stdout by default.
pub struct WriterSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl WriterSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn write_batch(&self, batch: &[MetricReported]) -> Result<(), DeliveryError> {
        let mut writer = self.writer.lock();
        for item in batch {
            serde_json::to_writer(&mut *writer, item)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Sink for WriterSink {
    type Item = MetricReported;

    fn convert(&self, metric: Metric) -> MetricReported {
        metric.into()
    }

    fn flush(&self, batch: Vec<MetricReported>) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        ready(self.write_batch(&batch))
    }
}
