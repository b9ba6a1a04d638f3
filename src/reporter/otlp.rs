//! Push metrics to anything that speaks OTLP over gRPC.

use std::future::Future;

use opentelemetry_proto::tonic::{
    collector::metrics::v1::{
        metrics_service_client::MetricsServiceClient, ExportMetricsServiceRequest,
    },
    common::v1::{any_value::Value as AnyValueKind, AnyValue, KeyValue},
    metrics::v1::{
        metric::Data as OTelMetricData, number_data_point, AggregationTemporality, Gauge,
        Metric as OTelMetric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
    },
    resource::v1::Resource,
};
use tonic::transport::Channel;

use crate::{
    error::DeliveryError,
    metric::{Kind, Metric, Value},
};

use super::Sink;

const NANOS_PER_SEC: u64 = 1_000_000_000;

fn string_attr(key: &str, value: impl Into<String>) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(AnyValueKind::StringValue(value.into())),
        }),
    }
}

/// Map one snapshot onto an OTLP metric with a single data point. Counters
/// become non-monotonic cumulative sums since they may be decremented.
pub(crate) fn to_otel(metric: Metric) -> OTelMetric {
    let attributes: Vec<KeyValue> = metric
        .labels
        .iter()
        .map(|(k, v)| string_attr(k, v.as_str()))
        .collect();
    let value = match metric.value {
        Value::Int(v) => number_data_point::Value::AsInt(v),
        Value::Float(v) => number_data_point::Value::AsDouble(v),
    };
    let point = NumberDataPoint {
        attributes,
        start_time_unix_nano: 0,
        time_unix_nano: metric.timestamp.max(0) as u64 * NANOS_PER_SEC,
        value: Some(value),
        ..Default::default()
    };
    let data = match metric.kind {
        Kind::Counter => OTelMetricData::Sum(Sum {
            data_points: vec![point],
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic: false,
        }),
        Kind::Gauge => OTelMetricData::Gauge(Gauge {
            data_points: vec![point],
        }),
    };
    OTelMetric {
        name: metric.metric,
        data: Some(data),
        ..Default::default()
    }
}

/// Exports batches through an OTLP metrics service client. Every export
/// carries a resource identifying this host and process.
pub struct OtlpSink {
    client: MetricsServiceClient<Channel>,
    resource: Resource,
}

impl OtlpSink {
    pub fn new(client: MetricsServiceClient<Channel>) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let resource = Resource {
            attributes: vec![
                string_attr("host.name", hostname),
                string_attr("service.instance.id", uuid::Uuid::new_v4().to_string()),
            ],
            ..Default::default()
        };
        Self { client, resource }
    }

    /// Connect to an OTLP endpoint such as `http://localhost:4317`.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = MetricsServiceClient::connect(endpoint.into()).await?;
        Ok(Self::new(client))
    }
}

impl Sink for OtlpSink {
    type Item = OTelMetric;

    fn convert(&self, metric: Metric) -> OTelMetric {
        to_otel(metric)
    }

    fn flush(&self, batch: Vec<OTelMetric>) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        // Channel is a cheap handle, each flush gets its own client.
        let mut client = self.client.clone();
        let resource = self.resource.clone();
        async move {
            if batch.is_empty() {
                return Ok(());
            }
            let metrics = batch.len();
            client
                .export(ExportMetricsServiceRequest {
                    resource_metrics: vec![ResourceMetrics {
                        resource: Some(resource),
                        scope_metrics: vec![ScopeMetrics {
                            scope: None,
                            metrics: batch,
                            schema_url: opentelemetry_semantic_conventions::SCHEMA_URL.into(),
                        }],
                        schema_url: opentelemetry_semantic_conventions::SCHEMA_URL.into(),
                    }],
                })
                .await?;
            tracing::debug!(message = "exported metrics", metrics);
            Ok(())
        }
    }
}
