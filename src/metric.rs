use std::fmt;

use serde::Serialize;

use crate::{
    desc::{Desc, Labels},
    error::Result,
    utils::unix_secs,
};

/// Label key that is lifted out into [`Metric::endpoint`] for transports that
/// address series by host.
pub const ENDPOINT_LABEL: &str = "endpoint";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Kind {
    Counter,
    Gauge,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Counter => f.write_str("Counter"),
            Kind::Gauge => f.write_str("Gauge"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A single observation of a metric at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub endpoint: String,
    pub metric: String,
    pub step: u32,
    pub value: Value,
    pub kind: Kind,
    pub labels: Labels,
    pub timestamp: i64,
}

impl Metric {
    /// Build a one-off metric for `desc`, binding `label_values` to the
    /// descriptor's keys in order. Used by custom collectors.
    pub fn new_const(desc: &Desc, kind: Kind, value: impl Into<Value>, label_values: &[&str]) -> Result<Self> {
        desc.check_arity(label_values.len())?;
        Ok(Self::from_parts(
            desc,
            desc.fq_name().to_string(),
            kind,
            value.into(),
            desc.label_map(label_values),
        ))
    }

    /// Like [`Metric::new_const`] but a label mismatch is treated as a
    /// programming error and panics.
    pub fn must_new_const(desc: &Desc, kind: Kind, value: impl Into<Value>, label_values: &[&str]) -> Self {
        match Self::new_const(desc, kind, value, label_values) {
            Ok(metric) => metric,
            Err(e) => panic!("{e}"),
        }
    }

    pub(crate) fn from_parts(desc: &Desc, name: String, kind: Kind, value: Value, labels: Labels) -> Self {
        Self {
            endpoint: labels.get(ENDPOINT_LABEL).cloned().unwrap_or_default(),
            metric: name,
            step: desc.step(),
            value,
            kind,
            labels,
            timestamp: unix_secs(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.metric)?;
        for (idx, (k, v)) in self.labels.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(
            f,
            "}} {} {} step={} ts={}",
            self.value, self.kind, self.step, self.timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn const_metric_checks_arity() {
        let desc = Desc::new("host.cpu.load", "", 10, &["endpoint", "core"]);
        let err = Metric::new_const(&desc, Kind::Gauge, 1.5, &["web-1"]).unwrap_err();
        assert_eq!(
            err,
            Error::LabelArity {
                name: "host.cpu.load".into(),
                expected: 2,
                actual: 1
            }
        );

        let metric = Metric::new_const(&desc, Kind::Gauge, 1.5, &["web-1", "0"]).unwrap();
        assert_eq!(metric.labels.len(), 2);
        assert_eq!(metric.labels["endpoint"], "web-1");
        assert_eq!(metric.labels["core"], "0");
        assert_eq!(metric.endpoint, "web-1");
        assert_eq!(metric.step, 10);
        assert_eq!(metric.value, Value::Float(1.5));
    }

    #[test]
    fn endpoint_is_empty_without_label() {
        let desc = Desc::new("service.uptime", "", 5, &[]);
        let metric = Metric::new_const(&desc, Kind::Counter, 7i64, &[]).unwrap();
        assert_eq!(metric.endpoint, "");
        assert!(metric.labels.is_empty());
        assert_eq!(metric.to_string().split(' ').next(), Some("service.uptime{}"));
    }

    #[test]
    #[should_panic(expected = "expected 1 label values but got 0")]
    fn must_new_const_panics() {
        let desc = Desc::new("x", "", 5, &["a"]);
        Metric::must_new_const(&desc, Kind::Gauge, 0.0, &[]);
    }
}
